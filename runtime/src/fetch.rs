//! Async HTTP client wrapping reqwest.
//!
//! Plain GET requests only. Handles redirects and timeouts, retries on 5xx
//! and transport errors, and backs off on 429. Failures surface as
//! [`FetchError`] so extractors can hand them straight to the pipeline.

use casewatch::FetchError;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

const MAX_RETRIES: u32 = 2;

/// HTTP client shared by all extractors.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_ms: u64,
    retry_delay_ms: u64,
}

impl HttpClient {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            timeout_ms,
            retry_delay_ms: 500,
        }
    }

    /// Base delay for exponential backoff between retries.
    pub fn with_retry_delay(mut self, millis: u64) -> Self {
        self.retry_delay_ms = millis;
        self
    }

    /// GET `url` and return the body text of a 2xx response.
    pub async fn get_text(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<String, FetchError> {
        let mut retries = 0u32;

        loop {
            let mut request = self
                .client
                .get(url)
                .timeout(Duration::from_millis(self.timeout_ms));
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!("{url}: HTTP {status}, retry {retries}/{MAX_RETRIES}");
                        tokio::time::sleep(self.backoff(retries)).await;
                        continue;
                    }

                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tracing::debug!("{url}: rate limited, waiting {retry_after}s");
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    if !(200..300).contains(&status) {
                        return Err(FetchError::Network(format!("HTTP {status} from {url}")));
                    }

                    return resp.text().await.map_err(|e| self.map_error(url, e));
                }
                Err(e) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!("{url}: {e}, retry {retries}/{MAX_RETRIES}");
                        tokio::time::sleep(self.backoff(retries)).await;
                        continue;
                    }
                    return Err(self.map_error(url, e));
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms * 2u64.pow(attempt - 1))
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_ms)
        } else {
            FetchError::Network(format!("{url}: {e}"))
        }
    }
}

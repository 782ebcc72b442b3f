// Copyright 2026 Casewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration from `CASEWATCH_*` environment variables.
//!
//! Every knob has a default; unparseable values fall back to it. CLI flags
//! override the data directory and the alert threshold after loading.

use casewatch::{GuardConfig, JumpLimit, PipelineConfig, Tolerances, DEFAULT_FAILED_LIMIT};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
const DEFAULT_JUMP_FLOOR: u64 = 1_000;

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub failed_limit: u32,
    pub do_error_check: bool,
    pub tolerances: Tolerances,
    /// Enables the Suspect classification when set.
    pub jump_ratio: Option<f64>,
    pub jump_floor: u64,
    pub fetch_timeout_ms: u64,
    pub run_timeout: Duration,
}

impl RuntimeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);
        let defaults = Tolerances::default();
        Self {
            data_dir: env
                .string("CASEWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            failed_limit: env.u32("CASEWATCH_FAILED_LIMIT", DEFAULT_FAILED_LIMIT),
            do_error_check: env.bool("CASEWATCH_DO_ERROR_CHECK", true),
            tolerances: Tolerances {
                infected: env.u64("CASEWATCH_TOLERANCE_INFECTED", defaults.infected),
                deceased: env.u64("CASEWATCH_TOLERANCE_DECEASED", defaults.deceased),
                recovered: env.u64("CASEWATCH_TOLERANCE_RECOVERED", defaults.recovered),
                tested: env.u64("CASEWATCH_TOLERANCE_TESTED", defaults.tested),
            },
            jump_ratio: env
                .string("CASEWATCH_JUMP_RATIO")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|r| r.is_finite() && *r > 0.0),
            jump_floor: env.u64("CASEWATCH_JUMP_FLOOR", DEFAULT_JUMP_FLOOR),
            fetch_timeout_ms: env.u64("CASEWATCH_FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS),
            run_timeout: Duration::from_secs(
                env.u64("CASEWATCH_RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT_SECS),
            ),
        }
    }

    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.data_dir = dir;
        }
        self
    }

    pub fn with_failed_limit(mut self, limit: Option<u32>) -> Self {
        if let Some(limit) = limit {
            self.failed_limit = limit;
        }
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("casewatch.db")
    }

    pub fn feed_path(&self) -> PathBuf {
        self.data_dir.join("runs.jsonl")
    }

    /// Orchestrator settings derived from this config.
    pub fn pipeline(&self) -> PipelineConfig {
        let jump_limit = self.jump_ratio.map(|ratio| JumpLimit {
            floor: self.jump_floor,
            ..JumpLimit::new(ratio)
        });
        PipelineConfig {
            guard: GuardConfig {
                enabled: self.do_error_check,
                tolerances: self.tolerances,
                jump_limit,
            },
            failed_limit: self.failed_limit,
            run_timeout: (!self.run_timeout.is_zero()).then_some(self.run_timeout),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".casewatch")
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn u64(&self, name: &str, default_value: u64) -> u64 {
        self.string(name)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default_value)
    }

    fn u32(&self, name: &str, default_value: u32) -> u32 {
        self.string(name)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(default_value)
    }

    fn bool(&self, name: &str, default_value: bool) -> bool {
        match self.string(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> RuntimeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]);
        assert_eq!(config.failed_limit, 5);
        assert!(config.do_error_check);
        assert_eq!(config.tolerances, Tolerances::default());
        assert_eq!(config.jump_ratio, None);
        assert_eq!(config.fetch_timeout_ms, 30_000);
        assert_eq!(config.run_timeout, Duration::from_secs(300));
        assert!(config.data_dir.ends_with(".casewatch"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CASEWATCH_DATA_DIR", "/var/lib/casewatch"),
            ("CASEWATCH_FAILED_LIMIT", "3"),
            ("CASEWATCH_DO_ERROR_CHECK", "false"),
            ("CASEWATCH_TOLERANCE_INFECTED", "10"),
            ("CASEWATCH_JUMP_RATIO", "0.5"),
            ("CASEWATCH_JUMP_FLOOR", "200"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/casewatch"));
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/casewatch/casewatch.db"));
        assert_eq!(config.failed_limit, 3);
        assert!(!config.do_error_check);
        assert_eq!(config.tolerances.infected, 10);
        assert_eq!(config.tolerances.deceased, 10);

        let pipeline = config.pipeline();
        assert!(!pipeline.guard.enabled);
        let jump = pipeline.guard.jump_limit.unwrap();
        assert_eq!(jump.ratio, 0.5);
        assert_eq!(jump.floor, 200);
    }

    #[test]
    fn test_garbage_falls_back() {
        let config = load(&[
            ("CASEWATCH_FAILED_LIMIT", "many"),
            ("CASEWATCH_DO_ERROR_CHECK", "maybe"),
            ("CASEWATCH_JUMP_RATIO", "-1"),
        ]);
        assert_eq!(config.failed_limit, 5);
        assert!(config.do_error_check);
        assert_eq!(config.jump_ratio, None);
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = load(&[("CASEWATCH_FAILED_LIMIT", "3")])
            .with_failed_limit(Some(7))
            .with_data_dir(Some(PathBuf::from("/tmp/cw")))
            .with_failed_limit(None);
        assert_eq!(config.failed_limit, 7);
        assert_eq!(config.feed_path(), PathBuf::from("/tmp/cw/runs.jsonl"));
    }

    #[test]
    fn test_zero_run_timeout_disables_it() {
        let config = load(&[("CASEWATCH_RUN_TIMEOUT_SECS", "0")]);
        assert_eq!(config.pipeline().run_timeout, None);
    }
}

//! Ministry of Health and Family Welfare dashboard (India).
//!
//! Headline figures sit next to `<strong>` labels as `"<value> (<delta>)"`.
//! The national total is not published; it is the sum of active, discharged
//! and deceased. The tested figure is the tenth word of the news marquee.
//! State rows are the 8-cell rows of the state table, minus the `Total#` row.

use casewatch::raw::{keys, row};
use casewatch::{FetchError, RawFields, RawValue};
use regex::Regex;
use scraper::{ElementRef, Html};

use super::{selector, text_of};

const STATE_ROW_CELLS: usize = 8;
const TOTAL_ROW_LABEL: &str = "Total#";
const MARQUEE_TESTED_WORD: usize = 9;

pub fn parse(html: &str) -> Result<RawFields, FetchError> {
    let document = Html::parse_document(html);
    let figure = Regex::new(r"^\s*([\d,]+)\s*(?:\(\s*([+-]?[\d,]+)\s*\))?")
        .map_err(|e| FetchError::UnexpectedShape(e.to_string()))?;

    let active = headline(&document, "Active", &figure)?;
    let discharged = headline(&document, "Discharged", &figure)?;
    let deaths = headline(&document, "Deaths", &figure)?;

    if active.is_none() && discharged.is_none() && deaths.is_none() {
        return Err(FetchError::UnexpectedShape("no headline figures found".into()));
    }

    let mut raw = RawFields::new();
    raw.set_opt(keys::ACTIVE, active.map(|f| f.value));
    raw.set_opt(keys::RECOVERED, discharged.map(|f| f.value));
    raw.set_opt(keys::DECEASED, deaths.map(|f| f.value));
    raw.set_opt(keys::DAILY_DECEASED, deaths.and_then(|f| f.delta));
    if let (Some(a), Some(r), Some(d)) = (active, discharged, deaths) {
        raw.set(
            keys::INFECTED,
            RawValue::from(a.value.saturating_add(r.value).saturating_add(d.value)),
        );
    }
    raw.set_opt(keys::TESTED, marquee_tested(&document)?);

    for region in state_rows(&document)? {
        raw.push_region(region);
    }

    Ok(raw)
}

#[derive(Debug, Clone, Copy)]
struct Figure {
    value: u64,
    delta: Option<i64>,
}

/// The figure printed right after the `<strong>` label containing `label`.
fn headline(document: &Html, label: &str, figure: &Regex) -> Result<Option<Figure>, FetchError> {
    let strong = selector("strong")?;
    let Some(label_el) = document
        .select(&strong)
        .find(|el| text_of(*el).contains(label))
    else {
        return Ok(None);
    };
    let Some(value_el) = label_el.next_siblings().find_map(ElementRef::wrap) else {
        return Ok(None);
    };

    let text = text_of(value_el);
    let Some(caps) = figure.captures(&text) else {
        tracing::debug!("mohfw: unreadable {label} figure {text:?}");
        return Ok(None);
    };
    let value = caps
        .get(1)
        .and_then(|m| strip_commas(m.as_str()).parse::<u64>().ok());
    let delta = caps
        .get(2)
        .and_then(|m| strip_commas(m.as_str()).parse::<i64>().ok());
    Ok(value.map(|value| Figure { value, delta }))
}

fn marquee_tested(document: &Html) -> Result<Option<String>, FetchError> {
    let marquee = selector("marquee span")?;
    let text: String = document.select(&marquee).map(text_of).collect::<Vec<_>>().join(" ");
    Ok(text
        .split_whitespace()
        .nth(MARQUEE_TESTED_WORD)
        .map(strip_commas)
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit())))
}

fn state_rows(document: &Html) -> Result<Vec<casewatch::RawRow>, FetchError> {
    let rows = selector("#state-data table tbody tr")?;
    let cells = selector("td")?;

    let mut regions = Vec::new();
    for tr in document.select(&rows) {
        let values: Vec<String> = tr.select(&cells).map(text_of).collect();
        if values.len() != STATE_ROW_CELLS || values[1] == TOTAL_ROW_LABEL {
            continue;
        }
        regions.push(row([
            (keys::REGION, RawValue::from(values[1].as_str())),
            (keys::INFECTED_COUNT, RawValue::from(values[2].as_str())),
            (keys::RECOVERED_COUNT, RawValue::from(values[4].as_str())),
            (keys::DECEASED_COUNT, RawValue::from(values[6].as_str())),
        ]));
    }
    Ok(regions)
}

fn strip_commas(s: &str) -> String {
    s.replace(',', "")
}

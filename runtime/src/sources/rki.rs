//! RKI case table (Germany).
//!
//! Every body row but the last is a federal state: name in column 0, cases
//! in column 1, deaths in column 4. The last row holds the national totals
//! with deaths shifted to column 5.

use casewatch::raw::{keys, row};
use casewatch::{FetchError, RawFields, RawValue};
use scraper::Html;

use super::{selector, text_of};

pub fn parse(html: &str) -> Result<RawFields, FetchError> {
    let document = Html::parse_document(html);
    let row_sel = selector("tbody > tr")?;
    let cell_sel = selector("td")?;

    let rows: Vec<Vec<String>> = document
        .select(&row_sel)
        .map(|tr| tr.select(&cell_sel).map(text_of).collect())
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect();

    let Some((totals, states)) = rows.split_last() else {
        return Err(FetchError::UnexpectedShape("no case table rows".into()));
    };

    let mut raw = RawFields::new();
    raw.set_opt(keys::INFECTED, totals.get(1).cloned());
    raw.set_opt(keys::DECEASED, totals.get(5).cloned());

    for cells in states {
        let (Some(name), Some(infected)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        let mut region = row([
            (keys::REGION, RawValue::from(name.as_str())),
            (keys::INFECTED_COUNT, RawValue::from(infected.as_str())),
        ]);
        if let Some(deceased) = cells.get(4) {
            region.insert(keys::DECEASED_COUNT.into(), RawValue::from(deceased.as_str()));
        }
        raw.push_region(region);
    }

    Ok(raw)
}

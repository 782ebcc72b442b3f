//! Read-side CLI handlers: `latest`, `history`, `countries`.

use crate::cli::output;
use crate::config::RuntimeConfig;
use crate::sources::catalog;
use crate::store::SqliteStore;
use anyhow::Result;
use casewatch::{SnapshotContent, SnapshotStore};

fn open_store(config: &RuntimeConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.store_path())
}

/// Stored spelling of `country`; falls back to the catalog's spelling.
fn stored_name(store: &SqliteStore, country: &str) -> Result<String> {
    let known = store.countries()?;
    Ok(known
        .into_iter()
        .find(|c| c.eq_ignore_ascii_case(country.trim()))
        .or_else(|| catalog::canonical(country).map(str::to_string))
        .unwrap_or_else(|| country.trim().to_string()))
}

/// Print the latest snapshot of one country.
pub fn run_latest(country: &str, config: &RuntimeConfig) -> Result<()> {
    let store = open_store(config)?;
    let name = stored_name(&store, country)?;
    let Some(snapshot) = store.get_latest(&name)? else {
        anyhow::bail!("no snapshot stored for {name}");
    };

    if output::is_json() {
        output::print_json(&snapshot);
        return Ok(());
    }

    println!(
        "  {} (observed {})\n",
        snapshot.country(),
        snapshot.observed_at.format("%Y-%m-%d %H:%M")
    );
    print_counters(&snapshot.content);
    if !snapshot.content.region_breakdown.is_empty() {
        println!("\n  {:<24} {:>10} {:>8}", "region", "infected", "deceased");
        for region in &snapshot.content.region_breakdown {
            println!(
                "  {:<24} {:>10} {:>8}",
                region.region,
                region.infected_count,
                output::count(region.deceased_count)
            );
        }
    }
    println!("\n  source: {}", snapshot.content.source_url);
    Ok(())
}

/// Print the most recent `limit` history entries of one country, oldest first.
pub fn run_history(country: &str, limit: Option<usize>, config: &RuntimeConfig) -> Result<()> {
    let store = open_store(config)?;
    let name = stored_name(&store, country)?;
    let mut entries = store.history(&name)?;
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    if output::is_json() {
        output::print_json(&serde_json::json!({ "country": name, "entries": entries }));
    } else if entries.is_empty() {
        println!("  No history for {name}.");
    } else {
        println!(
            "  {:>4} {:>10} {:>8} {:>10} {:>12}",
            "#", "infected", "deceased", "recovered", "tested"
        );
        for (i, entry) in entries.iter().enumerate() {
            println!(
                "  {:>4} {:>10} {:>8} {:>10} {:>12}",
                i + 1,
                output::count(entry.infected),
                output::count(entry.deceased),
                output::count(entry.recovered),
                output::count(entry.tested),
            );
        }
    }
    Ok(())
}

/// List catalog countries with their stored state.
pub fn run_countries(config: &RuntimeConfig) -> Result<()> {
    let store = open_store(config)?;
    let mut rows = Vec::new();
    for country in catalog::COUNTRIES {
        let latest = store.get_latest(country)?;
        rows.push(serde_json::json!({
            "country": country,
            "observedAt": latest.as_ref().map(|s| s.observed_at),
            "infected": latest.as_ref().and_then(|s| s.content.infected),
            "historyLen": store.history_len(country)?,
            "failureCount": store.get_failure_count(country)?,
        }));
    }

    if output::is_json() {
        output::print_json(&serde_json::json!({ "countries": rows }));
        return Ok(());
    }

    println!(
        "  {:<12} {:<17} {:>10} {:>8} {:>9}",
        "country", "observed", "infected", "history", "failures"
    );
    for row in &rows {
        println!(
            "  {:<12} {:<17} {:>10} {:>8} {:>9}",
            row["country"].as_str().unwrap_or_default(),
            row["observedAt"]
                .as_str()
                .map(|t| t.chars().take(16).collect::<String>())
                .unwrap_or_else(|| "-".into()),
            output::count(row["infected"].as_u64()),
            row["historyLen"],
            row["failureCount"],
        );
    }
    Ok(())
}

fn print_counters(content: &SnapshotContent) {
    let lines = [
        ("infected", content.infected.map(|v| v.to_string()), content.daily_infected),
        ("deceased", content.deceased.map(|v| v.to_string()), content.daily_deceased),
        ("recovered", content.recovered.map(|v| v.to_string()), None),
        ("tested", content.tested.map(|v| v.to_string()), content.daily_tested),
        ("active", content.active.map(|v| v.to_string()), None),
        ("R", content.reproduction_number.map(|r| format!("{r:.2}")), None),
    ];
    for (label, value, daily) in lines {
        let Some(value) = value else { continue };
        match daily {
            Some(d) => println!("  {label:<10} {value:>10}  ({d:+} today)"),
            None => println!("  {label:<10} {value:>10}"),
        }
    }
}

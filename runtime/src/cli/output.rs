//! Output mode flags, set once by `main` from the global CLI options.

use serde::Serialize;

pub fn is_json() -> bool {
    flag("CASEWATCH_JSON")
}

pub fn is_quiet() -> bool {
    flag("CASEWATCH_QUIET")
}

pub fn is_verbose() -> bool {
    flag("CASEWATCH_VERBOSE")
}

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: failed to encode output: {e}"),
    }
}

/// Format an optional counter for table output.
pub fn count<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

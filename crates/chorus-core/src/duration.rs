//! Free-text duration estimates
//!
//! Plans carry human-written estimates such as `"2 hours"`, `"45 min"` or
//! `"1.5 days"`. Units are tried in the order hours, minutes, days; the first
//! unit with a number in front of it wins.

use std::sync::OnceLock;

use regex::Regex;

fn unit_patterns() -> &'static [(Regex, f64); 3] {
    static PATTERNS: OnceLock<[(Regex, f64); 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let pattern = |unit: &str| {
            Regex::new(&format!(r"(\d*\.?\d+)\s*{unit}")).expect("static duration pattern")
        };
        [
            (pattern(r"(?:hours?|hrs?)\b"), 60.0),
            (pattern(r"(?:minutes?|mins?)\b"), 1.0),
            (pattern(r"days?\b"), 24.0 * 60.0),
        ]
    })
}

/// Parse a free-text estimate into minutes
///
/// Returns `None` when no `<number> <unit>` pair is present, leaving the
/// fallback to the caller.
pub fn parse_minutes(text: &str) -> Option<f64> {
    let text = text.to_lowercase();
    unit_patterns().iter().find_map(|(re, scale)| {
        re.captures(&text)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .map(|value| value * scale)
    })
}

/// Parse an estimate, falling back to `default_minutes` when unparseable
pub fn minutes_or(text: &str, default_minutes: f64) -> f64 {
    parse_minutes(text).unwrap_or(default_minutes)
}

/// Render minutes the way plans write them
///
/// Below one hour: whole minutes (`"45 minutes"`); otherwise hours with one
/// decimal (`"1.5 hours"`).
pub fn format_minutes(minutes: f64) -> String {
    if minutes < 60.0 {
        format!("{} minutes", minutes.trunc() as u64)
    } else {
        format!("{:.1} hours", minutes / 60.0)
    }
}

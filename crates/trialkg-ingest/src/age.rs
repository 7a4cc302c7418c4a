//! Registry age strings (`"18 Years"`, `"6 Months"`, `"N/A"`) to float years.

use regex::Regex;
use std::sync::OnceLock;

const DAYS_PER_YEAR: f64 = 365.25;

fn age_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(years?|months?|weeks?|days?|hours?|minutes?)?\s*$")
            .expect("age pattern is a valid regex")
    })
}

/// Convert an age string to years. Returns `None` for `"N/A"`, empty
/// strings and anything not of the form `<number> [unit]`. A bare number
/// is taken as years.
pub fn parse_age_years(raw: &str) -> Option<f64> {
    let caps = age_pattern().captures(raw)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "years".to_string());
    let years = match unit.trim_end_matches('s') {
        "year" => value,
        "month" => value / 12.0,
        "week" => value * 7.0 / DAYS_PER_YEAR,
        "day" => value / DAYS_PER_YEAR,
        "hour" => value / (24.0 * DAYS_PER_YEAR),
        "minute" => value / (60.0 * 24.0 * DAYS_PER_YEAR),
        _ => return None,
    };
    Some(years)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_registry_units() {
        assert_relative_eq!(parse_age_years("18 Years").unwrap(), 18.0);
        assert_relative_eq!(parse_age_years("1 Year").unwrap(), 1.0);
        assert_relative_eq!(parse_age_years("6 Months").unwrap(), 0.5);
        assert_relative_eq!(parse_age_years("30 days").unwrap(), 30.0 / 365.25);
        assert_relative_eq!(parse_age_years("65").unwrap(), 65.0);
        assert_relative_eq!(parse_age_years(" 2 Weeks ").unwrap(), 14.0 / 365.25);
    }

    #[test]
    fn rejects_non_ages() {
        assert_eq!(parse_age_years("N/A"), None);
        assert_eq!(parse_age_years(""), None);
        assert_eq!(parse_age_years("eighteen years"), None);
    }
}

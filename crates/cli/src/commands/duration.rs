use anyhow::{anyhow, Result};
use std::time::Duration;

/// Parses `500ms`, `30s`, `15m`, `2h` or `1d`. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let (number, unit) = match s.strip_suffix("ms") {
        Some(number) => (number, "ms"),
        None => {
            let split = s
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| anyhow!("Duration must have a unit (ms, s, m, h, d)"))?;
            s.split_at(split)
        }
    };

    if number.is_empty() {
        return Err(anyhow!("Duration must start with a number"));
    }
    let value: u64 = number
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {number}"))?;
    if value == 0 {
        return Err(anyhow!("Duration cannot be zero"));
    }

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => return Err(anyhow!("Unknown duration unit '{other}' (use ms, s, m, h, d)")),
    };
    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration is too large: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_duration_trims_and_ignores_case() {
        assert_eq!(parse_duration("  12H ").unwrap(), Duration::from_secs(12 * 3600));
    }

    #[test]
    fn test_parse_duration_rejects_zero() {
        assert!(parse_duration("0m").is_err());
    }

    #[test]
    fn test_parse_duration_requires_unit() {
        assert!(parse_duration("90").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_unknown_unit() {
        let err = parse_duration("3w").unwrap_err();
        assert!(err.to_string().contains("'w'"));
    }

    #[test]
    fn test_parse_duration_requires_number() {
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration(&format!("{}d", u64::MAX)).is_err());
    }
}

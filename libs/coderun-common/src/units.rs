//! Parsing of the engine's string notations for durations, CPU counts and
//! memory sizes.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct UnitError(String);

/// "5s", "500ms", "1m 30s"
pub fn parse_duration(s: &str) -> Result<Duration, UnitError> {
    let d = humantime::parse_duration(s.trim()).map_err(|e| UnitError(e.to_string()))?;
    if d.is_zero() {
        return Err(UnitError("duration must be positive".to_string()));
    }
    Ok(d)
}

/// Fractional CPU count ("1", "0.5") to Docker nano-CPUs
pub fn parse_cpus(s: &str) -> Result<i64, UnitError> {
    let cpus: f64 = s
        .trim()
        .parse()
        .map_err(|_| UnitError("expected a number of CPUs".to_string()))?;
    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(UnitError("cpu limit must be positive".to_string()));
    }
    Ok((cpus * 1_000_000_000.0) as i64)
}

/// Memory size with an optional k/m/g suffix ("20m", "1g", "65536") to bytes
pub fn parse_memory(s: &str) -> Result<i64, UnitError> {
    let s = s.trim().to_lowercase();
    let s = s.strip_suffix('b').unwrap_or(&s);
    let (digits, multiplier) = match s.chars().last() {
        Some('k') => (&s[..s.len() - 1], 1024),
        Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| UnitError("expected a size like 256m".to_string()))?;
    if value <= 0 {
        return Err(UnitError("memory limit must be positive".to_string()));
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| UnitError("memory limit too large".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("five").is_err());
    }

    #[test]
    fn test_parse_cpus() {
        assert_eq!(parse_cpus("1").unwrap(), 1_000_000_000);
        assert_eq!(parse_cpus("0.5").unwrap(), 500_000_000);
        assert!(parse_cpus("0").is_err());
        assert!(parse_cpus("-1").is_err());
        assert!(parse_cpus("all").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("20m").unwrap(), 20 * 1024 * 1024);
        assert_eq!(parse_memory("256M").unwrap(), 256 * 1024 * 1024);
        assert_eq!(parse_memory("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_memory("65536").unwrap(), 65536);
        assert!(parse_memory("").is_err());
        assert!(parse_memory("m").is_err());
        assert!(parse_memory("0m").is_err());
    }
}

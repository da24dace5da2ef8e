use std::time::Instant;

/// Parse `true`/`false` in any letter case.
pub fn parse_is_sponsor(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("expected true or false, got '{s}'")),
    }
}

/// Elapsed seconds since `start`.
pub fn elapsed_s(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sponsor_flag_is_case_insensitive() {
        assert_eq!(parse_is_sponsor("TRUE"), Ok(true));
        assert_eq!(parse_is_sponsor("False"), Ok(false));
        assert!(parse_is_sponsor("yes").is_err());
        assert!(parse_is_sponsor("").is_err());
    }
}

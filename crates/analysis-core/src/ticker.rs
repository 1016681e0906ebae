use crate::AnalysisError;

/// Validate a ticker symbol produced by the external name-resolution service.
///
/// Trims, upper-cases and accepts 1-10 characters of `A-Z`, `0-9`, `.` and `-`.
pub fn normalize_ticker(raw: &str) -> Result<String, AnalysisError> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty() || ticker.len() > 10 {
        return Err(AnalysisError::DataQuality(format!(
            "invalid ticker '{}': expected 1-10 characters",
            raw.trim()
        )));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(AnalysisError::DataQuality(format!(
            "invalid ticker '{}': unexpected character",
            raw.trim()
        )));
    }
    Ok(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_ticker("brk.b").unwrap(), "BRK.B");
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("AAPL; DROP").is_err());
        assert!(normalize_ticker("ABCDEFGHIJK").is_err());
    }
}

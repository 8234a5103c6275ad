//! Positional column aliases.
//!
//! Callers address columns as `col1`, `col2`, ... independent of the file's
//! real header text. Translation is total: an out-of-range alias is returned
//! unchanged so downstream stages produce a clear unknown-column error
//! instead of a translation-time failure.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, EngineResult};

static ALIAS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcol([0-9]+)\b").unwrap());

/// Parse `colN` into its 1-based position. Returns `None` for anything else,
/// including `col0` and non-whole-word shapes like `column3`.
pub fn parse_alias(token: &str) -> Option<usize> {
    let digits = token.strip_prefix("col")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    if n >= 1 { Some(n) } else { None }
}

/// Translate an alias to the real identifier at that position. Non-alias
/// tokens and out-of-range positions pass through unchanged.
pub fn to_real<'a>(token: &'a str, schema: &'a [String]) -> &'a str {
    match parse_alias(token) {
        Some(n) if n <= schema.len() => schema[n - 1].as_str(),
        _ => token,
    }
}

/// Rewrite every whole-word `colN` token in a filter-expression text into
/// the real column identifier. Literals and partial matches (`column3`) are
/// left untouched; out-of-range aliases are preserved as literal tokens.
pub fn rewrite_expression(text: &str, schema: &[String]) -> String {
    ALIAS_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let whole = &caps[0];
            to_real(whole, schema).to_string()
        })
        .into_owned()
}

/// Parse a sort key with the `-colN` descending shorthand. Returns the bare
/// key and whether the prefix requested descending order.
pub fn parse_sort_key(raw: &str) -> EngineResult<(String, bool)> {
    let trimmed = raw.trim();
    let (key, descending) = match trimmed.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };
    if key.is_empty() {
        return Err(EngineError::translation(raw, "empty sort key"));
    }
    Ok((key.to_string(), descending))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<String> {
        vec!["name".to_string(), "region".to_string(), "amount".to_string()]
    }

    #[test]
    fn alias_round_trip() {
        let s = schema();
        for (i, real) in s.iter().enumerate() {
            assert_eq!(to_real(&format!("col{}", i + 1), &s), real.as_str());
        }
        assert_eq!(to_real("col4", &s), "col4");
        assert_eq!(to_real("col99", &s), "col99");
    }

    #[test]
    fn col_zero_is_not_an_alias() {
        assert_eq!(parse_alias("col0"), None);
        assert_eq!(parse_alias("col"), None);
        assert_eq!(parse_alias("col1x"), None);
    }

    #[test]
    fn rewrite_replaces_whole_words_only() {
        let s = schema();
        let out = rewrite_expression("col3 > 100 AND col1 == 'x'", &s);
        assert_eq!(out, "amount > 100 AND name == 'x'");
        // partial match never rewritten
        assert_eq!(rewrite_expression("column3 > 1", &s), "column3 > 1");
        // literal numbers untouched
        assert_eq!(rewrite_expression("col2 == 100", &s), "region == 100");
    }

    #[test]
    fn rewrite_preserves_out_of_range() {
        let s = schema();
        assert_eq!(rewrite_expression("col9 > 0", &s), "col9 > 0");
    }

    #[test]
    fn sort_key_shorthand() {
        assert_eq!(parse_sort_key("col2").unwrap(), ("col2".to_string(), false));
        assert_eq!(parse_sort_key("-col2").unwrap(), ("col2".to_string(), true));
        assert!(parse_sort_key("-").is_err());
    }
}

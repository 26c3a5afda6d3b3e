use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Characters of the caller's input kept in the usage log.
pub const INPUT_SUMMARY_CHARS: usize = 50;

/// One settled (or attempted) metered operation. Rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub api_key_id: i64,
    pub operation: String,
    pub cost: Decimal,
    pub input: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the usage log.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub api_key_id: i64,
    pub operation: String,
    pub cost: Decimal,
    pub input: Option<String>,
    pub success: bool,
}

/// Shorten the caller's input for logging; the full expression is not persisted.
pub fn summarize_input(input: &str) -> String {
    if input.chars().count() > INPUT_SUMMARY_CHARS {
        let head: String = input.chars().take(INPUT_SUMMARY_CHARS).collect();
        format!("{}...", head)
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_kept_verbatim() {
        assert_eq!(summarize_input("2 + 2"), "2 + 2");
        let exactly = "x".repeat(INPUT_SUMMARY_CHARS);
        assert_eq!(summarize_input(&exactly), exactly);
    }

    #[test]
    fn test_long_input_truncated_with_ellipsis() {
        let long = "1+".repeat(40);
        let summary = summarize_input(&long);
        assert_eq!(summary.len(), INPUT_SUMMARY_CHARS + 3);
        assert!(summary.ends_with("..."));
        assert!(long.starts_with(summary.trim_end_matches("...")));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 60 two-byte chars: byte slicing at 50 would split a code point
        let input = "é".repeat(60);
        let summary = summarize_input(&input);
        assert_eq!(summary.chars().count(), INPUT_SUMMARY_CHARS + 3);
    }
}

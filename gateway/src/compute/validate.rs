//! Pre-evaluation screening of caller-supplied expressions.

use once_cell::sync::Lazy;
use regex::RegexSet;

/// Call patterns that are never passed to the evaluator, whatever it supports.
static BLOCKED_CALLS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)import\s*\(",
        r"(?i)require\s*\(",
        r"(?i)eval\s*\(",
        r"(?i)function\s*\(",
    ])
    .expect("blocked call patterns are valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooLong { max: usize },
    Blocked,
}

impl Rejection {
    pub fn message(&self) -> String {
        match self {
            Rejection::Empty => "Expression is required".to_string(),
            Rejection::TooLong { max } => {
                format!("Expression too long (max {} characters)", max)
            }
            Rejection::Blocked => "Expression contains blocked operations".to_string(),
        }
    }
}

/// Check length and denylist. Length is counted in characters.
pub fn check_expression(expression: &str, max_len: usize) -> Result<(), Rejection> {
    if expression.is_empty() {
        return Err(Rejection::Empty);
    }
    if expression.chars().count() > max_len {
        return Err(Rejection::TooLong { max: max_len });
    }
    if BLOCKED_CALLS.is_match(expression) {
        return Err(Rejection::Blocked);
    }
    Ok(())
}

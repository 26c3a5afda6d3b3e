use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("invalid expression: {0}")]
    Invalid(String),

    #[error("result is not a scalar")]
    NonScalar,
}

/// A single value an expression may produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    /// JSON form of the result. Non-finite floats have no JSON number form and go out as strings.
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(non_finite_label(*f).to_string())),
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

fn non_finite_label(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

/// The external expression engine. Semantics belong to the implementation.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str) -> Result<Scalar, EvalError>;
}

/// `evalexpr`-backed evaluator with its builtin math functions and no variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalexprEvaluator;

impl Evaluator for EvalexprEvaluator {
    fn evaluate(&self, expression: &str) -> Result<Scalar, EvalError> {
        let value = evalexpr::eval(expression).map_err(|e| EvalError::Invalid(e.to_string()))?;
        match value {
            evalexpr::Value::Int(i) => Ok(Scalar::Int(i)),
            evalexpr::Value::Float(f) => Ok(Scalar::Float(f)),
            evalexpr::Value::Boolean(b) => Ok(Scalar::Bool(b)),
            evalexpr::Value::String(s) => Ok(Scalar::Text(s)),
            evalexpr::Value::Tuple(_) | evalexpr::Value::Empty => Err(EvalError::NonScalar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(EvalexprEvaluator.evaluate("2 + 3 * 4"), Ok(Scalar::Int(14)));
    }

    #[test]
    fn test_float_arithmetic() {
        assert_eq!(EvalexprEvaluator.evaluate("1.5 * 2"), Ok(Scalar::Float(3.0)));
    }

    #[test]
    fn test_comparison_yields_bool() {
        assert_eq!(EvalexprEvaluator.evaluate("3 > 2"), Ok(Scalar::Bool(true)));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            EvalexprEvaluator.evaluate("2 +* )"),
            Err(EvalError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_variable_is_invalid() {
        assert!(matches!(
            EvalexprEvaluator.evaluate("x + 1"),
            Err(EvalError::Invalid(_))
        ));
    }

    #[test]
    fn test_tuple_is_not_scalar() {
        assert_eq!(EvalexprEvaluator.evaluate("1, 2"), Err(EvalError::NonScalar));
    }

    #[test]
    fn test_empty_result_is_not_scalar() {
        assert_eq!(EvalexprEvaluator.evaluate("()"), Err(EvalError::NonScalar));
    }

    #[test]
    fn test_non_finite_floats_become_strings() {
        assert_eq!(Scalar::Float(f64::INFINITY).to_json(), Value::from("Infinity"));
        assert_eq!(Scalar::Float(f64::NEG_INFINITY).to_json(), Value::from("-Infinity"));
        assert_eq!(Scalar::Float(f64::NAN).to_json(), Value::from("NaN"));
        assert_eq!(Scalar::Float(0.5).to_json(), Value::from(0.5));
    }
}

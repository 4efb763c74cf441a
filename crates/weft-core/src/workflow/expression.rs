//! JEXL expression evaluator for conditional transitions.
//!
//! Wraps `jexl_eval::Evaluator` with a few string/collection transforms and
//! evaluates expressions against the run state. State is always passed as
//! the evaluation context, never interpolated into expression strings.
//!
//! The evaluator is built on demand by the resolver and never held across
//! an await point.

use serde_json::{Value, json};
use weft_types::workflow::State;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms registered.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Works on strings, arrays and objects.
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean using JavaScript-like truthiness.
    ///
    /// The `context` must be a JSON object.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(Self::value_to_bool(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate a transition condition against the run state.
    pub fn evaluate_condition(&self, expression: &str, state: &State) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expression, &state_context(state))
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    pub fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the evaluation context for a run state.
///
/// Shape: every top-level state key, plus the whole state under `state`
/// (which wins if the state itself has a `state` key).
pub fn state_context(state: &State) -> Value {
    let mut context = state.clone();
    context.insert("state".to_string(), Value::Object(state.clone()));
    Value::Object(context)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    fn state(v: Value) -> State {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_condition_on_top_level_key() {
        let s = state(json!({ "status": "approved", "amount": 250.0 }));
        let eval = evaluator();
        assert!(eval.evaluate_condition("status == 'approved'", &s).unwrap());
        assert!(eval.evaluate_condition("amount < 1000", &s).unwrap());
        assert!(!eval.evaluate_condition("amount > 1000", &s).unwrap());
    }

    #[test]
    fn test_condition_through_state_namespace() {
        let s = state(json!({ "order": { "items": ["a", "b", "c"] } }));
        let eval = evaluator();
        assert!(eval.evaluate_condition("state.order.items|length == 3", &s).unwrap());
    }

    #[test]
    fn test_state_key_named_state_is_shadowed() {
        let s = state(json!({ "state": "draft", "x": 1.0 }));
        let ctx = state_context(&s);
        assert_eq!(ctx["state"]["state"], json!("draft"));
        assert_eq!(ctx["x"], json!(1.0));
    }

    #[test]
    fn test_boolean_and_or() {
        let s = state(json!({ "ready": true, "blocked": false }));
        let eval = evaluator();
        assert!(eval.evaluate_condition("ready && blocked == false", &s).unwrap());
        assert!(eval.evaluate_condition("blocked || ready", &s).unwrap());
    }

    #[test]
    fn test_missing_key_is_falsy() {
        let eval = evaluator();
        assert!(!eval.evaluate_condition("state.nothing", &State::new()).unwrap());
    }

    #[test]
    fn test_transforms() {
        let ctx = json!({ "name": "  Hello World  ", "tags": ["x", "y"] });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("name|trim|lower", &ctx).unwrap(), json!("hello world"));
        assert_eq!(eval.evaluate_value("name|upper|trim", &ctx).unwrap(), json!("HELLO WORLD"));
        assert!(eval.evaluate_bool("tags|contains('y')", &ctx).unwrap());
        assert!(eval.evaluate_bool("name|trim|startsWith('Hello')", &ctx).unwrap());
        assert!(eval.evaluate_bool("name|trim|endsWith('World')", &ctx).unwrap());
        assert!(!eval.evaluate_bool("(tags|length > 1)|not", &ctx).unwrap());
    }

    #[test]
    fn test_in_operator_array() {
        let ctx = json!({ "roles": ["admin", "user"] });
        let eval = evaluator();
        assert!(eval.evaluate_bool("'admin' in roles", &ctx).unwrap());
        assert!(!eval.evaluate_bool("'root' in roles", &ctx).unwrap());
    }

    #[test]
    fn test_truthiness() {
        assert!(!WorkflowEvaluator::value_to_bool(&json!(null)));
        assert!(!WorkflowEvaluator::value_to_bool(&json!("")));
        assert!(!WorkflowEvaluator::value_to_bool(&json!(0.0)));
        assert!(WorkflowEvaluator::value_to_bool(&json!(42.0)));
        assert!(WorkflowEvaluator::value_to_bool(&json!("x")));
        assert!(WorkflowEvaluator::value_to_bool(&json!([])));
    }

    #[test]
    fn test_invalid_context_not_object() {
        assert!(matches!(
            evaluator().evaluate_bool("true", &json!("nope")),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        assert!(matches!(
            evaluator().evaluate_bool("a ==", &json!({})),
            Err(ExpressionError::EvalFailed(_))
        ));
    }
}

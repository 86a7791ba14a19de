//! The expression evaluator seam.

use crate::error::EvalError;
use std::fmt;
use std::sync::Arc;

/// Value produced by evaluating an expression.
pub type Value = serde_json::Value;

/// Named values visible to an expression.
pub type Variables = serde_json::Map<String, Value>;

/// Callback behind the `include(file)` function: returns rendered markup.
pub type IncludeFn = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// Everything an expression can see while it is evaluated.
#[derive(Clone, Default)]
pub struct Scope {
    pub vars: Variables,
    pub include: Option<IncludeFn>,
}

impl Scope {
    pub fn new(vars: Variables) -> Self {
        Self {
            vars,
            include: None,
        }
    }

    pub fn with_include(mut self, include: IncludeFn) -> Self {
        self.include = Some(include);
        self
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("vars", &self.vars)
            .field("include", &self.include.is_some())
            .finish()
    }
}

/// Evaluates expression source text against a scope.
///
/// Implementations must be stateless across calls: concurrent renders share
/// one evaluator, and nothing one render evaluates may leak into another.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, code: &str, scope: &Scope) -> Result<Value, EvalError>;
}

/// Text form of a value when it is substituted into output.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify(&json!("a")), "a");
        assert_eq!(stringify(&json!(1)), "1");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&Value::Null), "");
    }

    #[test]
    fn test_stringify_array_joins_with_comma() {
        assert_eq!(stringify(&json!(["a", 1, ["b", "c"]])), "a,1,b,c");
    }

    #[test]
    fn test_stringify_object_as_json() {
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }
}

//! Default [`Evaluator`] backed by minijinja expressions.
//!
//! Expressions use minijinja syntax: `id`, `"DE" | lower`, `{"id": ["a", "b"]}`,
//! `include("partials/nav.html")`. Undefined names are errors.

use super::eval::{Evaluator, Scope, Value};
use crate::error::EvalError;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name under which the include callback is exposed to expressions.
const INCLUDE: &str = "include";

#[derive(Debug, Default, Clone, Copy)]
pub struct JinjaEvaluator;

impl Evaluator for JinjaEvaluator {
    fn evaluate(&self, code: &str, scope: &Scope) -> Result<Value, EvalError> {
        // A fresh environment per call keeps evaluations independent.
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let expr = env
            .compile_expression(code.trim())
            .map_err(|err| EvalError::new(code, err.to_string()))?;

        let mut ctx: BTreeMap<&str, minijinja::Value> = scope
            .vars
            .iter()
            .map(|(key, value)| (key.as_str(), minijinja::Value::from_serialize(value)))
            .collect();

        if let Some(include) = &scope.include {
            let include = Arc::clone(include);
            let function = minijinja::Value::from_function(
                move |file: String| -> Result<minijinja::Value, minijinja::Error> {
                    include(&file)
                        .map(minijinja::Value::from_safe_string)
                        .map_err(|msg| minijinja::Error::new(ErrorKind::InvalidOperation, msg))
                },
            );
            ctx.insert(INCLUDE, function);
        }

        let result = expr
            .eval(&ctx)
            .map_err(|err| EvalError::new(code, err.to_string()))?;
        // Strict mode only rejects undefined values once they are used.
        if result.is_undefined() {
            return Err(EvalError::new(code, "undefined value"));
        }

        serde_json::to_value(&result).map_err(|err| EvalError::new(code, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(vars: Value) -> Scope {
        match vars {
            Value::Object(map) => Scope::new(map),
            _ => Scope::default(),
        }
    }

    #[test]
    fn test_literals() {
        let eval = JinjaEvaluator;
        assert_eq!(eval.evaluate("1", &Scope::default()).unwrap(), json!(1));
        assert_eq!(eval.evaluate("'DE'", &Scope::default()).unwrap(), json!("DE"));
        assert_eq!(
            eval.evaluate("[\"a\", \"b\"]", &Scope::default()).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_variables_and_filters() {
        let eval = JinjaEvaluator;
        let scope = scope(json!({"id": "a", "items": [1, 2, 3]}));
        assert_eq!(eval.evaluate(" id ", &scope).unwrap(), json!("a"));
        assert_eq!(eval.evaluate("items | length", &scope).unwrap(), json!(3));
        assert_eq!(eval.evaluate("id ~ '-' ~ id", &scope).unwrap(), json!("a-a"));
    }

    #[test]
    fn test_map_literal() {
        let eval = JinjaEvaluator;
        let value = eval
            .evaluate("{\"id\": [\"a\", \"b\"]}", &Scope::default())
            .unwrap();
        assert_eq!(value, json!({"id": ["a", "b"]}));
    }

    #[test]
    fn test_undefined_is_error() {
        let eval = JinjaEvaluator;
        let err = eval.evaluate("missing", &Scope::default()).unwrap_err();
        assert_eq!(err.code, "missing");
        assert_eq!(err.message, "undefined value");

        let scope = scope(json!({"params": {}}));
        assert!(eval.evaluate("params.id", &scope).is_err());
        assert!(eval.evaluate("'/items/' ~ missing", &scope).is_err());
    }

    #[test]
    fn test_syntax_error() {
        let eval = JinjaEvaluator;
        assert!(eval.evaluate("1 +", &Scope::default()).is_err());
    }

    #[test]
    fn test_include_callback() {
        let eval = JinjaEvaluator;
        let include: crate::template::IncludeFn =
            Arc::new(|file: &str| Ok(format!("<p>{file}</p>")));
        let scope = Scope::default().with_include(include);
        assert_eq!(
            eval.evaluate("include('nav.html')", &scope).unwrap(),
            json!("<p>nav.html</p>")
        );
    }

    #[test]
    fn test_include_error_propagates() {
        let eval = JinjaEvaluator;
        let include: crate::template::IncludeFn = Arc::new(|_: &str| Err("nope".to_owned()));
        let scope = Scope::default().with_include(include);
        let err = eval.evaluate("include('x.html')", &scope).unwrap_err();
        assert!(err.message.contains("nope"));
    }
}

//! Built-in condition expression evaluator.
//!
//! Handles the small predicate language used by `expect`, `select_args`,
//! and `config_setting` entries:
//!
//! - `$path.to.value == literal` / `!=` comparisons against run parameters
//! - bare `$flag` (or `flag`) truthiness, with a `!` prefix for negation
//!
//! Anything richer is the job of a user-registered expression processor
//! configured as the cluster's `default_expr_processor`.

use crate::params::{ExecParams, Params};
use crate::processor::{Processor, VertexIo};
use async_trait::async_trait;
use serde_json::Value;

/// Key under which synthesized condition vertices carry their expression.
pub const EXPR_ARG_KEY: &str = "expr";

/// Processor wrapper around [`eval_expr`]. Execution code `0` means the
/// expression held.
#[derive(Default)]
pub struct ExprProcessor {
    expr: String,
}

#[async_trait]
impl Processor for ExprProcessor {
    fn setup(&mut self, args: &Params) -> i32 {
        match args.str_at(EXPR_ARG_KEY) {
            Some(expr) => {
                self.expr = expr.to_string();
                0
            }
            None => -1,
        }
    }

    async fn execute(&self, _io: &mut VertexIo, args: &ExecParams) -> i32 {
        i32::from(!eval_expr(&self.expr, args))
    }
}

/// Evaluate a predicate against layered run parameters.
pub fn eval_expr(expr: &str, params: &ExecParams) -> bool {
    let expr = expr.trim();
    if let Some((lhs, rhs)) = expr.split_once("==") {
        return compare(lhs, rhs, params);
    }
    if let Some((lhs, rhs)) = expr.split_once("!=") {
        return !compare(lhs, rhs, params);
    }
    let (negated, flag) = match expr.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, expr),
    };
    let value = params.bool_or(flag, false);
    value != negated
}

fn compare(lhs: &str, rhs: &str, params: &ExecParams) -> bool {
    let literal = rhs.trim().trim_matches('"').trim_matches('\'');
    match params.get(lhs.trim()) {
        Some(Value::String(s)) => s == literal,
        Some(Value::Number(n)) => match (n.as_f64(), literal.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        Some(Value::Bool(b)) => match literal.parse::<bool>() {
            Ok(lit) => *b == lit,
            Err(_) => false,
        },
        _ => false,
    }
}

/// True when the string is an expression rather than a plain identifier
/// (identifiers name processors or config flags).
#[must_use]
pub fn is_cond_expr(s: &str) -> bool {
    s.chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn scope(v: serde_json::Value) -> ExecParams {
        ExecParams::new().with_layer(Arc::new(Params::new(v)))
    }

    #[test]
    fn numeric_equality() {
        let p = scope(json!({"exp": {"id": 1000}}));
        assert!(eval_expr("$exp.id==1000", &p));
        assert!(!eval_expr("$exp.id==1001", &p));
        assert!(eval_expr("$exp.id!=1001", &p));
    }

    #[test]
    fn string_equality_with_quotes() {
        let p = scope(json!({"tag": "abc"}));
        assert!(eval_expr("$tag==\"abc\"", &p));
        assert!(eval_expr("$tag=='abc'", &p));
        assert!(!eval_expr("$tag==xyz", &p));
    }

    #[test]
    fn bare_and_negated_flags() {
        let p = scope(json!({"on": true, "off": false}));
        assert!(eval_expr("$on", &p));
        assert!(eval_expr("on", &p));
        assert!(!eval_expr("off", &p));
        assert!(eval_expr("!off", &p));
        assert!(!eval_expr("!on", &p));
        assert!(!eval_expr("missing", &p));
    }

    #[test]
    fn missing_path_never_matches_equality() {
        let p = scope(json!({}));
        assert!(!eval_expr("$a.b==1", &p));
        assert!(eval_expr("$a.b!=1", &p));
    }

    #[test]
    fn expr_detection() {
        assert!(is_cond_expr("$exp.id==1000"));
        assert!(is_cond_expr("!flag"));
        assert!(!is_cond_expr("my_cond_processor"));
        assert!(!is_cond_expr("flag2"));
    }

    #[tokio::test]
    async fn processor_round_trip() {
        let mut p = ExprProcessor::default();
        assert_eq!(p.setup(&Params::new(json!({"expr": "$exp.id==1000"}))), 0);
        let params = scope(json!({"exp": {"id": 1000}}));
        let ctx = crate::data::DataContext::new();
        let mut io = VertexIo::new(ctx);
        assert_eq!(p.execute(&mut io, &params).await, 0);
        let params = scope(json!({"exp": {"id": 9}}));
        assert_eq!(p.execute(&mut io, &params).await, 1);
    }
}

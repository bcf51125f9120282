//! Predicate evaluation.
//!
//! The evaluator is the reference semantics of a filter: the pushdown
//! rewriter must never change what [`eval_predicate`] would have
//! answered. It doubles as the runtime for residual predicates left
//! behind after extraction.

use crate::ast::Expr;
use crate::value::{FieldValue, Record};

// ---------------------------------------------------------------------------
// EvalError
// ---------------------------------------------------------------------------

/// Evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// A field read named a field the record does not expose.
    #[error("field `{0}` not found")]
    MissingField(String),

    /// A value had the wrong kind for its position.
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        /// Kind required by the position.
        expected: &'static str,
        /// Kind actually produced.
        found: &'static str,
    },

    /// The bare parameter was used as a value but the element type does
    /// not render itself as a scalar.
    #[error("parameter is not scalar-comparable")]
    NonScalarParameter,
}

// ---------------------------------------------------------------------------
// eval
// ---------------------------------------------------------------------------

/// Evaluates an expression against an element.
///
/// # Errors
///
/// Returns an [`EvalError`] for missing fields, kind mismatches, or a
/// bare parameter on an element type without a scalar rendering.
pub fn eval<T: Record>(expr: &Expr<T>, value: &T) -> Result<FieldValue, EvalError> {
    match expr {
        Expr::Parameter => value.as_scalar().ok_or(EvalError::NonScalarParameter),
        Expr::Constant(scalar) => Ok(scalar.clone().into()),
        Expr::Field { target, name } => {
            let read = |record_field: Option<FieldValue>| {
                record_field.ok_or_else(|| EvalError::MissingField(name.to_string()))
            };
            match &**target {
                Expr::Parameter => read(value.field(name)),
                nested => match eval(nested, value)? {
                    FieldValue::Record(record) => read(record.field(name)),
                    other => Err(EvalError::KindMismatch {
                        expected: "record",
                        found: other.kind_name(),
                    }),
                },
            }
        }
        Expr::And { .. } => Ok(FieldValue::Bool(eval_predicate(expr, value)?)),
        Expr::Eq { left, right } => {
            let left = eval(left, value)?;
            let right = eval(right, value)?;
            Ok(FieldValue::Bool(left == right))
        }
        Expr::StrEq { left, right, mode } => {
            let left = expect_str(eval(left, value)?)?;
            let right = expect_str(eval(right, value)?)?;
            Ok(FieldValue::Bool(mode.str_eq(&left, &right)))
        }
        Expr::Other(node) => Ok(node.eval(value)),
    }
}

/// Evaluates an expression in boolean position.
///
/// Conjunctions short-circuit: the right conjunct is not evaluated when
/// the left one is false.
///
/// # Errors
///
/// Returns [`EvalError::KindMismatch`] when the expression does not
/// produce a boolean, plus any error from [`eval`].
pub fn eval_predicate<T: Record>(expr: &Expr<T>, value: &T) -> Result<bool, EvalError> {
    match expr {
        Expr::And { left, right } => {
            Ok(eval_predicate(left, value)? && eval_predicate(right, value)?)
        }
        _ => match eval(expr, value)? {
            FieldValue::Bool(result) => Ok(result),
            other => Err(EvalError::KindMismatch {
                expected: "bool",
                found: other.kind_name(),
            }),
        },
    }
}

fn expect_str(value: FieldValue) -> Result<std::sync::Arc<str>, EvalError> {
    match value {
        FieldValue::Str(s) => Ok(s),
        other => Err(EvalError::KindMismatch {
            expected: "str",
            found: other.kind_name(),
        }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

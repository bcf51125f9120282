//! Predicate abstract syntax trees.
//!
//! [`Expr`] is the fixed, shallow vocabulary the pushdown rewriter
//! recognizes: a single lambda parameter, constants, structural field
//! access, top-level conjunction, equality, and the mode-carrying string
//! equality call. Everything else — calls, arithmetic, comparisons other
//! than equality — is an [`Expr::Other`] node carrying its own evaluator
//! and is opaque to the analysis.
//!
//! Expressions are read-only once built; `Clone` is cheap where it
//! matters because opaque nodes and string payloads are `Arc`-shared.

use std::fmt;
use std::sync::Arc;

use manifold_core::StringComparison;

use crate::value::{FieldValue, Scalar};

// ---------------------------------------------------------------------------
// OpaquePredicate
// ---------------------------------------------------------------------------

/// An opaque expression node: impure (or simply unrecognized) logic with
/// its own evaluator.
pub trait OpaquePredicate<T>: Send + Sync {
    /// Evaluates the node against an element.
    fn eval(&self, value: &T) -> FieldValue;

    /// Display label used when rendering the expression.
    fn label(&self) -> &str;
}

/// Closure-backed [`OpaquePredicate`].
struct FnPredicate<T> {
    label: String,
    eval: Arc<dyn Fn(&T) -> FieldValue + Send + Sync>,
}

impl<T> OpaquePredicate<T> for FnPredicate<T> {
    fn eval(&self, value: &T) -> FieldValue {
        (self.eval)(value)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// Expr
// ---------------------------------------------------------------------------

/// A predicate expression over elements of type `T`.
pub enum Expr<T> {
    /// The lambda parameter (the element under test).
    Parameter,
    /// A constant of partition-eligible kind.
    Constant(Scalar),
    /// Structural member access: `target.name`.
    Field {
        /// The accessed value (the parameter or another field chain).
        target: Box<Expr<T>>,
        /// The field name.
        name: Arc<str>,
    },
    /// Logical conjunction.
    And {
        /// Left conjunct.
        left: Box<Expr<T>>,
        /// Right conjunct.
        right: Box<Expr<T>>,
    },
    /// Equality test.
    Eq {
        /// Left operand.
        left: Box<Expr<T>>,
        /// Right operand.
        right: Box<Expr<T>>,
    },
    /// String equality under an explicit comparison mode.
    ///
    /// The mode is always a constant here: an AST with a computed mode
    /// cannot be expressed as `StrEq` and must be built as
    /// [`Expr::Other`] instead.
    StrEq {
        /// Left operand.
        left: Box<Expr<T>>,
        /// Right operand.
        right: Box<Expr<T>>,
        /// Comparison mode.
        mode: StringComparison,
    },
    /// Opaque catch-all; never inspected, only evaluated.
    Other(Arc<dyn OpaquePredicate<T>>),
}

impl<T> Expr<T> {
    /// The lambda parameter.
    #[must_use]
    pub fn param() -> Self {
        Self::Parameter
    }

    /// A constant.
    pub fn constant(value: impl Into<Scalar>) -> Self {
        Self::Constant(value.into())
    }

    /// A field read on the parameter: `param.name`.
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self::field_of(Self::Parameter, name)
    }

    /// A field read on an arbitrary target: `target.name`.
    #[must_use]
    pub fn field_of(target: Expr<T>, name: &str) -> Self {
        Self::Field {
            target: Box::new(target),
            name: Arc::from(name),
        }
    }

    /// Conjunction of `self` and `other`.
    #[must_use]
    pub fn and(self, other: Expr<T>) -> Self {
        Self::And {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// Equality of `self` and `other`.
    #[must_use]
    pub fn eq_expr(self, other: Expr<T>) -> Self {
        Self::Eq {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// Equality of `self` and a constant.
    pub fn eq_const(self, value: impl Into<Scalar>) -> Self {
        self.eq_expr(Self::Constant(value.into()))
    }

    /// String equality of two operands under `mode`.
    #[must_use]
    pub fn str_eq(left: Expr<T>, right: Expr<T>, mode: StringComparison) -> Self {
        Self::StrEq {
            left: Box::new(left),
            right: Box::new(right),
            mode,
        }
    }

    /// An opaque node evaluated by `eval`.
    pub fn other(
        label: impl Into<String>,
        eval: impl Fn(&T) -> FieldValue + Send + Sync + 'static,
    ) -> Self
    where
        T: 'static,
    {
        Self::Other(Arc::new(FnPredicate {
            label: label.into(),
            eval: Arc::new(eval),
        }))
    }

    /// An opaque boolean node evaluated by `eval`.
    pub fn other_bool(
        label: impl Into<String>,
        eval: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self
    where
        T: 'static,
    {
        Self::other(label, move |value| FieldValue::Bool(eval(value)))
    }
}

impl<T> Clone for Expr<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Parameter => Self::Parameter,
            Self::Constant(scalar) => Self::Constant(scalar.clone()),
            Self::Field { target, name } => Self::Field {
                target: target.clone(),
                name: Arc::clone(name),
            },
            Self::And { left, right } => Self::And {
                left: left.clone(),
                right: right.clone(),
            },
            Self::Eq { left, right } => Self::Eq {
                left: left.clone(),
                right: right.clone(),
            },
            Self::StrEq { left, right, mode } => Self::StrEq {
                left: left.clone(),
                right: right.clone(),
                mode: *mode,
            },
            Self::Other(node) => Self::Other(Arc::clone(node)),
        }
    }
}

impl<T> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter => f.write_str("param"),
            Self::Constant(scalar) => write!(f, "{scalar}"),
            Self::Field { target, name } => write!(f, "{target}.{name}"),
            Self::And { left, right } => write!(f, "({left} && {right})"),
            Self::Eq { left, right } => write!(f, "({left} == {right})"),
            Self::StrEq { left, right, mode } => {
                write!(f, "str_eq({left}, {right}, {mode:?})")
            }
            Self::Other(node) => write!(f, "<{}>", node.label()),
        }
    }
}

impl<T> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    type E = Expr<()>;

    #[test]
    fn test_display_rendering() {
        let expr: E = Expr::field("region")
            .eq_const("west")
            .and(Expr::field("score").eq_const(10i64));
        assert_eq!(
            expr.to_string(),
            "((param.region == \"west\") && (param.score == 10))"
        );
    }

    #[test]
    fn test_display_nested_field() {
        let expr: E = Expr::field_of(Expr::field("user"), "region").eq_const("west");
        assert_eq!(expr.to_string(), "(param.user.region == \"west\")");
    }

    #[test]
    fn test_display_str_eq() {
        let expr: E = Expr::str_eq(
            Expr::field("region"),
            Expr::constant("WEST"),
            StringComparison::OrdinalIgnoreCase,
        );
        assert_eq!(
            expr.to_string(),
            "str_eq(param.region, \"WEST\", OrdinalIgnoreCase)"
        );
    }

    #[test]
    fn test_display_other() {
        let expr: E = Expr::other_bool("score > 10", |_: &()| true);
        assert_eq!(expr.to_string(), "<score > 10>");
    }

    #[test]
    fn test_clone_shares_opaque_nodes() {
        let expr: E = Expr::other_bool("flag", |_: &()| true);
        let copy = expr.clone();
        match (&expr, &copy) {
            (Expr::Other(a), Expr::Other(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }
}

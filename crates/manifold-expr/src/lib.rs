//! # Manifold Expr
//!
//! Predicate ASTs, evaluation, and the predicate-pushdown rewriter for
//! `manifold-core` subscriptions.
//!
//! A subscriber's `.where(predicate)` filter is inspected at
//! subscription time: conjuncts that are pure equality tests against
//! constants become partition bindings (the subscription attaches
//! directly into the hub's partition tree), and whatever cannot be
//! extracted stays behind as an ordinary runtime filter. Rewriting never
//! changes observable results — it only moves work out of the per-value
//! path.
//!
//! ## Example
//!
//! ```rust,ignore
//! use manifold_expr::{subscribe_where, Expr};
//!
//! // x => x.region == "west" && x.score > 10
//! let predicate = Expr::field("region")
//!     .eq_const("west")
//!     .and(Expr::other_bool("score > 10", |r: &Reading| r.score > 10));
//!
//! // Binds into the `region` partition; only `score > 10` runs per value.
//! let sub = subscribe_where(&hub, &predicate, observer)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod eval;
pub mod pushdown;
pub mod value;

pub use ast::{Expr, OpaquePredicate};
pub use eval::{eval, eval_predicate, EvalError};
pub use pushdown::{
    decompose, filter_observer, rewrite, subscribe_where, Decomposition, PartitionCandidate,
    Rewrite,
};
pub use value::{FieldValue, Record, Scalar};

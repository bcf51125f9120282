//! Predicate-pushdown rewriting.
//!
//! Given a subscriber's filter predicate, [`decompose`] splits its
//! top-level conjunction into *partition candidates* (conjuncts that are
//! pure equality tests against constants of eligible kind) and a
//! *residual* predicate. [`rewrite`] turns the candidates into a
//! [`BindingChain`] so the subscription binds directly into the partition
//! tree, and [`subscribe_where`] is the front door that wires the chain
//! and the residual filter together.
//!
//! Extraction is a single greedy left-to-right pass: the first conjunct
//! that fails to qualify seeds the residual, and every conjunct after it
//! — including ones that would have qualified on their own — is folded
//! into the residual in visitation order. Scanning past the first
//! disqualifier would be sound, but it is not what this engine does.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use manifold_core::{
    dispatch, BindingChain, KeyBinding, MulticastHub, Observer, PartitionSelector, StreamError,
    StringComparer, StringComparison, SubscribeError, Subscription, TypedBinding,
};

use crate::ast::Expr;
use crate::eval::{eval, eval_predicate};
use crate::value::{FieldValue, Record, Scalar};

// ---------------------------------------------------------------------------
// PartitionCandidate
// ---------------------------------------------------------------------------

/// One extracted conjunct: a pure selector expression, the constant it
/// was compared against, and the string-comparison mode when the
/// conjunct was an explicit string-equality call.
pub struct PartitionCandidate<T> {
    pure: Expr<T>,
    constant: Scalar,
    mode: Option<StringComparison>,
}

impl<T> PartitionCandidate<T> {
    /// Returns the pure side (the future selector body).
    #[must_use]
    pub fn pure_side(&self) -> &Expr<T> {
        &self.pure
    }

    /// Returns the constant the subscription binds to.
    #[must_use]
    pub fn constant(&self) -> &Scalar {
        &self.constant
    }

    /// Returns the string-comparison mode for pattern-B candidates.
    #[must_use]
    pub fn mode(&self) -> Option<StringComparison> {
        self.mode
    }
}

impl<T: Record + 'static> PartitionCandidate<T> {
    /// Lowers the candidate into a typed key binding.
    ///
    /// The synthesized selector evaluates the pure side and coerces the
    /// result to the constant's key kind; selectors are named by the
    /// pure side's canonical path so equal dimensions built from
    /// different subscriptions merge. A runtime kind mismatch panics
    /// inside the selector, which the hub contains as a scoped
    /// key-extraction failure.
    #[must_use]
    pub fn to_binding(&self) -> KeyBinding<T> {
        let path = canonical_path(&self.pure);
        match (&self.constant, self.mode) {
            (Scalar::Str(key), Some(mode)) => KeyBinding::Str(TypedBinding::new(
                PartitionSelector::named(&path, str_selector(self.pure.clone())),
                Arc::clone(key),
                StringComparer::shared(mode),
            )),
            (Scalar::Str(key), None) => KeyBinding::Str(TypedBinding::with_default(
                PartitionSelector::named(&path, str_selector(self.pure.clone())),
                Arc::clone(key),
            )),
            (Scalar::Int(key), _) => KeyBinding::Int(TypedBinding::with_default(
                PartitionSelector::named(&path, int_selector(self.pure.clone())),
                *key,
            )),
            (Scalar::UInt(key), _) => KeyBinding::UInt(TypedBinding::with_default(
                PartitionSelector::named(&path, uint_selector(self.pure.clone())),
                *key,
            )),
            (Scalar::Bool(key), _) => KeyBinding::Bool(TypedBinding::with_default(
                PartitionSelector::named(&path, bool_selector(self.pure.clone())),
                *key,
            )),
            (Scalar::Char(key), _) => KeyBinding::Char(TypedBinding::with_default(
                PartitionSelector::named(&path, char_selector(self.pure.clone())),
                *key,
            )),
        }
    }
}

impl<T> fmt::Debug for PartitionCandidate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionCandidate")
            .field("pure", &self.pure)
            .field("constant", &self.constant)
            .field("mode", &self.mode)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// Result of decomposing a predicate: extracted candidates in
/// decomposition order, plus the residual predicate (absent when every
/// conjunct qualified).
#[derive(Debug)]
pub struct Decomposition<T> {
    /// Extracted partition candidates, in visitation order.
    pub candidates: SmallVec<[PartitionCandidate<T>; 4]>,
    /// The conjuncts that stay behind as a runtime filter.
    pub residual: Option<Expr<T>>,
}

/// Decomposes a predicate into partition candidates and a residual.
///
/// Top-level `And` nodes are walked left to right; each leaf conjunct is
/// checked once. After the first disqualifying conjunct the remainder of
/// the predicate — qualifying or not — accumulates into the residual.
#[must_use]
pub fn decompose<T>(predicate: &Expr<T>) -> Decomposition<T> {
    let mut decomposition = Decomposition {
        candidates: SmallVec::new(),
        residual: None,
    };
    walk(predicate, &mut decomposition);
    decomposition
}

fn walk<T>(expr: &Expr<T>, decomposition: &mut Decomposition<T>) {
    if let Expr::And { left, right } = expr {
        walk(left, decomposition);
        walk(right, decomposition);
        return;
    }

    if decomposition.residual.is_none() {
        if let Some(candidate) = check_single(expr) {
            decomposition.candidates.push(candidate);
            return;
        }
    }

    decomposition.residual = Some(match decomposition.residual.take() {
        None => expr.clone(),
        Some(residual) => residual.and(expr.clone()),
    });
}

/// Checks one conjunct against the two extractable patterns.
fn check_single<T>(conjunct: &Expr<T>) -> Option<PartitionCandidate<T>> {
    match conjunct {
        // Pattern A: equality against a constant of eligible kind.
        Expr::Eq { left, right } => {
            let (constant, pure) = constant_and_pure(left, right)?;
            Some(PartitionCandidate {
                pure: pure.clone(),
                constant: constant.clone(),
                mode: None,
            })
        }
        // Pattern B: string equality with an explicit constant mode.
        Expr::StrEq { left, right, mode } => {
            let (constant, pure) = constant_and_pure(left, right)?;
            if !matches!(constant, Scalar::Str(_)) {
                return None;
            }
            Some(PartitionCandidate {
                pure: pure.clone(),
                constant: constant.clone(),
                mode: Some(*mode),
            })
        }
        _ => None,
    }
}

/// Splits an equality's operands into (constant, pure side), accepting
/// either operand order.
fn constant_and_pure<'e, T>(
    left: &'e Expr<T>,
    right: &'e Expr<T>,
) -> Option<(&'e Scalar, &'e Expr<T>)> {
    match (left, right) {
        (Expr::Constant(constant), pure) if is_pure(pure) => Some((constant, pure)),
        (pure, Expr::Constant(constant)) if is_pure(pure) => Some((constant, pure)),
        _ => None,
    }
}

/// Purity of an expression with respect to the lambda parameter.
///
/// The parameter itself is pure; a field read is pure iff its target is.
/// Every other node kind — opaque logic most of all — disqualifies.
fn is_pure<T>(expr: &Expr<T>) -> bool {
    match expr {
        Expr::Parameter => true,
        Expr::Field { target, .. } => is_pure(target),
        _ => false,
    }
}

/// Canonical path of a pure expression, used as the selector's dimension
/// name so structurally equal selectors merge.
fn canonical_path<T>(expr: &Expr<T>) -> String {
    match expr {
        Expr::Parameter => "$".to_string(),
        Expr::Field { target, name } => format!("{}.{name}", canonical_path(target)),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Synthesized selectors
// ---------------------------------------------------------------------------

fn int_selector<T: Record + 'static>(expr: Expr<T>) -> impl Fn(&T) -> i64 + Send + Sync + 'static {
    move |value| match eval(&expr, value) {
        Ok(FieldValue::Int(v)) => v,
        Ok(FieldValue::UInt(v)) => {
            i64::try_from(v).unwrap_or_else(|_| selector_mismatch(&expr, "int", "uint"))
        }
        Ok(other) => selector_mismatch(&expr, "int", other.kind_name()),
        Err(error) => selector_failed(&expr, &error),
    }
}

fn uint_selector<T: Record + 'static>(expr: Expr<T>) -> impl Fn(&T) -> u64 + Send + Sync + 'static {
    move |value| match eval(&expr, value) {
        Ok(FieldValue::UInt(v)) => v,
        Ok(FieldValue::Int(v)) => {
            u64::try_from(v).unwrap_or_else(|_| selector_mismatch(&expr, "uint", "int"))
        }
        Ok(other) => selector_mismatch(&expr, "uint", other.kind_name()),
        Err(error) => selector_failed(&expr, &error),
    }
}

fn bool_selector<T: Record + 'static>(expr: Expr<T>) -> impl Fn(&T) -> bool + Send + Sync + 'static {
    move |value| match eval(&expr, value) {
        Ok(FieldValue::Bool(v)) => v,
        Ok(other) => selector_mismatch(&expr, "bool", other.kind_name()),
        Err(error) => selector_failed(&expr, &error),
    }
}

fn char_selector<T: Record + 'static>(expr: Expr<T>) -> impl Fn(&T) -> char + Send + Sync + 'static {
    move |value| match eval(&expr, value) {
        Ok(FieldValue::Char(v)) => v,
        Ok(other) => selector_mismatch(&expr, "char", other.kind_name()),
        Err(error) => selector_failed(&expr, &error),
    }
}

fn str_selector<T: Record + 'static>(expr: Expr<T>) -> impl Fn(&T) -> Arc<str> + Send + Sync + 'static {
    move |value| match eval(&expr, value) {
        Ok(FieldValue::Str(v)) => v,
        Ok(other) => selector_mismatch(&expr, "str", other.kind_name()),
        Err(error) => selector_failed(&expr, &error),
    }
}

fn selector_mismatch<T, R>(expr: &Expr<T>, expected: &str, found: &str) -> R {
    panic!("partition selector `{expr}` expected a {expected} key, found {found}")
}

fn selector_failed<T, R>(expr: &Expr<T>, error: &crate::eval::EvalError) -> R {
    panic!("partition selector `{expr}` failed: {error}")
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

/// A rewritten subscription: the binding chain to push down, plus the
/// residual runtime filter (absent when the whole predicate was
/// extracted).
#[derive(Debug)]
pub struct Rewrite<T> {
    /// Partition bindings in decomposition order.
    pub chain: BindingChain<T>,
    /// The predicate left to evaluate per value, if any.
    pub residual: Option<Expr<T>>,
}

/// Rewrites a filter predicate into partition bindings plus a residual.
///
/// With no extractable conjuncts the chain is empty and the rewrite
/// degenerates to an ordinary runtime filter.
#[must_use]
pub fn rewrite<T: Record + 'static>(predicate: &Expr<T>) -> Rewrite<T> {
    let decomposition = decompose(predicate);
    if decomposition.candidates.is_empty() {
        tracing::debug!("predicate `{predicate}` yields no partition bindings; falling back to a runtime filter");
    }
    let mut chain = BindingChain::new();
    for candidate in &decomposition.candidates {
        chain = chain.bind(candidate.to_binding());
    }
    Rewrite {
        chain,
        residual: decomposition.residual,
    }
}

// ---------------------------------------------------------------------------
// Residual filtering
// ---------------------------------------------------------------------------

/// Observer adapter that applies a residual predicate before forwarding.
///
/// An evaluation failure delivers one `on_error` downstream and drops
/// the subscription's remaining traffic, honoring the single-terminal
/// contract.
struct FilterObserver<T> {
    inner: Arc<dyn Observer<T>>,
    residual: Expr<T>,
    terminated: AtomicBool,
}

impl<T> FilterObserver<T> {
    fn begin_terminal(&self) -> bool {
        !self.terminated.swap(true, Ordering::SeqCst)
    }
}

impl<T: Record> Observer<T> for FilterObserver<T> {
    fn on_next(&self, value: &T) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        match eval_predicate(&self.residual, value) {
            Ok(true) => self.inner.on_next(value),
            Ok(false) => {}
            Err(error) => {
                if self.begin_terminal() {
                    self.inner
                        .on_error(&StreamError::Internal(format!("residual filter failed: {error}")));
                }
            }
        }
    }

    fn on_error(&self, error: &StreamError) {
        if self.begin_terminal() {
            self.inner.on_error(error);
        }
    }

    fn on_completed(&self) {
        if self.begin_terminal() {
            self.inner.on_completed();
        }
    }
}

/// Wraps an observer in a runtime filter for `predicate`.
///
/// This is the unrewritten path: targets that are not partitionable
/// evaluate the whole predicate per value.
#[must_use]
pub fn filter_observer<T: Record + 'static>(
    predicate: Expr<T>,
    observer: Arc<dyn Observer<T>>,
) -> Arc<dyn Observer<T>> {
    Arc::new(FilterObserver {
        inner: observer,
        residual: predicate,
        terminated: AtomicBool::new(false),
    })
}

// ---------------------------------------------------------------------------
// subscribe_where
// ---------------------------------------------------------------------------

/// Subscribes an observer to a hub through a filter predicate, pushing
/// extractable conjuncts down into partition bindings.
///
/// Values reach the observer iff they satisfy every extracted binding
/// and the residual: observable behavior is identical to an ordinary
/// `filter_observer` subscription on the default sink, minus the
/// per-value evaluation of the extracted conjuncts.
///
/// # Errors
///
/// Returns a [`SubscribeError`] when the synthesized chain cannot be
/// established.
pub fn subscribe_where<T: Record + 'static>(
    hub: &MulticastHub<T>,
    predicate: &Expr<T>,
    observer: Arc<dyn Observer<T>>,
) -> Result<Subscription, SubscribeError> {
    let Rewrite { chain, residual } = rewrite(predicate);
    let observer = match residual {
        Some(residual) => filter_observer(residual, observer),
        None => observer,
    };
    dispatch::subscribe_chain(hub, &chain, observer)
}

// ===========================================================================
// Tests
// ===========================================================================

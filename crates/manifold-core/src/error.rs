//! Error types for the multicast engine.
//!
//! Two error surfaces exist: [`StreamError`] values travel *through* the
//! tree to observers via `on_error`, while [`SubscribeError`] values are
//! returned synchronously from subscription establishment. Ref-count
//! protocol violations (releasing a key that is not held) are programming
//! errors and panic instead of surfacing here.

use crate::binding::SelectorId;

// ---------------------------------------------------------------------------
// StreamError
// ---------------------------------------------------------------------------

/// Error delivered to observers through `on_error`.
///
/// Cloneable because one failure may fan out to every observer of a
/// partition subtree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// A partition key selector panicked while extracting a key from a
    /// published value. Terminates the affected partition subtree only.
    #[error("key extraction failed: {0}")]
    KeyExtraction(String),

    /// Internal failure raised by an engine adapter (e.g. a residual
    /// filter that could not be evaluated).
    #[error("internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// SubscribeError
// ---------------------------------------------------------------------------

/// Error returned from subscription establishment.
///
/// Subscription either succeeds completely or fails with one of these and
/// leaves no partial state behind (every partition level acquired before
/// the failure is released again).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// A selector id is already registered in this hub with a different
    /// key type. Selector ids must map to exactly one key type per hub.
    #[error("selector {selector:?} is already registered with a different key type")]
    SelectorKindMismatch {
        /// The conflicting selector id.
        selector: SelectorId,
    },

    /// A user-supplied partition factory failed during acquire.
    #[error("partition factory failed: {0}")]
    Factory(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        assert_eq!(
            StreamError::KeyExtraction("boom".into()).to_string(),
            "key extraction failed: boom"
        );
        assert_eq!(
            StreamError::Internal("oops".into()).to_string(),
            "internal error: oops"
        );
    }

    #[test]
    fn test_subscribe_error_display() {
        let err = SubscribeError::Factory("no capacity".into());
        assert_eq!(err.to_string(), "partition factory failed: no capacity");
    }
}

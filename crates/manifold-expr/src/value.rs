//! Scalar constants, field values, and the structural record contract.
//!
//! [`Scalar`] is the fixed set of constant kinds eligible for partition
//! extraction; each kind maps one-to-one onto a primitive partition key
//! type in `manifold-core`. [`FieldValue`] is the wider domain field
//! reads evaluate to — it additionally carries floats (comparable but
//! never partition keys) and nested records.

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Scalar
// ---------------------------------------------------------------------------

/// A constant of partition-eligible kind.
///
/// Narrower integer widths widen into `i64`/`u64` at AST construction;
/// floating-point values are deliberately excluded (float equality makes
/// a poor partition key), as are composite values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// Signed integer constant.
    Int(i64),
    /// Unsigned integer constant.
    UInt(u64),
    /// Boolean constant.
    Bool(bool),
    /// Character constant.
    Char(char),
    /// String constant.
    Str(Arc<str>),
}

impl Scalar {
    /// Returns the name of this constant's kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Str(_) => "str",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "'{v}'"),
            Self::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<i8> for Scalar {
    fn from(v: i8) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i16> for Scalar {
    fn from(v: i16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u8> for Scalar {
    fn from(v: u8) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u16> for Scalar {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<char> for Scalar {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl From<Arc<str>> for Scalar {
    fn from(v: Arc<str>) -> Self {
        Self::Str(v)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A structural composite: a value whose members are deterministic,
/// side-effect-free field reads.
///
/// Implementing this trait is the element type's assertion that its
/// fields are pure — the purity analysis in the pushdown rewriter rests
/// on it. Anything computed (getters with logic, lookups, arithmetic)
/// must be expressed as an opaque AST node instead.
pub trait Record: Send + Sync {
    /// Reads a field by name. Returns `None` for unknown fields.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Renders the record itself as a scalar, for element types that are
    /// directly comparable against constants. Defaults to `None`.
    fn as_scalar(&self) -> Option<FieldValue> {
        None
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// The value domain of field reads and predicate evaluation.
#[derive(Clone)]
pub enum FieldValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point (never a partition key).
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Character.
    Char(char),
    /// String.
    Str(Arc<str>),
    /// Nested structural composite.
    Record(Arc<dyn Record>),
}

impl FieldValue {
    /// Returns the name of this value's kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Str(_) => "str",
            Self::Record(_) => "record",
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            // Signed/unsigned widths compare numerically.
            (Self::Int(a), Self::UInt(b)) | (Self::UInt(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            // Records compare by identity only.
            (Self::Record(a), Self::Record(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Int(v) => Self::Int(v),
            Scalar::UInt(v) => Self::UInt(v),
            Scalar::Bool(v) => Self::Bool(v),
            Scalar::Char(v) => Self::Char(v),
            Scalar::Str(v) => Self::Str(v),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "Int({v})"),
            Self::UInt(v) => write!(f, "UInt({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Char(v) => write!(f, "Char({v:?})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Record(_) => f.write_str("Record(..)"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // --- Scalar tests ---

    #[test]
    fn test_scalar_from_widens_integers() {
        assert_eq!(Scalar::from(7i32), Scalar::Int(7));
        assert_eq!(Scalar::from(7u16), Scalar::UInt(7));
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(Scalar::from("west").to_string(), "\"west\"");
        assert_eq!(Scalar::from(10i64).to_string(), "10");
        assert_eq!(Scalar::from('x').to_string(), "'x'");
        assert_eq!(Scalar::from(true).to_string(), "true");
    }

    // --- FieldValue equality tests ---

    #[test]
    fn test_field_value_numeric_cross_width() {
        assert_eq!(FieldValue::Int(10), FieldValue::UInt(10));
        assert_eq!(FieldValue::UInt(10), FieldValue::Int(10));
        assert_ne!(FieldValue::Int(-1), FieldValue::UInt(u64::MAX));
    }

    #[test]
    fn test_field_value_kind_mismatch_unequal() {
        assert_ne!(FieldValue::Int(1), FieldValue::Bool(true));
        assert_ne!(FieldValue::Str(Arc::from("1")), FieldValue::Int(1));
        assert_ne!(FieldValue::Float(1.0), FieldValue::Int(1));
    }

    #[test]
    fn test_field_value_from_scalar() {
        assert_eq!(
            FieldValue::from(Scalar::from("west")),
            FieldValue::Str(Arc::from("west"))
        );
    }

    struct Unit;

    impl Record for Unit {
        fn field(&self, _name: &str) -> Option<FieldValue> {
            None
        }
    }

    #[test]
    fn test_record_identity_equality() {
        let a: Arc<dyn Record> = Arc::new(Unit);
        let b: Arc<dyn Record> = Arc::new(Unit);
        assert_eq!(
            FieldValue::Record(Arc::clone(&a)),
            FieldValue::Record(Arc::clone(&a))
        );
        assert_ne!(FieldValue::Record(a), FieldValue::Record(b));
    }
}

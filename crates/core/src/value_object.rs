//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`Money`, contact addresses). Two instances holding the same values are the
/// same value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

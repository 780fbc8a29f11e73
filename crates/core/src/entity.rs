//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Referenced records (course, person, billing record, receipt, discount) are owned
/// by other subsystems; here they only need a stable identity to be looked up by.
pub trait Entity: Send + Sync + 'static {
    /// Strongly-typed entity identifier.
    type Id: Copy
        + Eq
        + core::hash::Hash
        + core::fmt::Debug
        + core::fmt::Display
        + Into<i64>
        + Send
        + Sync
        + 'static;

    /// Which kind of record this is, used when reporting a missing reference.
    const KIND: crate::EntityKind;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

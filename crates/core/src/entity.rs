//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Stock rows (lots, vendor earmarks) keep their identity while their
/// quantity and status evolve; storage adapters key rows by `id()`.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

//! Core type definitions for surelog.

use std::fmt;

/// Identifier of an event within one segment.
///
/// Ids start at 1, increase strictly within a segment and are never reused
/// there. The same id may appear in different segments; an event is
/// identified by the pair (segment, id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u32);

impl EventId {
    /// Largest id the int32 record field can carry.
    pub const MAX: EventId = EventId(i32::MAX as u32);

    /// Creates an event id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_numerically() {
        assert!(EventId::new(2) < EventId::new(10));
        assert_eq!(EventId::MAX.as_u32(), 2_147_483_647);
    }

    #[test]
    fn display_format() {
        assert_eq!(EventId::new(42).to_string(), "event:42");
    }
}

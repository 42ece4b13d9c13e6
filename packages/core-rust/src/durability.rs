//! Durability levels and the timeout floor they impose.

use std::time::Duration;

/// Minimum timeout for any durable write.
pub const DURABILITY_TIMEOUT_FLOOR: Duration = Duration::from_millis(1500);

/// Requested replication/persistence guarantee for a write.
///
/// Variants are ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DurabilityLevel {
    #[default]
    None,
    /// Replicated to a majority of nodes in memory.
    Majority,
    /// Majority in memory, plus persisted on the active node.
    MajorityAndPersistToActive,
    /// Persisted on a majority of nodes.
    PersistToMajority,
}

impl DurabilityLevel {
    /// True for every level other than `None`.
    #[must_use]
    pub fn is_durable(self) -> bool {
        self != Self::None
    }

    /// Name used by the management API and span attributes.
    #[must_use]
    pub fn management_name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Majority => "majority",
            Self::MajorityAndPersistToActive => "majorityAndPersistActive",
            Self::PersistToMajority => "persistToMajority",
        }
    }

    /// Inverse of [`management_name`](Self::management_name).
    #[must_use]
    pub fn from_management_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "majority" => Some(Self::Majority),
            "majorityAndPersistActive" => Some(Self::MajorityAndPersistToActive),
            "persistToMajority" => Some(Self::PersistToMajority),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_not_durable() {
        assert!(!DurabilityLevel::None.is_durable());
        assert!(DurabilityLevel::Majority.is_durable());
        assert!(DurabilityLevel::PersistToMajority.is_durable());
    }

    #[test]
    fn levels_order_by_strength() {
        assert!(DurabilityLevel::MajorityAndPersistToActive > DurabilityLevel::Majority);
        assert!(DurabilityLevel::PersistToMajority > DurabilityLevel::MajorityAndPersistToActive);
    }

    #[test]
    fn management_names() {
        assert_eq!(
            DurabilityLevel::MajorityAndPersistToActive.management_name(),
            "majorityAndPersistActive"
        );
        assert_eq!(DurabilityLevel::default().management_name(), "none");
        assert_eq!(
            DurabilityLevel::from_management_name("persistToMajority"),
            Some(DurabilityLevel::PersistToMajority)
        );
        assert_eq!(DurabilityLevel::from_management_name("majorityAndPersistToActive"), None);
    }
}

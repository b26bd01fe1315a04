//! Size tiers and dispatch tiers
//!
//! Classification is purely a function of the object's byte size. Lower bounds are
//! inclusive: an object of exactly 1 GiB is `Large`, exactly 5 GiB is `Giant`.

use std::fmt;

/// 1 GiB
pub const LARGE_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// 5 GiB, also the ceiling for a single server-side copy
pub const GIANT_THRESHOLD: u64 = 5 * 1024 * 1024 * 1024;

/// Longest `bucket + "/" + key` the vault can address
pub const MAX_COMPOSITE_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeTier {
    Standard,
    Large,
    /// No copy path exists for these yet
    Giant,
}

impl SizeTier {
    pub fn classify(size: u64) -> Self {
        if size >= GIANT_THRESHOLD {
            SizeTier::Giant
        } else if size >= LARGE_THRESHOLD {
            SizeTier::Large
        } else {
            SizeTier::Standard
        }
    }

    /// Queue this tier is dispatched to, if any
    pub fn dispatch_tier(&self) -> Option<DispatchTier> {
        match self {
            SizeTier::Standard => Some(DispatchTier::Standard),
            SizeTier::Large => Some(DispatchTier::Large),
            SizeTier::Giant => None,
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeTier::Standard => write!(f, "standard"),
            SizeTier::Large => write!(f, "large"),
            SizeTier::Giant => write!(f, "giant"),
        }
    }
}

/// Queue a routed envelope is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DispatchTier {
    Standard,
    Large,
    /// Dead-letter tier
    Failure,
}

impl DispatchTier {
    /// Dispatch order within one invocation
    pub const ALL: [DispatchTier; 3] = [
        DispatchTier::Standard,
        DispatchTier::Large,
        DispatchTier::Failure,
    ];

    /// Ordered tiers carry the invocation's group key
    pub fn is_ordered(&self) -> bool {
        !matches!(self, DispatchTier::Failure)
    }
}

impl fmt::Display for DispatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTier::Standard => write!(f, "standard"),
            DispatchTier::Large => write!(f, "large"),
            DispatchTier::Failure => write!(f, "failure"),
        }
    }
}

/// `len(bucket) + 1 + len(key)`, in UTF-8 bytes
///
/// The object store limits keys by encoded length, not characters, so
/// non-ASCII keys reach [`MAX_COMPOSITE_KEY_LEN`] with fewer characters.
pub fn composite_key_len(bucket: &str, key: &str) -> usize {
    bucket.len() + 1 + key.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive_lower_bounds() {
        assert_eq!(SizeTier::classify(0), SizeTier::Standard);
        assert_eq!(SizeTier::classify(LARGE_THRESHOLD - 1), SizeTier::Standard);
        assert_eq!(SizeTier::classify(LARGE_THRESHOLD), SizeTier::Large);
        assert_eq!(SizeTier::classify(GIANT_THRESHOLD - 1), SizeTier::Large);
        assert_eq!(SizeTier::classify(GIANT_THRESHOLD), SizeTier::Giant);
        assert_eq!(SizeTier::classify(u64::MAX), SizeTier::Giant);
    }

    #[test]
    fn test_classification_sweep() {
        let step = 64 * 1024 * 1024;
        let mut size = 0u64;
        while size < 8 * LARGE_THRESHOLD {
            let expected = if size < LARGE_THRESHOLD {
                SizeTier::Standard
            } else if size < GIANT_THRESHOLD {
                SizeTier::Large
            } else {
                SizeTier::Giant
            };
            assert_eq!(SizeTier::classify(size), expected, "size {}", size);
            size += step;
        }
    }

    #[test]
    fn test_dispatch_tiers() {
        assert_eq!(SizeTier::Standard.dispatch_tier(), Some(DispatchTier::Standard));
        assert_eq!(SizeTier::Large.dispatch_tier(), Some(DispatchTier::Large));
        assert_eq!(SizeTier::Giant.dispatch_tier(), None);
        assert!(DispatchTier::Standard.is_ordered());
        assert!(DispatchTier::Large.is_ordered());
        assert!(!DispatchTier::Failure.is_ordered());
    }

    #[test]
    fn test_composite_key_len() {
        assert_eq!(composite_key_len("b", "k"), 3);
        let key = "k".repeat(MAX_COMPOSITE_KEY_LEN - 2);
        assert_eq!(composite_key_len("b", &key), MAX_COMPOSITE_KEY_LEN);
    }

    #[test]
    fn test_composite_key_len_counts_bytes() {
        assert_eq!(composite_key_len("b", "é"), 4);

        let fits = "é".repeat(511);
        assert_eq!(composite_key_len("b", &fits), MAX_COMPOSITE_KEY_LEN);

        let over = "é".repeat(512);
        assert_eq!(over.chars().count() + 2, 514);
        assert!(composite_key_len("b", &over) > MAX_COMPOSITE_KEY_LEN);
    }
}

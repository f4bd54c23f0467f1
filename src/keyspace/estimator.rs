// src/keyspace/estimator.rs

use super::{KeyspaceDescriptor, KeyspaceError};

/// Computes the total candidate count of an attack.
///
/// This is a pure function of the descriptor. Deployments that size
/// keyspaces differently (custom charsets, rule engines that expand
/// unevenly) supply their own implementation.
pub trait KeyspaceEstimator: Send + Sync {
    fn total(&self, descriptor: &KeyspaceDescriptor) -> Result<u64, KeyspaceError>;
}

/// Default estimator covering the built-in descriptor modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorEstimator;

impl KeyspaceEstimator for DescriptorEstimator {
    fn total(&self, descriptor: &KeyspaceDescriptor) -> Result<u64, KeyspaceError> {
        let mode = descriptor.mode();
        let overflow = || KeyspaceError::Overflow { mode };

        match descriptor {
            KeyspaceDescriptor::Dictionary {
                wordlist_size,
                rule_count,
            } => wordlist_size
                .checked_mul((*rule_count).max(1))
                .ok_or_else(overflow),
            KeyspaceDescriptor::Mask { mask } => mask_size(mask),
            KeyspaceDescriptor::Hybrid {
                wordlist_size,
                mask,
            } => wordlist_size
                .checked_mul(mask_size(mask)?)
                .ok_or_else(overflow),
            KeyspaceDescriptor::Explicit { total } => Ok(*total),
        }
    }
}

/// Number of candidates a hashcat-style mask expands to.
///
/// Supported placeholders: `?l ?u ?d ?h ?H ?s ?a ?b`, and `??` for a
/// literal question mark. Any other character is a literal.
pub fn mask_size(mask: &str) -> Result<u64, KeyspaceError> {
    let invalid = |reason: String| KeyspaceError::InvalidMask {
        mask: mask.to_string(),
        reason,
    };

    if mask.is_empty() {
        return Err(invalid("mask is empty".to_string()));
    }

    let mut total: u64 = 1;
    let mut chars = mask.chars();

    while let Some(c) = chars.next() {
        let width: u64 = if c == '?' {
            match chars.next() {
                Some('l') | Some('u') => 26,
                Some('d') => 10,
                Some('h') | Some('H') => 16,
                Some('s') => 33,
                Some('a') => 95,
                Some('b') => 256,
                Some('?') => 1,
                Some(other) => return Err(invalid(format!("unknown placeholder '?{other}'"))),
                None => return Err(invalid("trailing '?'".to_string())),
            }
        } else {
            1
        };

        total = total
            .checked_mul(width)
            .ok_or(KeyspaceError::Overflow { mode: "mask" })?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_widths_multiply() {
        assert_eq!(mask_size("?l?l?d").unwrap(), 26 * 26 * 10);
        assert_eq!(mask_size("pass?d?d").unwrap(), 100);
        assert_eq!(mask_size("??").unwrap(), 1);
    }

    #[test]
    fn bad_masks_are_rejected() {
        assert!(matches!(mask_size(""), Err(KeyspaceError::InvalidMask { .. })));
        assert!(matches!(mask_size("?x"), Err(KeyspaceError::InvalidMask { .. })));
        assert!(matches!(mask_size("abc?"), Err(KeyspaceError::InvalidMask { .. })));
    }

    #[test]
    fn long_mask_overflows() {
        let mask = "?b".repeat(9);
        assert_eq!(
            mask_size(&mask),
            Err(KeyspaceError::Overflow { mode: "mask" })
        );
    }

    #[test]
    fn dictionary_without_rules_counts_words() {
        let est = DescriptorEstimator;
        let d = KeyspaceDescriptor::Dictionary {
            wordlist_size: 1000,
            rule_count: 0,
        };
        assert_eq!(est.total(&d).unwrap(), 1000);

        let d = KeyspaceDescriptor::Dictionary {
            wordlist_size: 1000,
            rule_count: 64,
        };
        assert_eq!(est.total(&d).unwrap(), 64_000);
    }

    #[test]
    fn hybrid_multiplies_words_by_mask() {
        let d = KeyspaceDescriptor::Hybrid {
            wordlist_size: 10,
            mask: "?d?d".to_string(),
        };
        assert_eq!(DescriptorEstimator.total(&d).unwrap(), 1000);
    }
}

//! Comparison of live query results against predictions.
//!
//! Records are compared by the byte equality of their protobuf encodings,
//! order-independently, because that is exactly what the live server
//! returns; any divergence in a field shows up as a multiset miss.

use prost::Message;
use std::collections::HashMap;
use thiserror::Error;

/// A failed comparison; the scenario aborts on any of these.
#[derive(Debug, Error, PartialEq)]
pub enum CompareError {
    /// The live server returned the wrong number of records.
    #[error("result count mismatch: expected {expected}, got {got}")]
    ResultCount { expected: usize, got: usize },

    /// A live record has no matching expected record left.
    #[error("unexpected record at position {position} (no remaining match)")]
    UnexpectedRecord { position: usize },

    /// The covered-servers list does not match.
    #[error("covered servers mismatch: expected {expected}, got {got}")]
    CoveredServers { expected: usize, got: usize },

    /// A covered-server entry has no match left.
    #[error("unexpected covered server {0}")]
    UnexpectedCoveredServer(String),
}

/// Compare result multisets.
///
/// When the expectation fits under `max_total` the live set must equal it;
/// otherwise the live set must be a size-`max_total` subset of it.
pub fn compare_result_sets<M: Message>(
    expected: &[M],
    real: &[M],
    max_total: usize,
) -> Result<(), CompareError> {
    if expected.len() <= max_total {
        if real.len() != expected.len() {
            return Err(CompareError::ResultCount {
                expected: expected.len(),
                got: real.len(),
            });
        }
    } else if real.len() != max_total {
        return Err(CompareError::ResultCount {
            expected: max_total,
            got: real.len(),
        });
    }

    let mut pool: HashMap<Vec<u8>, usize> = HashMap::new();
    for record in expected {
        *pool.entry(record.encode_to_vec()).or_insert(0) += 1;
    }
    for (position, record) in real.iter().enumerate() {
        let encoded = record.encode_to_vec();
        match pool.get_mut(&encoded) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return Err(CompareError::UnexpectedRecord { position }),
        }
    }
    Ok(())
}

/// Compare covered-servers lists.
///
/// The live list must be a permutation of the expectation, except that a
/// target able to satisfy the whole query alone (`max_total <=
/// local_count`) may legally report just itself.
pub fn compare_covered_servers(
    expected: &[Vec<u8>],
    real: &[Vec<u8>],
    max_total: usize,
    local_count: usize,
    target_id: &[u8],
) -> Result<(), CompareError> {
    if is_permutation(expected, real) {
        return Ok(());
    }
    if max_total <= local_count && real.len() == 1 && real[0] == target_id {
        return Ok(());
    }
    if expected.len() != real.len() {
        return Err(CompareError::CoveredServers {
            expected: expected.len(),
            got: real.len(),
        });
    }
    // Same length but not a permutation: name the first offender.
    let offender = first_unmatched(expected, real).unwrap_or_default();
    Err(CompareError::UnexpectedCoveredServer(offender))
}

fn is_permutation(expected: &[Vec<u8>], real: &[Vec<u8>]) -> bool {
    if expected.len() != real.len() {
        return false;
    }
    first_unmatched(expected, real).is_none()
}

/// Find the first real entry that cannot be matched against a remaining
/// expected entry (each consumed at most once).
fn first_unmatched(expected: &[Vec<u8>], real: &[Vec<u8>]) -> Option<String> {
    let mut pool: HashMap<&[u8], usize> = HashMap::new();
    for entry in expected {
        *pool.entry(entry.as_slice()).or_insert(0) += 1;
    }
    for entry in real {
        match pool.get_mut(entry.as_slice()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return Some(hex_prefix(entry)),
        }
    }
    None
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosim_wire::client::CheckInRequest;

    fn record(byte: u8) -> CheckInRequest {
        CheckInRequest {
            challenge: vec![byte; 4],
        }
    }

    #[test]
    fn equal_multisets_pass_regardless_of_order() {
        let expected = vec![record(1), record(2), record(2)];
        let real = vec![record(2), record(1), record(2)];
        assert_eq!(compare_result_sets(&expected, &real, 1000), Ok(()));
    }

    #[test]
    fn count_mismatch_fails() {
        let expected = vec![record(1), record(2)];
        let real = vec![record(1)];
        assert!(matches!(
            compare_result_sets(&expected, &real, 1000),
            Err(CompareError::ResultCount {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn wrong_record_fails_even_with_right_count() {
        let expected = vec![record(1), record(2)];
        let real = vec![record(1), record(3)];
        assert!(matches!(
            compare_result_sets(&expected, &real, 1000),
            Err(CompareError::UnexpectedRecord { position: 1 })
        ));
    }

    #[test]
    fn oversized_expectation_allows_any_max_total_subset() {
        let expected = vec![record(1), record(2), record(3)];
        let real = vec![record(3), record(1)];
        assert_eq!(compare_result_sets(&expected, &real, 2), Ok(()));

        // Subset must still draw from the expectation.
        let bad = vec![record(3), record(9)];
        assert!(compare_result_sets(&expected, &bad, 2).is_err());

        // And must be exactly max_total records.
        let short = vec![record(3)];
        assert!(compare_result_sets(&expected, &short, 2).is_err());
    }

    #[test]
    fn covered_permutation_passes() {
        let expected = vec![vec![1u8; 32], vec![2u8; 32]];
        let real = vec![vec![2u8; 32], vec![1u8; 32]];
        assert_eq!(
            compare_covered_servers(&expected, &real, 1000, 0, &[1u8; 32]),
            Ok(())
        );
    }

    #[test]
    fn covered_target_only_accepted_when_local_suffices() {
        let expected = vec![vec![1u8; 32], vec![2u8; 32]];
        let real = vec![vec![1u8; 32]];
        // max_total (10) <= local_count (20): everything could come from
        // the target alone.
        assert_eq!(
            compare_covered_servers(&expected, &real, 10, 20, &[1u8; 32]),
            Ok(())
        );
        // Otherwise the shortfall is an error.
        assert!(compare_covered_servers(&expected, &real, 1000, 5, &[1u8; 32]).is_err());
    }

    #[test]
    fn covered_same_length_wrong_entries_fails() {
        let expected = vec![vec![1u8; 32], vec![2u8; 32]];
        let real = vec![vec![1u8; 32], vec![3u8; 32]];
        assert!(matches!(
            compare_covered_servers(&expected, &real, 1000, 0, &[1u8; 32]),
            Err(CompareError::UnexpectedCoveredServer(_))
        ));
    }
}

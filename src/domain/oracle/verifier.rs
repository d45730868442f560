use std::collections::BTreeSet;

use crate::domain::oracle::tables::{experiment_tables, join_tables, joined_value_set};
use crate::domain::utils::id::RoleId;
use crate::error::{Error, Result};

/// The join the receiver must output for an experiment point, as a set of comma-joined value
/// tuples. Row order of the distributed run is not defined, hence the set.
pub fn expected_result(source_ids: &[RoleId], n_rows: usize, join_size: usize, seed: u64) -> Result<BTreeSet<String>> {
    let tables = experiment_tables(source_ids, n_rows, join_size, seed)?;
    Ok(joined_value_set(&join_tables(&tables)))
}

/// Compares oracle and receiver output; any extra, missing or altered row is a mismatch.
pub fn verify(expected: BTreeSet<String>, observed: BTreeSet<String>) -> Result<()> {
    if expected != observed {
        return Err(Error::ResultMismatchError { expected, observed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<RoleId> {
        vec![RoleId::new("source_0"), RoleId::new("source_1")]
    }

    #[test]
    fn test_expected_result_is_deterministic() {
        let first = expected_result(&ids(), 100, 80, 42).unwrap();
        let second = expected_result(&ids(), 100, 80, 42).unwrap();
        assert_eq!(first, second);
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    }

    #[test]
    fn test_rows_are_value_tuples() {
        let expected = expected_result(&ids(), 10, 8, 0).unwrap();
        assert_eq!(expected.len(), 8);
        for row in &expected {
            let columns: Vec<&str> = row.split(',').collect();
            assert_eq!(columns.len(), 2);
            assert!(columns[0].starts_with("val_source_0_"));
            assert!(columns[1].starts_with("val_source_1_"));
        }
    }

    #[test]
    fn test_single_row_difference_is_mismatch() {
        let expected = expected_result(&ids(), 10, 8, 0).unwrap();
        let mut observed = expected.clone();
        let first = observed.iter().next().cloned().unwrap();
        observed.remove(&first);
        observed.insert("val_source_0_1,val_source_1_1001".to_string());

        assert!(verify(expected.clone(), expected.clone()).is_ok());
        match verify(expected.clone(), observed.clone()) {
            Err(Error::ResultMismatchError { expected: e, observed: o }) => {
                assert_eq!(e, expected);
                assert_eq!(o, observed);
            }
            other => panic!("expected a mismatch, got {:?}", other),
        }
    }
}

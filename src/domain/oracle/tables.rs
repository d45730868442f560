//! Synthetic per-source tables and the join over them.
//!
//! The generator that runs inside the units and the local oracle both go through this module, so
//! both sides see the same tables for the same `(source ids, rows, join size, seed)`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::domain::utils::id::RoleId;
use crate::error::{Error, Result};

pub const COL_KEY: &str = "uid";
pub const COL_VALUE: &str = "val";
pub const REMOVED_KEY_PREFIX: &str = "removed_";
const MAX_VALUE_DRAW: u32 = 1000;

/// One source's table, `key -> value`, iterated in key order.
pub type Table = BTreeMap<String, String>;

/// Result of joining all tables on the keys they share: `key -> one value per table`.
pub type JoinedTable = BTreeMap<String, Vec<String>>;

/// The single random stream every generation step draws from.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Builds one table per source with `n_rows` entries each. Every table holds `key_0` up to
/// `key_<n_rows - 1>`; the value of source `s` is `val_<s>_<draw>` with a draw in `1..=1000`.
/// Draws happen row by row, and within a row in source order.
pub fn generate_tables<R: Rng>(rng: &mut R, source_ids: &[RoleId], n_rows: usize) -> Vec<Table> {
    let mut tables = vec![Table::new(); source_ids.len()];

    for row in 0..n_rows {
        let key = format!("key_{}", row);
        for (table, source) in tables.iter_mut().zip(source_ids) {
            let draw = rng.random_range(1..=MAX_VALUE_DRAW);
            table.insert(key.clone(), format!("val_{}_{}", source, draw));
        }
    }
    tables
}

/// Shrinks the set of keys common to all tables down to exactly `join_size`.
///
/// Keys to drop from the join are sampled uniformly from the first table's keys. For each of
/// them a random non-empty, strict subset of the tables renames the entry to
/// `removed_<key>`, so at least one table keeps the key and at least one loses it.
pub fn control_join_size<R: Rng>(rng: &mut R, tables: &mut [Table], join_size: usize) -> Result<()> {
    let Some(first) = tables.first() else {
        return Ok(());
    };

    let common_keys: Vec<String> = first.keys().cloned().collect();
    if common_keys.len() <= join_size {
        return Err(Error::ConfigError(format!(
            "join size {} needs more than {} common keys to choose from",
            join_size,
            common_keys.len()
        )));
    }
    if tables.len() < 2 {
        return Err(Error::ConfigError("the join size can only be controlled with at least two tables".to_string()));
    }

    let n_tables = tables.len();
    for key_index in index::sample(rng, common_keys.len(), common_keys.len() - join_size) {
        let key = &common_keys[key_index];
        let n_modified = rng.random_range(1..n_tables);
        let renamed = format!("{}{}", REMOVED_KEY_PREFIX, key);

        for table_index in index::sample(rng, n_tables, n_modified) {
            let table = &mut tables[table_index];
            if let Some(value) = table.remove(key) {
                table.insert(renamed.clone(), value);
            }
        }
    }
    Ok(())
}

/// Natural join of all tables on the keys present in every one of them.
pub fn join_tables(tables: &[Table]) -> JoinedTable {
    let Some((first, rest)) = tables.split_first() else {
        return JoinedTable::new();
    };

    first
        .keys()
        .filter(|key| rest.iter().all(|table| table.contains_key(*key)))
        .map(|key| {
            let values = tables.iter().filter_map(|table| table.get(key).cloned()).collect();
            (key.clone(), values)
        })
        .collect()
}

/// Generates the tables of an experiment point exactly as the units do.
pub fn experiment_tables(source_ids: &[RoleId], n_rows: usize, join_size: usize, seed: u64) -> Result<Vec<Table>> {
    let mut rng = seeded_rng(seed);
    let mut tables = generate_tables(&mut rng, source_ids, n_rows);
    control_join_size(&mut rng, &mut tables, join_size)?;
    Ok(tables)
}

/// Splits a CSV (`key,attr_1,..,attr_m`) column-wise: source `i` gets `key -> attr_i`.
pub fn tables_from_csv<T: Read>(input: T, n_sources: usize) -> Result<Vec<Table>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);

    let n_attributes = reader.headers()?.len().saturating_sub(1);
    if n_attributes < n_sources {
        return Err(Error::ConfigError(format!("CSV has only {} attribute columns, but {} sources were specified", n_attributes, n_sources)));
    }

    let mut tables = vec![Table::new(); n_sources];
    for record in reader.records() {
        let record = record?;
        let Some(key) = record.get(0) else {
            continue;
        };
        for (i, table) in tables.iter_mut().enumerate() {
            let value = record.get(i + 1).unwrap_or_default();
            table.insert(key.to_string(), value.to_string());
        }
    }
    Ok(tables)
}

/// Rows of a joined table as comma-joined value tuples, the form the receiver outputs.
pub fn joined_value_set(joined: &JoinedTable) -> BTreeSet<String> {
    joined.values().map(|values| values.join(",")).collect()
}

/// Writes one source's table as `uid,val` CSV, rows in key order.
pub fn write_table_csv<W: Write>(output: W, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record([COL_KEY, COL_VALUE])?;
    for (key, value) in table {
        writer.write_record([key, value])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the join as CSV with one `val-<source>` column per source after the key.
pub fn write_join_csv<W: Write>(output: W, source_ids: &[RoleId], joined: &JoinedTable) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);

    let mut header = vec![COL_KEY.to_string()];
    header.extend(source_ids.iter().map(|source| format!("{}-{}", COL_VALUE, source)));
    writer.write_record(&header)?;

    for (key, values) in joined {
        writer.write_record(std::iter::once(key).chain(values))?;
    }
    writer.flush()?;
    Ok(())
}

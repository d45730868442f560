use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One line of the results file. `nodes_stats` holds whatever JSON object a unit printed after
/// its `Stats:` marker, or `null` when the unit printed none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub n_sources: usize,
    pub set_size: usize,
    pub join_size: usize,
    pub rep: usize,
    pub nodes_stats: BTreeMap<String, Option<serde_json::Value>>,
}

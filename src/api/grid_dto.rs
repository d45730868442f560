use serde::Deserialize;

/// A parameter grid: every party count is combined with every `(set_size, join_size)` pair,
/// and each combination is repeated `rep` times.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ExperimentGridDto {
    pub n_sources: Vec<usize>,
    pub set_size: Vec<usize>,
    pub join_size: Vec<usize>,
    pub rep: usize,
}

fn eighty_percent(set_sizes: &[usize]) -> Vec<usize> {
    set_sizes.iter().map(|size| size * 8 / 10).collect()
}

impl ExperimentGridDto {
    fn with_default_join_sizes(n_sources: Vec<usize>, set_size: Vec<usize>, rep: usize) -> Self {
        let join_size = eighty_percent(&set_size);
        ExperimentGridDto { n_sources, set_size, join_size, rep }
    }

    /// The grids shipped with the harness.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "light" => Some(Self::with_default_join_sizes(vec![2, 3, 4], vec![1353, 1700, 19735], 2)),
            "full" => Some(Self::with_default_join_sizes(vec![2, 3, 4, 5, 6], vec![1353, 1700, 19735, 45211, 253680], 3)),
            "genmpc_comp" => Some(Self::with_default_join_sizes(vec![2], vec![10, 100, 1000], 3)),
            _ => None,
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["light", "full", "genmpc_comp"]
    }
}

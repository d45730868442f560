use std::fmt;

use crate::api::grid_dto::ExperimentGridDto;
use crate::error::{Error, Result};

/// One concrete run of the benchmark. `index` is the 0-based position in the grid and doubles as
/// the data-generation seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentPoint {
    pub index: usize,
    pub n_sources: usize,
    pub set_size: usize,
    pub join_size: usize,
    pub rep: usize,
}

impl ExperimentPoint {
    pub fn seed(&self) -> u64 {
        self.index as u64
    }

    /// 1-based position, the number accepted to resume a grid.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

impl fmt::Display for ExperimentPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={} SetSize={} JoinSize={} REP={}", self.n_sources, self.set_size, self.join_size, self.rep)
    }
}

/// Expands a grid into its points: party counts outermost, then the paired
/// `(set_size, join_size)` entries, then repetitions.
pub fn experiment_points(grid: &ExperimentGridDto) -> Result<Vec<ExperimentPoint>> {
    if grid.set_size.len() != grid.join_size.len() {
        return Err(Error::ConfigError(format!(
            "grid pairs set sizes with join sizes, got {} set sizes and {} join sizes",
            grid.set_size.len(),
            grid.join_size.len()
        )));
    }

    let mut points = Vec::new();
    for &n_sources in &grid.n_sources {
        for (&set_size, &join_size) in grid.set_size.iter().zip(&grid.join_size) {
            for rep in 0..grid.rep {
                points.push(ExperimentPoint { index: points.len(), n_sources, set_size, join_size, rep });
            }
        }
    }
    Ok(points)
}

/// Points still to run when resuming at the 1-based point number `skip_to` (0 or 1 runs all).
pub fn resume_from(points: Vec<ExperimentPoint>, skip_to: usize) -> Vec<ExperimentPoint> {
    points.into_iter().filter(|point| point.number() >= skip_to).collect()
}

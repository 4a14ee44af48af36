use crate::types::{is_no_data, Band, CompositeError, CompositeResult, GridSpec, NO_DATA};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// How the observations of one period are combined per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReducerPolicy {
    /// First valid value in priority order
    Mosaic,
    /// Mean of the valid values
    Mean,
    /// Mosaic, then remaining no-data filled with 0
    BinaryMosaic,
}

impl std::fmt::Display for ReducerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReducerPolicy::Mosaic => write!(f, "MOSAIC"),
            ReducerPolicy::Mean => write!(f, "MEAN"),
            ReducerPolicy::BinaryMosaic => write!(f, "BINARY_MOSAIC"),
        }
    }
}

/// Combines per-observation layers into one composite band
#[derive(Debug, Clone, Copy)]
pub struct MosaicReducer {
    policy: ReducerPolicy,
}

impl MosaicReducer {
    pub fn new(policy: ReducerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReducerPolicy {
        self.policy
    }

    /// Reduce `layers` (already in priority order) onto `grid`.
    ///
    /// Zero layers give an all no-data band whatever the policy. A layer
    /// whose shape differs from the grid fails with the period index.
    pub fn reduce(&self, period_index: usize, grid: &GridSpec, layers: &[Band]) -> CompositeResult<Band> {
        for layer in layers {
            if layer.dim() != grid.shape() {
                return Err(CompositeError::DimensionMismatch {
                    period_index,
                    expected: format!("{:?}", grid.shape()),
                    found: format!("{:?}", layer.dim()),
                });
            }
        }

        if layers.is_empty() {
            return Ok(grid.empty_band());
        }

        let reduced = match self.policy {
            ReducerPolicy::Mosaic => first_valid(grid, layers),
            ReducerPolicy::Mean => valid_mean(grid, layers),
            ReducerPolicy::BinaryMosaic => {
                let mut mosaic = first_valid(grid, layers);
                mosaic.mapv_inplace(|v| if is_no_data(v) { 0.0 } else { v });
                mosaic
            }
        };

        log::debug!(
            "Period {}: {} of {} layers -> {} valid pixels",
            period_index,
            self.policy,
            layers.len(),
            reduced.iter().filter(|v| !is_no_data(**v)).count()
        );

        Ok(reduced)
    }
}

fn first_valid(grid: &GridSpec, layers: &[Band]) -> Band {
    let mut mosaic = grid.empty_band();

    for layer in layers {
        Zip::from(&mut mosaic).and(layer).for_each(|out, &value| {
            if is_no_data(*out) && !is_no_data(value) {
                *out = value;
            }
        });
    }

    mosaic
}

fn valid_mean(grid: &GridSpec, layers: &[Band]) -> Band {
    let mut sum = Array2::<f64>::zeros(grid.shape());
    let mut count = Array2::<u32>::zeros(grid.shape());

    for layer in layers {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(layer)
            .for_each(|s, n, &value| {
                if !is_no_data(value) {
                    *s += value as f64;
                    *n += 1;
                }
            });
    }

    Zip::from(&sum)
        .and(&count)
        .map_collect(|&s, &n| if n == 0 { NO_DATA } else { (s / n as f64) as f32 })
}

use crate::core::partition::PeriodChunk;
use crate::types::{Band, BandCube, Composite, CompositeError, CompositeResult, GridSpec, Product};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

/// Run-level attributes carried by an annual stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackAttributes {
    pub year: i32,
    pub threshold: Option<f64>,
    pub crs: String,
    pub scale: f64,
    /// e.g. "NDVI", "VC", "LST"
    pub data_type: String,
    pub product: Product,
}

/// One band of a stack (one period)
#[derive(Debug, Clone)]
pub struct StackBand {
    pub period_index: usize,
    /// Band name
    pub label: String,
    pub data: Band,
}

/// Per-period composites of one product joined as bands in period order
#[derive(Debug, Clone)]
pub struct StackedArtifact {
    grid: GridSpec,
    bands: Vec<StackBand>,
    attributes: StackAttributes,
}

impl StackedArtifact {
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn attributes(&self) -> &StackAttributes {
        &self.attributes
    }

    pub fn bands(&self) -> &[StackBand] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.label.as_str()).collect()
    }

    pub fn band(&self, label: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.label == label).map(|b| &b.data)
    }

    /// Bands whose period falls in `chunk`, `None` when the chunk selects nothing
    pub fn select_chunk(&self, chunk: &PeriodChunk) -> Option<StackedArtifact> {
        let bands: Vec<StackBand> = self
            .bands
            .iter()
            .filter(|b| chunk.contains(b.period_index))
            .cloned()
            .collect();

        if bands.is_empty() {
            return None;
        }

        Some(StackedArtifact {
            grid: self.grid.clone(),
            bands,
            attributes: self.attributes.clone(),
        })
    }

    /// Band x row x col cube
    pub fn to_cube(&self) -> CompositeResult<BandCube> {
        let (rows, cols) = self.grid.shape();
        let mut cube = Array3::from_elem((self.bands.len(), rows, cols), f32::NAN);

        for (mut layer, band) in cube.axis_iter_mut(Axis(0)).zip(&self.bands) {
            if band.data.dim() != (rows, cols) {
                return Err(CompositeError::DimensionMismatch {
                    period_index: band.period_index,
                    expected: self.grid.describe(),
                    found: format!("{:?}", band.data.dim()),
                });
            }
            layer.assign(&band.data);
        }

        Ok(cube)
    }
}

/// Joins composites into an annual stack
pub struct StackAssembler;

impl StackAssembler {
    /// Stack one product of `composites` in period order.
    ///
    /// The first composite's grid is the reference; any composite whose
    /// shape or CRS differs fails the whole stack.
    pub fn assemble(
        composites: &[Composite],
        product: Product,
        attributes: StackAttributes,
    ) -> CompositeResult<StackedArtifact> {
        let mut ordered: Vec<&Composite> = composites.iter().collect();
        ordered.sort_by_key(|c| c.period_index);

        let reference = ordered
            .first()
            .ok_or_else(|| CompositeError::Configuration("Cannot stack zero composites".to_string()))?
            .grid
            .clone();

        let mut bands = Vec::with_capacity(ordered.len());
        for composite in ordered {
            let data = composite.product(product).ok_or_else(|| {
                CompositeError::Configuration(format!(
                    "Period {} has no {} band (no threshold configured)",
                    composite.period_index, product
                ))
            })?;

            if !composite.grid.is_compatible(&reference) || data.dim() != reference.shape() {
                return Err(CompositeError::DimensionMismatch {
                    period_index: composite.period_index,
                    expected: reference.describe(),
                    found: format!("{} ({:?} band)", composite.grid.describe(), data.dim()),
                });
            }

            bands.push(StackBand {
                period_index: composite.period_index,
                label: composite.label.clone(),
                data: data.clone(),
            });
        }

        log::info!(
            "Stacked {} {} bands ({}) for {}",
            bands.len(),
            attributes.data_type,
            reference.describe(),
            attributes.year
        );

        Ok(StackedArtifact {
            grid: reference,
            bands,
            attributes,
        })
    }
}

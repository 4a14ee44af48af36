use crate::types::{is_no_data, Band, CalibratedObservation, CompositeError, CompositeResult, NO_DATA};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Landsat 8/9 band 10 effective wavelength (cm)
pub const LANDSAT_B10_WAVELENGTH: f64 = 0.00115;
/// Second radiation constant h*c/k (cm K)
pub const RADIATION_C2: f64 = 1.438;
/// Broadband emissivity used for mixed urban/vegetated surfaces
pub const DEFAULT_EMISSIVITY: f64 = 0.986;

const KELVIN_OFFSET: f64 = 273.15;

/// Derived per-pixel index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpectralIndex {
    /// `(positive - negative) / (positive + negative)`, e.g. NDVI
    NormalizedDifference {
        name: String,
        positive_band: String,
        negative_band: String,
    },
    /// Land surface temperature in degrees Celsius from brightness temperature
    SurfaceTemperature {
        name: String,
        thermal_band: String,
        wavelength: f64,
        c2: f64,
        emissivity: f64,
    },
}

impl SpectralIndex {
    /// Sentinel-2 NDVI (B8 near infrared, B4 red)
    pub fn ndvi() -> Self {
        SpectralIndex::NormalizedDifference {
            name: "NDVI".to_string(),
            positive_band: "B8".to_string(),
            negative_band: "B4".to_string(),
        }
    }

    /// Landsat 8/9 land surface temperature from ST_B10
    pub fn landsat_lst() -> Self {
        SpectralIndex::SurfaceTemperature {
            name: "LST".to_string(),
            thermal_band: "ST_B10".to_string(),
            wavelength: LANDSAT_B10_WAVELENGTH,
            c2: RADIATION_C2,
            emissivity: DEFAULT_EMISSIVITY,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SpectralIndex::NormalizedDifference { name, .. } => name,
            SpectralIndex::SurfaceTemperature { name, .. } => name,
        }
    }

    pub fn required_bands(&self) -> Vec<&str> {
        match self {
            SpectralIndex::NormalizedDifference {
                positive_band,
                negative_band,
                ..
            } => vec![positive_band.as_str(), negative_band.as_str()],
            SpectralIndex::SurfaceTemperature { thermal_band, .. } => vec![thermal_band.as_str()],
        }
    }

    /// Inclusive range of values the index can take
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            SpectralIndex::NormalizedDifference { .. } => (-1.0, 1.0),
            SpectralIndex::SurfaceTemperature { .. } => (-KELVIN_OFFSET, f64::INFINITY),
        }
    }
}

impl Default for SpectralIndex {
    fn default() -> Self {
        Self::ndvi()
    }
}

/// `(a - b) / (a + b)`, no-data where either input is missing or the sum is zero
pub fn normalized_difference(positive: &Band, negative: &Band) -> Band {
    let kernel = |&a: &f32, &b: &f32| {
        let sum = a + b;
        if is_no_data(a) || is_no_data(b) || sum == 0.0 {
            NO_DATA
        } else {
            (a - b) / sum
        }
    };

    #[cfg(feature = "parallel")]
    {
        Zip::from(positive).and(negative).par_map_collect(kernel)
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(positive).and(negative).map_collect(kernel)
    }
}

/// Emissivity-corrected surface temperature in degrees Celsius.
///
/// `Tb / (1 + (wavelength * Tb / c2) * ln(emissivity)) - 273.15`. Pixels with
/// a zero denominator and every pixel of a non-positive emissivity are no-data.
pub fn surface_temperature(brightness_kelvin: &Band, wavelength: f64, c2: f64, emissivity: f64) -> Band {
    if emissivity <= 0.0 || c2 == 0.0 {
        return Band::from_elem(brightness_kelvin.dim(), NO_DATA);
    }
    let ln_emissivity = emissivity.ln();

    let kernel = |&tb: &f32| {
        if is_no_data(tb) {
            return NO_DATA;
        }
        let tb = tb as f64;
        let denominator = 1.0 + (wavelength * tb / c2) * ln_emissivity;
        if denominator == 0.0 {
            return NO_DATA;
        }
        let celsius = (tb / denominator - KELVIN_OFFSET) as f32;
        if celsius.is_finite() {
            celsius
        } else {
            NO_DATA
        }
    };

    #[cfg(feature = "parallel")]
    {
        Zip::from(brightness_kelvin).par_map_collect(kernel)
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(brightness_kelvin).map_collect(kernel)
    }
}

/// Boolean band `index >= threshold` (1.0 / 0.0, no-data preserved)
pub fn threshold_mask(index: &Band, threshold: f64) -> Band {
    index.mapv(|value| {
        if is_no_data(value) {
            NO_DATA
        } else if value as f64 >= threshold {
            1.0
        } else {
            0.0
        }
    })
}

/// Computes the configured index (and optional threshold mask) per observation
#[derive(Debug, Clone)]
pub struct IndexCalculator {
    index: SpectralIndex,
    threshold: Option<f64>,
}

impl IndexCalculator {
    pub fn new(index: SpectralIndex, threshold: Option<f64>) -> CompositeResult<Self> {
        if index.name().is_empty() || index.required_bands().iter().any(|band| band.is_empty()) {
            return Err(CompositeError::Configuration(
                "Spectral index needs a name and non-empty band names".to_string(),
            ));
        }

        if let Some(threshold) = threshold {
            let (low, high) = index.valid_range();
            if !threshold.is_finite() || threshold < low || threshold > high {
                return Err(CompositeError::Configuration(format!(
                    "Threshold {} is outside the valid {} range [{}, {}]",
                    threshold,
                    index.name(),
                    low,
                    high
                )));
            }
        }

        Ok(Self { index, threshold })
    }

    pub fn index(&self) -> &SpectralIndex {
        &self.index
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    fn band<'a>(&self, observation: &'a CalibratedObservation, name: &str) -> CompositeResult<&'a Band> {
        observation.band(name).ok_or_else(|| {
            CompositeError::Configuration(format!(
                "Observation {} has no band '{}' required by {}",
                observation.id(),
                name,
                self.index.name()
            ))
        })
    }

    /// Index band of one calibrated observation
    pub fn compute(&self, observation: &CalibratedObservation) -> CompositeResult<Band> {
        let index = match &self.index {
            SpectralIndex::NormalizedDifference {
                positive_band,
                negative_band,
                ..
            } => {
                let positive = self.band(observation, positive_band)?;
                let negative = self.band(observation, negative_band)?;
                if positive.dim() != negative.dim() {
                    return Err(CompositeError::Configuration(format!(
                        "Observation {}: bands {} {:?} and {} {:?} differ in shape",
                        observation.id(),
                        positive_band,
                        positive.dim(),
                        negative_band,
                        negative.dim()
                    )));
                }
                normalized_difference(positive, negative)
            }
            SpectralIndex::SurfaceTemperature {
                thermal_band,
                wavelength,
                c2,
                emissivity,
                ..
            } => surface_temperature(self.band(observation, thermal_band)?, *wavelength, *c2, *emissivity),
        };

        log::trace!("{}: computed {}", observation.id(), self.index.name());
        Ok(index)
    }

    /// Threshold mask of an index band, if a threshold is configured
    pub fn mask(&self, index: &Band) -> Option<Band> {
        self.threshold.map(|threshold| threshold_mask(index, threshold))
    }
}

use crate::types::{Band, CalibratedObservation, CompositeError, CompositeResult, Observation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `value' = value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCoefficients {
    pub scale: f64,
    pub offset: f64,
}

impl LinearCoefficients {
    pub const IDENTITY: LinearCoefficients = LinearCoefficients {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        (value as f64 * self.scale + self.offset) as f32
    }
}

/// Band categories with distinct calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandCategory {
    Optical,
    Thermal,
    Quality,
    /// Not matched by any pattern; passed through
    Other,
}

/// Rescaling coefficients and the band-name patterns selecting them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub optical: LinearCoefficients,
    pub thermal: LinearCoefficients,
    /// Regex matched against band names for the optical category
    pub optical_pattern: String,
    /// Regex matched against band names for the thermal category
    pub thermal_pattern: String,
}

impl CalibrationConfig {
    /// Sentinel-2 L2A surface reflectance (DN / 10000)
    pub fn sentinel2() -> Self {
        Self {
            optical: LinearCoefficients::new(1e-4, 0.0),
            thermal: LinearCoefficients::IDENTITY,
            optical_pattern: r"^B\d+A?$".to_string(),
            // Sentinel-2 has no thermal bands
            thermal_pattern: r"^$".to_string(),
        }
    }

    /// Landsat Collection 2 Level-2 surface reflectance and surface temperature
    pub fn landsat_c2() -> Self {
        Self {
            optical: LinearCoefficients::new(0.0000275, -0.2),
            thermal: LinearCoefficients::new(0.00341802, 149.0),
            optical_pattern: r"^SR_B.*$".to_string(),
            thermal_pattern: r"^ST_B.*$".to_string(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::sentinel2()
    }
}

/// Digital number to physical unit conversion
#[derive(Debug, Clone)]
pub struct BandCalibrator {
    optical: LinearCoefficients,
    thermal: LinearCoefficients,
    optical_pattern: Regex,
    thermal_pattern: Regex,
    quality_band: String,
}

impl BandCalibrator {
    /// `quality_band` names the band that is never rescaled
    pub fn new(config: &CalibrationConfig, quality_band: &str) -> CompositeResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                CompositeError::Configuration(format!("Invalid band pattern '{}': {}", pattern, e))
            })
        };

        for (category, coefficients) in [("optical", &config.optical), ("thermal", &config.thermal)] {
            if !coefficients.scale.is_finite() || !coefficients.offset.is_finite() {
                return Err(CompositeError::Configuration(format!(
                    "Non-finite {} calibration coefficients: {:?}",
                    category, coefficients
                )));
            }
        }

        Ok(Self {
            optical: config.optical,
            thermal: config.thermal,
            optical_pattern: compile(&config.optical_pattern)?,
            thermal_pattern: compile(&config.thermal_pattern)?,
            quality_band: quality_band.to_string(),
        })
    }

    pub fn category(&self, band_name: &str) -> BandCategory {
        if band_name == self.quality_band {
            BandCategory::Quality
        } else if self.thermal_pattern.is_match(band_name) {
            BandCategory::Thermal
        } else if self.optical_pattern.is_match(band_name) {
            BandCategory::Optical
        } else {
            BandCategory::Other
        }
    }

    fn coefficients(&self, category: BandCategory) -> Option<LinearCoefficients> {
        match category {
            BandCategory::Optical => Some(self.optical),
            BandCategory::Thermal => Some(self.thermal),
            BandCategory::Quality | BandCategory::Other => None,
        }
    }

    /// Rescale every band of the observation once.
    ///
    /// Consumes the raw observation; the returned type cannot be passed
    /// back in, so calibration happens exactly once.
    pub fn calibrate(&self, mut observation: Observation) -> CalibratedObservation {
        let raw_bands = std::mem::take(&mut observation.bands);
        let mut bands: BTreeMap<String, Band> = BTreeMap::new();

        for (name, band) in raw_bands {
            let category = self.category(&name);
            let calibrated = match self.coefficients(category) {
                // NaN stays NaN through the linear map
                Some(coefficients) => band.mapv(|dn| coefficients.apply(dn)),
                None => band,
            };
            log::trace!("{}: band {} calibrated as {:?}", observation.id, name, category);
            bands.insert(name, calibrated);
        }

        CalibratedObservation::new(observation, bands)
    }
}

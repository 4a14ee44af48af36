use crate::types::{CompositeError, CompositeResult, Observation, QualityBand, NO_DATA};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Sentinel-2 QA60 opaque cloud bit
pub const S2_QA60_OPAQUE_CLOUD: u8 = 10;
/// Sentinel-2 QA60 cirrus bit
pub const S2_QA60_CIRRUS: u8 = 11;
/// Landsat Collection 2 QA_PIXEL cloud bit
pub const LANDSAT_QA_CLOUD: u8 = 3;
/// Landsat Collection 2 QA_PIXEL cloud shadow bit
pub const LANDSAT_QA_CLOUD_SHADOW: u8 = 5;

/// Which quality bits flag a pixel as unusable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMaskConfig {
    /// Name of the quality band in the source product (passed through calibration untouched)
    pub band_name: String,
    /// Bit positions that must all be 0 for a pixel to be valid
    pub bad_bits: Vec<u8>,
}

impl QualityMaskConfig {
    pub fn sentinel2() -> Self {
        Self {
            band_name: "QA60".to_string(),
            bad_bits: vec![S2_QA60_OPAQUE_CLOUD, S2_QA60_CIRRUS],
        }
    }

    pub fn landsat_c2() -> Self {
        Self {
            band_name: "QA_PIXEL".to_string(),
            bad_bits: vec![LANDSAT_QA_CLOUD, LANDSAT_QA_CLOUD_SHADOW],
        }
    }
}

impl Default for QualityMaskConfig {
    fn default() -> Self {
        Self::sentinel2()
    }
}

/// Per-pixel validity from a quality bitfield
#[derive(Debug, Clone)]
pub struct QualityMasker {
    bad_bits_mask: u16,
}

impl QualityMasker {
    pub fn new(config: &QualityMaskConfig) -> CompositeResult<Self> {
        let mut bad_bits_mask = 0u16;
        for &bit in &config.bad_bits {
            if bit >= 16 {
                return Err(CompositeError::Configuration(format!(
                    "Quality bit {} is outside the 16-bit quality band",
                    bit
                )));
            }
            bad_bits_mask |= 1 << bit;
        }

        Ok(Self { bad_bits_mask })
    }

    /// Combined bitmask of all configured bad bits
    pub fn bad_bits_mask(&self) -> u16 {
        self.bad_bits_mask
    }

    #[inline]
    pub fn is_valid(&self, quality: u16) -> bool {
        quality & self.bad_bits_mask == 0
    }

    /// `true` where every configured bad bit is clear
    pub fn validity(&self, quality: &QualityBand) -> Array2<bool> {
        quality.mapv(|q| self.is_valid(q))
    }

    /// Set failing pixels to no-data in every band of the observation.
    ///
    /// Returns the number of masked pixels. Any band whose shape differs
    /// from the quality band fails the whole observation before a pixel is
    /// touched.
    pub fn apply(&self, period_index: usize, observation: &mut Observation) -> CompositeResult<usize> {
        let shape = observation.quality_band.dim();
        if let Some((name, band)) = observation.bands.iter().find(|(_, band)| band.dim() != shape) {
            return Err(CompositeError::DimensionMismatch {
                period_index,
                expected: format!("{:?} (quality band)", shape),
                found: format!("{:?} (band {} of {})", band.dim(), name, observation.id),
            });
        }

        let validity = self.validity(&observation.quality_band);
        let masked = validity.iter().filter(|valid| !**valid).count();

        if masked == 0 {
            return Ok(0);
        }

        for band in observation.bands.values_mut() {
            Zip::from(band).and(&validity).for_each(|value, &valid| {
                if !valid {
                    *value = NO_DATA;
                }
            });
        }

        log::debug!(
            "{}: masked {} of {} pixels (bits 0x{:04x})",
            observation.id,
            masked,
            validity.len(),
            self.bad_bits_mask
        );

        Ok(masked)
    }
}

//! Run configuration
//!
//! A plain serde object with enumerated options. Presets reproduce the two
//! production setups: Sentinel-2 NDVI vegetation cover and Landsat 8/9 land
//! surface temperature.

use crate::core::calibrate::CalibrationConfig;
use crate::core::indices::SpectralIndex;
use crate::core::mosaic::ReducerPolicy;
use crate::core::partition::PeriodScheme;
use crate::core::pipeline::CompositeEngine;
use crate::core::quality_mask::QualityMaskConfig;
use crate::io::naming::NamingConfig;
use crate::types::{CompositeError, CompositeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Earth Engine style pixel budget for a single export
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000_000_000;

/// Area over which zonal statistics are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingExtent {
    /// Region intersected with the AOI (statistics of the clipped composite)
    #[default]
    IntersectAoi,
    /// Whole region, including pixels outside the AOI (unclipped composite)
    RegionOnly,
}

/// Reduction policy per product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionConfig {
    pub index: ReducerPolicy,
    pub mask: ReducerPolicy,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            index: ReducerPolicy::Mosaic,
            mask: ReducerPolicy::BinaryMosaic,
        }
    }
}

/// Everything a compositing run needs besides the catalog and geometries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub year: i32,
    pub scheme: PeriodScheme,
    /// Keep only the first N periods
    pub period_limit: Option<usize>,
    /// Observations must be strictly below this scene cloud cover
    pub max_cloud_cover_pct: f64,
    pub index: SpectralIndex,
    /// Threshold mask `index >= threshold`; no mask product when unset
    pub index_threshold: Option<f64>,
    pub quality: QualityMaskConfig,
    pub calibration: CalibrationConfig,
    pub reduction: ReductionConfig,
    pub crs: String,
    /// Output pixel size in CRS units
    pub scale: f64,
    pub reporting_extent: ReportingExtent,
    /// Worker threads for period tasks (0 = one per core)
    pub parallelism: usize,
    /// Periods per exported raster chunk; whole stack when unset
    pub chunk_size: Option<usize>,
    pub naming: NamingConfig,
    pub max_pixels: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::sentinel2_vegetation_cover(2024)
    }
}

impl RunConfig {
    /// Sentinel-2 L2A monthly NDVI and vegetation cover (NDVI >= 0.2)
    pub fn sentinel2_vegetation_cover(year: i32) -> Self {
        Self {
            year,
            scheme: PeriodScheme::CalendarMonth,
            period_limit: None,
            max_cloud_cover_pct: 30.0,
            index: SpectralIndex::ndvi(),
            index_threshold: Some(0.2),
            quality: QualityMaskConfig::sentinel2(),
            calibration: CalibrationConfig::sentinel2(),
            reduction: ReductionConfig::default(),
            crs: "EPSG:32634".to_string(),
            scale: 10.0,
            reporting_extent: ReportingExtent::IntersectAoi,
            parallelism: 4,
            chunk_size: None,
            naming: NamingConfig::default(),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    /// Landsat 8/9 Collection 2 Level-2 monthly mean land surface temperature
    pub fn landsat_surface_temperature(year: i32) -> Self {
        Self {
            year,
            scheme: PeriodScheme::CalendarMonth,
            period_limit: None,
            max_cloud_cover_pct: 20.0,
            index: SpectralIndex::landsat_lst(),
            index_threshold: None,
            quality: QualityMaskConfig::landsat_c2(),
            calibration: CalibrationConfig::landsat_c2(),
            reduction: ReductionConfig {
                index: ReducerPolicy::Mean,
                mask: ReducerPolicy::BinaryMosaic,
            },
            crs: "EPSG:32634".to_string(),
            scale: 30.0,
            reporting_extent: ReportingExtent::IntersectAoi,
            parallelism: 4,
            chunk_size: None,
            naming: NamingConfig::default(),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    /// Parse a JSON document (missing fields take the defaults) and validate it
    pub fn from_json_str(json: &str) -> CompositeResult<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CompositeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading run configuration from {}", path.as_ref().display());
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> CompositeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every option; all failures are `Configuration` errors
    pub fn validate(&self) -> CompositeResult<()> {
        if self.crs.trim().is_empty() {
            return Err(CompositeError::Configuration("CRS must not be empty".to_string()));
        }
        if self.max_pixels == 0 {
            return Err(CompositeError::Configuration("max_pixels must be positive".to_string()));
        }
        if self.chunk_size == Some(0) {
            return Err(CompositeError::Configuration("chunk_size must be at least 1".to_string()));
        }
        self.naming.validate()?;

        // Building the engine validates scheme, cloud limit, quality bits,
        // calibration patterns, index bands and threshold range; planning
        // checks that every period window is a representable date range
        CompositeEngine::new(self.clone())?.plan().map(|_| ())
    }
}

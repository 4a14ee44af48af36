use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use geo::{Area, BoundingRect, Coord, CoordsIter, MultiPolygon, Polygon, Rect};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued raster band, `NaN` marks no-data
pub type Band = Array2<f32>;

/// Per-pixel quality bitfield (e.g. Sentinel-2 QA60, Landsat QA_PIXEL)
pub type QualityBand = Array2<u16>;

/// Band-major raster stack (band x row x col)
pub type BandCube = Array3<f32>;

/// Sentinel value for no-data pixels
pub const NO_DATA: f32 = f32::NAN;

/// True when a pixel carries no usable value
#[inline]
pub fn is_no_data(value: f32) -> bool {
    !value.is_finite()
}

/// Affine georeferencing in GDAL order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels of `scale` map units
    pub fn north_up(top_left_x: f64, top_left_y: f64, scale: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: scale,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -scale,
        }
    }

    /// Map coordinate of a pixel corner (fractional pixel indices allowed)
    pub fn to_map(&self, row: f64, col: f64) -> Coord<f64> {
        Coord {
            x: self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            y: self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        }
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        self.to_map(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Footprint of one pixel (axis aligned, rotation ignored)
    pub fn pixel_rect(&self, row: usize, col: usize) -> Rect<f64> {
        Rect::new(
            self.to_map(row as f64, col as f64),
            self.to_map(row as f64 + 1.0, col as f64 + 1.0),
        )
    }
}

/// Shape, georeferencing and CRS shared by every band of a raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub geo_transform: GeoTransform,
    pub crs: String,
}

impl GridSpec {
    /// Build a north-up grid covering `extent` at `scale` map units per pixel
    pub fn from_extent(extent: Rect<f64>, scale: f64, crs: &str) -> CompositeResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CompositeError::Configuration(format!(
                "Scale must be positive, got {}",
                scale
            )));
        }

        let cols = (extent.width() / scale).ceil().max(1.0);
        let rows = (extent.height() / scale).ceil().max(1.0);
        // Pixel count must fit the index type before any cast
        if !(cols * rows).is_finite() || cols * rows >= usize::MAX as f64 {
            return Err(CompositeError::Configuration(format!(
                "Extent {} x {} at scale {} gives a grid too large to address",
                extent.width(),
                extent.height(),
                scale
            )));
        }
        let (cols, rows) = (cols as usize, rows as usize);

        Ok(Self {
            rows,
            cols,
            geo_transform: GeoTransform::north_up(extent.min().x, extent.max().y, scale),
            crs: crs.to_string(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Saturates instead of overflowing for grids built by hand
    pub fn pixel_count(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    /// Map-space bounds of the whole grid
    pub fn bounds(&self) -> Rect<f64> {
        Rect::new(
            self.geo_transform.to_map(0.0, 0.0),
            self.geo_transform.to_map(self.rows as f64, self.cols as f64),
        )
    }

    /// Same shape and CRS (what stacking requires)
    pub fn is_compatible(&self, other: &GridSpec) -> bool {
        self.shape() == other.shape() && self.crs == other.crs
    }

    /// Short human-readable description used in error messages
    pub fn describe(&self) -> String {
        format!("{}x{} {}", self.rows, self.cols, self.crs)
    }

    pub fn empty_band(&self) -> Band {
        Array2::from_elem(self.shape(), NO_DATA)
    }
}

fn validate_geometry(kind: &str, geometry: &MultiPolygon<f64>) -> CompositeResult<Rect<f64>> {
    if geometry.0.is_empty() {
        return Err(CompositeError::InvalidGeometry(format!("{} has no polygons", kind)));
    }

    if geometry.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(CompositeError::InvalidGeometry(format!(
            "{} contains non-finite coordinates",
            kind
        )));
    }

    if geometry.unsigned_area() <= 0.0 {
        return Err(CompositeError::InvalidGeometry(format!("{} has zero area", kind)));
    }

    geometry
        .bounding_rect()
        .ok_or_else(|| CompositeError::InvalidGeometry(format!("{} has no extent", kind)))
}

/// Geometry bounding (and clipping) all raster outputs
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl AreaOfInterest {
    pub fn new(geometry: MultiPolygon<f64>) -> CompositeResult<Self> {
        let bounds = validate_geometry("Area of interest", &geometry)?;
        Ok(Self { geometry, bounds })
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> CompositeResult<Self> {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_rect(rect: Rect<f64>) -> CompositeResult<Self> {
        Self::from_polygon(rect.to_polygon())
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }
}

/// Geometry used only for scalar statistics
#[derive(Debug, Clone)]
pub struct ReportingRegion {
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl ReportingRegion {
    pub fn new(geometry: MultiPolygon<f64>) -> CompositeResult<Self> {
        let bounds = validate_geometry("Reporting region", &geometry)?;
        Ok(Self { geometry, bounds })
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> CompositeResult<Self> {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_rect(rect: Rect<f64>) -> CompositeResult<Self> {
        Self::from_polygon(rect.to_polygon())
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }
}

impl From<&AreaOfInterest> for ReportingRegion {
    fn from(aoi: &AreaOfInterest) -> Self {
        Self {
            geometry: aoi.geometry.clone(),
            bounds: aoi.bounds,
        }
    }
}

/// Half-open UTC time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Midnight-to-midnight range between two calendar dates
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start_of_day(start),
            end: start_of_day(end),
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// One time-stamped multi-band acquisition as delivered by the catalog (raw digital numbers)
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub cloud_cover_pct: f64,
    pub grid: GridSpec,
    pub bands: BTreeMap<String, Band>,
    pub quality_band: QualityBand,
}

impl Observation {
    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.get(name)
    }

    pub fn footprint(&self) -> Rect<f64> {
        self.grid.bounds()
    }
}

/// Observation whose bands carry physical units.
///
/// Only the band calibrator can build one, so a calibrated observation
/// cannot be fed through calibration a second time.
#[derive(Debug, Clone)]
pub struct CalibratedObservation {
    id: String,
    timestamp: DateTime<Utc>,
    cloud_cover_pct: f64,
    grid: GridSpec,
    bands: BTreeMap<String, Band>,
    quality_band: QualityBand,
}

impl CalibratedObservation {
    pub(crate) fn new(source: Observation, bands: BTreeMap<String, Band>) -> Self {
        Self {
            id: source.id,
            timestamp: source.timestamp,
            cloud_cover_pct: source.cloud_cover_pct,
            grid: source.grid,
            bands,
            quality_band: source.quality_band,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cloud_cover_pct(&self) -> f64 {
        self.cloud_cover_pct
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.get(name)
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    pub fn quality_band(&self) -> &QualityBand {
        &self.quality_band
    }
}

/// One reporting period of a run. All `*_end` dates are exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDescriptor {
    pub index: usize,
    pub acquisition_start: NaiveDate,
    pub acquisition_end: NaiveDate,
    pub output_start: NaiveDate,
    pub output_end: NaiveDate,
    pub label: String,
}

impl PeriodDescriptor {
    /// 1-based period number used in reports
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn acquisition_range(&self) -> TimeRange {
        TimeRange::from_dates(self.acquisition_start, self.acquisition_end)
    }

    pub fn acquisition_days(&self) -> i64 {
        (self.acquisition_end - self.acquisition_start).num_days()
    }

    pub fn output_days(&self) -> i64 {
        (self.output_end - self.output_start).num_days()
    }

    pub fn last_output_day(&self) -> NaiveDate {
        self.output_end.pred_opt().unwrap_or(self.output_end)
    }

    pub fn last_acquisition_day(&self) -> NaiveDate {
        self.acquisition_end.pred_opt().unwrap_or(self.acquisition_end)
    }
}

/// Product bands carried by every composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Product {
    /// Continuous spectral index (NDVI, LST, ...)
    Index,
    /// Boolean `index >= threshold` band
    ThresholdMask,
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Product::Index => write!(f, "INDEX"),
            Product::ThresholdMask => write!(f, "MASK"),
        }
    }
}

/// Zonal statistics of one composite over the reporting region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodStatistics {
    /// Area-weighted mean of the index composite
    pub mean_index: Option<f64>,
    /// Area-weighted mean of the threshold mask (0-1)
    pub coverage_fraction: Option<f64>,
    /// Pixels of the index composite that contributed to the mean
    pub valid_pixels: usize,
}

impl PeriodStatistics {
    pub fn coverage_percent(&self) -> Option<f64> {
        self.coverage_fraction.map(|f| f * 100.0)
    }
}

/// Reduced raster for one period
#[derive(Debug, Clone)]
pub struct Composite {
    pub period_index: usize,
    pub label: String,
    pub grid: GridSpec,
    pub index: Band,
    pub mask: Option<Band>,
    /// Contributing observation ids in priority order
    pub provenance: Vec<String>,
    pub source_count: usize,
    pub stats: PeriodStatistics,
}

impl Composite {
    pub fn qa_flag(&self) -> bool {
        self.source_count > 0
    }

    pub fn product(&self, product: Product) -> Option<&Band> {
        match product {
            Product::Index => Some(&self.index),
            Product::ThresholdMask => self.mask.as_ref(),
        }
    }
}

/// Error types for compositing runs
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Data unavailable for period {period_index}: {source}")]
    DataUnavailable {
        period_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Dimension mismatch at period {period_index}: expected {expected}, found {found}")]
    DimensionMismatch {
        period_index: usize,
        expected: String,
        found: String,
    },

    #[error("Period {period_index} cancelled after an earlier failure")]
    Cancelled { period_index: usize },

    #[error("{} period(s) failed: {}", .0.len(), join_errors(.0))]
    PeriodFailures(Vec<CompositeError>),

    #[error("Export error: {0}")]
    Export(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[CompositeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for compositing operations
pub type CompositeResult<T> = Result<T, CompositeError>;

//! phenocomp: temporal compositing of multi-band satellite observations
//!
//! Partitions a year into periods, selects and quality-masks the observations
//! of each period, derives a spectral index (and optional threshold mask),
//! reduces every period to one composite, reports zonal statistics and stacks
//! the composites into annual multi-band artifacts with an audit table.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AreaOfInterest, Band, BandCube, CalibratedObservation, Composite, CompositeError, CompositeResult,
    GeoTransform, GridSpec, Observation, PeriodDescriptor, PeriodStatistics, Product, QualityBand,
    ReportingRegion, TimeRange, NO_DATA,
};

pub use config::{ReductionConfig, ReportingExtent, RunConfig};

pub use crate::core::{
    CompositeEngine, MetadataRow, PeriodScheme, ReducerPolicy, RunOutput, RunSummary, SpectralIndex,
    StackedArtifact,
};

pub use io::{CsvTableSink, GeometryProvider, InMemoryCatalog, ObservationCatalog, RasterSink, StaticGeometry, TableSink};

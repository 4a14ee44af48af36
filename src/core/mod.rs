//! Core compositing modules

pub mod partition;
pub mod filter;
pub mod quality_mask;
pub mod calibrate;
pub mod indices;
pub mod mosaic;
pub mod zonal_stats;
pub mod metadata;
pub mod stack;
pub mod pipeline;

// Re-export main types
pub use partition::{PeriodPartitioner, PeriodScheme, PeriodChunk, partition_periods, periods_to_chunks, validate_partition};
pub use filter::ObservationFilter;
pub use quality_mask::{QualityMasker, QualityMaskConfig};
pub use calibrate::{BandCalibrator, BandCategory, CalibrationConfig, LinearCoefficients};
pub use indices::{IndexCalculator, SpectralIndex, normalized_difference, surface_temperature, threshold_mask};
pub use mosaic::{MosaicReducer, ReducerPolicy};
pub use zonal_stats::{RegionWeights, area_weighted_mean, format_percentage, period_statistics};
pub use metadata::{MetadataRecorder, MetadataRow, METADATA_COLUMNS};
pub use stack::{StackAssembler, StackAttributes, StackBand, StackedArtifact};
pub use pipeline::{CompositeEngine, PeriodResult, RunContext, RunOutput, RunSummary};

use crate::config::{ReportingExtent, RunConfig};
use crate::core::calibrate::BandCalibrator;
use crate::core::filter::ObservationFilter;
use crate::core::indices::IndexCalculator;
use crate::core::metadata::{MetadataRecorder, MetadataRow};
use crate::core::mosaic::MosaicReducer;
use crate::core::partition::PeriodPartitioner;
use crate::core::quality_mask::QualityMasker;
use crate::core::stack::{StackAssembler, StackAttributes, StackedArtifact};
use crate::core::zonal_stats::{period_statistics, RegionWeights};
use crate::io::catalog::{GeometryProvider, ObservationCatalog};
use crate::types::{
    AreaOfInterest, Band, Composite, CompositeError, CompositeResult, GridSpec, Observation,
    PeriodDescriptor, PeriodStatistics, Product, ReportingRegion, NO_DATA,
};
use geo::{Intersects, Point};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Shared, read-only state of one run
#[derive(Debug)]
pub struct RunContext {
    pub aoi: AreaOfInterest,
    pub region: ReportingRegion,
    pub grid: GridSpec,
    /// Pixels whose centre lies inside the AOI
    pub clip_mask: Array2<bool>,
    pub weights: RegionWeights,
}

/// Composite of one period plus the reason it was degraded, if it was
#[derive(Debug, Clone)]
pub struct PeriodResult {
    pub composite: Composite,
    pub degraded: Option<String>,
}

/// End-of-run totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub year: i32,
    pub total_periods: usize,
    pub periods_with_data: usize,
    pub degraded_periods: usize,
    pub total_source_observations: usize,
    /// Percentage of periods with at least one observation
    pub success_rate: f64,
    pub elapsed_seconds: f64,
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub periods: Vec<PeriodDescriptor>,
    pub index_stack: StackedArtifact,
    /// Present when an index threshold is configured
    pub mask_stack: Option<StackedArtifact>,
    pub rows: Vec<MetadataRow>,
    pub summary: RunSummary,
}

/// Temporal compositing engine
///
/// Every period is an independent task (filter, mask, calibrate, index,
/// reduce, statistics); tasks run on a bounded worker pool and are merged
/// in period order before stacking.
#[derive(Debug)]
pub struct CompositeEngine {
    config: RunConfig,
    partitioner: PeriodPartitioner,
    filter: ObservationFilter,
    masker: QualityMasker,
    calibrator: BandCalibrator,
    calculator: IndexCalculator,
    index_reducer: MosaicReducer,
    mask_reducer: MosaicReducer,
}

impl CompositeEngine {
    /// Build all stages; any invalid option is a `Configuration` error
    pub fn new(config: RunConfig) -> CompositeResult<Self> {
        if !(config.scale.is_finite() && config.scale > 0.0) {
            return Err(CompositeError::Configuration(format!(
                "Scale must be positive, got {}",
                config.scale
            )));
        }

        Ok(Self {
            partitioner: PeriodPartitioner::new(config.scheme.clone(), config.year, config.period_limit)?,
            filter: ObservationFilter::new(config.max_cloud_cover_pct)?,
            masker: QualityMasker::new(&config.quality)?,
            calibrator: BandCalibrator::new(&config.calibration, &config.quality.band_name)?,
            calculator: IndexCalculator::new(config.index.clone(), config.index_threshold)?,
            index_reducer: MosaicReducer::new(config.reduction.index),
            mask_reducer: MosaicReducer::new(config.reduction.mask),
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Period windows of the configured year
    pub fn plan(&self) -> CompositeResult<Vec<PeriodDescriptor>> {
        self.partitioner.partition()
    }

    /// Resolve geometries, the output grid and the region weights
    pub fn prepare(&self, geometry: &dyn GeometryProvider) -> CompositeResult<RunContext> {
        let aoi = geometry
            .area_of_interest()
            .map_err(|e| CompositeError::InvalidGeometry(format!("Area of interest: {:#}", e)))?;
        let region = geometry
            .reporting_region()
            .map_err(|e| CompositeError::InvalidGeometry(format!("Reporting region: {:#}", e)))?;

        let grid = GridSpec::from_extent(aoi.bounds(), self.config.scale, &self.config.crs)?;
        if grid.pixel_count() as u64 > self.config.max_pixels {
            return Err(CompositeError::Configuration(format!(
                "Output grid {} exceeds max_pixels {}",
                grid.describe(),
                self.config.max_pixels
            )));
        }

        let clip_mask = Array2::from_shape_fn(grid.shape(), |(row, col)| {
            let center = grid.geo_transform.pixel_center(row, col);
            aoi.geometry().intersects(&Point::from(center))
        });
        let weights = RegionWeights::compute(&grid, region.geometry());

        if weights.covered_pixels() == 0 {
            log::warn!("Reporting region does not overlap the output grid; statistics will be no-data");
        }

        log::info!(
            "Output grid {} at {} units/pixel, {} of {} pixels inside the AOI",
            grid.describe(),
            self.config.scale,
            clip_mask.iter().filter(|inside| **inside).count(),
            grid.pixel_count()
        );

        Ok(RunContext {
            aoi,
            region,
            grid,
            clip_mask,
            weights,
        })
    }

    fn empty_composite(&self, context: &RunContext, period: &PeriodDescriptor) -> Composite {
        Composite {
            period_index: period.index,
            label: period.label.clone(),
            grid: context.grid.clone(),
            index: context.grid.empty_band(),
            mask: self.calculator.threshold().map(|_| context.grid.empty_band()),
            provenance: Vec::new(),
            source_count: 0,
            stats: PeriodStatistics::default(),
        }
    }

    fn check_grid(&self, context: &RunContext, period: &PeriodDescriptor, observation: &Observation) -> CompositeResult<()> {
        let expected = context.grid.shape();
        let mismatch = !observation.grid.is_compatible(&context.grid)
            || observation.quality_band.dim() != expected
            || observation.bands.values().any(|band| band.dim() != expected);

        if mismatch {
            return Err(CompositeError::DimensionMismatch {
                period_index: period.index,
                expected: context.grid.describe(),
                found: format!("{} ({})", observation.grid.describe(), observation.id),
            });
        }
        Ok(())
    }

    fn clip(&self, context: &RunContext, band: &mut Band) {
        Zip::from(band).and(&context.clip_mask).for_each(|value, &inside| {
            if !inside {
                *value = NO_DATA;
            }
        });
    }

    /// Run the full per-period pipeline.
    ///
    /// A catalog failure degrades the period to an empty composite; any other
    /// error is returned and aborts the run.
    pub fn process_period(
        &self,
        context: &RunContext,
        catalog: &dyn ObservationCatalog,
        period: &PeriodDescriptor,
    ) -> CompositeResult<PeriodResult> {
        let observations = match self.filter.select(catalog, &context.aoi, period) {
            Ok(observations) => observations,
            Err(err @ CompositeError::DataUnavailable { .. }) => {
                log::warn!("Period {} degraded to no data: {}", period.label, err);
                return Ok(PeriodResult {
                    composite: self.empty_composite(context, period),
                    degraded: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err),
        };

        let mut provenance = Vec::with_capacity(observations.len());
        let mut index_layers = Vec::with_capacity(observations.len());
        let mut mask_layers = Vec::with_capacity(observations.len());
        let mut masked_pixels = 0usize;

        // Observations are consumed one at a time and dropped after their index is derived
        for mut observation in observations {
            self.check_grid(context, period, &observation)?;
            masked_pixels += self.masker.apply(period.index, &mut observation)?;

            let calibrated = self.calibrator.calibrate(observation);
            let index = self.calculator.compute(&calibrated)?;
            if let Some(mask) = self.calculator.mask(&index) {
                mask_layers.push(mask);
            }
            index_layers.push(index);
            provenance.push(calibrated.id().to_string());
        }

        let mut index = self.index_reducer.reduce(period.index, &context.grid, &index_layers)?;
        let mut mask = match self.calculator.threshold() {
            Some(_) => Some(self.mask_reducer.reduce(period.index, &context.grid, &mask_layers)?),
            None => None,
        };

        let unclipped_stats = match self.config.reporting_extent {
            ReportingExtent::RegionOnly => Some(period_statistics(&index, mask.as_ref(), &context.weights)?),
            ReportingExtent::IntersectAoi => None,
        };

        self.clip(context, &mut index);
        if let Some(mask) = mask.as_mut() {
            self.clip(context, mask);
        }

        let stats = match unclipped_stats {
            Some(stats) => stats,
            None => period_statistics(&index, mask.as_ref(), &context.weights)?,
        };

        log::info!(
            "Period {} ({}): {} observations, {} pixels masked, mean {} = {}",
            period.number(),
            period.label,
            provenance.len(),
            masked_pixels,
            self.calculator.index().name(),
            stats
                .mean_index
                .map(|m| format!("{:.4}", m))
                .unwrap_or_else(|| "no data".to_string())
        );

        Ok(PeriodResult {
            composite: Composite {
                period_index: period.index,
                label: period.label.clone(),
                grid: context.grid.clone(),
                index,
                mask,
                source_count: provenance.len(),
                provenance,
                stats,
            },
            degraded: None,
        })
    }

    /// Process every period and assemble the stacks and metadata rows.
    ///
    /// After an irrecoverable period error, tasks already running finish,
    /// tasks not yet started are cancelled, and all errors are returned in
    /// `PeriodFailures`.
    pub fn run(&self, catalog: &dyn ObservationCatalog, geometry: &dyn GeometryProvider) -> CompositeResult<RunOutput> {
        let started = Instant::now();
        let periods = self.plan()?;
        let context = self.prepare(geometry)?;

        log::info!(
            "Compositing {} {} periods of {} ({} workers)",
            periods.len(),
            self.config.scheme,
            self.config.year,
            self.config.parallelism
        );

        let abort = AtomicBool::new(false);
        let task = |period: &PeriodDescriptor| -> CompositeResult<PeriodResult> {
            if abort.load(Ordering::SeqCst) {
                return Err(CompositeError::Cancelled {
                    period_index: period.index,
                });
            }
            let result = self.process_period(&context, catalog, period);
            if let Err(err) = &result {
                log::error!("Period {} failed: {}", period.label, err);
                abort.store(true, Ordering::SeqCst);
            }
            result
        };

        #[cfg(feature = "parallel")]
        let results: Vec<CompositeResult<PeriodResult>> = {
            use rayon::prelude::*;

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallelism)
                .build()
                .map_err(|e| CompositeError::Configuration(format!("Worker pool: {}", e)))?;
            pool.install(|| periods.par_iter().map(task).collect())
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<CompositeResult<PeriodResult>> = periods.iter().map(task).collect();

        let mut completed = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(result) => completed.push(result),
                Err(err) => failures.push(err),
            }
        }

        if !failures.is_empty() {
            log::error!("{} of {} period tasks did not complete", failures.len(), periods.len());
            return Err(CompositeError::PeriodFailures(failures));
        }

        self.finish(periods, completed, started)
    }

    fn finish(
        &self,
        periods: Vec<PeriodDescriptor>,
        mut results: Vec<PeriodResult>,
        started: Instant,
    ) -> CompositeResult<RunOutput> {
        results.sort_by_key(|r| r.composite.period_index);

        let recorder = MetadataRecorder::new(
            self.config.year,
            self.calculator.index().name(),
            &self.config.naming,
            self.calculator.threshold(),
            self.config.max_cloud_cover_pct,
        )?;

        let rows = periods
            .iter()
            .zip(&results)
            .map(|(period, result)| recorder.record(period, &result.composite, result.degraded.as_deref()))
            .collect::<CompositeResult<Vec<_>>>()?;

        let degraded_periods = results.iter().filter(|r| r.degraded.is_some()).count();
        let composites: Vec<Composite> = results.into_iter().map(|r| r.composite).collect();

        let attributes = |product: Product, data_type: &str| StackAttributes {
            year: self.config.year,
            threshold: self.calculator.threshold(),
            crs: self.config.crs.clone(),
            scale: self.config.scale,
            data_type: data_type.to_string(),
            product,
        };

        let index_stack = StackAssembler::assemble(
            &composites,
            Product::Index,
            attributes(Product::Index, self.calculator.index().name()),
        )?;
        let mask_stack = match self.calculator.threshold() {
            Some(_) => Some(StackAssembler::assemble(
                &composites,
                Product::ThresholdMask,
                attributes(Product::ThresholdMask, &self.config.naming.mask_data_type),
            )?),
            None => None,
        };

        let total_periods = composites.len();
        let periods_with_data = composites.iter().filter(|c| c.qa_flag()).count();
        let summary = RunSummary {
            year: self.config.year,
            total_periods,
            periods_with_data,
            degraded_periods,
            total_source_observations: composites.iter().map(|c| c.source_count).sum(),
            success_rate: if total_periods > 0 {
                periods_with_data as f64 / total_periods as f64 * 100.0
            } else {
                0.0
            },
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };

        log::info!(
            "Run {} complete: {}/{} periods with data ({:.1}%), {} source observations, {} degraded, {:.2}s",
            summary.year,
            summary.periods_with_data,
            summary.total_periods,
            summary.success_rate,
            summary.total_source_observations,
            summary.degraded_periods,
            summary.elapsed_seconds
        );

        Ok(RunOutput {
            periods,
            index_stack,
            mask_stack,
            rows,
            summary,
        })
    }
}

use crate::io::catalog::ObservationCatalog;
use crate::types::{
    AreaOfInterest, CompositeError, CompositeResult, Observation, PeriodDescriptor, TimeRange,
};
use geo::Intersects;

/// Selects the candidate observations of one period
#[derive(Debug, Clone)]
pub struct ObservationFilter {
    max_cloud_cover_pct: f64,
}

impl ObservationFilter {
    pub fn new(max_cloud_cover_pct: f64) -> CompositeResult<Self> {
        if !(0.0..=100.0).contains(&max_cloud_cover_pct) {
            return Err(CompositeError::Configuration(format!(
                "Cloud cover limit must be within 0-100%, got {}",
                max_cloud_cover_pct
            )));
        }
        Ok(Self { max_cloud_cover_pct })
    }

    pub fn max_cloud_cover_pct(&self) -> f64 {
        self.max_cloud_cover_pct
    }

    /// Time, cloud and footprint predicates for a single observation
    pub fn accepts(&self, observation: &Observation, aoi: &AreaOfInterest, range: &TimeRange) -> bool {
        range.contains(&observation.timestamp)
            && observation.cloud_cover_pct < self.max_cloud_cover_pct
            && aoi.geometry().intersects(&observation.footprint().to_polygon())
    }

    /// Query the catalog for a period and keep the matching observations.
    ///
    /// The result is ordered most recent first (ties by id), which is the
    /// priority order used by the mosaic reducer. An empty result is valid.
    pub fn select(
        &self,
        catalog: &dyn ObservationCatalog,
        aoi: &AreaOfInterest,
        period: &PeriodDescriptor,
    ) -> CompositeResult<Vec<Observation>> {
        let range = period.acquisition_range();

        let candidates = catalog
            .query(aoi, &range, self.max_cloud_cover_pct)
            .map_err(|source| CompositeError::DataUnavailable {
                period_index: period.index,
                source,
            })?;
        let offered = candidates.len();

        let mut selected: Vec<Observation> = candidates
            .into_iter()
            .filter(|obs| self.accepts(obs, aoi, &range))
            .collect();

        selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

        log::debug!(
            "Period {}: {} of {} catalog observations pass (cloud < {}%)",
            period.label,
            selected.len(),
            offered,
            self.max_cloud_cover_pct
        );

        Ok(selected)
    }
}

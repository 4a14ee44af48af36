use crate::types::{AreaOfInterest, Observation, ReportingRegion, TimeRange};

/// Source of observations for a period query.
///
/// Implementations may over-deliver (the engine re-applies the time, cloud
/// and footprint predicates). Retries and timeouts are the implementor's
/// concern; a returned error degrades the period to "no data".
pub trait ObservationCatalog: Send + Sync {
    fn query(
        &self,
        aoi: &AreaOfInterest,
        range: &TimeRange,
        max_cloud_cover_pct: f64,
    ) -> anyhow::Result<Vec<Observation>>;
}

/// Supplies the AOI and the reporting region of a run
pub trait GeometryProvider {
    fn area_of_interest(&self) -> anyhow::Result<AreaOfInterest>;
    fn reporting_region(&self) -> anyhow::Result<ReportingRegion>;
}

/// Catalog backed by observations already held in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    observations: Vec<Observation>,
}

impl InMemoryCatalog {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl ObservationCatalog for InMemoryCatalog {
    fn query(
        &self,
        _aoi: &AreaOfInterest,
        range: &TimeRange,
        _max_cloud_cover_pct: f64,
    ) -> anyhow::Result<Vec<Observation>> {
        let hits: Vec<Observation> = self
            .observations
            .iter()
            .filter(|obs| range.contains(&obs.timestamp))
            .cloned()
            .collect();

        log::debug!(
            "In-memory catalog: {} of {} observations in {} .. {}",
            hits.len(),
            self.observations.len(),
            range.start,
            range.end
        );

        Ok(hits)
    }
}

/// Fixed AOI and reporting region
#[derive(Debug, Clone)]
pub struct StaticGeometry {
    aoi: AreaOfInterest,
    region: ReportingRegion,
}

impl StaticGeometry {
    pub fn new(aoi: AreaOfInterest, region: ReportingRegion) -> Self {
        Self { aoi, region }
    }

    /// Report statistics over the AOI itself
    pub fn coincident(aoi: AreaOfInterest) -> Self {
        let region = ReportingRegion::from(&aoi);
        Self { aoi, region }
    }
}

impl GeometryProvider for StaticGeometry {
    fn area_of_interest(&self) -> anyhow::Result<AreaOfInterest> {
        Ok(self.aoi.clone())
    }

    fn reporting_region(&self) -> anyhow::Result<ReportingRegion> {
        Ok(self.region.clone())
    }
}

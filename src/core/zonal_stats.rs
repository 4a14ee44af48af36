use crate::types::{is_no_data, Band, CompositeError, CompositeResult, GridSpec, PeriodStatistics};
use geo::{Area, BooleanOps, Contains, Intersects, MultiPolygon};
use ndarray::{Array2, Zip};

/// Fraction of every pixel footprint covered by a region.
///
/// Computed once per run and shared by all period tasks.
#[derive(Debug, Clone)]
pub struct RegionWeights {
    weights: Array2<f64>,
}

impl RegionWeights {
    pub fn compute(grid: &GridSpec, region: &MultiPolygon<f64>) -> Self {
        let pixel_area = (grid.geo_transform.pixel_width * grid.geo_transform.pixel_height).abs();

        let weights = Array2::from_shape_fn(grid.shape(), |(row, col)| {
            let pixel = grid.geo_transform.pixel_rect(row, col).to_polygon();

            if !region.intersects(&pixel) {
                0.0
            } else if region.0.iter().any(|polygon| polygon.contains(&pixel)) {
                1.0
            } else if pixel_area > 0.0 {
                let covered = region.intersection(&MultiPolygon::new(vec![pixel])).unsigned_area();
                (covered / pixel_area).clamp(0.0, 1.0)
            } else {
                0.0
            }
        });

        let weights = Self { weights };
        log::debug!(
            "Region weights: {:.2} pixel equivalents over {} pixels",
            weights.total(),
            weights.covered_pixels()
        );
        weights
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn total(&self) -> f64 {
        self.weights.sum()
    }

    /// Pixels with a non-zero weight
    pub fn covered_pixels(&self) -> usize {
        self.weights.iter().filter(|w| **w > 0.0).count()
    }
}

/// Area-weighted mean of the valid pixels of `band`.
///
/// Returns the mean and the number of contributing pixels, or `None` when
/// no valid pixel falls in the region.
pub fn area_weighted_mean(band: &Band, weights: &RegionWeights) -> CompositeResult<Option<(f64, usize)>> {
    if band.dim() != weights.weights.dim() {
        return Err(CompositeError::Configuration(format!(
            "Band shape {:?} differs from region weight grid {:?}",
            band.dim(),
            weights.weights.dim()
        )));
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut valid = 0usize;

    Zip::from(band).and(&weights.weights).for_each(|&value, &weight| {
        if weight > 0.0 && !is_no_data(value) {
            weighted_sum += value as f64 * weight;
            weight_total += weight;
            valid += 1;
        }
    });

    if valid == 0 || weight_total <= 0.0 {
        return Ok(None);
    }

    Ok(Some((weighted_sum / weight_total, valid)))
}

/// Statistics of one period: index mean and mask coverage
pub fn period_statistics(
    index: &Band,
    mask: Option<&Band>,
    weights: &RegionWeights,
) -> CompositeResult<PeriodStatistics> {
    let index_mean = area_weighted_mean(index, weights)?;
    let coverage = match mask {
        Some(mask) => area_weighted_mean(mask, weights)?.map(|(mean, _)| mean),
        None => None,
    };

    Ok(PeriodStatistics {
        mean_index: index_mean.map(|(mean, _)| mean),
        coverage_fraction: coverage,
        valid_pixels: index_mean.map(|(_, count)| count).unwrap_or(0),
    })
}

/// `0.4567` -> `"45.67"`; no-data renders empty
pub fn format_percentage(fraction: Option<f64>) -> String {
    match fraction {
        Some(value) if value.is_finite() => format!("{:.2}", value * 100.0),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Rect};

    fn grid(cols: usize) -> GridSpec {
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: cols as f64, y: 1.0 });
        GridSpec::from_extent(extent, 1.0, "EPSG:3857").unwrap()
    }

    fn region(rect: Rect<f64>) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![rect.to_polygon()])
    }

    #[test]
    fn test_sixty_forty_mean() {
        let grid = grid(10);
        let weights = RegionWeights::compute(&grid, &region(grid.bounds()));
        let band = Band::from_shape_fn((1, 10), |(_, col)| if col < 6 { 1.0 } else { 0.0 });

        let (mean, count) = area_weighted_mean(&band, &weights).unwrap().unwrap();
        assert!((mean - 0.6).abs() < 1e-9);
        assert_eq!(count, 10);
    }

    #[test]
    fn test_partial_pixel_weight() {
        let grid = grid(2);
        // Covers the whole first pixel and half of the second
        let weights = RegionWeights::compute(
            &grid,
            &region(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.5, y: 1.0 })),
        );
        assert!((weights.weights()[[0, 0]] - 1.0).abs() < 1e-9);
        assert!((weights.weights()[[0, 1]] - 0.5).abs() < 1e-9);

        let band = Band::from_shape_vec((1, 2), vec![1.0, 4.0]).unwrap();
        let (mean, _) = area_weighted_mean(&band, &weights).unwrap().unwrap();
        assert!((mean - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_valid_pixels_is_no_data() {
        let grid = grid(3);
        let weights = RegionWeights::compute(&grid, &region(grid.bounds()));
        let band = grid.empty_band();
        assert!(area_weighted_mean(&band, &weights).unwrap().is_none());

        let disjoint = RegionWeights::compute(
            &grid,
            &region(Rect::new(coord! { x: 10.0, y: 10.0 }, coord! { x: 11.0, y: 11.0 })),
        );
        let filled = Band::from_elem((1, 3), 0.5);
        assert!(area_weighted_mean(&filled, &disjoint).unwrap().is_none());
    }

    #[test]
    fn test_period_statistics_and_percentage() {
        let grid = grid(4);
        let weights = RegionWeights::compute(&grid, &region(grid.bounds()));
        let index = Band::from_shape_vec((1, 4), vec![0.1, 0.3, 0.5, f32::NAN]).unwrap();
        let mask = Band::from_shape_vec((1, 4), vec![0.0, 1.0, 1.0, f32::NAN]).unwrap();

        let stats = period_statistics(&index, Some(&mask), &weights).unwrap();
        assert_eq!(stats.valid_pixels, 3);
        assert!((stats.mean_index.unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(format_percentage(stats.coverage_fraction), "66.67");
        assert_eq!(format_percentage(None), "");
    }
}

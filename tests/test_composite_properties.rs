use approx::{assert_abs_diff_eq, assert_relative_eq};
use chrono::{TimeZone, Utc};
use geo::{coord, LineString, Polygon, Rect};
use ndarray::array;
use phenocomp::core::indices::{surface_temperature, threshold_mask};
use phenocomp::core::mosaic::{MosaicReducer, ReducerPolicy};
use phenocomp::core::stack::{StackAssembler, StackAttributes};
use phenocomp::core::zonal_stats::{area_weighted_mean, RegionWeights};
use phenocomp::{
    AreaOfInterest, Band, Composite, CompositeEngine, GridSpec, InMemoryCatalog, Observation, PeriodStatistics,
    Product, QualityBand, ReportingExtent, ReportingRegion, RunConfig, StaticGeometry,
};
use std::collections::BTreeMap;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid(rows: usize, cols: usize) -> GridSpec {
    let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: cols as f64, y: rows as f64 });
    GridSpec::from_extent(extent, 1.0, "EPSG:3857").expect("grid")
}

#[test]
fn test_mean_reducer_ignores_no_data() {
    let grid = grid(1, 1);
    let layers = vec![array![[0.2f32]], array![[0.4f32]], array![[f32::NAN]]];

    let composite = MosaicReducer::new(ReducerPolicy::Mean)
        .reduce(0, &grid, &layers)
        .expect("reduce");
    assert_abs_diff_eq!(composite[[0, 0]], 0.3, epsilon = 1e-6);
}

#[test]
fn test_sixty_forty_zonal_mean() {
    let grid = grid(5, 10);
    let region = ReportingRegion::from_rect(grid.bounds()).expect("region");
    let weights = RegionWeights::compute(&grid, region.geometry());

    // 60% ones, 40% zeros, plus a no-data row that must not count
    let mut band = Band::from_shape_fn(grid.shape(), |(_, col)| if col < 6 { 1.0 } else { 0.0 });
    band.row_mut(4).fill(f32::NAN);

    let (mean, valid) = area_weighted_mean(&band, &weights).expect("stats").expect("valid pixels");
    assert_relative_eq!(mean, 0.6, epsilon = 1e-12);
    assert_eq!(valid, 40);
}

#[test]
fn test_threshold_is_deterministic() {
    let index = Band::from_shape_fn((16, 16), |(r, c)| ((r * 16 + c) as f32 / 255.0) * 2.0 - 1.0);
    let first = threshold_mask(&index, 0.2);
    let second = threshold_mask(&index, 0.2);
    assert_eq!(first, second);
    assert!(first.iter().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn test_twelve_composites_make_twelve_bands() {
    let grid = grid(3, 3);
    let composites: Vec<Composite> = (0..12)
        .rev()
        .map(|i| Composite {
            period_index: i,
            label: format!("2021-{:02}", i + 1),
            grid: grid.clone(),
            index: Band::from_elem(grid.shape(), i as f32),
            mask: None,
            provenance: vec![],
            source_count: 0,
            stats: PeriodStatistics::default(),
        })
        .collect();

    let attributes = StackAttributes {
        year: 2021,
        threshold: None,
        crs: grid.crs.clone(),
        scale: 1.0,
        data_type: "NDVI".to_string(),
        product: Product::Index,
    };
    let stack = StackAssembler::assemble(&composites, Product::Index, attributes).expect("stack");

    assert_eq!(stack.band_count(), 12);
    assert_eq!(stack.band_names()[0], "2021-01");
    assert_eq!(stack.band_names()[11], "2021-12");
    let cube = stack.to_cube().expect("cube");
    assert_eq!(cube[[7, 1, 1]], 7.0);
}

fn landsat_observation(id: &str, day: u32, thermal_dn: f32, quality: QualityBand, grid: &GridSpec) -> Observation {
    let mut bands = BTreeMap::new();
    bands.insert("ST_B10".to_string(), Band::from_elem(grid.shape(), thermal_dn));
    bands.insert("SR_B4".to_string(), Band::from_elem(grid.shape(), 9000.0));
    Observation {
        id: id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2023, 7, day, 9, 45, 0).unwrap(),
        cloud_cover_pct: 3.0,
        grid: grid.clone(),
        bands,
        quality_band: quality,
    }
}

#[test]
fn test_landsat_monthly_mean_temperature() {
    init_logging();

    let extent = Rect::new(coord! { x: 500000.0, y: 4000000.0 }, coord! { x: 500060.0, y: 4000060.0 });
    let aoi = AreaOfInterest::from_rect(extent).expect("AOI");
    let config = RunConfig::landsat_surface_temperature(2023);
    let grid = GridSpec::from_extent(extent, config.scale, &config.crs).expect("grid");

    // Cloud bit (3) set on the top-left pixel of the second scene
    let mut cloudy = QualityBand::zeros(grid.shape());
    cloudy[[0, 0]] = 1 << 3;
    let catalog = InMemoryCatalog::new(vec![
        landsat_observation("LC09_20230705", 5, 44000.0, QualityBand::zeros(grid.shape()), &grid),
        landsat_observation("LC08_20230713", 13, 45000.0, cloudy, &grid),
    ]);

    let engine = CompositeEngine::new(config).expect("engine");
    let output = engine.run(&catalog, &StaticGeometry::coincident(aoi)).expect("run");

    let kelvin = |dn: f32| Band::from_elem((1, 1), (dn as f64 * 0.00341802 + 149.0) as f32);
    let lst = |dn: f32| surface_temperature(&kelvin(dn), 0.00115, 1.438, 0.986)[[0, 0]];
    let (first, second) = (lst(44000.0), lst(45000.0));
    println!("LST scenes: {:.3} C and {:.3} C", first, second);

    let july = output.index_stack.band("2023-07").expect("July band");
    assert_abs_diff_eq!(july[[0, 0]], first, epsilon = 1e-3);
    assert_abs_diff_eq!(july[[1, 1]], (first + second) / 2.0, epsilon = 1e-3);

    let row = &output.rows[6];
    assert_eq!(row.image_count, 2);
    assert_eq!(row.mask_filename, "");
    assert!(output.mask_stack.is_none());
    let expected_mean = (first as f64 + 3.0 * (first + second) as f64 / 2.0) / 4.0;
    assert_abs_diff_eq!(row.mean_index.expect("mean"), expected_mean, epsilon = 1e-3);
}

#[test]
fn test_reporting_extent_option() {
    init_logging();

    let unit = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
    let triangle = Polygon::new(
        LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]),
        vec![],
    );
    let geometry = StaticGeometry::new(
        AreaOfInterest::from_polygon(triangle).expect("AOI"),
        ReportingRegion::from_rect(unit).expect("region"),
    );

    let obs_grid = GridSpec::from_extent(unit, 0.5, "EPSG:4326").expect("grid");
    let mut bands = BTreeMap::new();
    // NDVI 0.6 in the upper-right pixel (outside the triangle), 0 elsewhere
    bands.insert("B8".to_string(), array![[1000.0f32, 4000.0], [1000.0, 1000.0]]);
    bands.insert("B4".to_string(), Band::from_elem((2, 2), 1000.0));
    let catalog = InMemoryCatalog::new(vec![Observation {
        id: "S2A_20210103".to_string(),
        timestamp: Utc.with_ymd_and_hms(2021, 1, 3, 10, 0, 0).unwrap(),
        cloud_cover_pct: 1.0,
        quality_band: QualityBand::zeros((2, 2)),
        grid: obs_grid,
        bands,
    }]);

    let run = |extent: ReportingExtent| {
        let mut config = RunConfig::sentinel2_vegetation_cover(2021);
        config.crs = "EPSG:4326".to_string();
        config.scale = 0.5;
        config.period_limit = Some(1);
        config.reporting_extent = extent;
        let engine = CompositeEngine::new(config).expect("engine");
        engine.run(&catalog, &geometry).expect("run").rows[0]
            .mean_index
            .expect("mean")
    };

    assert_abs_diff_eq!(run(ReportingExtent::IntersectAoi), 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(run(ReportingExtent::RegionOnly), 0.15, epsilon = 1e-6);
}

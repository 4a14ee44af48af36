use chrono::{TimeZone, Utc};
use geo::{coord, Rect};
use phenocomp::core::indices::threshold_mask;
use phenocomp::io::export::{export_run, RasterExportRequest, RasterSink};
use phenocomp::{
    AreaOfInterest, Band, CompositeEngine, CsvTableSink, GridSpec, InMemoryCatalog, Observation, QualityBand,
    RunConfig, StackedArtifact, StaticGeometry,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unit_square() -> Rect<f64> {
    Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })
}

fn config() -> RunConfig {
    let mut config = RunConfig::sentinel2_vegetation_cover(2021);
    config.crs = "EPSG:4326".to_string();
    config.scale = 0.25;
    config.max_cloud_cover_pct = 30.0;
    config.index_threshold = Some(0.2);
    config
}

/// Sentinel-2 style observation on the 4x4 unit-square grid; NIR varies by column
fn s2_observation(id: &str, day: u32, cloud: f64, nir_by_column: [f32; 4]) -> Observation {
    let grid = GridSpec::from_extent(unit_square(), 0.25, "EPSG:4326").expect("grid");
    let mut bands = BTreeMap::new();
    bands.insert(
        "B8".to_string(),
        Band::from_shape_fn(grid.shape(), |(_, col)| nir_by_column[col]),
    );
    bands.insert("B4".to_string(), Band::from_elem(grid.shape(), 1000.0));

    Observation {
        id: id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2021, 1, day, 10, 30, 0).unwrap(),
        cloud_cover_pct: cloud,
        quality_band: QualityBand::zeros(grid.shape()),
        grid,
        bands,
    }
}

fn january_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new(vec![
        s2_observation("S2A_20210112_clear", 12, 10.0, [1000.0, 1400.0, 2000.0, 4000.0]),
        s2_observation("S2B_20210117_cloudy", 17, 50.0, [9000.0, 9000.0, 9000.0, 9000.0]),
    ])
}

#[test]
fn test_monthly_vegetation_cover_end_to_end() {
    init_logging();

    let geometry = StaticGeometry::coincident(AreaOfInterest::from_rect(unit_square()).expect("AOI"));
    let engine = CompositeEngine::new(config()).expect("Failed to build engine");

    let output = engine.run(&january_catalog(), &geometry).expect("Run failed");

    println!("\n=== Monthly vegetation cover 2021 ===");
    for row in &output.rows {
        println!(
            "  {:>2} {} images={} qa={} coverage={} mean={:?}",
            row.period_number, row.period_label, row.image_count, row.qa_flag, row.coverage_percent, row.mean_index
        );
    }

    // Only the 10% observation passes the strict cloud filter
    let january = &output.rows[0];
    assert_eq!(january.image_count, 1);
    assert!(january.qa_flag);
    assert_eq!(january.source_images, "S2A_20210112_clear");

    for row in &output.rows[1..] {
        assert_eq!(row.image_count, 0, "{} should be empty", row.period_label);
        assert!(!row.qa_flag);
        assert!(row.mean_index.is_none());
    }

    // January's mask composite is exactly its thresholded index composite
    let index = output.index_stack.band("2021-01").expect("January index band");
    let mask = output
        .mask_stack
        .as_ref()
        .and_then(|stack| stack.band("2021-01"))
        .expect("January mask band");
    assert_eq!(mask, &threshold_mask(index, 0.2));
    assert_eq!(mask.row(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0]);

    // 2 of 4 columns are above the threshold
    assert_eq!(january.coverage_percent, "50.00");

    assert_eq!(output.summary.total_periods, 12);
    assert_eq!(output.summary.periods_with_data, 1);
    assert_eq!(output.summary.total_source_observations, 1);
}

#[test]
fn test_empty_period_invariant() {
    init_logging();

    let geometry = StaticGeometry::coincident(AreaOfInterest::from_rect(unit_square()).expect("AOI"));
    let engine = CompositeEngine::new(config()).expect("Failed to build engine");
    let output = engine.run(&InMemoryCatalog::default(), &geometry).expect("Empty run must not fail");

    assert_eq!(output.rows.len(), 12);
    assert_eq!(output.index_stack.band_count(), 12);

    let masks = output.mask_stack.as_ref().expect("mask stack");
    for band in output.index_stack.bands().iter().chain(masks.bands()) {
        assert!(band.data.iter().all(|v| v.is_nan()), "{} has data", band.label);
    }
    for row in &output.rows {
        assert_eq!(row.image_count, 0);
        assert!(!row.qa_flag);
        assert_eq!(row.coverage_percent, "");
    }
    assert_eq!(output.summary.success_rate, 0.0);
}

#[derive(Default)]
struct RecordingRasterSink {
    exports: Mutex<Vec<(String, usize)>>,
}

impl RasterSink for RecordingRasterSink {
    fn export_raster(&self, artifact: &StackedArtifact, request: &RasterExportRequest) -> anyhow::Result<()> {
        let cube = artifact.to_cube()?;
        assert_eq!(cube.dim().0, artifact.band_count());
        self.exports
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push((request.file_name.clone(), artifact.band_count()));
        Ok(())
    }
}

#[test]
fn test_export_whole_stacks_and_metadata_csv() {
    init_logging();

    let geometry = StaticGeometry::coincident(AreaOfInterest::from_rect(unit_square()).expect("AOI"));
    let config = config();
    let engine = CompositeEngine::new(config.clone()).expect("Failed to build engine");
    let output = engine.run(&january_catalog(), &geometry).expect("Run failed");

    let dir = tempfile::tempdir().expect("temp dir");
    let destination = dir.path().to_string_lossy().to_string();
    let rasters = RecordingRasterSink::default();

    let report = export_run(&output, &config, &rasters, &CsvTableSink::new(), &destination).expect("Export failed");

    assert_eq!(
        report.rasters,
        vec![
            "NDVI_Annual_2021_2021-01-01_2021-12-31".to_string(),
            "VC_Annual_2021_thr_0_2_2021-01-01_2021-12-31".to_string(),
        ]
    );
    assert!(rasters.exports.lock().unwrap().iter().all(|(_, bands)| *bands == 12));

    let csv_path = dir.path().join("NDVI_Metadata_QC_2021.csv");
    assert!(csv_path.exists(), "metadata CSV not written");

    let mut reader = csv::Reader::from_path(&csv_path).expect("open CSV");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.len(), 17);
    assert_eq!(&headers[7], "Image_Count");

    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("record")).collect();
    assert_eq!(records.len(), 12);
    assert_eq!(&records[0][7], "1");
    assert_eq!(&records[0][8], "true");
    assert_eq!(&records[1][7], "0");
    assert_eq!(&records[1][9], "");
}

#[test]
fn test_chunked_export_names() {
    init_logging();

    let geometry = StaticGeometry::coincident(AreaOfInterest::from_rect(unit_square()).expect("AOI"));
    let mut config = config();
    config.chunk_size = Some(2);
    let engine = CompositeEngine::new(config.clone()).expect("Failed to build engine");
    let output = engine.run(&january_catalog(), &geometry).expect("Run failed");

    let dir = tempfile::tempdir().expect("temp dir");
    let rasters = RecordingRasterSink::default();
    let report = export_run(
        &output,
        &config,
        &rasters,
        &CsvTableSink::new(),
        &dir.path().to_string_lossy(),
    )
    .expect("Export failed");

    // 6 chunks for each of the two products
    assert_eq!(report.rasters.len(), 12);
    assert_eq!(report.rasters[0], "2021_NDVI_01_02");
    assert_eq!(report.rasters[11], "2021_VC_11_12");
    assert!(rasters.exports.lock().unwrap().iter().all(|(_, bands)| *bands == 2));
}

use crate::config::RunConfig;
use crate::core::metadata::{MetadataRow, METADATA_COLUMNS};
use crate::core::partition::periods_to_chunks;
use crate::core::pipeline::RunOutput;
use crate::core::stack::StackedArtifact;
use crate::io::naming::{NamingTemplate, TemplateValues};
use crate::types::{CompositeError, CompositeResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Raster container requested from a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RasterFormat {
    GeoTiff,
    CloudOptimizedGeoTiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableFormat {
    Csv,
    Json,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Json => "json",
        }
    }
}

/// Parameters of one raster export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterExportRequest {
    pub destination: String,
    /// File name without extension
    pub file_name: String,
    pub format: RasterFormat,
    pub scale: f64,
    pub crs: String,
    pub max_pixels: u64,
}

/// Parameters of one table export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableExportRequest {
    pub destination: String,
    /// File name without extension
    pub file_name: String,
    pub format: TableFormat,
    /// Columns to write, in order; all columns when empty
    pub column_selectors: Vec<String>,
}

/// Persists stacked rasters (GeoTIFF writers, object stores, ...)
pub trait RasterSink {
    fn export_raster(&self, artifact: &StackedArtifact, request: &RasterExportRequest) -> anyhow::Result<()>;
}

/// Persists metadata rows
pub trait TableSink {
    fn export_table(&self, rows: &[MetadataRow], request: &TableExportRequest) -> anyhow::Result<()>;
}

fn selected_columns(column_selectors: &[String]) -> CompositeResult<Vec<&str>> {
    if column_selectors.is_empty() {
        return Ok(METADATA_COLUMNS.to_vec());
    }

    column_selectors
        .iter()
        .map(|column| {
            METADATA_COLUMNS
                .iter()
                .find(|known| **known == column.as_str())
                .copied()
                .ok_or_else(|| CompositeError::Configuration(format!("Unknown metadata column '{}'", column)))
        })
        .collect()
}

/// Write rows as CSV with the selected columns
pub fn write_csv<W: Write>(rows: &[MetadataRow], writer: W, column_selectors: &[String]) -> CompositeResult<()> {
    let columns = selected_columns(column_selectors)?;
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(&columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| row.field(column).unwrap_or_default())
            .collect();
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Table sink writing `<destination>/<file_name>.<ext>` on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct CsvTableSink;

impl CsvTableSink {
    pub fn new() -> Self {
        Self
    }

    pub fn output_path(request: &TableExportRequest) -> PathBuf {
        Path::new(&request.destination).join(format!("{}.{}", request.file_name, request.format.extension()))
    }
}

impl TableSink for CsvTableSink {
    fn export_table(&self, rows: &[MetadataRow], request: &TableExportRequest) -> anyhow::Result<()> {
        std::fs::create_dir_all(&request.destination)?;
        let path = Self::output_path(request);
        let file = File::create(&path)?;

        match request.format {
            TableFormat::Csv => write_csv(rows, file, &request.column_selectors)?,
            TableFormat::Json => serde_json::to_writer_pretty(file, rows)?,
        }

        log::info!("Wrote {} metadata rows to {}", rows.len(), path.display());
        Ok(())
    }
}

/// Names of everything handed to the sinks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub rasters: Vec<String>,
    pub tables: Vec<String>,
}

fn export_stack(
    artifact: &StackedArtifact,
    config: &RunConfig,
    output: &RunOutput,
    stack_template: &str,
    sink: &dyn RasterSink,
    destination: &str,
    report: &mut ExportReport,
) -> CompositeResult<()> {
    let attributes = artifact.attributes();
    let values = TemplateValues::new(attributes.year, &attributes.data_type).threshold(attributes.threshold);
    let make_request = |file_name: String| RasterExportRequest {
        destination: destination.to_string(),
        file_name,
        format: RasterFormat::GeoTiff,
        scale: config.scale,
        crs: config.crs.clone(),
        max_pixels: config.max_pixels,
    };

    let (first, last) = match (output.periods.first(), output.periods.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(()),
    };

    match config.chunk_size {
        None => {
            let values = values.dates(first.output_start, last.last_output_day());
            let request = make_request(NamingTemplate::parse(stack_template)?.render(&values)?);
            sink.export_raster(artifact, &request).map_err(CompositeError::Export)?;
            report.rasters.push(request.file_name);
        }
        Some(chunk_size) => {
            let template = NamingTemplate::parse(&config.naming.chunk)?;
            for chunk in periods_to_chunks(artifact.band_count(), chunk_size)? {
                let Some(part) = artifact.select_chunk(&chunk) else {
                    continue;
                };
                let values = values
                    .clone()
                    .chunk(&chunk.label)
                    .dates(output.periods[chunk.first].output_start, output.periods[chunk.last].last_output_day());
                let request = make_request(template.render(&values)?);
                sink.export_raster(&part, &request).map_err(CompositeError::Export)?;
                report.rasters.push(request.file_name);
            }
        }
    }

    Ok(())
}

/// Hand the stacks (whole or chunked) and the metadata table to the sinks
pub fn export_run(
    output: &RunOutput,
    config: &RunConfig,
    rasters: &dyn RasterSink,
    tables: &dyn TableSink,
    destination: &str,
) -> CompositeResult<ExportReport> {
    let mut report = ExportReport::default();

    export_stack(
        &output.index_stack,
        config,
        output,
        &config.naming.index_stack,
        rasters,
        destination,
        &mut report,
    )?;
    if let Some(mask_stack) = &output.mask_stack {
        export_stack(
            mask_stack,
            config,
            output,
            &config.naming.mask_stack,
            rasters,
            destination,
            &mut report,
        )?;
    }

    let table_name = NamingTemplate::parse(&config.naming.table)?
        .render(&TemplateValues::new(config.year, config.index.name()).threshold(config.index_threshold))?;
    let request = TableExportRequest {
        destination: destination.to_string(),
        file_name: table_name,
        format: TableFormat::Csv,
        column_selectors: Vec::new(),
    };
    tables
        .export_table(&output.rows, &request)
        .map_err(CompositeError::Export)?;
    report.tables.push(request.file_name);

    log::info!(
        "Exported {} raster(s) and {} table(s) to {}",
        report.rasters.len(),
        report.tables.len(),
        destination
    );

    Ok(report)
}

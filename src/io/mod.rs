//! Collaborator seams: observation catalogs, geometry providers and export sinks

pub mod catalog;
pub mod export;
pub mod naming;

pub use catalog::{GeometryProvider, InMemoryCatalog, ObservationCatalog, StaticGeometry};
pub use export::{
    export_run, write_csv, CsvTableSink, ExportReport, RasterExportRequest, RasterFormat, RasterSink,
    TableExportRequest, TableFormat, TableSink,
};
pub use naming::{expand_template, format_threshold, NamingConfig, NamingTemplate, TemplateValues};

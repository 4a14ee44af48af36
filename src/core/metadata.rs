use crate::core::zonal_stats::format_percentage;
use crate::io::naming::{NamingConfig, NamingTemplate, TemplateValues};
use crate::types::{Composite, CompositeResult, PeriodDescriptor};
use serde::{Deserialize, Serialize};

/// Column headers of the metadata table, in output order
pub const METADATA_COLUMNS: [&str; 17] = [
    "Period_Number",
    "Period_Label",
    "Output_Start",
    "Output_End",
    "Acquisition_Start",
    "Acquisition_End",
    "Acquisition_Window_Days",
    "Image_Count",
    "QA_Flag",
    "Coverage_Percent",
    "Mean_Index",
    "Source_Images",
    "Index_Filename",
    "Mask_Filename",
    "Index_Threshold",
    "Cloud_Cover_Max",
    "Error",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One audit row per period. End dates are the last included day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    #[serde(rename = "Period_Number")]
    pub period_number: usize,
    #[serde(rename = "Period_Label")]
    pub period_label: String,
    #[serde(rename = "Output_Start")]
    pub output_start: String,
    #[serde(rename = "Output_End")]
    pub output_end: String,
    #[serde(rename = "Acquisition_Start")]
    pub acquisition_start: String,
    #[serde(rename = "Acquisition_End")]
    pub acquisition_end: String,
    #[serde(rename = "Acquisition_Window_Days")]
    pub acquisition_window_days: i64,
    #[serde(rename = "Image_Count")]
    pub image_count: usize,
    #[serde(rename = "QA_Flag")]
    pub qa_flag: bool,
    /// Two-decimal percentage, empty when no-data
    #[serde(rename = "Coverage_Percent")]
    pub coverage_percent: String,
    #[serde(rename = "Mean_Index")]
    pub mean_index: Option<f64>,
    #[serde(rename = "Source_Images")]
    pub source_images: String,
    #[serde(rename = "Index_Filename")]
    pub index_filename: String,
    #[serde(rename = "Mask_Filename")]
    pub mask_filename: String,
    #[serde(rename = "Index_Threshold")]
    pub index_threshold: Option<f64>,
    #[serde(rename = "Cloud_Cover_Max")]
    pub cloud_cover_max: f64,
    #[serde(rename = "Error")]
    pub error: String,
}

impl MetadataRow {
    /// Value of one column as text, `None` for unknown columns
    pub fn field(&self, column: &str) -> Option<String> {
        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();

        let value = match column {
            "Period_Number" => self.period_number.to_string(),
            "Period_Label" => self.period_label.clone(),
            "Output_Start" => self.output_start.clone(),
            "Output_End" => self.output_end.clone(),
            "Acquisition_Start" => self.acquisition_start.clone(),
            "Acquisition_End" => self.acquisition_end.clone(),
            "Acquisition_Window_Days" => self.acquisition_window_days.to_string(),
            "Image_Count" => self.image_count.to_string(),
            "QA_Flag" => self.qa_flag.to_string(),
            "Coverage_Percent" => self.coverage_percent.clone(),
            "Mean_Index" => optional(self.mean_index),
            "Source_Images" => self.source_images.clone(),
            "Index_Filename" => self.index_filename.clone(),
            "Mask_Filename" => self.mask_filename.clone(),
            "Index_Threshold" => optional(self.index_threshold),
            "Cloud_Cover_Max" => self.cloud_cover_max.to_string(),
            "Error" => self.error.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Merges period, provenance and statistics into metadata rows
#[derive(Debug, Clone)]
pub struct MetadataRecorder {
    year: i32,
    index_data_type: String,
    mask_data_type: String,
    period_template: NamingTemplate,
    index_threshold: Option<f64>,
    cloud_cover_max: f64,
}

impl MetadataRecorder {
    pub fn new(
        year: i32,
        index_name: &str,
        naming: &NamingConfig,
        index_threshold: Option<f64>,
        cloud_cover_max: f64,
    ) -> CompositeResult<Self> {
        Ok(Self {
            year,
            index_data_type: index_name.to_string(),
            mask_data_type: naming.mask_data_type.clone(),
            period_template: NamingTemplate::parse(&naming.period)?,
            index_threshold,
            cloud_cover_max,
        })
    }

    fn filename(&self, data_type: &str, period: &PeriodDescriptor) -> CompositeResult<String> {
        let values = TemplateValues::new(self.year, data_type)
            .threshold(self.index_threshold)
            .label(&period.label)
            .dates(period.output_start, period.last_output_day());
        self.period_template.render(&values)
    }

    /// Row for one period; `error` carries the reason of a degraded period
    pub fn record(
        &self,
        period: &PeriodDescriptor,
        composite: &Composite,
        error: Option<&str>,
    ) -> CompositeResult<MetadataRow> {
        let mask_filename = if self.index_threshold.is_some() {
            self.filename(&self.mask_data_type, period)?
        } else {
            String::new()
        };

        Ok(MetadataRow {
            period_number: period.number(),
            period_label: period.label.clone(),
            output_start: period.output_start.format(DATE_FORMAT).to_string(),
            output_end: period.last_output_day().format(DATE_FORMAT).to_string(),
            acquisition_start: period.acquisition_start.format(DATE_FORMAT).to_string(),
            acquisition_end: period.last_acquisition_day().format(DATE_FORMAT).to_string(),
            acquisition_window_days: period.acquisition_days(),
            image_count: composite.source_count,
            qa_flag: composite.qa_flag(),
            coverage_percent: format_percentage(composite.stats.coverage_fraction),
            mean_index: composite.stats.mean_index,
            source_images: composite.provenance.join(", "),
            index_filename: self.filename(&self.index_data_type, period)?,
            mask_filename,
            index_threshold: self.index_threshold,
            cloud_cover_max: self.cloud_cover_max,
            error: error.unwrap_or_default().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridSpec, PeriodStatistics};
    use chrono::NaiveDate;
    use geo::{coord, Rect};

    fn period() -> PeriodDescriptor {
        PeriodDescriptor {
            index: 2,
            acquisition_start: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            acquisition_end: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
            output_start: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            output_end: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
            label: "2021-03".to_string(),
        }
    }

    fn composite(ids: &[&str], stats: PeriodStatistics) -> Composite {
        let grid = GridSpec::from_extent(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }),
            0.5,
            "EPSG:4326",
        )
        .unwrap();
        Composite {
            period_index: 2,
            label: "2021-03".to_string(),
            index: grid.empty_band(),
            mask: Some(grid.empty_band()),
            grid,
            provenance: ids.iter().map(|id| id.to_string()).collect(),
            source_count: ids.len(),
            stats,
        }
    }

    #[test]
    fn test_row_from_populated_period() {
        let recorder = MetadataRecorder::new(2021, "NDVI", &NamingConfig::default(), Some(0.2), 30.0).unwrap();
        let stats = PeriodStatistics {
            mean_index: Some(0.41),
            coverage_fraction: Some(0.5234),
            valid_pixels: 4,
        };

        let row = recorder.record(&period(), &composite(&["S2B_2", "S2A_1"], stats), None).unwrap();

        assert_eq!(row.period_number, 3);
        assert_eq!(row.output_end, "2021-03-31");
        assert_eq!(row.acquisition_window_days, 31);
        assert_eq!(row.image_count, 2);
        assert!(row.qa_flag);
        assert_eq!(row.coverage_percent, "52.34");
        assert_eq!(row.source_images, "S2B_2, S2A_1");
        assert_eq!(row.index_filename, "NDVI_2021_2021-03");
        assert_eq!(row.mask_filename, "VC_2021_2021-03");
        assert!(row.error.is_empty());
    }

    #[test]
    fn test_empty_period_still_produces_row() {
        let recorder = MetadataRecorder::new(2021, "LST", &NamingConfig::default(), None, 20.0).unwrap();
        let row = recorder
            .record(&period(), &composite(&[], PeriodStatistics::default()), Some("catalog offline"))
            .unwrap();

        assert_eq!(row.image_count, 0);
        assert!(!row.qa_flag);
        assert_eq!(row.mean_index, None);
        assert_eq!(row.coverage_percent, "");
        assert_eq!(row.mask_filename, "");
        assert_eq!(row.error, "catalog offline");
    }

    #[test]
    fn test_field_lookup_matches_columns() {
        let recorder = MetadataRecorder::new(2021, "NDVI", &NamingConfig::default(), Some(0.2), 30.0).unwrap();
        let row = recorder
            .record(&period(), &composite(&["a"], PeriodStatistics::default()), None)
            .unwrap();

        for column in METADATA_COLUMNS {
            assert!(row.field(column).is_some(), "missing column {}", column);
        }
        assert_eq!(row.field("Index_Threshold").unwrap(), "0.2");
        assert!(row.field("Mean_NDVI").is_none());
    }
}

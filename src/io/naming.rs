use crate::types::{CompositeError, CompositeResult};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholders recognised in output naming templates
pub const PLACEHOLDERS: [&str; 7] = ["year", "threshold", "label", "chunk", "start", "end", "data_type"];

fn placeholder_regex() -> CompositeResult<Regex> {
    Regex::new(r"\{([a-z_]+)\}")
        .map_err(|e| CompositeError::Configuration(format!("Regex error: {}", e)))
}

/// `0.2` -> `"0_2"`, safe inside file names
pub fn format_threshold(threshold: f64) -> String {
    threshold.to_string().replace('.', "_")
}

/// Output naming templates for rasters and tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Single-period raster (used for the file name columns of metadata rows)
    pub period: String,
    /// Annual index stack
    pub index_stack: String,
    /// Annual threshold-mask stack
    pub mask_stack: String,
    /// One chunk of a stack
    pub chunk: String,
    /// Metadata table
    pub table: String,
    /// `{data_type}` value of the threshold-mask product
    pub mask_data_type: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            period: "{data_type}_{year}_{label}".to_string(),
            index_stack: "{data_type}_Annual_{year}_{start}_{end}".to_string(),
            mask_stack: "{data_type}_Annual_{year}_thr_{threshold}_{start}_{end}".to_string(),
            chunk: "{year}_{data_type}_{chunk}".to_string(),
            table: "{data_type}_Metadata_QC_{year}".to_string(),
            mask_data_type: "VC".to_string(),
        }
    }
}

impl NamingConfig {
    pub fn validate(&self) -> CompositeResult<()> {
        for template in [&self.period, &self.index_stack, &self.mask_stack, &self.chunk, &self.table] {
            NamingTemplate::parse(template)?;
        }
        if self.mask_data_type.is_empty() {
            return Err(CompositeError::Configuration(
                "mask_data_type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Values substituted into a template
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    values: BTreeMap<&'static str, String>,
}

impl TemplateValues {
    pub fn new(year: i32, data_type: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("year", year.to_string());
        values.insert("data_type", data_type.to_string());
        Self { values }
    }

    pub fn threshold(mut self, threshold: Option<f64>) -> Self {
        if let Some(threshold) = threshold {
            self.values.insert("threshold", format_threshold(threshold));
        }
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.values.insert("label", label.to_string());
        self
    }

    pub fn chunk(mut self, chunk: &str) -> Self {
        self.values.insert("chunk", chunk.to_string());
        self
    }

    /// Inclusive date range covered by the output
    pub fn dates(mut self, start: NaiveDate, last_day: NaiveDate) -> Self {
        self.values.insert("start", start.format("%Y-%m-%d").to_string());
        self.values.insert("end", last_day.format("%Y-%m-%d").to_string());
        self
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.values.get(placeholder).map(String::as_str)
    }
}

/// Parsed naming template, e.g. `VC_Annual_{year}_thr_{threshold}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    template: String,
    placeholders: Vec<String>,
}

impl NamingTemplate {
    pub fn parse(template: &str) -> CompositeResult<Self> {
        if template.trim().is_empty() {
            return Err(CompositeError::Configuration("Empty naming template".to_string()));
        }

        let mut placeholders = Vec::new();
        for captures in placeholder_regex()?.captures_iter(template) {
            let name = &captures[1];
            if !PLACEHOLDERS.contains(&name) {
                return Err(CompositeError::Configuration(format!(
                    "Unknown placeholder {{{}}} in naming template '{}'",
                    name, template
                )));
            }
            placeholders.push(name.to_string());
        }

        Ok(Self {
            template: template.to_string(),
            placeholders,
        })
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute every placeholder; a placeholder without a value is an error
    pub fn render(&self, values: &TemplateValues) -> CompositeResult<String> {
        if let Some(missing) = self.placeholders.iter().find(|p| values.get(p).is_none()) {
            return Err(CompositeError::Configuration(format!(
                "No value for {{{}}} in naming template '{}'",
                missing, self.template
            )));
        }

        let rendered = placeholder_regex()?.replace_all(&self.template, |captures: &regex::Captures| {
            values.get(&captures[1]).unwrap_or_default().to_string()
        });

        Ok(rendered.into_owned())
    }
}

/// Parse and render in one step
pub fn expand_template(template: &str, values: &TemplateValues) -> CompositeResult<String> {
    NamingTemplate::parse(template)?.render(values)
}

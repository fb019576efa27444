//! Intake validation, run before any other stage sees the upload

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::bytes::Regex as BytesRegex;
use serde::Serialize;
use tracing::{error, instrument, warn};

use super::copy_paste::contains;
use crate::config::HeuristicsConfig;
use crate::error::{Error, Rejection, Result};
use crate::types::DocumentSource;

lazy_static! {
    static ref PRODUCER_TOOL: BytesRegex = BytesRegex::new(
        r"(?i)Microsoft Print to PDF|Chrome|Chromium|Edge|ImageToPDF|CamScanner|Adobe Scan|PDFCreator"
    )
    .unwrap();
}

/// Facts gathered by a successful intake
#[derive(Debug, Clone, Serialize)]
pub struct IntakeReport {
    pub has_text: bool,
    pub has_images: bool,
    pub size_bytes: u64,
    pub age_secs: i64,
    /// First conversion tool marker found, logged only
    pub conversion_tool: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IntakeValidator {
    max_textless_bytes: u64,
    young_file_secs: i64,
}

impl IntakeValidator {
    pub fn new(config: &HeuristicsConfig) -> Self {
        Self {
            max_textless_bytes: config.max_textless_bytes,
            young_file_secs: config.intake_young_file_secs,
        }
    }

    #[instrument(skip(self, source), fields(file = %source.file_name))]
    pub fn validate(&self, source: &DocumentSource, now: DateTime<Utc>) -> Result<IntakeReport> {
        if !source.has_pdf_header() {
            return Err(Error::ValidationError("file is not a valid PDF".into()));
        }

        let content = source.content.as_slice();
        let conversion_tool = PRODUCER_TOOL
            .find(content)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
        if let Some(tool) = &conversion_tool {
            warn!(tool = %tool, "PDF produced by a conversion tool");
        }

        let has_images = contains(content, b"/Image");
        let has_text = contains(content, b"/Font") || contains(content, b"/Text");

        if has_images && !has_text {
            error!("PDF holds only images, likely a print or screenshot");
            return Err(Rejection::ImageOnlyDocument.into());
        }

        let size_bytes = source.size();
        if size_bytes > self.max_textless_bytes && !has_text {
            error!(size_bytes, "large PDF without text content");
            return Err(Rejection::OversizedWithoutText { size_bytes }.into());
        }

        let age_secs = (now - source.modified_at).num_seconds();
        if age_secs < self.young_file_secs {
            warn!(age_secs, "PDF created seconds ago, possible print conversion");
        }

        Ok(IntakeReport {
            has_text,
            has_images,
            size_bytes,
            age_secs,
            conversion_tool,
        })
    }
}

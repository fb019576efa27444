//! Copy-paste and screen-capture detection over raw PDF bytes
//!
//! Every check is a static, deterministic scan of the file bytes, its name
//! and its modification time. Each check contributes at most one tag.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::HeuristicsConfig;
use crate::types::DocumentSource;

lazy_static! {
    static ref SUSPICIOUS_FILENAME: Regex =
        Regex::new(r"(?i)copy|copia|duplicate|screen|print|captura|foto|image").unwrap();
    static ref CONVERSION_TOOL: BytesRegex = BytesRegex::new(
        r"(?i)ImageToPDF|CamScanner|Adobe Scan|PDFCreator|PDFill|doPDF|Win2PDF|PrimoPDF|Foxit Reader|Microsoft Print to PDF|Chrome|Chromium|Edge|Firefox|Safari"
    )
    .unwrap();
    static ref CAPTURE_TOOL: BytesRegex = BytesRegex::new(
        r"(?i)Snipping Tool|Screenshot|Print Screen|Captura|LightShot|Greenshot|Snagit|CloudShot"
    )
    .unwrap();
    static ref DOWNLOAD_MARKER: BytesRegex = BytesRegex::new(r"download|temp").unwrap();
    static ref WIDTH: BytesRegex = BytesRegex::new(r"/Width\s+(\d+)").unwrap();
    static ref HEIGHT: BytesRegex = BytesRegex::new(r"/Height\s+(\d+)").unwrap();
    static ref BITS_PER_COMPONENT: BytesRegex =
        BytesRegex::new(r"/BitsPerComponent\s+(\d+)").unwrap();
    static ref CREATION_DATE: BytesRegex =
        BytesRegex::new(r"/CreationDate\s*\(D:(\d{14})").unwrap();
    static ref DEVICE_RGB: BytesRegex = BytesRegex::new(r"/ColorSpace\s+/DeviceRGB").unwrap();
}

/// Typical monitor and screenshot resolutions
const SCREEN_RESOLUTIONS: [(i64, i64); 8] = [
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
    (1024, 768),
    (800, 600),
    (1600, 900),
];

const RESOLUTION_TOLERANCE: i64 = 50;

/// One finding of the copy-paste battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionTag {
    FileTooRecent,
    SuspiciousFilename,
    ImageConversionTool,
    ImageOnlyPdf,
    ImageHeavyPdf,
    ScreenResolutionMatch,
    LowQualityImage,
    RecentCreationTimestamp,
    CaptureToolDetected,
    DownloadIndicators,
    ScannedDocumentCharacteristics,
}

impl SuspicionTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SuspicionTag::FileTooRecent => "file_too_recent",
            SuspicionTag::SuspiciousFilename => "suspicious_filename",
            SuspicionTag::ImageConversionTool => "image_conversion_tool",
            SuspicionTag::ImageOnlyPdf => "image_only_pdf",
            SuspicionTag::ImageHeavyPdf => "image_heavy_pdf",
            SuspicionTag::ScreenResolutionMatch => "screen_resolution_match",
            SuspicionTag::LowQualityImage => "low_quality_image",
            SuspicionTag::RecentCreationTimestamp => "recent_creation_timestamp",
            SuspicionTag::CaptureToolDetected => "capture_tool_detected",
            SuspicionTag::DownloadIndicators => "download_indicators",
            SuspicionTag::ScannedDocumentCharacteristics => "scanned_document_characteristics",
        }
    }

    /// Contribution to the suspicion score
    pub fn weight(self) -> u32 {
        match self {
            SuspicionTag::CaptureToolDetected => 3,
            SuspicionTag::SuspiciousFilename
            | SuspicionTag::ImageConversionTool
            | SuspicionTag::ImageOnlyPdf
            | SuspicionTag::ImageHeavyPdf
            | SuspicionTag::ScreenResolutionMatch
            | SuspicionTag::ScannedDocumentCharacteristics => 2,
            SuspicionTag::FileTooRecent
            | SuspicionTag::LowQualityImage
            | SuspicionTag::RecentCreationTimestamp
            | SuspicionTag::DownloadIndicators => 1,
        }
    }
}

impl fmt::Display for SuspicionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring a tag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    /// Accepted, but logged for follow-up
    Monitor,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspicionAssessment {
    pub tags: BTreeSet<SuspicionTag>,
    pub score: u32,
    pub verdict: Verdict,
}

impl SuspicionAssessment {
    /// Scores tags against the default thresholds
    pub fn from_tags(tags: BTreeSet<SuspicionTag>) -> Self {
        Self::evaluate(tags, &HeuristicsConfig::default())
    }

    pub fn evaluate(tags: BTreeSet<SuspicionTag>, config: &HeuristicsConfig) -> Self {
        let score = tags.iter().map(|t| t.weight()).sum();
        let verdict = if score >= config.reject_score {
            Verdict::Reject
        } else if score >= config.monitor_score {
            Verdict::Monitor
        } else {
            Verdict::Clean
        };
        Self { tags, score, verdict }
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.as_str().to_string()).collect()
    }
}

/// Runs the tag battery
#[derive(Debug, Clone)]
pub struct CopyPasteDetector {
    recent_file_secs: i64,
    creation_window_secs: i64,
}

impl CopyPasteDetector {
    pub fn new(config: &HeuristicsConfig) -> Self {
        Self {
            recent_file_secs: config.recent_file_secs,
            creation_window_secs: config.creation_window_secs,
        }
    }

    #[instrument(skip(self, source), fields(file = %source.file_name, size = source.size()))]
    pub fn detect(&self, source: &DocumentSource, now: DateTime<Utc>) -> BTreeSet<SuspicionTag> {
        let content = source.content.as_slice();
        let file_name = source.file_name.as_str();
        let mut tags = BTreeSet::new();

        if (now - source.modified_at).num_seconds() < self.recent_file_secs {
            tags.insert(SuspicionTag::FileTooRecent);
        }

        if SUSPICIOUS_FILENAME.is_match(file_name) {
            tags.insert(SuspicionTag::SuspiciousFilename);
        }

        if CONVERSION_TOOL.is_match(content) {
            tags.insert(SuspicionTag::ImageConversionTool);
        }

        if contains(content, b"/XObject") && contains(content, b"/Image") {
            let images = count(content, b"/Image");
            let text = count(content, b"/Text");
            if images > 0 && text == 0 {
                tags.insert(SuspicionTag::ImageOnlyPdf);
            }
            if images > text * 2 {
                tags.insert(SuspicionTag::ImageHeavyPdf);
            }
        }

        if let (Some(width), Some(height)) = (first_number(&WIDTH, content), first_number(&HEIGHT, content)) {
            let matches_screen = SCREEN_RESOLUTIONS.iter().any(|&(w, h)| {
                (width - w).abs() < RESOLUTION_TOLERANCE && (height - h).abs() < RESOLUTION_TOLERANCE
            });
            if matches_screen {
                tags.insert(SuspicionTag::ScreenResolutionMatch);
            }
        }

        if let Some(bits) = first_number(&BITS_PER_COMPONENT, content) {
            if bits <= 8 {
                tags.insert(SuspicionTag::LowQualityImage);
            }
        }

        if let Some(created) = creation_date(content) {
            if (now - created).num_seconds().abs() < self.creation_window_secs {
                tags.insert(SuspicionTag::RecentCreationTimestamp);
            }
        }

        if CAPTURE_TOOL.is_match(content) {
            tags.insert(SuspicionTag::CaptureToolDetected);
        }

        if DOWNLOAD_MARKER.is_match(content) || DOWNLOAD_MARKER.is_match(file_name.as_bytes()) {
            tags.insert(SuspicionTag::DownloadIndicators);
        }

        if DEVICE_RGB.is_match(content) && !contains(content, b"/Font") {
            tags.insert(SuspicionTag::ScannedDocumentCharacteristics);
        }

        debug!(tags = ?tags, "copy-paste battery complete");
        tags
    }
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Non-overlapping occurrences
pub(crate) fn count(haystack: &[u8], needle: &[u8]) -> usize {
    let mut n = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            n += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    n
}

fn first_number(pattern: &BytesRegex, content: &[u8]) -> Option<i64> {
    let caps = pattern.captures(content)?;
    std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?.parse().ok()
}

/// `/CreationDate (D:YYYYMMDDHHMMSS`, read as UTC
fn creation_date(content: &[u8]) -> Option<DateTime<Utc>> {
    let caps = CREATION_DATE.captures(content)?;
    let digits = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn source(content: &[u8], name: &str, age: Duration) -> DocumentSource {
        DocumentSource::from_bytes(content.to_vec(), name, Utc::now() - age)
    }

    fn detect(content: &[u8], name: &str) -> BTreeSet<SuspicionTag> {
        CopyPasteDetector::new(&HeuristicsConfig::default())
            .detect(&source(content, name, Duration::hours(2)), Utc::now())
    }

    #[test]
    fn test_clean_text_pdf_has_no_tags() {
        let pdf = b"%PDF-1.7\n1 0 obj << /Type /Font /Subtype /Type1 >> endobj\n%%EOF";
        assert!(detect(pdf, "relatorio_anual.pdf").is_empty());
    }

    #[test]
    fn test_file_age_and_name() {
        let detector = CopyPasteDetector::new(&HeuristicsConfig::default());
        let tags = detector.detect(&source(b"%PDF-1.4 /Font", "Copia de contrato.pdf", Duration::seconds(5)), Utc::now());
        assert!(tags.contains(&SuspicionTag::FileTooRecent));
        assert!(tags.contains(&SuspicionTag::SuspiciousFilename));
    }

    #[test]
    fn test_image_counts() {
        let only = detect(b"%PDF-1.4 /XObject /Subtype /Image /Font", "a.pdf");
        assert!(only.contains(&SuspicionTag::ImageOnlyPdf));
        assert!(only.contains(&SuspicionTag::ImageHeavyPdf));

        let balanced = detect(b"%PDF-1.4 /XObject /Image /Text /Text /Font", "a.pdf");
        assert!(!balanced.contains(&SuspicionTag::ImageOnlyPdf));
        assert!(!balanced.contains(&SuspicionTag::ImageHeavyPdf));
    }

    #[test]
    fn test_screen_resolution_tolerance() {
        let near = detect(b"%PDF-1.4 /Width 1910 /Height 1075 /Font", "a.pdf");
        assert!(near.contains(&SuspicionTag::ScreenResolutionMatch));

        let edge = detect(b"%PDF-1.4 /Width 1970 /Height 1080 /Font", "a.pdf");
        assert!(!edge.contains(&SuspicionTag::ScreenResolutionMatch));
    }

    #[test]
    fn test_low_quality_threshold() {
        assert!(detect(b"%PDF /BitsPerComponent 8 /Font", "a.pdf").contains(&SuspicionTag::LowQualityImage));
        assert!(!detect(b"%PDF /BitsPerComponent 16 /Font", "a.pdf").contains(&SuspicionTag::LowQualityImage));
    }

    #[test]
    fn test_recent_creation_date_is_utc() {
        let now = Utc::now();
        let stamp = (now - Duration::seconds(60)).format("%Y%m%d%H%M%S");
        let pdf = format!("%PDF-1.4 /CreationDate (D:{}Z) /Font", stamp);
        let tags = CopyPasteDetector::new(&HeuristicsConfig::default())
            .detect(&source(pdf.as_bytes(), "a.pdf", Duration::hours(1)), now);
        assert!(tags.contains(&SuspicionTag::RecentCreationTimestamp));

        let old = b"%PDF-1.4 /CreationDate (D:20190101120000Z) /Font";
        assert!(!detect(old, "a.pdf").contains(&SuspicionTag::RecentCreationTimestamp));
    }

    #[test]
    fn test_tool_markers_are_case_insensitive() {
        let tags = detect(b"%PDF /Producer (greenshot 1.2) /Creator (CHROME) /Font", "a.pdf");
        assert!(tags.contains(&SuspicionTag::CaptureToolDetected));
        assert!(tags.contains(&SuspicionTag::ImageConversionTool));
    }

    #[test]
    fn test_download_marker_is_case_sensitive() {
        assert!(detect(b"%PDF /Font", "download_123.pdf").contains(&SuspicionTag::DownloadIndicators));
        assert!(!detect(b"%PDF /Font", "DOWNLOAD.pdf").contains(&SuspicionTag::DownloadIndicators));
    }

    #[test]
    fn test_scanned_characteristics_need_missing_font() {
        assert!(detect(b"%PDF /ColorSpace /DeviceRGB", "a.pdf")
            .contains(&SuspicionTag::ScannedDocumentCharacteristics));
        assert!(!detect(b"%PDF /ColorSpace /DeviceRGB /Font", "a.pdf")
            .contains(&SuspicionTag::ScannedDocumentCharacteristics));
    }

    #[test]
    fn test_assessment_thresholds() {
        let clean = SuspicionAssessment::from_tags(BTreeSet::new());
        assert_eq!(clean.verdict, Verdict::Clean);

        let monitor = SuspicionAssessment::from_tags([SuspicionTag::LowQualityImage].into());
        assert_eq!((monitor.score, monitor.verdict), (1, Verdict::Monitor));

        let reject = SuspicionAssessment::from_tags(
            [SuspicionTag::FileTooRecent, SuspicionTag::DownloadIndicators].into(),
        );
        assert_eq!((reject.score, reject.verdict), (2, Verdict::Reject));

        let capture = SuspicionAssessment::from_tags([SuspicionTag::CaptureToolDetected].into());
        assert_eq!(capture.score, 3);
    }

    #[test]
    fn test_tag_literals() {
        assert_eq!(
            serde_json::to_string(&SuspicionTag::ScannedDocumentCharacteristics).unwrap(),
            "\"scanned_document_characteristics\""
        );
        assert_eq!(SuspicionTag::ImageHeavyPdf.to_string(), "image_heavy_pdf");
    }

    #[test]
    fn test_count_is_non_overlapping() {
        assert_eq!(count(b"/Image/Image /ImageB", b"/Image"), 3);
        assert_eq!(count(b"", b"/Image"), 0);
    }
}

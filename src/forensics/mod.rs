//! Forgery heuristics for uploaded PDFs
//!
//! Intake validation runs first and raises hard rejections. The copy-paste
//! battery then tags the document and [`ForgeryHeuristics::gate`] turns the
//! weighted score into a verdict.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::config::HeuristicsConfig;
use crate::error::{Rejection, Result};
use crate::types::DocumentSource;

pub mod copy_paste;
pub mod intake;

pub use copy_paste::{CopyPasteDetector, SuspicionAssessment, SuspicionTag, Verdict};
pub use intake::{IntakeReport, IntakeValidator};

#[derive(Debug, Clone)]
pub struct ForgeryHeuristics {
    config: HeuristicsConfig,
    intake: IntakeValidator,
    detector: CopyPasteDetector,
}

impl ForgeryHeuristics {
    pub fn new(config: HeuristicsConfig) -> Self {
        Self {
            intake: IntakeValidator::new(&config),
            detector: CopyPasteDetector::new(&config),
            config,
        }
    }

    pub fn validate_intake(&self, source: &DocumentSource, now: DateTime<Utc>) -> Result<IntakeReport> {
        self.intake.validate(source, now)
    }

    pub fn detect(&self, source: &DocumentSource, now: DateTime<Utc>) -> BTreeSet<SuspicionTag> {
        self.detector.detect(source, now)
    }

    pub fn assess(&self, source: &DocumentSource, now: DateTime<Utc>) -> SuspicionAssessment {
        SuspicionAssessment::evaluate(self.detect(source, now), &self.config)
    }

    /// Fails with [`Rejection::ForgeryIndicators`] on a reject verdict
    #[instrument(skip(self, assessment), fields(score = assessment.score))]
    pub fn gate(&self, assessment: &SuspicionAssessment) -> Result<()> {
        match assessment.verdict {
            Verdict::Reject => {
                warn!(tags = ?assessment.tag_names(), "document rejected by forgery heuristics");
                Err(Rejection::ForgeryIndicators {
                    indicators: assessment.tag_names(),
                    score: assessment.score,
                }
                .into())
            }
            Verdict::Monitor => {
                warn!(tags = ?assessment.tag_names(), "suspicious patterns below reject score, monitoring");
                Ok(())
            }
            Verdict::Clean => {
                info!("no copy-paste indicators");
                Ok(())
            }
        }
    }
}

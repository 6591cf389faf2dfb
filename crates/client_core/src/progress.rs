use serde::{Deserialize, Serialize};
use shared::{
    domain::{CanonicalStage, StageStatus},
    protocol::StageRecord,
};

/// Raw report names whose status a canonical stage adopts. Consent has no
/// backend report of its own and only completes by being passed.
pub const MERGE_SYNONYMS: [(CanonicalStage, &[&str]); 7] = [
    (CanonicalStage::JourneyInitiation, &["initiated"]),
    (CanonicalStage::ConsentAuthorization, &[]),
    (
        CanonicalStage::DocumentCapture,
        &[
            "ocr_processing",
            "ocr_extraction",
            "document_uploaded",
            "documents_uploaded",
            "data_extracted",
            "pending_ocr",
            "ocr_failed",
            "ocr_completed",
        ],
    ),
    (
        CanonicalStage::PresenceConfirmation,
        &["user_review", "data_review", "pending_user_review"],
    ),
    (
        CanonicalStage::LivenessInteraction,
        &[
            "user_confirmed",
            "gov_verification",
            "government_verification",
            "gov_verification_pending",
            "gov_verification_failed",
            "gov_verification_passed",
        ],
    ),
    (
        CanonicalStage::OutcomeNotification,
        &[
            "fraud_detection",
            "fraud_check",
            "fraud_check_pending",
            "fraud_check_failed",
            "fraud_check_passed",
        ],
    ),
    (
        CanonicalStage::CompletionConfirmation,
        &["decision", "decision_made", "pending_decision", "completed"],
    ),
];

/// Raw names that prove the journey got at least as far as a stage.
pub const STAGE_INDEX: &[(&str, CanonicalStage)] = &[
    ("initiated", CanonicalStage::JourneyInitiation),
    ("document_uploaded", CanonicalStage::DocumentCapture),
    ("documents_uploaded", CanonicalStage::DocumentCapture),
    ("ocr_processing", CanonicalStage::DocumentCapture),
    ("ocr_extraction", CanonicalStage::DocumentCapture),
    ("data_extracted", CanonicalStage::DocumentCapture),
    ("pending_ocr", CanonicalStage::DocumentCapture),
    ("ocr_failed", CanonicalStage::DocumentCapture),
    ("ocr_completed", CanonicalStage::DocumentCapture),
    ("user_review", CanonicalStage::PresenceConfirmation),
    ("data_review", CanonicalStage::PresenceConfirmation),
    ("pending_user_review", CanonicalStage::PresenceConfirmation),
    ("user_confirmed", CanonicalStage::LivenessInteraction),
    ("gov_verification", CanonicalStage::LivenessInteraction),
    ("government_verification", CanonicalStage::LivenessInteraction),
    ("gov_verification_pending", CanonicalStage::LivenessInteraction),
    ("gov_verification_failed", CanonicalStage::LivenessInteraction),
    ("fraud_detection", CanonicalStage::OutcomeNotification),
    ("fraud_check", CanonicalStage::OutcomeNotification),
    ("fraud_check_pending", CanonicalStage::OutcomeNotification),
    ("fraud_check_failed", CanonicalStage::OutcomeNotification),
    ("decision", CanonicalStage::CompletionConfirmation),
    ("decision_made", CanonicalStage::CompletionConfirmation),
    ("pending_decision", CanonicalStage::CompletionConfirmation),
    ("completed", CanonicalStage::CompletionConfirmation),
];

/// Current-stage values that highlight a stage as being worked on.
pub const IN_PROGRESS_SYNONYMS: [(CanonicalStage, &[&str]); 7] = [
    (CanonicalStage::JourneyInitiation, &["initiated"]),
    (CanonicalStage::ConsentAuthorization, &[]),
    (
        CanonicalStage::DocumentCapture,
        &[
            "document_uploaded",
            "documents_uploaded",
            "ocr_extraction",
            "ocr_processing",
            "data_extracted",
            "pending_ocr",
            "processing",
            "ocr_failed",
            "ocr_completed",
        ],
    ),
    (
        CanonicalStage::PresenceConfirmation,
        &["pending_user_review", "user_review", "data_review"],
    ),
    (
        CanonicalStage::LivenessInteraction,
        &[
            "user_confirmed",
            "gov_verification",
            "government_verification",
            "gov_verification_pending",
            "gov_verification_failed",
            "gov_verification_passed",
        ],
    ),
    (
        CanonicalStage::OutcomeNotification,
        &[
            "fraud_check",
            "fraud_detection",
            "fraud_check_pending",
            "fraud_check_failed",
            "fraud_check_passed",
        ],
    ),
    (
        CanonicalStage::CompletionConfirmation,
        &["decision_made", "decision", "pending_decision", "completed"],
    ),
];

const SUCCESS_STATUSES: &[&str] = &[
    "approved",
    "completed",
    "verified",
    "pending_review",
    "manual_review",
    "under_review",
];

const REJECTION_STATUSES: &[&str] = &["rejected", "failed", "declined"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageView {
    pub stage: CanonicalStage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageView {
    pub fn label(&self) -> &'static str {
        stage_label(self.stage)
    }
}

/// Final verdict of an application, as far as the account is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn from_status(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "approved" | "completed" => Some(Verdict::Approved),
            "rejected" | "failed" => Some(Verdict::Rejected),
            _ => None,
        }
    }
}

/// Name shown to the user for a canonical stage.
pub fn stage_label(stage: CanonicalStage) -> &'static str {
    stage.label()
}

pub fn synonyms_for(stage: CanonicalStage) -> &'static [&'static str] {
    MERGE_SYNONYMS[stage.index()].1
}

pub fn canonical_stage_for(raw: &str) -> Option<CanonicalStage> {
    STAGE_INDEX
        .iter()
        .find(|(name, _)| *name == raw)
        .map(|(_, stage)| *stage)
}

/// Whether `current` means work is happening on `stage` right now.
pub fn is_stage_active(stage: CanonicalStage, current: &str) -> bool {
    current == stage.as_str() || IN_PROGRESS_SYNONYMS[stage.index()].1.contains(&current)
}

/// Furthest canonical stage implied by the current raw stage or any report.
pub fn highest_stage_reached(
    reports: &[StageRecord],
    current_stage: Option<&str>,
) -> Option<CanonicalStage> {
    current_stage
        .into_iter()
        .chain(reports.iter().map(|report| report.stage_name.as_str()))
        .filter_map(canonical_stage_for)
        .max()
}

pub fn is_rejection_status(status: &str) -> bool {
    REJECTION_STATUSES.contains(&status.to_ascii_lowercase().as_str())
}

pub fn is_terminal_status(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    SUCCESS_STATUSES.contains(&status.as_str()) || REJECTION_STATUSES.contains(&status.as_str())
}

/// Full canonical stage list derived from raw backend signals.
pub fn merge(
    reports: &[StageRecord],
    current_stage: Option<&str>,
    overall_status: &str,
) -> Vec<StageView> {
    merge_with_floor(reports, current_stage, overall_status, None)
}

/// Like [`merge`], with `floor` as a stage already known to have been reached.
pub fn merge_with_floor(
    reports: &[StageRecord],
    current_stage: Option<&str>,
    overall_status: &str,
    floor: Option<CanonicalStage>,
) -> Vec<StageView> {
    let highest = highest_stage_reached(reports, current_stage).max(floor);
    let terminal = is_terminal_status(overall_status);
    let rejected = is_rejection_status(overall_status);

    CanonicalStage::ALL
        .iter()
        .map(|&stage| {
            let synonyms = synonyms_for(stage);
            let report = reports
                .iter()
                .rev()
                .find(|report| synonyms.contains(&report.stage_name.as_str()));

            let (mut status, message) = match report {
                Some(report) => (report.status, report.message.clone()),
                None if highest.is_some_and(|highest| stage < highest) => {
                    (StageStatus::Completed, None)
                }
                None => (StageStatus::Pending, None),
            };

            let active = current_stage.is_some_and(|current| is_stage_active(stage, current));
            if status == StageStatus::Pending && active {
                status = StageStatus::InProgress;
            }

            if terminal {
                status = if stage.is_final() && rejected {
                    StageStatus::Failed
                } else {
                    StageStatus::Completed
                };
            }

            StageView {
                stage,
                status,
                message,
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/progress_tests.rs"]
mod tests;

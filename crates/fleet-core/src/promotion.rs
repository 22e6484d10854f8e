// crates/fleet-core/src/promotion.rs
//
// Approval-gated promotion records.
//
//   Registered -> PendingApproval -> Approved -> Promoted
//                      |                 '----> AlreadyExists
//                      '--------------> Rejected
//
// A record is terminal once promoted, already present in the target
// registry, or rejected. `Failed` is retried on the next pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::fingerprint::Fingerprint;
use crate::resource::{tag, ResourceRef, Tags};
use crate::unit::UnitId;

/// Raw answer of an approval source for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSignal {
    Approved,
    Rejected,
    Pending,
    /// The source holds no record for the key.
    Absent,
}

/// What an absent approval signal means. Chosen explicitly in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Absent means "not yet decided": the model waits for a later pass.
    #[default]
    DefaultPending,
    /// Absent means approved: every model without a record is promoted.
    DefaultApprove,
}

impl ApprovalPolicy {
    pub fn resolve(&self, signal: ApprovalSignal) -> ApprovalState {
        match (signal, self) {
            (ApprovalSignal::Approved, _) => ApprovalState::Approved,
            (ApprovalSignal::Rejected, _) => ApprovalState::Rejected,
            (ApprovalSignal::Pending, _) => ApprovalState::Pending,
            (ApprovalSignal::Absent, ApprovalPolicy::DefaultPending) => ApprovalState::Pending,
            (ApprovalSignal::Absent, ApprovalPolicy::DefaultApprove) => ApprovalState::Approved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionOutcome {
    NotStarted,
    Promoted,
    AlreadyExists,
    Failed,
}

/// Flattened status reported per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    PendingApproval,
    Rejected,
    Promoted,
    AlreadyExists,
    Failed,
}

/// A freshly registered model eligible for promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub model: ResourceRef,
    pub unit: UnitId,
    pub cutoff_date: String,
    pub training_fingerprint: Fingerprint,
    /// Source location the target registry copies from.
    pub source_ref: String,
    pub training_job: String,
}

impl ModelCandidate {
    /// Approval lookup key: `plant_id:model_name:version`.
    pub fn approval_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.unit.plant_id, self.model.name, self.model.version
        )
    }

    /// Lineage tags written onto the promoted copy.
    pub fn lineage_tags(&self, promoted_from: &str) -> Tags {
        let mut tags = Tags::new();
        tags.insert(tag::PLANT_ID.to_string(), self.unit.plant_id.clone());
        tags.insert(tag::CIRCUIT_ID.to_string(), self.unit.circuit_id.clone());
        tags.insert(tag::CUTOFF_DATE.to_string(), self.cutoff_date.clone());
        tags.insert(
            tag::TRAINING_FINGERPRINT.to_string(),
            self.training_fingerprint.to_string(),
        );
        tags.insert(tag::TRAINING_JOB.to_string(), self.training_job.clone());
        tags.insert(tag::PROMOTED_FROM.to_string(), promoted_from.to_string());
        tags
    }
}

/// Promotion progress of one model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub candidate: ModelCandidate,
    pub approval: ApprovalState,
    pub outcome: PromotionOutcome,
    /// The copy was re-queried and found in the target registry.
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PromotionRecord {
    /// A record for a model that was just registered.
    pub fn new(candidate: ModelCandidate) -> Self {
        Self {
            candidate,
            approval: ApprovalState::Pending,
            outcome: PromotionOutcome::NotStarted,
            verified: false,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> PromotionStatus {
        match (self.approval, self.outcome) {
            (_, PromotionOutcome::Promoted) => PromotionStatus::Promoted,
            (_, PromotionOutcome::AlreadyExists) => PromotionStatus::AlreadyExists,
            (_, PromotionOutcome::Failed) => PromotionStatus::Failed,
            (ApprovalState::Rejected, _) => PromotionStatus::Rejected,
            _ => PromotionStatus::PendingApproval,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            PromotionStatus::Promoted | PromotionStatus::AlreadyExists | PromotionStatus::Rejected
        )
    }

    /// Record the resolved approval decision.
    pub fn set_approval(&mut self, approval: ApprovalState) -> Result<(), FleetError> {
        if self.is_terminal() {
            return Err(FleetError::InvalidTransition(format!(
                "{}: approval change on terminal record ({:?})",
                self.candidate.model,
                self.status()
            )));
        }
        self.approval = approval;
        self.outcome = PromotionOutcome::NotStarted;
        self.error = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the promotion outcome. Success requires prior approval.
    pub fn set_outcome(&mut self, outcome: PromotionOutcome) -> Result<(), FleetError> {
        let allowed = match outcome {
            PromotionOutcome::Promoted | PromotionOutcome::AlreadyExists => {
                self.approval == ApprovalState::Approved && !self.is_terminal()
            }
            PromotionOutcome::Failed => !self.is_terminal(),
            PromotionOutcome::NotStarted => false,
        };
        if !allowed {
            return Err(FleetError::InvalidTransition(format!(
                "{}: {:?}/{:?} -> {:?}",
                self.candidate.model, self.approval, self.outcome, outcome
            )));
        }
        self.outcome = outcome;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the attempt failed with a reason. Ignored on terminal records.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.set_outcome(PromotionOutcome::Failed).is_ok() {
            self.error = Some(reason.into());
        }
    }
}

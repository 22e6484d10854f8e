// crates/fleet-pipeline/src/promotion.rs
//
// Approval-gated promotion of registered models into the shared registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::error::{FailureKind, FleetError, UnitFailure};
use fleet_core::promotion::{
    ApprovalPolicy, ApprovalState, ModelCandidate, PromotionOutcome, PromotionRecord,
    PromotionStatus,
};
use fleet_core::resource::ResourceRef;
use fleet_core::traits::{ApprovalSource, ModelRegistry};

use crate::records::StageReport;

pub const STAGE: &str = "promote";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub generated_at: DateTime<Utc>,
    pub policy: ApprovalPolicy,
    pub records: Vec<PromotionRecord>,
    pub failures: Vec<UnitFailure>,
}

impl PromotionReport {
    pub fn count(&self, status: PromotionStatus) -> usize {
        self.records.iter().filter(|r| r.status() == status).count()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PromotionRecord> {
        self.records
            .iter()
            .filter(|r| r.status() == PromotionStatus::PendingApproval)
    }

    pub fn record(&self, model: &ResourceRef) -> Option<&PromotionRecord> {
        self.records.iter().find(|r| &r.candidate.model == model)
    }
}

impl StageReport for PromotionReport {
    const FILE_NAME: &'static str = "promotion_result.json";
    const STAGE: &'static str = STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Promotes approved models, one candidate at a time.
pub struct PromotionGate {
    approvals: Arc<dyn ApprovalSource>,
    target: Arc<dyn ModelRegistry>,
    policy: ApprovalPolicy,
    promoted_from: String,
}

impl PromotionGate {
    pub fn new(
        approvals: Arc<dyn ApprovalSource>,
        target: Arc<dyn ModelRegistry>,
        policy: ApprovalPolicy,
        promoted_from: impl Into<String>,
    ) -> Self {
        Self {
            approvals,
            target,
            policy,
            promoted_from: promoted_from.into(),
        }
    }

    /// Advance one record as far as its approval allows.
    ///
    /// Terminal records are left untouched. Every error ends up on the
    /// record as a `Failed` outcome, which a later pass retries.
    pub async fn promote(&self, record: &mut PromotionRecord) {
        if record.is_terminal() {
            return;
        }
        let model = record.candidate.model.clone();
        if let Err(e) = self.advance(record).await {
            tracing::warn!("Promote: {} failed: {}", model, e);
            record.fail(e.to_string());
        }
    }

    async fn advance(&self, record: &mut PromotionRecord) -> Result<(), FleetError> {
        let key = record.candidate.approval_key();
        let signal = self.approvals.get_approval_status(&key).await?;
        let approval = self.policy.resolve(signal);
        record.set_approval(approval)?;
        tracing::debug!("Promote: {} approval {:?} -> {:?}", key, signal, approval);

        match approval {
            ApprovalState::Pending => {
                tracing::info!("Promote: {} pending approval", record.candidate.model);
                return Ok(());
            }
            ApprovalState::Rejected => {
                tracing::info!("Promote: {} rejected", record.candidate.model);
                return Ok(());
            }
            ApprovalState::Approved => {}
        }

        let model = record.candidate.model.clone();
        if self.target.exists(&model.name, model.version).await? {
            tracing::info!("Promote: {} already in the shared registry", model);
            record.verified = true;
            return record.set_outcome(PromotionOutcome::AlreadyExists);
        }

        let tags = record.candidate.lineage_tags(&self.promoted_from);
        let copied = match self
            .target
            .copy_from(&record.candidate.source_ref, &model.name, model.version, &tags)
            .await
        {
            Ok(copied) => copied,
            Err(FleetError::AlreadyExists(_)) => {
                tracing::info!("Promote: {} landed concurrently", model);
                record.verified = true;
                return record.set_outcome(PromotionOutcome::AlreadyExists);
            }
            Err(e) => return Err(e),
        };
        if !copied {
            return Err(FleetError::Backend(format!(
                "shared registry declined the copy of {}",
                model
            )));
        }

        if !self.target.exists(&model.name, model.version).await? {
            return Err(FleetError::Backend(format!(
                "{} not found in the shared registry after copy",
                model
            )));
        }
        record.verified = true;
        record.set_outcome(PromotionOutcome::Promoted)?;
        tracing::info!("Promote: {} promoted", model);
        Ok(())
    }

    /// Run every candidate through the gate.
    ///
    /// Records from `prior` are resumed: terminal ones are carried over
    /// as-is, others are retried. Candidates are de-duplicated by model
    /// name and version. One candidate's failure never blocks another.
    pub async fn promote_all(
        &self,
        candidates: &[ModelCandidate],
        prior: Option<&PromotionReport>,
    ) -> PromotionReport {
        let mut records: Vec<PromotionRecord> = Vec::new();
        if let Some(prior) = prior {
            for record in &prior.records {
                if !records.iter().any(|r| r.candidate.model == record.candidate.model) {
                    records.push(record.clone());
                }
            }
        }
        for candidate in candidates {
            if !records.iter().any(|r| r.candidate.model == candidate.model) {
                records.push(PromotionRecord::new(candidate.clone()));
            }
        }

        for record in records.iter_mut() {
            self.promote(record).await;
        }

        let failures = records
            .iter()
            .filter(|r| r.status() == PromotionStatus::Failed)
            .map(|r| {
                UnitFailure::new(
                    &r.candidate.unit,
                    STAGE,
                    FailureKind::Backend,
                    r.error.clone().unwrap_or_else(|| "promotion failed".to_string()),
                )
            })
            .collect();

        let report = PromotionReport {
            generated_at: Utc::now(),
            policy: self.policy,
            records,
            failures,
        };
        tracing::info!(
            "Promote: {} promoted, {} already present, {} pending, {} rejected, {} failed",
            report.count(PromotionStatus::Promoted),
            report.count(PromotionStatus::AlreadyExists),
            report.count(PromotionStatus::PendingApproval),
            report.count(PromotionStatus::Rejected),
            report.count(PromotionStatus::Failed)
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::fingerprint::Fingerprint;
    use fleet_core::promotion::ApprovalSignal;
    use fleet_core::resource::tag;
    use fleet_core::unit::UnitId;
    use fleet_store::{InMemoryModelRegistry, StaticApprovalSource};

    fn candidate(circuit: &str, version: u64) -> ModelCandidate {
        let name = format!("p1-{}", circuit.to_lowercase());
        ModelCandidate {
            model: ResourceRef::new(&name, version),
            unit: UnitId::new("P1", circuit),
            cutoff_date: "2024-06-01".to_string(),
            training_fingerprint: Fingerprint::parse("trainfp00001").unwrap(),
            source_ref: format!("fleet://{}/versions/{}", name, version),
            training_job: format!("P1_{}_job", circuit),
        }
    }

    fn setup(
        policy: ApprovalPolicy,
    ) -> (Arc<StaticApprovalSource>, Arc<InMemoryModelRegistry>, PromotionGate) {
        let approvals = Arc::new(StaticApprovalSource::new());
        let target = Arc::new(InMemoryModelRegistry::new());
        let gate = PromotionGate::new(approvals.clone(), target.clone(), policy, "dev");
        (approvals, target, gate)
    }

    #[tokio::test]
    async fn test_absent_signal_follows_policy() {
        let (_approvals, target, gate) = setup(ApprovalPolicy::DefaultPending);
        let report = gate.promote_all(&[candidate("C1", 1)], None).await;
        assert_eq!(report.records[0].status(), PromotionStatus::PendingApproval);
        assert_eq!(target.copy_count(), 0);

        let (_approvals, target, gate) = setup(ApprovalPolicy::DefaultApprove);
        let report = gate.promote_all(&[candidate("C1", 1)], None).await;
        assert_eq!(report.records[0].status(), PromotionStatus::Promoted);
        assert!(report.records[0].verified);
        assert_eq!(target.copy_count(), 1);
    }

    #[tokio::test]
    async fn test_promoted_copy_carries_lineage() {
        let (approvals, target, gate) = setup(ApprovalPolicy::DefaultPending);
        approvals.set("P1:p1-c1:1", ApprovalSignal::Approved);
        gate.promote_all(&[candidate("C1", 1)], None).await;

        let tags = target.tags("p1-c1", 1).unwrap();
        assert_eq!(tags[tag::PLANT_ID], "P1");
        assert_eq!(tags[tag::CIRCUIT_ID], "C1");
        assert_eq!(tags[tag::CUTOFF_DATE], "2024-06-01");
        assert_eq!(tags[tag::TRAINING_FINGERPRINT], "trainfp00001");
        assert_eq!(tags[tag::PROMOTED_FROM], "dev");
        assert_eq!(
            target.source_ref("p1-c1", 1).as_deref(),
            Some("fleet://p1-c1/versions/1")
        );
    }

    #[tokio::test]
    async fn test_second_promotion_is_already_exists() {
        let (approvals, target, gate) = setup(ApprovalPolicy::DefaultPending);
        approvals.set("P1:p1-c1:1", ApprovalSignal::Approved);

        let first = gate.promote_all(&[candidate("C1", 1)], None).await;
        let second = gate.promote_all(&[candidate("C1", 1)], None).await;

        assert_eq!(first.records[0].status(), PromotionStatus::Promoted);
        assert_eq!(second.records[0].status(), PromotionStatus::AlreadyExists);
        assert!(!second.has_failures());
        assert_eq!(target.copy_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (approvals, target, gate) = setup(ApprovalPolicy::DefaultApprove);
        approvals.set("P1:p1-c2:1", ApprovalSignal::Rejected);
        target.decline("p1-c3");

        let report = gate
            .promote_all(&[candidate("C1", 1), candidate("C2", 1), candidate("C3", 1)], None)
            .await;

        let statuses: Vec<PromotionStatus> = report.records.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                PromotionStatus::Promoted,
                PromotionStatus::Rejected,
                PromotionStatus::Failed
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit, UnitId::new("P1", "C3"));
    }

    #[tokio::test]
    async fn test_unverified_copy_fails() {
        let (_approvals, target, gate) = setup(ApprovalPolicy::DefaultApprove);
        target.set_drop_copies(true);
        let report = gate.promote_all(&[candidate("C1", 1)], None).await;
        let record = &report.records[0];
        assert_eq!(record.status(), PromotionStatus::Failed);
        assert!(!record.verified);
        assert!(record.error.as_deref().unwrap_or("").contains("after copy"));
    }

    #[tokio::test]
    async fn test_approval_source_error_fails_record() {
        let (approvals, target, gate) = setup(ApprovalPolicy::DefaultApprove);
        approvals.set_fail(true);
        let report = gate.promote_all(&[candidate("C1", 1)], None).await;
        assert_eq!(report.records[0].status(), PromotionStatus::Failed);
        assert_eq!(target.copy_count(), 0);

        // A later pass retries the failed record.
        approvals.set_fail(false);
        let retry = gate.promote_all(&[], Some(&report)).await;
        assert_eq!(retry.records[0].status(), PromotionStatus::Promoted);
    }

    #[tokio::test]
    async fn test_resume_carries_terminal_records() {
        let (approvals, target, gate) = setup(ApprovalPolicy::DefaultPending);
        approvals.set("P1:p1-c1:1", ApprovalSignal::Rejected);
        let first = gate
            .promote_all(&[candidate("C1", 1), candidate("C2", 1)], None)
            .await;
        assert_eq!(first.count(PromotionStatus::Rejected), 1);
        assert_eq!(first.count(PromotionStatus::PendingApproval), 1);

        // A later approval of the rejected model is ignored; the pending one proceeds.
        approvals.set("P1:p1-c1:1", ApprovalSignal::Approved);
        approvals.set("P1:p1-c2:1", ApprovalSignal::Approved);
        let second = gate
            .promote_all(&[candidate("C1", 1), candidate("C2", 1)], Some(&first))
            .await;

        assert_eq!(
            second.record(&ResourceRef::new("p1-c1", 1)).map(|r| r.status()),
            Some(PromotionStatus::Rejected)
        );
        assert_eq!(
            second.record(&ResourceRef::new("p1-c2", 1)).map(|r| r.status()),
            Some(PromotionStatus::Promoted)
        );
        assert_eq!(target.copy_count(), 1);
    }
}

//! Matching orchestration: glue between the pure scoring engine and the
//! database. Loads the pools, runs the planner, persists proposals, and
//! exposes the candidate/batch operations the handlers call.

use crate::models::{MatchStatus, MatchTarget, Receipt, Transaction, TransactionGroup, VendorAlias};
use crate::services::database::{Database, VendorHints};
use crate::services::engine::{
    self, AliasIndex, CandidateFacts, RankedCandidate, ReceiptFacts, ScoreBreakdown, ScoringConfig,
};
use crate::services::metrics::{
    record_error, record_match_operation, record_proposal, AUTO_MATCH_DURATION,
};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of one auto-match run.
#[derive(Debug, Default)]
pub struct AutoMatchReport {
    pub processed: usize,
    pub proposed: usize,
    pub transaction_match_count: usize,
    pub group_match_count: usize,
    pub ambiguous_receipts: Vec<Uuid>,
    pub errors: Vec<(Uuid, String)>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

/// Outcome of a batch approval: every proposal either confirmed or skipped
/// with the reason it could not be.
#[derive(Debug, Default)]
pub struct BatchApproveReport {
    pub approved: Vec<Uuid>,
    pub skipped: Vec<(Uuid, String)>,
}

fn receipt_facts(receipt: &Receipt) -> ReceiptFacts {
    ReceiptFacts {
        receipt_id: receipt.receipt_id,
        vendor: receipt.vendor_name.clone(),
        date: receipt.receipt_date,
        amount: receipt.amount,
    }
}

/// Transactions score against the raw feed text; the vendor normalizer is
/// built for processor prefixes and store numbers as banks emit them.
fn transaction_facts(t: &Transaction) -> CandidateFacts {
    CandidateFacts {
        target: MatchTarget::Transaction(t.transaction_id),
        date: t.transaction_date,
        amount: t.amount,
        text: t.original_description.clone(),
    }
}

fn group_facts(g: &TransactionGroup) -> CandidateFacts {
    CandidateFacts {
        target: MatchTarget::Group(g.group_id),
        date: g.display_date,
        amount: g.combined_amount,
        text: g.name.clone(),
    }
}

fn alias_index(aliases: &[VendorAlias]) -> AliasIndex {
    AliasIndex::new(
        aliases
            .iter()
            .map(|a| (a.normalized_name.clone(), a.display_name.clone())),
    )
}

async fn load_candidates(
    db: &Database,
    user_id: Uuid,
) -> Result<Vec<CandidateFacts>, AppError> {
    let (transactions, groups) = db.candidate_pool(user_id).await?;
    let mut candidates: Vec<CandidateFacts> =
        transactions.iter().map(transaction_facts).collect();
    candidates.extend(groups.iter().map(group_facts));
    Ok(candidates)
}

/// Run auto-matching for a user, optionally scoped to specific receipts.
/// Proposals are persisted one receipt at a time; a cancellation between
/// receipts leaves the already-written proposals in place.
#[instrument(skip(db, scoring, cancel), fields(user_id = %user_id))]
pub async fn run_auto_match(
    db: &Database,
    scoring: &ScoringConfig,
    user_id: Uuid,
    scope: Option<&[Uuid]>,
    cancel: &CancellationToken,
) -> Result<AutoMatchReport, AppError> {
    let started = Instant::now();

    let receipts: Vec<ReceiptFacts> = db
        .receipts_for_matching(user_id, scope)
        .await?
        .iter()
        .map(receipt_facts)
        .collect();
    let candidates = load_candidates(db, user_id).await?;
    let aliases = alias_index(&db.vendor_aliases(user_id).await?);

    // Claimed targets are withheld from everyone, except that a receipt's
    // own outstanding proposal stays visible to that receipt so a rerun
    // reproduces it instead of sliding to the runner-up.
    let mut claimed: HashSet<MatchTarget> = HashSet::new();
    let mut own_claims: HashMap<Uuid, MatchTarget> = HashMap::new();
    for m in db.claimed_targets(user_id).await? {
        match m.target() {
            Ok(target) => {
                claimed.insert(target);
                if m.match_status() == MatchStatus::Proposed {
                    own_claims.insert(m.receipt_id, target);
                }
            }
            Err(e) => {
                // Malformed row; exclude it from claiming rather than abort.
                warn!(match_id = %m.match_id, error = %e, "Skipping malformed match row");
                record_error("malformed_match_row");
            }
        }
    }

    let plan = engine::plan_auto_match(
        &receipts,
        &candidates,
        &claimed,
        &own_claims,
        &aliases,
        scoring,
        cancel,
    );

    let mut report = AutoMatchReport {
        processed: plan.processed,
        ambiguous_receipts: plan.ambiguous_receipts,
        errors: plan.errors,
        cancelled: plan.cancelled,
        ..Default::default()
    };

    for proposal in &plan.proposals {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match db
            .upsert_proposal(user_id, proposal.receipt_id, proposal.target, &proposal.scores)
            .await
        {
            Ok(_) => {
                report.proposed += 1;
                match proposal.target {
                    MatchTarget::Transaction(_) => report.transaction_match_count += 1,
                    MatchTarget::Group(_) => report.group_match_count += 1,
                }
                record_proposal(proposal.target.candidate_type().as_str());
            }
            Err(e) => {
                warn!(receipt_id = %proposal.receipt_id, error = %e, "Failed to persist proposal");
                record_error("proposal_persist");
                report.errors.push((proposal.receipt_id, e.to_string()));
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    let outcome = if report.cancelled { "cancelled" } else { "completed" };
    AUTO_MATCH_DURATION
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());

    info!(
        processed = report.processed,
        proposed = report.proposed,
        ambiguous = report.ambiguous_receipts.len(),
        errors = report.errors.len(),
        cancelled = report.cancelled,
        duration_ms = report.duration_ms,
        "Auto-match run finished"
    );

    Ok(report)
}

/// Rank the full candidate pool against one receipt. Used by the review UI
/// to show alternatives with per-component scores.
#[instrument(skip(db, scoring), fields(user_id = %user_id, receipt_id = %receipt_id))]
pub async fn ranked_candidates(
    db: &Database,
    scoring: &ScoringConfig,
    user_id: Uuid,
    receipt_id: Uuid,
    limit: usize,
) -> Result<(Receipt, Vec<RankedCandidate>), AppError> {
    let receipt = db
        .get_receipt(user_id, receipt_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

    let candidates = load_candidates(db, user_id).await?;
    let aliases = alias_index(&db.vendor_aliases(user_id).await?);

    let facts = receipt_facts(&receipt);
    let pool: Vec<&CandidateFacts> = candidates.iter().collect();
    let mut ranking = engine::rank_candidates(&facts, &pool, &aliases, scoring);
    for failure in &ranking.failed_pairs {
        warn!(receipt_id = %receipt_id, failure = %failure, "Candidate excluded from ranking");
    }
    ranking.candidates.truncate(limit);

    Ok((receipt, ranking.candidates))
}

/// Create a reviewer-chosen match. The pair is scored so the stored record
/// carries an honest confidence, but no threshold applies to a human choice.
#[instrument(skip(db, scoring, hints), fields(user_id = %user_id, receipt_id = %receipt_id))]
pub async fn manual_match(
    db: &Database,
    scoring: &ScoringConfig,
    user_id: Uuid,
    receipt_id: Uuid,
    target: MatchTarget,
    confirm: bool,
    hints: &VendorHints,
) -> Result<crate::models::ReceiptMatch, AppError> {
    let receipt = db
        .get_receipt(user_id, receipt_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

    let candidate = match target {
        MatchTarget::Transaction(transaction_id) => db
            .get_transaction(user_id, transaction_id)
            .await?
            .map(|t| transaction_facts(&t))
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?,
        MatchTarget::Group(group_id) => db
            .get_group(user_id, group_id)
            .await?
            .map(|g| group_facts(&g))
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Group not found")))?,
    };

    let aliases = alias_index(&db.vendor_aliases(user_id).await?);
    let facts = receipt_facts(&receipt);
    let scores = match engine::score_pair(&facts, &candidate, &aliases, scoring) {
        Ok(scores) => scores,
        Err(e) => {
            warn!(receipt_id = %receipt_id, error = %e, "Scoring failed for manual match");
            ScoreBreakdown {
                amount_score: 0.0,
                date_score: 0.0,
                vendor_score: 0.0,
                confidence: 0.0,
                reason: "manual selection (scoring unavailable)".to_string(),
            }
        }
    };

    let m = db
        .create_manual_match(user_id, receipt_id, target, &scores, confirm, hints)
        .await?;
    record_match_operation("manual_create", &m.status);
    Ok(m)
}

/// Approve proposals in bulk by confidence floor or explicit id list. Each
/// confirm runs in its own transaction; a Conflict or NotFound on one
/// proposal is recorded and never blocks the rest.
#[instrument(skip(db, match_ids), fields(user_id = %user_id))]
pub async fn batch_approve(
    db: &Database,
    user_id: Uuid,
    min_confidence: Option<f64>,
    match_ids: Option<&[Uuid]>,
) -> Result<BatchApproveReport, AppError> {
    let proposals = db
        .eligible_proposals(user_id, min_confidence, match_ids)
        .await?;

    let mut report = BatchApproveReport::default();
    let hints = VendorHints::default();

    for proposal in proposals {
        match db.confirm_match(user_id, proposal.match_id, &hints).await {
            Ok(_) => {
                record_match_operation("batch_confirm", "confirmed");
                report.approved.push(proposal.match_id);
            }
            Err(AppError::Conflict(e)) => {
                record_match_operation("batch_confirm", "skipped");
                report.skipped.push((proposal.match_id, e.to_string()));
            }
            Err(AppError::NotFound(e)) => {
                record_match_operation("batch_confirm", "skipped");
                report.skipped.push((proposal.match_id, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        approved = report.approved.len(),
        skipped = report.skipped.len(),
        "Batch approval finished"
    );
    Ok(report)
}

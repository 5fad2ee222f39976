//! Scoring and auto-match planning.
//!
//! Everything in this module is a pure, in-memory computation: the caller
//! loads the candidate pool and vendor aliases, and persists whatever plan
//! comes back. That keeps one auto-match invocation a single deterministic
//! pass that can be replayed in tests.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::MatchTarget;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("amount {0} is not representable as a float")]
    AmountNotRepresentable(Decimal),

    #[error("scoring weights must sum to a positive value")]
    DegenerateWeights,

    #[error("amount_max_delta must exceed amount_full_credit")]
    InvertedAmountBand,
}

/// Tunable scoring knobs. Weights are amount-dominant by default; the
/// combined score divides by the weight sum so overrides that do not sum to
/// 1.0 still land in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub amount_weight: f64,
    pub date_weight: f64,
    pub vendor_weight: f64,
    /// Absolute amount difference that still earns full credit.
    pub amount_full_credit: Decimal,
    /// Absolute amount difference at which credit reaches zero.
    pub amount_max_delta: Decimal,
    /// Day distance beyond which the date score is zero.
    pub date_window_days: i64,
    /// Minimum confidence for an auto-proposal.
    pub min_confidence: f64,
    /// Top two candidates closer than this are ambiguous.
    pub ambiguity_epsilon: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            amount_weight: 0.4,
            date_weight: 0.3,
            vendor_weight: 0.3,
            amount_full_credit: Decimal::new(1, 2),
            amount_max_delta: Decimal::new(1000, 2),
            date_window_days: 7,
            min_confidence: 0.75,
            ambiguity_epsilon: 0.05,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let sum = self.amount_weight + self.date_weight + self.vendor_weight;
        if !(sum > 0.0) || sum.is_infinite() {
            return Err(EngineError::DegenerateWeights);
        }
        if self.amount_max_delta <= self.amount_full_credit {
            return Err(EngineError::InvertedAmountBand);
        }
        Ok(())
    }
}

/// The extracted fields of a receipt the scorer cares about. Any of them may
/// be absent when extraction came back partial.
#[derive(Debug, Clone)]
pub struct ReceiptFacts {
    pub receipt_id: Uuid,
    pub vendor: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
}

/// One side of the candidate pool: a single transaction or a group, reduced
/// to the fields scoring needs.
#[derive(Debug, Clone)]
pub struct CandidateFacts {
    pub target: MatchTarget,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub confidence: f64,
    pub reason: String,
}

// ============================================================================
// Vendor Normalization
// ============================================================================

/// Payment-processor prefixes that card feeds prepend to the merchant name.
const PROCESSOR_PREFIXES: &[&str] = &["PAYPAL *", "PAYPAL*", "SQ *", "SQ*", "TST*", "DNH*", "DMI*"];

/// Tokens that carry no vendor identity.
const NOISE_TOKENS: &[&str] = &["STORE", "INC", "LLC", "CORP", "CO", "THE"];

/// Uppercase, strip processor prefixes, and collapse everything that is not
/// alphanumeric to single spaces.
pub fn normalize_vendor(raw: &str) -> String {
    let mut s = raw.trim().to_uppercase();
    for prefix in PROCESSOR_PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start().to_string();
            break;
        }
    }
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn vendor_tokens(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| !NOISE_TOKENS.contains(t))
        .map(|t| {
            // "04521" and "4521" are the same store number
            if t.chars().all(|c| c.is_ascii_digit()) {
                t.trim_start_matches('0')
            } else {
                t
            }
        })
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Learned vendor aliases keyed by normalized name, resolved before fuzzy
/// text comparison.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    canonical: HashMap<String, String>,
}

impl AliasIndex {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let canonical = pairs
            .into_iter()
            .map(|(name, display)| (normalize_vendor(&name), display))
            .collect();
        Self { canonical }
    }

    pub fn resolve(&self, normalized_name: &str) -> Option<&str> {
        self.canonical.get(normalized_name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

// ============================================================================
// Sub-scores
// ============================================================================

/// Amounts compare on magnitude. Card feeds disagree on the sign of a
/// charge, so the one normalization rule lives here: `|receipt|` against
/// `|candidate|`, nothing else.
fn amount_score(
    receipt_amount: Option<Decimal>,
    candidate_amount: Decimal,
    cfg: &ScoringConfig,
) -> Result<f64, EngineError> {
    let Some(receipt_amount) = receipt_amount else {
        return Ok(0.0);
    };
    let diff = (receipt_amount.abs() - candidate_amount.abs()).abs();
    if diff <= cfg.amount_full_credit {
        return Ok(1.0);
    }
    if diff >= cfg.amount_max_delta {
        return Ok(0.0);
    }
    let to_f64 = |d: Decimal| d.to_f64().ok_or(EngineError::AmountNotRepresentable(d));
    let diff = to_f64(diff)?;
    let full = to_f64(cfg.amount_full_credit)?;
    let span = to_f64(cfg.amount_max_delta - cfg.amount_full_credit)?;
    Ok((1.0 - (diff - full) / span).clamp(0.0, 1.0))
}

/// Receipt date and posting date legitimately differ by a few days; credit
/// decays linearly over the window and hits zero past it.
fn date_score(receipt_date: Option<NaiveDate>, candidate_date: NaiveDate, window_days: i64) -> f64 {
    let Some(receipt_date) = receipt_date else {
        return 0.0;
    };
    let days = (receipt_date - candidate_date).num_days().abs();
    if days == 0 {
        1.0
    } else if days > window_days {
        0.0
    } else {
        1.0 - days as f64 / (window_days + 1) as f64
    }
}

fn vendor_score(receipt_vendor: Option<&str>, candidate_text: &str, aliases: &AliasIndex) -> f64 {
    let Some(raw) = receipt_vendor else {
        return 0.0;
    };
    let a = normalize_vendor(raw);
    let b = normalize_vendor(candidate_text);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    // Alias lookup takes precedence over fuzzy comparison.
    let resolved_a = aliases.resolve(&a);
    let resolved_b = aliases.resolve(&b);
    match (resolved_a, resolved_b) {
        (Some(da), Some(db)) if da == db => return 1.0,
        (Some(da), _) if normalize_vendor(da) == b => return 1.0,
        (_, Some(db)) if normalize_vendor(db) == a => return 1.0,
        _ => {}
    }

    let ta = vendor_tokens(&a);
    let tb = vendor_tokens(&b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    if inter == 0.0 {
        return 0.0;
    }
    let union = ta.len() as f64 + tb.len() as f64 - inter;
    let jaccard = inter / union;
    let containment = inter / ta.len().min(tb.len()) as f64;
    ((jaccard + containment) / 2.0).clamp(0.0, 1.0)
}

/// Score one (receipt, candidate) pair. Each sub-score is independently in
/// [0, 1] and the combined confidence is monotonic in every sub-score.
pub fn score_pair(
    receipt: &ReceiptFacts,
    candidate: &CandidateFacts,
    aliases: &AliasIndex,
    cfg: &ScoringConfig,
) -> Result<ScoreBreakdown, EngineError> {
    let weight_sum = cfg.amount_weight + cfg.date_weight + cfg.vendor_weight;
    if !(weight_sum > 0.0) {
        return Err(EngineError::DegenerateWeights);
    }

    let amount = amount_score(receipt.amount, candidate.amount, cfg)?;
    let date = date_score(receipt.date, candidate.date, cfg.date_window_days);
    let vendor = vendor_score(receipt.vendor.as_deref(), &candidate.text, aliases);

    let confidence = (cfg.amount_weight * amount
        + cfg.date_weight * date
        + cfg.vendor_weight * vendor)
        / weight_sum;

    let reason = format!(
        "amount {:.2}, date {:.2}, vendor {:.2} vs {} {}",
        amount,
        date,
        vendor,
        candidate.target.candidate_type().as_str(),
        candidate.target.id(),
    );

    Ok(ScoreBreakdown {
        amount_score: amount,
        date_score: date,
        vendor_score: vendor,
        confidence,
        reason,
    })
}

// ============================================================================
// Ranking
// ============================================================================

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub target: MatchTarget,
    pub scores: ScoreBreakdown,
    pub date_distance: i64,
    pub amount_distance: Decimal,
}

#[derive(Debug, Default)]
pub struct Ranking {
    /// Best first: confidence desc, then smallest date distance, then
    /// smallest amount distance, then candidate id.
    pub candidates: Vec<RankedCandidate>,
    pub failed_pairs: Vec<String>,
}

pub fn rank_candidates(
    receipt: &ReceiptFacts,
    pool: &[&CandidateFacts],
    aliases: &AliasIndex,
    cfg: &ScoringConfig,
) -> Ranking {
    let mut ranking = Ranking::default();

    for candidate in pool {
        match score_pair(receipt, candidate, aliases, cfg) {
            Ok(scores) => {
                let date_distance = receipt
                    .date
                    .map(|d| (d - candidate.date).num_days().abs())
                    .unwrap_or(i64::MAX);
                let amount_distance = receipt
                    .amount
                    .map(|a| (a.abs() - candidate.amount.abs()).abs())
                    .unwrap_or(Decimal::MAX);
                ranking.candidates.push(RankedCandidate {
                    target: candidate.target,
                    scores,
                    date_distance,
                    amount_distance,
                });
            }
            Err(e) => ranking.failed_pairs.push(format!(
                "{} {}: {}",
                candidate.target.candidate_type().as_str(),
                candidate.target.id(),
                e
            )),
        }
    }

    ranking.candidates.sort_by(|a, b| {
        b.scores
            .confidence
            .partial_cmp(&a.scores.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.date_distance.cmp(&b.date_distance))
            .then_with(|| a.amount_distance.cmp(&b.amount_distance))
            .then_with(|| a.target.id().cmp(&b.target.id()))
    });

    ranking
}

// ============================================================================
// Auto-match planning
// ============================================================================

#[derive(Debug, Clone)]
pub struct Proposal {
    pub receipt_id: Uuid,
    pub target: MatchTarget,
    pub scores: ScoreBreakdown,
}

#[derive(Debug, Default)]
pub struct AutoMatchPlan {
    pub proposals: Vec<Proposal>,
    pub ambiguous_receipts: Vec<Uuid>,
    pub errors: Vec<(Uuid, String)>,
    pub processed: usize,
    pub cancelled: bool,
}

/// Plan proposals for a batch of receipts against a shared candidate pool.
///
/// Receipts are processed in (date, id) order so a rerun over an unchanged
/// pool yields the identical plan. Targets in `already_claimed` (existing
/// proposed or confirmed matches) are never proposed again, and each target
/// claimed within the run is withheld from later receipts. `own_claims` maps
/// a receipt to the target its own outstanding proposal holds: that one
/// target stays visible to that one receipt, so a rerun re-selects it
/// instead of walking down the ranking to the runner-up.
pub fn plan_auto_match(
    receipts: &[ReceiptFacts],
    candidates: &[CandidateFacts],
    already_claimed: &HashSet<MatchTarget>,
    own_claims: &HashMap<Uuid, MatchTarget>,
    aliases: &AliasIndex,
    cfg: &ScoringConfig,
    cancel: &CancellationToken,
) -> AutoMatchPlan {
    let mut plan = AutoMatchPlan::default();

    let mut ordered: Vec<&ReceiptFacts> = receipts.iter().collect();
    ordered.sort_by_key(|r| (r.date, r.receipt_id));

    let mut claimed = already_claimed.clone();

    for receipt in ordered {
        if cancel.is_cancelled() {
            plan.cancelled = true;
            break;
        }
        plan.processed += 1;

        let own = own_claims.get(&receipt.receipt_id);
        let pool: Vec<&CandidateFacts> = candidates
            .iter()
            .filter(|c| own == Some(&c.target) || !claimed.contains(&c.target))
            .collect();

        let ranking = rank_candidates(receipt, &pool, aliases, cfg);

        if ranking.candidates.is_empty() {
            if !ranking.failed_pairs.is_empty() {
                plan.errors
                    .push((receipt.receipt_id, ranking.failed_pairs.join("; ")));
            }
            continue;
        }
        for failure in &ranking.failed_pairs {
            tracing::warn!(
                receipt_id = %receipt.receipt_id,
                failure = %failure,
                "Candidate pair excluded from ranking"
            );
        }

        let top = &ranking.candidates[0];
        if top.scores.confidence < cfg.min_confidence {
            continue;
        }
        if let Some(second) = ranking.candidates.get(1) {
            if top.scores.confidence - second.scores.confidence < cfg.ambiguity_epsilon {
                plan.ambiguous_receipts.push(receipt.receipt_id);
                continue;
            }
        }

        // Re-selecting a different target releases the one the receipt's
        // old proposal held; the upsert frees it in storage too.
        if let Some(prev) = own {
            if *prev != top.target {
                claimed.remove(prev);
            }
        }
        claimed.insert(top.target);
        plan.proposals.push(Proposal {
            receipt_id: receipt.receipt_id,
            target: top.target,
            scores: top.scores.clone(),
        });
    }

    plan
}

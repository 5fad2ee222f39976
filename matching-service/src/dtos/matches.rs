use crate::models::{Receipt, ReceiptMatch, Transaction, TransactionGroup, VendorAlias};
use crate::services::database::MatchingStats;
use crate::services::engine::RankedCandidate;
use crate::services::matching::{AutoMatchReport, BatchApproveReport};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub receipt_id: Uuid,
    pub vendor_name: Option<String>,
    pub receipt_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub blob_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub matched_match_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Receipt> for ReceiptResponse {
    fn from(r: Receipt) -> Self {
        Self {
            receipt_id: r.receipt_id,
            vendor_name: r.vendor_name,
            receipt_date: r.receipt_date,
            amount: r.amount,
            currency: r.currency,
            blob_key: r.blob_key,
            thumbnail_key: r.thumbnail_key,
            matched_match_id: r.matched_match_id,
            created_at: r.created_utc.to_rfc3339(),
            updated_at: r.updated_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub transaction_date: NaiveDate,
    pub posted_date: Option<NaiveDate>,
    pub description: String,
    pub original_description: String,
    pub amount: Decimal,
    pub matched_match_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub created_at: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            transaction_date: t.transaction_date,
            posted_date: t.posted_date,
            description: t.description,
            original_description: t.original_description,
            amount: t.amount,
            matched_match_id: t.matched_match_id,
            group_id: t.group_id,
            created_at: t.created_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub group_id: Uuid,
    pub name: String,
    pub combined_amount: Decimal,
    pub display_date: NaiveDate,
    pub member_count: i32,
    pub matched_match_id: Option<Uuid>,
    pub created_at: String,
}

impl From<TransactionGroup> for GroupResponse {
    fn from(g: TransactionGroup) -> Self {
        Self {
            group_id: g.group_id,
            name: g.name,
            combined_amount: g.combined_amount,
            display_date: g.display_date,
            member_count: g.member_count,
            matched_match_id: g.matched_match_id,
            created_at: g.created_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub match_id: Uuid,
    pub receipt_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub confidence: f64,
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub match_reason: String,
    pub status: String,
    pub is_manual: bool,
    pub vendor_alias_id: Option<Uuid>,
    pub row_version: i32,
    pub created_at: String,
    pub confirmed_at: Option<String>,
}

impl From<ReceiptMatch> for MatchResponse {
    fn from(m: ReceiptMatch) -> Self {
        Self {
            match_id: m.match_id,
            receipt_id: m.receipt_id,
            transaction_id: m.transaction_id,
            group_id: m.group_id,
            confidence: m.confidence,
            amount_score: m.amount_score,
            date_score: m.date_score,
            vendor_score: m.vendor_score,
            match_reason: m.match_reason,
            status: m.status,
            is_manual: m.is_manual,
            vendor_alias_id: m.vendor_alias_id,
            row_version: m.row_version,
            created_at: m.created_utc.to_rfc3339(),
            confirmed_at: m.confirmed_utc.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VendorAliasResponse {
    pub alias_id: Uuid,
    pub normalized_name: String,
    pub display_name: String,
    pub default_gl_code: Option<String>,
    pub default_department: Option<String>,
    pub match_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<VendorAlias> for VendorAliasResponse {
    fn from(a: VendorAlias) -> Self {
        Self {
            alias_id: a.alias_id,
            normalized_name: a.normalized_name,
            display_name: a.display_name,
            default_gl_code: a.default_gl_code,
            default_department: a.default_department,
            match_count: a.match_count,
            created_at: a.created_utc.to_rfc3339(),
            updated_at: a.updated_utc.to_rfc3339(),
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListParams {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size.unwrap_or(20).clamp(1, 100)
    }
}

pub fn total_pages(total: i64, page_size: i64) -> i64 {
    (total as f64 / page_size as f64).ceil() as i64
}

#[derive(Debug, Serialize)]
pub struct ReceiptListResponse {
    pub receipts: Vec<ReceiptResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct MatchListResponse {
    pub matches: Vec<MatchResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct VendorAliasListResponse {
    pub aliases: Vec<VendorAliasResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

// ============================================================================
// Auto-match
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AutoMatchRequest {
    /// Restrict the run to these receipts; omitted means all unmatched.
    pub receipt_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct AutoMatchError {
    pub receipt_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AutoMatchResponse {
    pub processed: usize,
    pub proposed: usize,
    pub transaction_matches: usize,
    pub group_matches: usize,
    pub ambiguous_receipt_ids: Vec<Uuid>,
    pub errors: Vec<AutoMatchError>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl From<AutoMatchReport> for AutoMatchResponse {
    fn from(r: AutoMatchReport) -> Self {
        Self {
            processed: r.processed,
            proposed: r.proposed,
            transaction_matches: r.transaction_match_count,
            group_matches: r.group_match_count,
            ambiguous_receipt_ids: r.ambiguous_receipts,
            errors: r
                .errors
                .into_iter()
                .map(|(receipt_id, message)| AutoMatchError {
                    receipt_id,
                    message,
                })
                .collect(),
            duration_ms: r.duration_ms,
            cancelled: r.cancelled,
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CandidatesParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CandidateResponse {
    pub candidate_type: String,
    pub candidate_id: Uuid,
    pub confidence: f64,
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub reason: String,
}

impl From<RankedCandidate> for CandidateResponse {
    fn from(c: RankedCandidate) -> Self {
        Self {
            candidate_type: c.target.candidate_type().as_str().to_string(),
            candidate_id: c.target.id(),
            confidence: c.scores.confidence,
            amount_score: c.scores.amount_score,
            date_score: c.scores.date_score,
            vendor_score: c.scores.vendor_score,
            reason: c.scores.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CandidateListResponse {
    pub receipt: ReceiptResponse,
    pub candidates: Vec<CandidateResponse>,
}

// ============================================================================
// Review actions
// ============================================================================

/// Optional body for confirm: vendor hints that teach an alias.
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRequest {
    pub vendor_display_name: Option<String>,
    pub default_gl_code: Option<String>,
    pub default_department: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualMatchRequest {
    pub receipt_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    /// Defaults to true: a reviewer picking a match usually means it.
    pub confirm: Option<bool>,
    #[validate(length(max = 200))]
    pub vendor_display_name: Option<String>,
    #[validate(length(max = 50))]
    pub default_gl_code: Option<String>,
    #[validate(length(max = 100))]
    pub default_department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchApproveRequest {
    pub min_confidence: Option<f64>,
    pub match_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct SkippedMatch {
    pub match_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BatchApproveResponse {
    pub approved: Vec<Uuid>,
    pub skipped: Vec<SkippedMatch>,
}

impl From<BatchApproveReport> for BatchApproveResponse {
    fn from(r: BatchApproveReport) -> Self {
        Self {
            approved: r.approved,
            skipped: r
                .skipped
                .into_iter()
                .map(|(match_id, reason)| SkippedMatch { match_id, reason })
                .collect(),
        }
    }
}

// ============================================================================
// Groups
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 2))]
    pub transaction_ids: Vec<Uuid>,
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub matched_count: i64,
    pub proposed_count: i64,
    pub unmatched_receipts_count: i64,
    pub unmatched_transactions_count: i64,
    pub unmatched_groups_count: i64,
    pub auto_match_rate: f64,
    pub average_confidence: Option<f64>,
}

impl From<MatchingStats> for StatsResponse {
    fn from(s: MatchingStats) -> Self {
        Self {
            matched_count: s.matched_count,
            proposed_count: s.proposed_count,
            unmatched_receipts_count: s.unmatched_receipts_count,
            unmatched_transactions_count: s.unmatched_transactions_count,
            unmatched_groups_count: s.unmatched_groups_count,
            auto_match_rate: s.auto_match_rate,
            average_confidence: s.average_confidence,
        }
    }
}

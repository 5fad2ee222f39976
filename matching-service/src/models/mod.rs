//! Domain models for matching-service.

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Receipt Models
// ============================================================================

/// An uploaded proof-of-purchase with extracted vendor/date/amount.
///
/// A receipt is "matched" when `matched_match_id` points at a confirmed
/// match record; unmatch clears it back to NULL.
#[derive(Debug, Clone, FromRow)]
pub struct Receipt {
    pub receipt_id: Uuid,
    pub user_id: Uuid,
    pub vendor_name: Option<String>,
    pub receipt_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub blob_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub matched_match_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

// ============================================================================
// Transaction Models
// ============================================================================

/// A single imported statement line item.
///
/// A transaction with a non-NULL `group_id` can only be matched through its
/// group, never individually.
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub transaction_date: NaiveDate,
    pub posted_date: Option<NaiveDate>,
    pub description: String,
    pub original_description: String,
    pub amount: Decimal,
    pub matched_match_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// A user-defined bundle of >=2 transactions matched as one unit
/// (e.g. a split charge).
#[derive(Debug, Clone, FromRow)]
pub struct TransactionGroup {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub combined_amount: Decimal,
    pub display_date: NaiveDate,
    pub member_count: i32,
    pub matched_match_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Match Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Proposed,
    Confirmed,
    Rejected,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Unmatched => "unmatched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "proposed" => Self::Proposed,
            "confirmed" => Self::Confirmed,
            "rejected" => Self::Rejected,
            "unmatched" => Self::Unmatched,
            // Unknown values must never look actionable; no transition
            // accepts Unmatched as its starting state.
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Transaction,
    Group,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Group => "group",
        }
    }
}

/// The side of a match opposite the receipt: exactly one transaction or
/// exactly one group. The storage layer backs this with two nullable columns
/// plus an XOR check constraint; in Rust it is a proper tagged union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTarget {
    Transaction(Uuid),
    Group(Uuid),
}

impl MatchTarget {
    pub fn from_columns(
        transaction_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        match (transaction_id, group_id) {
            (Some(t), None) => Ok(Self::Transaction(t)),
            (None, Some(g)) => Ok(Self::Group(g)),
            (None, None) => Err(AppError::BadRequest(anyhow!(
                "Match target missing: neither transaction_id nor group_id set"
            ))),
            (Some(_), Some(_)) => Err(AppError::BadRequest(anyhow!(
                "Match target ambiguous: both transaction_id and group_id set"
            ))),
        }
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        match self {
            Self::Transaction(id) => Some(*id),
            Self::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::Transaction(_) => None,
            Self::Group(id) => Some(*id),
        }
    }

    pub fn candidate_type(&self) -> CandidateType {
        match self {
            Self::Transaction(_) => CandidateType::Transaction,
            Self::Group(_) => CandidateType::Group,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Transaction(id) | Self::Group(id) => *id,
        }
    }
}

/// A proposed or confirmed association between a receipt and a transaction
/// or group. Rejected and unmatched records are retained for audit.
#[derive(Debug, Clone, FromRow)]
pub struct ReceiptMatch {
    pub match_id: Uuid,
    pub user_id: Uuid,
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
    pub created_utc: DateTime<Utc>,
    pub confirmed_utc: Option<DateTime<Utc>>,
}

impl ReceiptMatch {
    pub fn target(&self) -> Result<MatchTarget, AppError> {
        MatchTarget::from_columns(self.transaction_id, self.group_id)
    }

    pub fn match_status(&self) -> MatchStatus {
        MatchStatus::from_str(&self.status)
    }
}

// ============================================================================
// Vendor Alias Models
// ============================================================================

/// A learned canonical vendor mapping: normalized statement/receipt text to
/// a display name plus default categorization.
#[derive(Debug, Clone, FromRow)]
pub struct VendorAlias {
    pub alias_id: Uuid,
    pub user_id: Uuid,
    pub normalized_name: String,
    pub display_name: String,
    pub default_gl_code: Option<String>,
    pub default_department: Option<String>,
    pub match_count: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_target_requires_exactly_one_side() {
        let t = Uuid::new_v4();
        let g = Uuid::new_v4();

        assert_eq!(
            MatchTarget::from_columns(Some(t), None).unwrap(),
            MatchTarget::Transaction(t)
        );
        assert_eq!(
            MatchTarget::from_columns(None, Some(g)).unwrap(),
            MatchTarget::Group(g)
        );
        assert!(MatchTarget::from_columns(None, None).is_err());
        assert!(MatchTarget::from_columns(Some(t), Some(g)).is_err());
    }

    #[test]
    fn match_status_round_trips() {
        for status in [
            MatchStatus::Proposed,
            MatchStatus::Confirmed,
            MatchStatus::Rejected,
            MatchStatus::Unmatched,
        ] {
            assert_eq!(MatchStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_string_is_inert() {
        for s in ["", "pending", "CONFIRMED", "deleted"] {
            assert_eq!(MatchStatus::from_str(s), MatchStatus::Unmatched);
        }
    }
}

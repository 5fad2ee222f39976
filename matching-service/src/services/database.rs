//! Database service for matching-service.
//!
//! All match state transitions run inside a transaction and re-check the
//! exclusivity invariant at commit time. `row_version` guards against
//! concurrent reviewers: a guarded update that hits zero rows surfaces as a
//! Conflict, never as a silent overwrite.

#![allow(clippy::too_many_arguments)]

use crate::models::{
    MatchStatus, MatchTarget, Receipt, ReceiptMatch, Transaction, TransactionGroup, VendorAlias,
};
use crate::services::engine::{self, ScoreBreakdown};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const MATCH_COLUMNS: &str = "match_id, user_id, receipt_id, transaction_id, group_id, confidence, \
     amount_score, date_score, vendor_score, match_reason, status, is_manual, vendor_alias_id, \
     row_version, created_utc, confirmed_utc";

const RECEIPT_COLUMNS: &str = "receipt_id, user_id, vendor_name, receipt_date, amount, currency, \
     blob_key, thumbnail_key, matched_match_id, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, transaction_date, posted_date, \
     description, original_description, amount, matched_match_id, group_id, created_utc";

const GROUP_COLUMNS: &str = "group_id, user_id, name, combined_amount, display_date, \
     member_count, matched_match_id, created_utc";

const ALIAS_COLUMNS: &str = "alias_id, user_id, normalized_name, display_name, default_gl_code, \
     default_department, match_count, created_utc, updated_utc";

/// Caller-supplied vendor hints applied when a match is confirmed.
#[derive(Debug, Clone, Default)]
pub struct VendorHints {
    pub display_name: Option<String>,
    pub gl_code: Option<String>,
    pub department: Option<String>,
}

/// Aggregate matching statistics for one user.
#[derive(Debug, Clone)]
pub struct MatchingStats {
    pub matched_count: i64,
    pub proposed_count: i64,
    pub unmatched_receipts_count: i64,
    pub unmatched_transactions_count: i64,
    pub unmatched_groups_count: i64,
    pub auto_match_rate: f64,
    pub average_confidence: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    matched_count: i64,
    proposed_count: i64,
    unmatched_receipts_count: i64,
    unmatched_transactions_count: i64,
    unmatched_groups_count: i64,
    total_receipts: i64,
    reached_receipts: i64,
    average_confidence: Option<f64>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "matching-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Receipt Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id, receipt_id = %receipt_id))]
    pub async fn get_receipt(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<Option<Receipt>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_receipt"])
            .start_timer();

        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE user_id = $1 AND receipt_id = $2"
        ))
        .bind(user_id)
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get receipt: {}", e)))?;

        timer.observe_duration();
        Ok(receipt)
    }

    /// Paginated unmatched receipts, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_unmatched_receipts(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Receipt>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unmatched_receipts"])
            .start_timer();

        let limit = page_size.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM receipts WHERE user_id = $1 AND matched_match_id IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count receipts: {}", e)))?;

        let receipts = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE user_id = $1 AND matched_match_id IS NULL \
             ORDER BY receipt_date DESC NULLS LAST, receipt_id \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list receipts: {}", e)))?;

        timer.observe_duration();
        Ok((receipts, total))
    }

    /// Unmatched receipts eligible for an auto-match run, optionally scoped
    /// to explicit receipt ids.
    #[instrument(skip(self, scope), fields(user_id = %user_id))]
    pub async fn receipts_for_matching(
        &self,
        user_id: Uuid,
        scope: Option<&[Uuid]>,
    ) -> Result<Vec<Receipt>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["receipts_for_matching"])
            .start_timer();

        let receipts = if let Some(ids) = scope {
            sqlx::query_as::<_, Receipt>(&format!(
                "SELECT {RECEIPT_COLUMNS} FROM receipts \
                 WHERE user_id = $1 AND matched_match_id IS NULL AND receipt_id = ANY($2) \
                 ORDER BY receipt_date NULLS FIRST, receipt_id"
            ))
            .bind(user_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Receipt>(&format!(
                "SELECT {RECEIPT_COLUMNS} FROM receipts \
                 WHERE user_id = $1 AND matched_match_id IS NULL \
                 ORDER BY receipt_date NULLS FIRST, receipt_id"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load receipts: {}", e))
        })?;

        timer.observe_duration();
        Ok(receipts)
    }

    /// Detach every match reference to a receipt, then delete it. FK cascades
    /// are never relied on: confirmed matches release their target linkage
    /// first so transactions and groups return to the unmatched pool.
    #[instrument(skip(self), fields(user_id = %user_id, receipt_id = %receipt_id))]
    pub async fn delete_receipt(&self, user_id: Uuid, receipt_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_receipt"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE user_id = $1 AND receipt_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(receipt_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock receipt: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

        // Phase one: detach. Release targets held by this receipt's matches.
        sqlx::query(
            "UPDATE transactions SET matched_match_id = NULL \
             WHERE matched_match_id IN \
               (SELECT match_id FROM receipt_matches WHERE receipt_id = $1)",
        )
        .bind(receipt.receipt_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to detach transactions: {}", e))
        })?;

        sqlx::query(
            "UPDATE transaction_groups SET matched_match_id = NULL \
             WHERE matched_match_id IN \
               (SELECT match_id FROM receipt_matches WHERE receipt_id = $1)",
        )
        .bind(receipt.receipt_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to detach groups: {}", e))
        })?;

        sqlx::query("DELETE FROM receipt_matches WHERE receipt_id = $1")
            .bind(receipt.receipt_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete matches: {}", e))
            })?;

        // Phase two: delete.
        sqlx::query("DELETE FROM receipts WHERE receipt_id = $1")
            .bind(receipt.receipt_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete receipt: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(receipt_id = %receipt_id, "Receipt deleted");
        Ok(())
    }

    // =========================================================================
    // Transaction / Group Pool Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    pub async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = $1 AND transaction_id = $2"
        ))
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(transaction)
    }

    /// Paginated unmatched, ungrouped transactions, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_unmatched_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Transaction>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unmatched_transactions"])
            .start_timer();

        let limit = page_size.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions \
             WHERE user_id = $1 AND matched_match_id IS NULL AND group_id IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count transactions: {}", e))
        })?;

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = $1 AND matched_match_id IS NULL AND group_id IS NULL \
             ORDER BY transaction_date DESC, transaction_id \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        timer.observe_duration();
        Ok((transactions, total))
    }

    /// The full candidate pool for scoring: unmatched ungrouped transactions
    /// plus unmatched groups.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn candidate_pool(
        &self,
        user_id: Uuid,
    ) -> Result<(Vec<Transaction>, Vec<TransactionGroup>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["candidate_pool"])
            .start_timer();

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = $1 AND matched_match_id IS NULL AND group_id IS NULL \
             ORDER BY transaction_date, transaction_id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load transactions: {}", e))
        })?;

        let groups = sqlx::query_as::<_, TransactionGroup>(&format!(
            "SELECT {GROUP_COLUMNS} FROM transaction_groups \
             WHERE user_id = $1 AND matched_match_id IS NULL \
             ORDER BY display_date, group_id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load groups: {}", e)))?;

        timer.observe_duration();
        Ok((transactions, groups))
    }

    #[instrument(skip(self), fields(user_id = %user_id, group_id = %group_id))]
    pub async fn get_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Option<TransactionGroup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_group"])
            .start_timer();

        let group = sqlx::query_as::<_, TransactionGroup>(&format!(
            "SELECT {GROUP_COLUMNS} FROM transaction_groups \
             WHERE user_id = $1 AND group_id = $2"
        ))
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get group: {}", e)))?;

        timer.observe_duration();
        Ok(group)
    }

    /// Create a group from >=2 unmatched, ungrouped transactions. Combined
    /// amount is the member sum; display date is the latest member date.
    #[instrument(skip(self, member_ids), fields(user_id = %user_id, members = member_ids.len()))]
    pub async fn create_group(
        &self,
        user_id: Uuid,
        name: &str,
        member_ids: &[Uuid],
    ) -> Result<TransactionGroup, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_group"])
            .start_timer();

        if member_ids.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A transaction group needs at least 2 member transactions"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let members = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = $1 AND transaction_id = ANY($2) FOR UPDATE"
        ))
        .bind(user_id)
        .bind(member_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock member transactions: {}", e))
        })?;

        if members.len() != member_ids.len() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "One or more member transactions not found"
            )));
        }
        if members.iter().any(|m| m.matched_match_id.is_some()) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A member transaction is already matched"
            )));
        }
        if members.iter().any(|m| m.group_id.is_some()) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A member transaction already belongs to a group"
            )));
        }

        let combined_amount: Decimal = members.iter().map(|m| m.amount).sum();
        let display_date = members
            .iter()
            .map(|m| m.transaction_date)
            .max()
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Group members must not be empty"))
            })?;

        let group_id = Uuid::new_v4();
        let group = sqlx::query_as::<_, TransactionGroup>(&format!(
            "INSERT INTO transaction_groups \
               (group_id, user_id, name, combined_amount, display_date, member_count) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {GROUP_COLUMNS}"
        ))
        .bind(group_id)
        .bind(user_id)
        .bind(name)
        .bind(combined_amount)
        .bind(display_date)
        .bind(member_ids.len() as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create group: {}", e)))?;

        sqlx::query("UPDATE transactions SET group_id = $1 WHERE transaction_id = ANY($2)")
            .bind(group_id)
            .bind(member_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to assign members: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(group_id = %group.group_id, "Transaction group created");
        Ok(group)
    }

    /// Dissolve a group: unmatch it if matched, clear membership, delete the
    /// group row. The match record (if any) survives with status Unmatched.
    #[instrument(skip(self), fields(user_id = %user_id, group_id = %group_id))]
    pub async fn dissolve_group(&self, user_id: Uuid, group_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["dissolve_group"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let group = sqlx::query_as::<_, TransactionGroup>(&format!(
            "SELECT {GROUP_COLUMNS} FROM transaction_groups \
             WHERE user_id = $1 AND group_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock group: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Group not found")))?;

        if let Some(match_id) = group.matched_match_id {
            sqlx::query(
                "UPDATE receipt_matches \
                 SET status = $2, row_version = row_version + 1 \
                 WHERE match_id = $1 AND status = $3",
            )
            .bind(match_id)
            .bind(MatchStatus::Unmatched.as_str())
            .bind(MatchStatus::Confirmed.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to unmatch group: {}", e))
            })?;

            sqlx::query(
                "UPDATE receipts SET matched_match_id = NULL, updated_utc = NOW() \
                 WHERE matched_match_id = $1",
            )
            .bind(match_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear receipt link: {}", e))
            })?;
        }

        sqlx::query("UPDATE transactions SET group_id = NULL WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear membership: {}", e))
            })?;

        // Proposed matches against a dissolved group can never be confirmed.
        sqlx::query(
            "UPDATE receipt_matches SET status = $2, row_version = row_version + 1 \
             WHERE group_id = $1 AND status = $3",
        )
        .bind(group_id)
        .bind(MatchStatus::Rejected.as_str())
        .bind(MatchStatus::Proposed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to reject group proposals: {}", e))
        })?;

        // Match records keep their group_id for audit; the schema has no FK
        // on match target columns so the group row can be deleted.
        sqlx::query("DELETE FROM transaction_groups WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete group: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(group_id = %group_id, "Transaction group dissolved");
        Ok(())
    }

    // =========================================================================
    // Vendor Alias Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn vendor_aliases(&self, user_id: Uuid) -> Result<Vec<VendorAlias>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["vendor_aliases"])
            .start_timer();

        let aliases = sqlx::query_as::<_, VendorAlias>(&format!(
            "SELECT {ALIAS_COLUMNS} FROM vendor_aliases WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load aliases: {}", e)))?;

        timer.observe_duration();
        Ok(aliases)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_vendor_aliases(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<VendorAlias>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_vendor_aliases"])
            .start_timer();

        let limit = page_size.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendor_aliases WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to count aliases: {}", e))
            })?;

        let aliases = sqlx::query_as::<_, VendorAlias>(&format!(
            "SELECT {ALIAS_COLUMNS} FROM vendor_aliases \
             WHERE user_id = $1 \
             ORDER BY match_count DESC, normalized_name \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list aliases: {}", e)))?;

        timer.observe_duration();
        Ok((aliases, total))
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id, match_id = %match_id))]
    pub async fn get_match(
        &self,
        user_id: Uuid,
        match_id: Uuid,
    ) -> Result<Option<ReceiptMatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_match"])
            .start_timer();

        let m = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND match_id = $2"
        ))
        .bind(user_id)
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get match: {}", e)))?;

        timer.observe_duration();
        Ok(m)
    }

    /// Paginated proposed matches, highest confidence first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_proposals(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ReceiptMatch>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_proposals"])
            .start_timer();

        let limit = page_size.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM receipt_matches WHERE user_id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(MatchStatus::Proposed.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count proposals: {}", e))
        })?;

        let proposals = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND status = $2 \
             ORDER BY confidence DESC, match_id \
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(MatchStatus::Proposed.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list proposals: {}", e)))?;

        timer.observe_duration();
        Ok((proposals, total))
    }

    /// Targets already held by a proposed or confirmed match. Seeds the
    /// first-come-first-served claim set before an auto-match run.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn claimed_targets(&self, user_id: Uuid) -> Result<Vec<ReceiptMatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claimed_targets"])
            .start_timer();

        let matches = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND status IN ($2, $3)"
        ))
        .bind(user_id)
        .bind(MatchStatus::Proposed.as_str())
        .bind(MatchStatus::Confirmed.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load claimed targets: {}", e))
        })?;

        timer.observe_duration();
        Ok(matches)
    }

    /// Create or update the single proposed match for a receipt.
    #[instrument(skip(self, scores), fields(user_id = %user_id, receipt_id = %receipt_id))]
    pub async fn upsert_proposal(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
        target: MatchTarget,
        scores: &ScoreBreakdown,
    ) -> Result<ReceiptMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_proposal"])
            .start_timer();

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT match_id FROM receipt_matches \
             WHERE user_id = $1 AND receipt_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(receipt_id)
        .bind(MatchStatus::Proposed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to look up proposal: {}", e))
        })?;

        let m = if let Some(match_id) = existing {
            sqlx::query_as::<_, ReceiptMatch>(&format!(
                "UPDATE receipt_matches \
                 SET transaction_id = $2, group_id = $3, confidence = $4, amount_score = $5, \
                     date_score = $6, vendor_score = $7, match_reason = $8, \
                     row_version = row_version + 1 \
                 WHERE match_id = $1 \
                 RETURNING {MATCH_COLUMNS}"
            ))
            .bind(match_id)
            .bind(target.transaction_id())
            .bind(target.group_id())
            .bind(scores.confidence)
            .bind(scores.amount_score)
            .bind(scores.date_score)
            .bind(scores.vendor_score)
            .bind(&scores.reason)
            .fetch_one(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ReceiptMatch>(&format!(
                "INSERT INTO receipt_matches \
                   (match_id, user_id, receipt_id, transaction_id, group_id, confidence, \
                    amount_score, date_score, vendor_score, match_reason, status, is_manual) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE) \
                 RETURNING {MATCH_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(receipt_id)
            .bind(target.transaction_id())
            .bind(target.group_id())
            .bind(scores.confidence)
            .bind(scores.amount_score)
            .bind(scores.date_score)
            .bind(scores.vendor_score)
            .bind(&scores.reason)
            .bind(MatchStatus::Proposed.as_str())
            .fetch_one(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert proposal: {}", e)))?;

        timer.observe_duration();
        Ok(m)
    }

    /// Confirm a proposed match. Re-checks exclusivity on both sides under
    /// row locks and bumps `row_version`; a concurrent resolution surfaces
    /// as Conflict, a vanished record as NotFound.
    #[instrument(skip(self, hints), fields(user_id = %user_id, match_id = %match_id))]
    pub async fn confirm_match(
        &self,
        user_id: Uuid,
        match_id: Uuid,
        hints: &VendorHints,
    ) -> Result<ReceiptMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["confirm_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let m = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND match_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(match_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock match: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))?;

        if m.match_status() != MatchStatus::Proposed {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Match already resolved (status: {})",
                m.status
            )));
        }

        let confirmed = Self::apply_confirm(&mut tx, &m, hints).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(match_id = %match_id, "Match confirmed");
        Ok(confirmed)
    }

    /// Shared confirm tail used by Confirm and manual-match creation: both
    /// sides re-checked under lock, alias upsert, guarded status update,
    /// linkage stamped.
    async fn apply_confirm(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        m: &ReceiptMatch,
        hints: &VendorHints,
    ) -> Result<ReceiptMatch, AppError> {
        let target = m.target()?;

        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE receipt_id = $1 FOR UPDATE"
        ))
        .bind(m.receipt_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock receipt: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt no longer exists")))?;

        if receipt.matched_match_id.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Receipt already has a confirmed match"
            )));
        }

        match target {
            MatchTarget::Transaction(transaction_id) => {
                let t = sqlx::query_as::<_, Transaction>(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE transaction_id = $1 FOR UPDATE"
                ))
                .bind(transaction_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to lock transaction: {}", e))
                })?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Transaction no longer exists"))
                })?;

                if t.matched_match_id.is_some() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Transaction already has a confirmed match"
                    )));
                }
                if t.group_id.is_some() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Transaction belongs to a group; match the group instead"
                    )));
                }
            }
            MatchTarget::Group(group_id) => {
                let g = sqlx::query_as::<_, TransactionGroup>(&format!(
                    "SELECT {GROUP_COLUMNS} FROM transaction_groups \
                     WHERE group_id = $1 FOR UPDATE"
                ))
                .bind(group_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to lock group: {}", e))
                })?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Group no longer exists")))?;

                if g.matched_match_id.is_some() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Group already has a confirmed match"
                    )));
                }
            }
        }

        // Learn a vendor alias when the caller supplied a display name and
        // the receipt actually has an extracted vendor.
        let alias_id: Option<Uuid> = match (&hints.display_name, &receipt.vendor_name) {
            (Some(display_name), Some(vendor_name)) => {
                let normalized = engine::normalize_vendor(vendor_name);
                if normalized.is_empty() {
                    None
                } else {
                    let id: Uuid = sqlx::query_scalar(
                        "INSERT INTO vendor_aliases \
                           (alias_id, user_id, normalized_name, display_name, \
                            default_gl_code, default_department, match_count) \
                         VALUES ($1, $2, $3, $4, $5, $6, 1) \
                         ON CONFLICT (user_id, normalized_name) DO UPDATE SET \
                           display_name = EXCLUDED.display_name, \
                           default_gl_code = COALESCE(EXCLUDED.default_gl_code, vendor_aliases.default_gl_code), \
                           default_department = COALESCE(EXCLUDED.default_department, vendor_aliases.default_department), \
                           match_count = vendor_aliases.match_count + 1, \
                           updated_utc = NOW() \
                         RETURNING alias_id",
                    )
                    .bind(Uuid::new_v4())
                    .bind(m.user_id)
                    .bind(&normalized)
                    .bind(display_name)
                    .bind(&hints.gl_code)
                    .bind(&hints.department)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!("Failed to upsert alias: {}", e))
                    })?;
                    Some(id)
                }
            }
            _ => None,
        };

        let confirmed = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "UPDATE receipt_matches \
             SET status = $4, confirmed_utc = NOW(), \
                 vendor_alias_id = COALESCE($5, vendor_alias_id), \
                 row_version = row_version + 1 \
             WHERE match_id = $1 AND status = $2 AND row_version = $3 \
             RETURNING {MATCH_COLUMNS}"
        ))
        .bind(m.match_id)
        .bind(&m.status)
        .bind(m.row_version)
        .bind(MatchStatus::Confirmed.as_str())
        .bind(alias_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to confirm match: {}", e)))?
        .ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Match was modified by another request"))
        })?;

        sqlx::query(
            "UPDATE receipts SET matched_match_id = $2, updated_utc = NOW() \
             WHERE receipt_id = $1",
        )
        .bind(m.receipt_id)
        .bind(m.match_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to link receipt: {}", e))
        })?;

        match target {
            MatchTarget::Transaction(transaction_id) => {
                sqlx::query(
                    "UPDATE transactions SET matched_match_id = $2 WHERE transaction_id = $1",
                )
                .bind(transaction_id)
                .bind(m.match_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to link transaction: {}", e))
                })?;
            }
            MatchTarget::Group(group_id) => {
                sqlx::query(
                    "UPDATE transaction_groups SET matched_match_id = $2 WHERE group_id = $1",
                )
                .bind(group_id)
                .bind(m.match_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to link group: {}", e))
                })?;
            }
        }

        Ok(confirmed)
    }

    /// Reject a proposed match. Status change only; aliases untouched.
    #[instrument(skip(self), fields(user_id = %user_id, match_id = %match_id))]
    pub async fn reject_match(
        &self,
        user_id: Uuid,
        match_id: Uuid,
    ) -> Result<ReceiptMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reject_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let m = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND match_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(match_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock match: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))?;

        if m.match_status() != MatchStatus::Proposed {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Match already resolved (status: {})",
                m.status
            )));
        }

        let rejected = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "UPDATE receipt_matches \
             SET status = $4, row_version = row_version + 1 \
             WHERE match_id = $1 AND status = $2 AND row_version = $3 \
             RETURNING {MATCH_COLUMNS}"
        ))
        .bind(m.match_id)
        .bind(&m.status)
        .bind(m.row_version)
        .bind(MatchStatus::Rejected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reject match: {}", e)))?
        .ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Match was modified by another request"))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(match_id = %match_id, "Match rejected");
        Ok(rejected)
    }

    /// Unmatch a confirmed match: reverse the linkage on both sides but keep
    /// the record (status Unmatched) for audit.
    #[instrument(skip(self), fields(user_id = %user_id, match_id = %match_id))]
    pub async fn unmatch_match(
        &self,
        user_id: Uuid,
        match_id: Uuid,
    ) -> Result<ReceiptMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unmatch_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let m = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "SELECT {MATCH_COLUMNS} FROM receipt_matches \
             WHERE user_id = $1 AND match_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(match_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock match: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))?;

        if m.match_status() != MatchStatus::Confirmed {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only a confirmed match can be unmatched (status: {})",
                m.status
            )));
        }

        let unmatched = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "UPDATE receipt_matches \
             SET status = $4, row_version = row_version + 1 \
             WHERE match_id = $1 AND status = $2 AND row_version = $3 \
             RETURNING {MATCH_COLUMNS}"
        ))
        .bind(m.match_id)
        .bind(&m.status)
        .bind(m.row_version)
        .bind(MatchStatus::Unmatched.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to unmatch: {}", e)))?
        .ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Match was modified by another request"))
        })?;

        sqlx::query(
            "UPDATE receipts SET matched_match_id = NULL, updated_utc = NOW() \
             WHERE receipt_id = $1 AND matched_match_id = $2",
        )
        .bind(m.receipt_id)
        .bind(m.match_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to unlink receipt: {}", e))
        })?;

        match m.target()? {
            MatchTarget::Transaction(transaction_id) => {
                sqlx::query(
                    "UPDATE transactions SET matched_match_id = NULL \
                     WHERE transaction_id = $1 AND matched_match_id = $2",
                )
                .bind(transaction_id)
                .bind(m.match_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to unlink transaction: {}", e))
                })?;
            }
            MatchTarget::Group(group_id) => {
                sqlx::query(
                    "UPDATE transaction_groups SET matched_match_id = NULL \
                     WHERE group_id = $1 AND matched_match_id = $2",
                )
                .bind(group_id)
                .bind(m.match_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to unlink group: {}", e))
                })?;
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(match_id = %match_id, "Match unmatched");
        Ok(unmatched)
    }

    /// Create a manual match chosen by the reviewer. Any outstanding proposal
    /// for the receipt is rejected (the human picked differently). When
    /// `confirm` is set, the new match is confirmed in the same transaction.
    #[instrument(skip(self, scores, hints), fields(user_id = %user_id, receipt_id = %receipt_id))]
    pub async fn create_manual_match(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
        target: MatchTarget,
        scores: &ScoreBreakdown,
        confirm: bool,
        hints: &VendorHints,
    ) -> Result<ReceiptMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_manual_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE user_id = $1 AND receipt_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(receipt_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock receipt: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

        if receipt.matched_match_id.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Receipt already has a confirmed match"
            )));
        }

        match target {
            MatchTarget::Transaction(transaction_id) => {
                let t = sqlx::query_as::<_, Transaction>(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE user_id = $1 AND transaction_id = $2"
                ))
                .bind(user_id)
                .bind(transaction_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
                })?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

                if t.group_id.is_some() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Transaction belongs to a group; match the group instead"
                    )));
                }
                if t.matched_match_id.is_some() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Transaction already has a confirmed match"
                    )));
                }
            }
            MatchTarget::Group(group_id) => {
                let g = sqlx::query_as::<_, TransactionGroup>(&format!(
                    "SELECT {GROUP_COLUMNS} FROM transaction_groups \
                     WHERE user_id = $1 AND group_id = $2"
                ))
                .bind(user_id)
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get group: {}", e))
                })?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Group not found")))?;

                if g.member_count < 2 {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Group has fewer than 2 member transactions"
                    )));
                }
                if g.matched_match_id.is_some() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Group already has a confirmed match"
                    )));
                }
            }
        }

        sqlx::query(
            "UPDATE receipt_matches SET status = $3, row_version = row_version + 1 \
             WHERE user_id = $1 AND receipt_id = $2 AND status = $4",
        )
        .bind(user_id)
        .bind(receipt_id)
        .bind(MatchStatus::Rejected.as_str())
        .bind(MatchStatus::Proposed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to supersede proposal: {}", e))
        })?;

        let m = sqlx::query_as::<_, ReceiptMatch>(&format!(
            "INSERT INTO receipt_matches \
               (match_id, user_id, receipt_id, transaction_id, group_id, confidence, \
                amount_score, date_score, vendor_score, match_reason, status, is_manual) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE) \
             RETURNING {MATCH_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(receipt_id)
        .bind(target.transaction_id())
        .bind(target.group_id())
        .bind(scores.confidence)
        .bind(scores.amount_score)
        .bind(scores.date_score)
        .bind(scores.vendor_score)
        .bind(&scores.reason)
        .bind(MatchStatus::Proposed.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create manual match: {}", e))
        })?;

        let m = if confirm {
            Self::apply_confirm(&mut tx, &m, hints).await?
        } else {
            m
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
        })?;

        timer.observe_duration();
        info!(match_id = %m.match_id, confirmed = confirm, "Manual match created");
        Ok(m)
    }

    /// Proposed matches eligible for batch approval.
    #[instrument(skip(self, match_ids), fields(user_id = %user_id))]
    pub async fn eligible_proposals(
        &self,
        user_id: Uuid,
        min_confidence: Option<f64>,
        match_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ReceiptMatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["eligible_proposals"])
            .start_timer();

        let proposals = if let Some(ids) = match_ids {
            sqlx::query_as::<_, ReceiptMatch>(&format!(
                "SELECT {MATCH_COLUMNS} FROM receipt_matches \
                 WHERE user_id = $1 AND status = $2 AND match_id = ANY($3) \
                 ORDER BY confidence DESC, match_id"
            ))
            .bind(user_id)
            .bind(MatchStatus::Proposed.as_str())
            .bind(ids)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ReceiptMatch>(&format!(
                "SELECT {MATCH_COLUMNS} FROM receipt_matches \
                 WHERE user_id = $1 AND status = $2 AND confidence >= $3 \
                 ORDER BY confidence DESC, match_id"
            ))
            .bind(user_id)
            .bind(MatchStatus::Proposed.as_str())
            .bind(min_confidence.unwrap_or(0.0))
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load proposals: {}", e))
        })?;

        timer.observe_duration();
        Ok(proposals)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn matching_stats(&self, user_id: Uuid) -> Result<MatchingStats, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["matching_stats"])
            .start_timer();

        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT \
               (SELECT COUNT(*) FROM receipts WHERE user_id = $1 AND matched_match_id IS NOT NULL) AS matched_count, \
               (SELECT COUNT(*) FROM receipt_matches WHERE user_id = $1 AND status = 'proposed') AS proposed_count, \
               (SELECT COUNT(*) FROM receipts WHERE user_id = $1 AND matched_match_id IS NULL) AS unmatched_receipts_count, \
               (SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND matched_match_id IS NULL AND group_id IS NULL) AS unmatched_transactions_count, \
               (SELECT COUNT(*) FROM transaction_groups WHERE user_id = $1 AND matched_match_id IS NULL) AS unmatched_groups_count, \
               (SELECT COUNT(*) FROM receipts WHERE user_id = $1) AS total_receipts, \
               (SELECT COUNT(DISTINCT receipt_id) FROM receipt_matches \
                  WHERE user_id = $1 AND status IN ('proposed', 'confirmed')) AS reached_receipts, \
               (SELECT AVG(confidence) FROM receipt_matches WHERE user_id = $1 AND status = 'confirmed') AS average_confidence",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load stats: {}", e)))?;

        let auto_match_rate = if row.total_receipts > 0 {
            row.reached_receipts as f64 / row.total_receipts as f64
        } else {
            0.0
        };

        timer.observe_duration();
        Ok(MatchingStats {
            matched_count: row.matched_count,
            proposed_count: row.proposed_count,
            unmatched_receipts_count: row.unmatched_receipts_count,
            unmatched_transactions_count: row.unmatched_transactions_count,
            unmatched_groups_count: row.unmatched_groups_count,
            auto_match_rate,
            average_confidence: row.average_confidence,
        })
    }
}

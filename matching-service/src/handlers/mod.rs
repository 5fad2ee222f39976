pub mod groups;
pub mod health;
pub mod matches;
pub mod receipts;

pub use groups::{create_group, dissolve_group};
pub use health::{health_check, metrics_handler, readiness_check};
pub use matches::{
    batch_approve, confirm_match, get_match, list_proposals, manual_match, matching_stats,
    reject_match, run_auto_match, unmatch_match,
};
pub use receipts::{
    delete_receipt, list_candidates, list_unmatched_receipts, list_unmatched_transactions,
    list_vendor_aliases,
};

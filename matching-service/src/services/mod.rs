pub mod database;
pub mod engine;
pub mod matching;
pub mod metrics;

pub use database::{Database, MatchingStats, VendorHints};
pub use engine::{AliasIndex, ScoringConfig};
pub use matching::{AutoMatchReport, BatchApproveReport};

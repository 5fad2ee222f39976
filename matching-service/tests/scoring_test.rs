//! Scoring and planning tests. Everything here is pure computation: no
//! database, no server.

use chrono::NaiveDate;
use matching_service::models::MatchTarget;
use matching_service::services::engine::{
    normalize_vendor, plan_auto_match, rank_candidates, score_pair, AliasIndex, CandidateFacts,
    ReceiptFacts, ScoringConfig,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn receipt(vendor: &str, day: NaiveDate, amount: &str) -> ReceiptFacts {
    ReceiptFacts {
        receipt_id: Uuid::new_v4(),
        vendor: Some(vendor.to_string()),
        date: Some(day),
        amount: Some(amount.parse::<Decimal>().expect("valid decimal")),
    }
}

fn transaction_candidate(text: &str, day: NaiveDate, amount: &str) -> CandidateFacts {
    CandidateFacts {
        target: MatchTarget::Transaction(Uuid::new_v4()),
        date: day,
        amount: amount.parse().expect("valid decimal"),
        text: text.to_string(),
    }
}

#[test]
fn vendor_normalization_strips_processor_prefixes() {
    assert_eq!(normalize_vendor("PAYPAL *GRUBHUB"), "GRUBHUB");
    assert_eq!(normalize_vendor("SQ *BLUE BOTTLE"), "BLUE BOTTLE");
    assert_eq!(normalize_vendor("tst* Joe's Diner"), "JOE S DINER");
    assert_eq!(normalize_vendor("  Starbucks  #4521 "), "STARBUCKS 4521");
}

#[test]
fn perfect_pair_scores_near_one() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 3, 10);
    let r = receipt("BLUE BOTTLE COFFEE", d, "12.50");
    let c = transaction_candidate("BLUE BOTTLE COFFEE", d, "12.50");

    let s = score_pair(&r, &c, &AliasIndex::default(), &cfg).expect("scoring succeeds");
    assert_eq!(s.amount_score, 1.0);
    assert_eq!(s.date_score, 1.0);
    assert_eq!(s.vendor_score, 1.0);
    assert!((s.confidence - 1.0).abs() < 1e-9);
}

#[test]
fn coffee_shop_receipt_matches_card_feed_line() {
    // Receipt: "STARBUCKS STORE #4521", $5.75, Jan 15.
    // Feed: "STARBUCKS 04521", -$5.75, posted Jan 16.
    let cfg = ScoringConfig::default();
    let r = receipt("STARBUCKS STORE #4521", date(2026, 1, 15), "5.75");
    let c = transaction_candidate("STARBUCKS 04521", date(2026, 1, 16), "-5.75");

    let s = score_pair(&r, &c, &AliasIndex::default(), &cfg).expect("scoring succeeds");
    assert_eq!(s.amount_score, 1.0, "sign must not matter");
    assert_eq!(s.vendor_score, 1.0, "noise and leading zeros must not matter");
    assert!(s.date_score > 0.8 && s.date_score < 1.0);
    assert!(s.confidence > 0.9, "confidence was {}", s.confidence);
}

#[test]
fn missing_fields_score_zero_for_that_component() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 3, 10);
    let c = transaction_candidate("ACME TOOLS", d, "40.00");

    let no_amount = ReceiptFacts {
        amount: None,
        ..receipt("ACME TOOLS", d, "40.00")
    };
    let s = score_pair(&no_amount, &c, &AliasIndex::default(), &cfg).unwrap();
    assert_eq!(s.amount_score, 0.0);
    assert_eq!(s.vendor_score, 1.0);

    let no_date = ReceiptFacts {
        date: None,
        ..receipt("ACME TOOLS", d, "40.00")
    };
    let s = score_pair(&no_date, &c, &AliasIndex::default(), &cfg).unwrap();
    assert_eq!(s.date_score, 0.0);

    let no_vendor = ReceiptFacts {
        vendor: None,
        ..receipt("ACME TOOLS", d, "40.00")
    };
    let s = score_pair(&no_vendor, &c, &AliasIndex::default(), &cfg).unwrap();
    assert_eq!(s.vendor_score, 0.0);
}

#[test]
fn amount_score_decreases_with_distance() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 3, 10);
    let r = receipt("VENDOR", d, "100.00");

    let near = score_pair(
        &r,
        &transaction_candidate("VENDOR", d, "101.00"),
        &AliasIndex::default(),
        &cfg,
    )
    .unwrap();
    let far = score_pair(
        &r,
        &transaction_candidate("VENDOR", d, "106.00"),
        &AliasIndex::default(),
        &cfg,
    )
    .unwrap();
    let out = score_pair(
        &r,
        &transaction_candidate("VENDOR", d, "250.00"),
        &AliasIndex::default(),
        &cfg,
    )
    .unwrap();

    assert!(near.amount_score > far.amount_score);
    assert!(far.amount_score > 0.0);
    assert_eq!(out.amount_score, 0.0, "beyond max delta earns nothing");
}

#[test]
fn date_score_zero_outside_window() {
    let cfg = ScoringConfig::default();
    let r = receipt("VENDOR", date(2026, 3, 10), "10.00");
    let c = transaction_candidate("VENDOR", date(2026, 3, 30), "10.00");

    let s = score_pair(&r, &c, &AliasIndex::default(), &cfg).unwrap();
    assert_eq!(s.date_score, 0.0);
}

#[test]
fn all_scores_stay_in_unit_interval() {
    let cfg = ScoringConfig::default();
    let cases = [
        ("STARBUCKS", "WHOLE FOODS", "5.75", "-523.10", 0),
        ("A", "A", "0.01", "0.01", 7),
        ("X Y Z", "Z", "99.99", "100.00", 3),
        ("", "SOMETHING", "10.00", "10.00", 1),
    ];
    for (rv, cv, ra, ca, days) in cases {
        let r = receipt(rv, date(2026, 5, 1), ra);
        let c = transaction_candidate(cv, date(2026, 5, 1 + days), ca);
        let s = score_pair(&r, &c, &AliasIndex::default(), &cfg).unwrap();
        for v in [s.amount_score, s.date_score, s.vendor_score, s.confidence] {
            assert!((0.0..=1.0).contains(&v), "score {} out of range", v);
        }
    }
}

#[test]
fn alias_resolution_gives_full_vendor_credit() {
    let cfg = ScoringConfig::default();
    let aliases = AliasIndex::new([("AMZN MKTP US".to_string(), "Amazon".to_string())]);
    let d = date(2026, 4, 2);

    let r = receipt("Amazon", d, "34.99");
    let c = transaction_candidate("AMZN MKTP US", d, "-34.99");
    let s = score_pair(&r, &c, &aliases, &cfg).unwrap();
    assert_eq!(s.vendor_score, 1.0);

    // Without the alias the token overlap is zero.
    let s = score_pair(&r, &c, &AliasIndex::default(), &cfg).unwrap();
    assert_eq!(s.vendor_score, 0.0);
}

#[test]
fn degenerate_weights_are_rejected() {
    let cfg = ScoringConfig {
        amount_weight: 0.0,
        date_weight: 0.0,
        vendor_weight: 0.0,
        ..ScoringConfig::default()
    };
    assert!(cfg.validate().is_err());

    let r = receipt("VENDOR", date(2026, 1, 1), "10.00");
    let c = transaction_candidate("VENDOR", date(2026, 1, 1), "10.00");
    assert!(score_pair(&r, &c, &AliasIndex::default(), &cfg).is_err());
}

#[test]
fn ranking_is_deterministic_under_ties() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 6, 1);
    let r = receipt("CAFE", d, "9.00");
    let c1 = transaction_candidate("CAFE", d, "9.00");
    let c2 = transaction_candidate("CAFE", d, "9.00");
    let pool = vec![&c1, &c2];

    let first = rank_candidates(&r, &pool, &AliasIndex::default(), &cfg);
    let second = rank_candidates(&r, &pool, &AliasIndex::default(), &cfg);
    let ids: Vec<_> = first.candidates.iter().map(|c| c.target.id()).collect();
    let ids2: Vec<_> = second.candidates.iter().map(|c| c.target.id()).collect();
    assert_eq!(ids, ids2);
    // Identical scores fall back to id order.
    assert_eq!(ids[0], c1.target.id().min(c2.target.id()));
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn plan_is_idempotent_over_unchanged_pool() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 2, 10);
    let receipts = vec![receipt("DELTA AIR", d, "412.50")];
    let candidates = vec![
        transaction_candidate("DELTA AIR LINES", d, "-412.50"),
        transaction_candidate("UNITED AIRLINES", d, "-980.00"),
    ];
    let cancel = CancellationToken::new();

    let a = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );
    let b = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );

    assert_eq!(a.proposals.len(), 1);
    assert_eq!(a.proposals[0].target, b.proposals[0].target);
    assert_eq!(a.proposals[0].receipt_id, b.proposals[0].receipt_id);
}

#[test]
fn near_tied_candidates_leave_receipt_ambiguous() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 2, 10);
    let receipts = vec![receipt("CORNER DELI", d, "15.00")];
    let candidates = vec![
        transaction_candidate("CORNER DELI", d, "15.00"),
        transaction_candidate("CORNER DELI", d, "15.00"),
    ];

    let plan = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &CancellationToken::new(),
    );

    assert!(plan.proposals.is_empty());
    assert_eq!(plan.ambiguous_receipts, vec![receipts[0].receipt_id]);
}

#[test]
fn low_confidence_candidates_are_not_proposed() {
    let cfg = ScoringConfig::default();
    let receipts = vec![receipt("SOME VENDOR", date(2026, 2, 10), "15.00")];
    let candidates = vec![transaction_candidate(
        "UNRELATED SHOP",
        date(2026, 2, 25),
        "600.00",
    )];

    let plan = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &CancellationToken::new(),
    );

    assert!(plan.proposals.is_empty());
    assert!(plan.ambiguous_receipts.is_empty());
    assert_eq!(plan.processed, 1);
}

#[test]
fn earlier_receipt_claims_contested_candidate_first() {
    let cfg = ScoringConfig::default();
    let c = transaction_candidate("GREEN GROCER", date(2026, 3, 5), "22.00");
    let early = receipt("GREEN GROCER", date(2026, 3, 4), "22.00");
    let late = receipt("GREEN GROCER", date(2026, 3, 6), "22.00");
    // Deliberately out of order; the planner sorts by (date, id).
    let receipts = vec![late.clone(), early.clone()];

    let plan = plan_auto_match(
        &receipts,
        &[c.clone()],
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &CancellationToken::new(),
    );

    assert_eq!(plan.proposals.len(), 1);
    assert_eq!(plan.proposals[0].receipt_id, early.receipt_id);
    assert_eq!(plan.proposals[0].target, c.target);
}

#[test]
fn already_claimed_targets_are_withheld() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 3, 5);
    let c = transaction_candidate("GREEN GROCER", d, "22.00");
    let receipts = vec![receipt("GREEN GROCER", d, "22.00")];

    let mut claimed = HashSet::new();
    claimed.insert(c.target);

    let plan = plan_auto_match(
        &receipts,
        &[c],
        &claimed,
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &CancellationToken::new(),
    );

    assert!(plan.proposals.is_empty());
}

#[test]
fn group_candidate_wins_when_amounts_sum() {
    // Receipt for $50; two grouped transactions of $20 and $30 combined
    // into a single candidate. An ungrouped $20 line must lose.
    let cfg = ScoringConfig::default();
    let d = date(2026, 4, 12);
    let receipts = vec![receipt("HOME DEPOT", d, "50.00")];
    let group = CandidateFacts {
        target: MatchTarget::Group(Uuid::new_v4()),
        date: d,
        amount: "50.00".parse().unwrap(),
        text: "HOME DEPOT".to_string(),
    };
    let loose = transaction_candidate("HOME DEPOT", d, "-20.00");

    let plan = plan_auto_match(
        &receipts,
        &[group.clone(), loose],
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &CancellationToken::new(),
    );

    assert_eq!(plan.proposals.len(), 1);
    assert_eq!(plan.proposals[0].target, group.target);
}

#[test]
fn cancellation_stops_planning_between_receipts() {
    let cfg = ScoringConfig::default();
    let d = date(2026, 5, 1);
    let receipts = vec![
        receipt("VENDOR A", d, "10.00"),
        receipt("VENDOR B", d, "20.00"),
    ];
    let candidates = vec![
        transaction_candidate("VENDOR A", d, "10.00"),
        transaction_candidate("VENDOR B", d, "20.00"),
    ];

    let cancel = CancellationToken::new();
    cancel.cancel();

    let plan = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );

    assert!(plan.cancelled);
    assert_eq!(plan.processed, 0);
    assert!(plan.proposals.is_empty());
}

#[test]
fn rerun_reselects_the_receipts_own_proposal_target() {
    // Run 1 proposes the best candidate. On a rerun that target is already
    // claimed by the receipt's own stored proposal; the receipt must get it
    // back, not slide to the runner-up.
    let cfg = ScoringConfig::default();
    let d = date(2026, 2, 10);
    let receipts = vec![receipt("DELTA AIR", d, "412.50")];
    let best = transaction_candidate("DELTA AIR LINES", d, "-412.50");
    let runner_up = transaction_candidate("DELTA AIR", date(2026, 2, 15), "-412.50");
    let candidates = vec![best.clone(), runner_up.clone()];
    let cancel = CancellationToken::new();

    let first = plan_auto_match(
        &receipts,
        &candidates,
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );
    assert_eq!(first.proposals.len(), 1);
    assert_eq!(first.proposals[0].target, best.target);

    let mut claimed = HashSet::new();
    claimed.insert(first.proposals[0].target);
    let mut own_claims = HashMap::new();
    own_claims.insert(receipts[0].receipt_id, first.proposals[0].target);

    let rerun = plan_auto_match(
        &receipts,
        &candidates,
        &claimed,
        &own_claims,
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );
    assert_eq!(rerun.proposals.len(), 1);
    assert_eq!(
        rerun.proposals[0].target, best.target,
        "rerun must reproduce the same proposal"
    );

    // Sanity: without the own-claim exception the runner-up clears the
    // threshold, so it really was in contention.
    let sole = plan_auto_match(
        &receipts,
        &[runner_up.clone()],
        &HashSet::new(),
        &HashMap::new(),
        &AliasIndex::default(),
        &cfg,
        &cancel,
    );
    assert_eq!(sole.proposals.len(), 1);
    assert_eq!(sole.proposals[0].target, runner_up.target);
}

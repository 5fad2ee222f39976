//! End-to-end API tests for the matching workflow. These run against a real
//! Postgres (TEST_DATABASE_URL) and skip when one is not available.

mod common;

use chrono::NaiveDate;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use serial_test::serial;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal")
}

#[tokio::test]
#[serial]
async fn auto_run_proposes_then_confirm_links_both_sides() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 1, 15);
    let receipt_id = app
        .seed_receipt(Some("STARBUCKS STORE #4521"), Some(d), Some(dec("5.75")))
        .await;
    let transaction_id = app
        .seed_transaction("STARBUCKS 04521", date(2026, 1, 16), dec("-5.75"))
        .await;

    let response = app.post_empty("/matches/auto-run").await;
    assert_eq!(StatusCode::OK, response.status());
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["proposed"], 1);
    assert_eq!(report["transaction_matches"], 1);
    assert_eq!(report["cancelled"], false);

    let response = app.get("/matches/proposals").await;
    assert_eq!(StatusCode::OK, response.status());
    let proposals: Value = response.json().await.unwrap();
    assert_eq!(proposals["total"], 1);
    let m = &proposals["matches"][0];
    assert_eq!(m["receipt_id"], receipt_id.to_string());
    assert_eq!(m["transaction_id"], transaction_id.to_string());
    assert_eq!(m["status"], "proposed");
    assert!(m["confidence"].as_f64().unwrap() > 0.9);
    let match_id = m["match_id"].as_str().unwrap().to_string();

    let response = app
        .post_json(
            &format!("/matches/{}/confirm", match_id),
            &json!({ "vendor_display_name": "Starbucks" }),
        )
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let confirmed: Value = response.json().await.unwrap();
    assert_eq!(confirmed["status"], "confirmed");
    assert!(confirmed["confirmed_at"].is_string());

    // Both sides now carry the linkage.
    let response = app.get("/receipts/unmatched").await;
    let receipts: Value = response.json().await.unwrap();
    assert_eq!(receipts["total"], 0);

    let response = app.get("/transactions/unmatched").await;
    let transactions: Value = response.json().await.unwrap();
    assert_eq!(transactions["total"], 0);

    // The confirmation learned an alias.
    let response = app.get("/aliases").await;
    let aliases: Value = response.json().await.unwrap();
    assert_eq!(aliases["total"], 1);
    assert_eq!(aliases["aliases"][0]["display_name"], "Starbucks");

    // Confirming an already-resolved match is a conflict.
    let response = app
        .post_empty(&format!("/matches/{}/confirm", match_id))
        .await;
    assert_eq!(StatusCode::CONFLICT, response.status());
}

#[tokio::test]
#[serial]
async fn reject_keeps_both_sides_unmatched() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 2, 3);
    app.seed_receipt(Some("BLUE BOTTLE"), Some(d), Some(dec("12.00")))
        .await;
    app.seed_transaction("BLUE BOTTLE", d, dec("-12.00")).await;

    app.post_empty("/matches/auto-run").await;
    let proposals: Value = app.get("/matches/proposals").await.json().await.unwrap();
    let match_id = proposals["matches"][0]["match_id"].as_str().unwrap().to_string();

    let response = app
        .post_empty(&format!("/matches/{}/reject", match_id))
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let rejected: Value = response.json().await.unwrap();
    assert_eq!(rejected["status"], "rejected");

    // Rejection never removes the record and never links anything.
    let receipts: Value = app.get("/receipts/unmatched").await.json().await.unwrap();
    assert_eq!(receipts["total"], 1);
    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 1);

    // A rejected match cannot be confirmed.
    let response = app
        .post_empty(&format!("/matches/{}/confirm", match_id))
        .await;
    assert_eq!(StatusCode::CONFLICT, response.status());
}

#[tokio::test]
#[serial]
async fn unmatch_reverses_confirm_but_keeps_the_record() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 3, 8);
    app.seed_receipt(Some("ACME TOOLS"), Some(d), Some(dec("89.10")))
        .await;
    app.seed_transaction("ACME TOOLS", d, dec("-89.10")).await;

    app.post_empty("/matches/auto-run").await;
    let proposals: Value = app.get("/matches/proposals").await.json().await.unwrap();
    let match_id = proposals["matches"][0]["match_id"].as_str().unwrap().to_string();

    app.post_empty(&format!("/matches/{}/confirm", match_id))
        .await;
    let response = app
        .post_empty(&format!("/matches/{}/unmatch", match_id))
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let unmatched: Value = response.json().await.unwrap();
    assert_eq!(unmatched["status"], "unmatched");

    // Both sides are back in the pool and the record is still readable.
    let receipts: Value = app.get("/receipts/unmatched").await.json().await.unwrap();
    assert_eq!(receipts["total"], 1);
    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 1);

    let response = app.get(&format!("/matches/{}", match_id)).await;
    assert_eq!(StatusCode::OK, response.status());

    // Unmatching twice is a conflict.
    let response = app
        .post_empty(&format!("/matches/{}/unmatch", match_id))
        .await;
    assert_eq!(StatusCode::CONFLICT, response.status());
}

#[tokio::test]
#[serial]
async fn manual_match_against_group_confirms_by_default() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 4, 12);
    let receipt_id = app
        .seed_receipt(Some("HOME DEPOT"), Some(d), Some(dec("50.00")))
        .await;
    let t1 = app.seed_transaction("HOME DEPOT", d, dec("-20.00")).await;
    let t2 = app
        .seed_transaction("HOME DEPOT", date(2026, 4, 13), dec("-30.00"))
        .await;

    let response = app
        .post_json(
            "/groups",
            &json!({ "name": "Home Depot split", "transaction_ids": [t1, t2] }),
        )
        .await;
    assert_eq!(StatusCode::CREATED, response.status());
    let group: Value = response.json().await.unwrap();
    assert_eq!(group["combined_amount"], "-50.00");
    assert_eq!(group["member_count"], 2);
    // Display date is the latest member date.
    assert_eq!(group["display_date"], "2026-04-13");
    let group_id = group["group_id"].as_str().unwrap().to_string();

    // Grouped members leave the individual pool.
    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 0);

    let response = app
        .post_json(
            "/matches/manual",
            &json!({ "receipt_id": receipt_id, "group_id": group_id }),
        )
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let m: Value = response.json().await.unwrap();
    assert_eq!(m["status"], "confirmed");
    assert_eq!(m["is_manual"], true);
    assert_eq!(m["group_id"], group_id);
    let match_id = m["match_id"].as_str().unwrap().to_string();

    // Dissolving the group unmatches and frees the members.
    let response = app.delete(&format!("/groups/{}", group_id)).await;
    assert_eq!(StatusCode::NO_CONTENT, response.status());

    let m: Value = app
        .get(&format!("/matches/{}", match_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(m["status"], "unmatched");

    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 2);
    let receipts: Value = app.get("/receipts/unmatched").await.json().await.unwrap();
    assert_eq!(receipts["total"], 1);
}

#[tokio::test]
#[serial]
async fn manual_match_requires_exactly_one_target() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 5, 2);
    let receipt_id = app
        .seed_receipt(Some("CAFE"), Some(d), Some(dec("9.00")))
        .await;
    let transaction_id = app.seed_transaction("CAFE", d, dec("-9.00")).await;

    let response = app
        .post_json("/matches/manual", &json!({ "receipt_id": receipt_id }))
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());

    let response = app
        .post_json(
            "/matches/manual",
            &json!({
                "receipt_id": receipt_id,
                "transaction_id": transaction_id,
                "group_id": uuid::Uuid::new_v4(),
            }),
        )
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

#[tokio::test]
#[serial]
async fn batch_approve_confirms_by_confidence_floor() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 6, 1);
    app.seed_receipt(Some("DELTA AIR"), Some(d), Some(dec("412.50")))
        .await;
    app.seed_transaction("DELTA AIR LINES", d, dec("-412.50"))
        .await;
    app.seed_receipt(Some("MARRIOTT"), Some(date(2026, 6, 3)), Some(dec("880.00")))
        .await;
    app.seed_transaction("MARRIOTT HOTELS", date(2026, 6, 3), dec("-880.00"))
        .await;

    app.post_empty("/matches/auto-run").await;

    // Selector rules: both or neither is a bad request.
    let response = app.post_json("/matches/batch-approve", &json!({})).await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
    let response = app
        .post_json(
            "/matches/batch-approve",
            &json!({ "min_confidence": 0.9, "match_ids": [uuid::Uuid::new_v4()] }),
        )
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());

    let response = app
        .post_json("/matches/batch-approve", &json!({ "min_confidence": 0.9 }))
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["approved"].as_array().unwrap().len(), 2);
    assert_eq!(report["skipped"].as_array().unwrap().len(), 0);

    let proposals: Value = app.get("/matches/proposals").await.json().await.unwrap();
    assert_eq!(proposals["total"], 0);
}

#[tokio::test]
#[serial]
async fn candidates_endpoint_ranks_with_component_scores() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 7, 9);
    let receipt_id = app
        .seed_receipt(Some("GREEN GROCER"), Some(d), Some(dec("22.00")))
        .await;
    app.seed_transaction("GREEN GROCER", d, dec("-22.00")).await;
    app.seed_transaction("GAS STATION", date(2026, 7, 20), dec("-60.00"))
        .await;

    let response = app
        .get(&format!("/receipts/{}/candidates", receipt_id))
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let body: Value = response.json().await.unwrap();
    let candidates = body["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 2);

    let top = &candidates[0];
    assert_eq!(top["candidate_type"], "transaction");
    assert!(top["confidence"].as_f64().unwrap() > 0.9);
    assert_eq!(top["amount_score"], 1.0);
    assert_eq!(top["vendor_score"], 1.0);
    assert!(
        top["confidence"].as_f64().unwrap() > candidates[1]["confidence"].as_f64().unwrap()
    );
}

#[tokio::test]
#[serial]
async fn stats_reflect_match_lifecycle() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 8, 1);
    app.seed_receipt(Some("CAFE ONE"), Some(d), Some(dec("10.00")))
        .await;
    app.seed_transaction("CAFE ONE", d, dec("-10.00")).await;
    app.seed_receipt(None, None, None).await;

    app.post_empty("/matches/auto-run").await;

    let stats: Value = app.get("/matches/stats").await.json().await.unwrap();
    assert_eq!(stats["proposed_count"], 1);
    assert_eq!(stats["matched_count"], 0);
    assert_eq!(stats["unmatched_receipts_count"], 2);
    assert_eq!(stats["auto_match_rate"], 0.5);
}

#[tokio::test]
#[serial]
async fn delete_receipt_releases_confirmed_transaction() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 9, 14);
    let receipt_id = app
        .seed_receipt(Some("OFFICE SUPPLY"), Some(d), Some(dec("33.00")))
        .await;
    app.seed_transaction("OFFICE SUPPLY", d, dec("-33.00")).await;

    app.post_empty("/matches/auto-run").await;
    let proposals: Value = app.get("/matches/proposals").await.json().await.unwrap();
    let match_id = proposals["matches"][0]["match_id"].as_str().unwrap().to_string();
    app.post_empty(&format!("/matches/{}/confirm", match_id))
        .await;

    let response = app.delete(&format!("/receipts/{}", receipt_id)).await;
    assert_eq!(StatusCode::NO_CONTENT, response.status());

    // The transaction returns to the pool.
    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 1);

    let response = app.delete(&format!("/receipts/{}", receipt_id)).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
}

#[tokio::test]
#[serial]
async fn requests_without_user_header_are_unauthorized() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let response = app
        .client
        .get(app.url("/matches/proposals"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(StatusCode::UNAUTHORIZED, response.status());

    let response = app
        .client
        .get(app.url("/matches/proposals"))
        .header("X-User-ID", "not-a-uuid")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(StatusCode::UNAUTHORIZED, response.status());
}

#[tokio::test]
#[serial]
async fn unknown_match_id_is_not_found() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let response = app
        .get(&format!("/matches/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());

    let response = app
        .post_empty(&format!("/matches/{}/confirm", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
}

#[tokio::test]
#[serial]
async fn confirming_second_match_on_claimed_transaction_conflicts() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let d = date(2026, 10, 5);
    let receipt_a = app
        .seed_receipt(Some("CITY PARKING"), Some(d), Some(dec("14.00")))
        .await;
    let receipt_b = app
        .seed_receipt(Some("CITY PARKING"), Some(d), Some(dec("14.00")))
        .await;
    let txn = app.seed_transaction("CITY PARKING", d, dec("-14.00")).await;

    // Two proposed matches against the same transaction.
    let response = app
        .post_json(
            "/matches/manual",
            &json!({ "receipt_id": receipt_a, "transaction_id": txn, "confirm": false }),
        )
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let match_a: Value = response.json().await.unwrap();
    let match_a_id = match_a["match_id"].as_str().unwrap().to_string();

    let response = app
        .post_json(
            "/matches/manual",
            &json!({ "receipt_id": receipt_b, "transaction_id": txn, "confirm": false }),
        )
        .await;
    assert_eq!(StatusCode::OK, response.status());
    let match_b: Value = response.json().await.unwrap();
    let match_b_id = match_b["match_id"].as_str().unwrap().to_string();

    // First confirm claims the transaction.
    let response = app
        .post_empty(&format!("/matches/{}/confirm", match_a_id))
        .await;
    assert_eq!(StatusCode::OK, response.status());

    // The competing match hits the exclusivity re-check at commit time.
    let response = app
        .post_empty(&format!("/matches/{}/confirm", match_b_id))
        .await;
    assert_eq!(StatusCode::CONFLICT, response.status());

    // First confirmation is untouched, the loser is still only proposed.
    let m: Value = app
        .get(&format!("/matches/{}", match_a_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(m["status"], "confirmed");
    let m: Value = app
        .get(&format!("/matches/{}", match_b_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(m["status"], "proposed");

    let transactions: Value = app
        .get("/transactions/unmatched")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["total"], 0);
}

#[tokio::test]
#[serial]
async fn auto_run_rerun_keeps_the_same_proposal() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    // Best candidate plus a runner-up that also clears the threshold.
    let d = date(2026, 11, 2);
    app.seed_receipt(Some("DELTA AIR"), Some(d), Some(dec("412.50")))
        .await;
    app.seed_transaction("DELTA AIR LINES", d, dec("-412.50"))
        .await;
    app.seed_transaction("DELTA AIR", date(2026, 11, 7), dec("-412.50"))
        .await;

    app.post_empty("/matches/auto-run").await;
    let first: Value = app.get("/matches/proposals").await.json().await.unwrap();
    assert_eq!(first["total"], 1);
    let first_target = first["matches"][0]["transaction_id"].clone();
    let first_match_id = first["matches"][0]["match_id"].clone();

    let response = app.post_empty("/matches/auto-run").await;
    assert_eq!(StatusCode::OK, response.status());

    let second: Value = app.get("/matches/proposals").await.json().await.unwrap();
    assert_eq!(second["total"], 1);
    assert_eq!(
        second["matches"][0]["transaction_id"], first_target,
        "rerun over an unchanged pool must not move the proposal"
    );
    assert_eq!(second["matches"][0]["match_id"], first_match_id);
}

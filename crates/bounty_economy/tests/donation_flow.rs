//! Integration tests for donation request, give, claim and get.

mod common;

use std::collections::BTreeMap;

use bounty_economy::donation::DONATIONS_COLLECTION;
use bounty_economy::{ClaimRequest, Context, EconomyError, ErrorKind};
use common::Harness;

fn funded() -> Harness {
    let h = Harness::new();
    h.wallet.set_balance("owner", "coins", 100);
    h.give_items("owner", "ticket", 1);
    for contributor in ["alice", "bob", "carol"] {
        h.wallet.set_balance(contributor, "coins", 100);
    }
    h
}

#[test]
fn test_request_is_idempotent_while_active() {
    let h = funded();
    let ctx = Context::background();

    let first = h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    assert!(first.created);
    assert_eq!(h.wallet.balance("owner", "coins"), 90);
    assert_eq!(h.inventory.count("owner", "ticket"), 0);
    let updates = h.wallet.update_count();

    let second = h.economy.donation_request(&ctx, "owner", "wood").unwrap();

    assert!(!second.created);
    assert_eq!(second.donation, first.donation);
    assert_eq!(h.wallet.balance("owner", "coins"), 90);
    assert_eq!(h.wallet.update_count(), updates);
}

#[test]
fn test_item_deduction_failure_refunds_currency() {
    let h = funded();
    h.inventory.fail_next_consume();

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(h.wallet.balance("owner", "coins"), 100);
    assert_eq!(h.store.len(DONATIONS_COLLECTION), 0);
}

#[test]
fn test_insufficient_items_refunds_currency() {
    let h = Harness::new();
    h.wallet.set_balance("owner", "coins", 100);

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    assert!(matches!(err, EconomyError::FailedPrecondition(_)));
    assert_eq!(h.wallet.balance("owner", "coins"), 100);
}

#[test]
fn test_insufficient_currency_touches_nothing() {
    let h = Harness::new();
    h.wallet.set_balance("owner", "coins", 5);
    h.give_items("owner", "ticket", 1);

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    assert!(matches!(err, EconomyError::FailedPrecondition(_)));
    assert_eq!(h.wallet.balance("owner", "coins"), 5);
    assert_eq!(h.inventory.count("owner", "ticket"), 1);
}

#[test]
fn test_record_write_failure_unwinds_both_steps() {
    let h = funded();
    h.store.fail_writes(DONATIONS_COLLECTION);

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    assert!(matches!(err, EconomyError::Internal(_)));
    assert_eq!(h.wallet.balance("owner", "coins"), 100);
    assert_eq!(h.inventory.count("owner", "ticket"), 1);
}

#[test]
fn test_failed_refund_is_reported() {
    let h = funded();
    h.inventory.fail_next_consume();
    // The deduction goes through, the refund does not.
    h.wallet.fail_update_after(1);

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    match &err {
        EconomyError::PartiallyCompensated { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("refund currencies"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(h.wallet.balance("owner", "coins"), 90);
}

#[test]
fn test_item_costs_need_inventory() {
    let h = Harness::without_inventory();
    h.wallet.set_balance("owner", "coins", 100);

    let err = h
        .economy
        .donation_request(&Context::background(), "owner", "wood")
        .unwrap_err();

    assert!(matches!(err, EconomyError::FailedPrecondition(_)));
    assert_eq!(h.wallet.balance("owner", "coins"), 100);
}

#[test]
fn test_unknown_donation_and_empty_ids() {
    let h = funded();
    let ctx = Context::background();

    assert!(matches!(
        h.economy.donation_request(&ctx, "owner", "gold"),
        Err(EconomyError::NotFound(_))
    ));
    assert!(matches!(
        h.economy.donation_request(&ctx, "", "wood"),
        Err(EconomyError::InvalidArgument(_))
    ));
}

#[test]
fn test_give_clamps_to_max_count() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();

    let first = h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap();
    assert_eq!(first.donation.count, 1);
    assert!(first.contributor_reward.is_none());
    assert_eq!(h.wallet.balance("alice", "coins"), 95);

    let capped = h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap_err();
    assert!(matches!(capped, EconomyError::FailedPrecondition(_)));

    let fulfilling = h.economy.donation_give(&ctx, "owner", "wood", "bob").unwrap();
    assert_eq!(fulfilling.donation.count, 2);
    assert!(fulfilling.contributor_reward.is_some());
    assert_eq!(h.wallet.balance("bob", "gems"), 3);

    let late = h.economy.donation_give(&ctx, "owner", "wood", "carol").unwrap_err();
    assert!(matches!(late, EconomyError::FailedPrecondition(_)));
    assert_eq!(h.wallet.balance("carol", "coins"), 100);

    let stored = &h.economy.donation_get(&ctx, &["owner".to_string()]).unwrap()["owner"];
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].count, 2);
    assert_eq!(stored[0].contributors.len(), 2);
}

#[test]
fn test_give_rejects_self_and_missing_records() {
    let h = funded();
    let ctx = Context::background();

    assert!(matches!(
        h.economy.donation_give(&ctx, "owner", "wood", "owner"),
        Err(EconomyError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.economy.donation_give(&ctx, "owner", "wood", "alice"),
        Err(EconomyError::NotFound(_))
    ));
}

#[test]
fn test_give_write_failure_refunds_contributor() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    h.store.fail_writes(DONATIONS_COLLECTION);

    let err = h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap_err();

    assert!(matches!(err, EconomyError::Internal(_)));
    assert_eq!(h.wallet.balance("alice", "coins"), 100);
}

#[test]
fn test_give_losing_a_race_refunds_contributor() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    h.store.race_next_write(DONATIONS_COLLECTION);

    let err = h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap_err();

    assert!(matches!(err, EconomyError::ConcurrentModification { .. }));
    assert_eq!(h.wallet.balance("alice", "coins"), 100);
    let listed = h.economy.donation_get(&ctx, &["owner".to_string()]).unwrap();
    assert_eq!(listed["owner"][0].count, 0);

    let retried = h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap();
    assert_eq!(retried.donation.count, 1);
    assert_eq!(h.wallet.balance("alice", "coins"), 95);
}

#[test]
fn test_claim_rolls_once_per_unit() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap();
    h.economy.donation_give(&ctx, "owner", "wood", "bob").unwrap();

    let mut claims = BTreeMap::new();
    claims.insert("wood".to_string(), ClaimRequest::All);
    let claimed = h.economy.donation_claim(&ctx, "owner", &claims).unwrap();

    let donation = &claimed["wood"];
    assert_eq!(donation.claim_count, 2);
    assert_eq!(donation.recipient_rewards.len(), 2);
    assert!(donation.contributors.iter().all(|c| c.claim_count == 1));
    assert_eq!(h.inventory.count("owner", "wood"), 2);

    // Nothing left: the donation is skipped, the call still succeeds.
    let again = h.economy.donation_claim(&ctx, "owner", &claims).unwrap();
    assert!(again.is_empty());
    assert_eq!(h.inventory.count("owner", "wood"), 2);
}

#[test]
fn test_claim_by_donor_is_capped() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    h.economy.donation_give(&ctx, "owner", "wood", "alice").unwrap();
    h.economy.donation_give(&ctx, "owner", "wood", "bob").unwrap();

    let mut donors = BTreeMap::new();
    donors.insert("alice".to_string(), 5);
    let mut claims = BTreeMap::new();
    claims.insert("wood".to_string(), ClaimRequest::Donors(donors));
    claims.insert("gold".to_string(), ClaimRequest::All);

    let claimed = h.economy.donation_claim(&ctx, "owner", &claims).unwrap();

    assert_eq!(claimed.len(), 1);
    let donation = &claimed["wood"];
    assert_eq!(donation.claim_count, 1);
    assert_eq!(donation.contributor("alice").unwrap().claim_count, 1);
    assert_eq!(donation.contributor("bob").unwrap().claim_count, 0);
    assert_eq!(h.inventory.count("owner", "wood"), 1);
}

#[test]
fn test_expired_donation_can_be_requested_again() {
    let h = funded();
    let ctx = Context::background();
    h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    h.give_items("owner", "ticket", 1);

    h.clock.advance(3_600);
    let listed = h.economy.donation_get(&ctx, &["owner".to_string()]).unwrap();
    assert!(listed["owner"].is_empty());
    assert!(matches!(
        h.economy.donation_give(&ctx, "owner", "wood", "alice"),
        Err(EconomyError::FailedPrecondition(_))
    ));

    let renewed = h.economy.donation_request(&ctx, "owner", "wood").unwrap();
    assert!(renewed.created);
    assert_eq!(renewed.donation.count, 0);
    assert_eq!(h.wallet.balance("owner", "coins"), 80);
}

#[test]
fn test_free_donation_never_expires() {
    let h = Harness::without_inventory();
    let ctx = Context::background();

    let outcome = h.economy.donation_request(&ctx, "owner", "free_hug").unwrap();
    assert_eq!(outcome.donation.expire_time_sec, 0);

    h.clock.advance(10 * 365 * 86_400);
    let listed = h.economy.donation_get(&ctx, &["owner".to_string()]).unwrap();
    assert_eq!(listed["owner"].len(), 1);
}

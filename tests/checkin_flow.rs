//! Check-in request path and end-to-end settlement tests.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use checkin_rewards::blockchain::{TokenIssuer, Wallet};
use checkin_rewards::checkin::orchestrator::{CHALLENGE_EXPIRED, PAYMENT_VERIFIED};
use checkin_rewards::checkin::{CheckInError, CheckInService, RecordOutcome, SettlementWorker};
use checkin_rewards::config::CheckInConfig;
use checkin_rewards::gateway::{CheckInGrant, GatewayError, VerifyOutcome};
use checkin_rewards::ledger::{
    AccountStore, CheckInStatus, FileAccounts, FileLedger, LedgerStore,
};
use checkin_rewards::lifecycle::ShutdownSignal;
use common::*;

fn service_with(
    ledger: &Arc<FileLedger>,
    accounts: &Arc<FileAccounts>,
    gateway: &ScriptedGateway,
    config: CheckInConfig,
) -> CheckInService {
    CheckInService::new(ledger.clone(), accounts.clone(), Arc::new(gateway.clone()), config)
}

fn service(ledger: &Arc<FileLedger>, accounts: &Arc<FileAccounts>, gateway: &ScriptedGateway) -> CheckInService {
    service_with(ledger, accounts, gateway, checkin_config())
}

#[tokio::test]
async fn test_check_in_creates_pending_record() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);

    let ticket = service.check_in("u1").await.unwrap();
    assert!(!ticket.reused);
    assert_eq!(ticket.challenge.order_id, "order-0");
    assert_eq!(ticket.challenge.price_amount, "1.0");
    assert_eq!(ticket.record.status, CheckInStatus::PendingPayment);
    assert_eq!(ticket.record.order_id.as_deref(), Some("order-0"));

    let payment = ticket.record.payment.clone().unwrap();
    assert_eq!(payment.token_symbol, "USDT");
    assert_eq!(payment.blockchain_name, "polygon");
    assert!(payment.expires_at > Utc::now());

    let stored = ledger.find_by_order_id("order-0").await.unwrap().unwrap();
    assert_eq!(stored.id, ticket.record.id);
}

#[tokio::test]
async fn test_outstanding_challenge_is_reused() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);

    let first = service.check_in("u1").await.unwrap();
    let second = service.check_in("u1").await.unwrap();

    assert!(second.reused);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(second.challenge.order_id, first.challenge.order_id);
    assert_eq!(second.challenge.payment_address, first.challenge.payment_address);
    assert_eq!(gateway.check_in_calls(), 1);
}

#[tokio::test]
async fn test_expired_challenge_is_superseded() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    gateway.push_grant(Ok(CheckInGrant::PaymentRequired(challenge("ord-old", &expires_in(-5)))));
    let service = service(&ledger, &accounts, &gateway);

    let old = service.check_in("u1").await.unwrap();
    let fresh = service.check_in("u1").await.unwrap();

    assert!(!fresh.reused);
    assert_ne!(fresh.record.id, old.record.id);
    assert_eq!(fresh.challenge.order_id, "order-0");
    assert_eq!(gateway.check_in_calls(), 2);

    let old = ledger.get(old.record.id).await.unwrap().unwrap();
    assert_eq!(old.status, CheckInStatus::PaymentFailed);
    assert_eq!(old.failure_reason.as_deref(), Some(CHALLENGE_EXPIRED));

    let active = ledger.find_active_by_user("u1").await.unwrap().unwrap();
    assert_eq!(active.id, fresh.record.id);
}

#[tokio::test]
async fn test_paid_or_issuing_record_blocks_new_check_in() {
    for status in [CheckInStatus::PaymentSuccess, CheckInStatus::Issuing] {
        let (ledger, accounts) = stores_with_user("u1");
        let gateway = ScriptedGateway::new();
        seed_record(&ledger, "u1", "ord-1", status, None).await;
        let service = service(&ledger, &accounts, &gateway);

        let err = service.check_in("u1").await.unwrap_err();
        assert!(matches!(err, CheckInError::InProgress), "{status}");
        assert_eq!(gateway.check_in_calls(), 0);
    }
}

#[tokio::test]
async fn test_already_checked_in_today() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    gateway.push_grant(Ok(CheckInGrant::AlreadyDone));
    let service = service(&ledger, &accounts, &gateway);

    let err = service.check_in("u1").await.unwrap_err();
    assert!(matches!(err, CheckInError::AlreadyCheckedIn));
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_unknown_user_rejected_before_gateway() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);

    let err = service.check_in("nobody").await.unwrap_err();
    assert!(matches!(err, CheckInError::UserNotFound(ref id) if id == "nobody"));
    assert_eq!(gateway.check_in_calls(), 0);
}

#[tokio::test]
async fn test_gateway_failure_creates_no_record() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    gateway.push_grant(Err(gateway_error("connection refused")));
    let service = service(&ledger, &accounts, &gateway);

    let err = service.check_in("u1").await.unwrap_err();
    assert!(matches!(err, CheckInError::Gateway(GatewayError::Transport(_))));
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_malformed_expiry_uses_fallback() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    gateway.push_grant(Ok(CheckInGrant::PaymentRequired(challenge("ord-1", "tomorrow-ish"))));
    let service = service(&ledger, &accounts, &gateway);

    let ticket = service.check_in("u1").await.unwrap();
    let expires_at = ticket.record.payment.unwrap().expires_at;
    let now = Utc::now();
    assert!(expires_at > now + ChronoDuration::minutes(29));
    assert!(expires_at <= now + ChronoDuration::minutes(30));
}

#[tokio::test]
async fn test_verify_pending_then_settled() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);
    let ticket = service.check_in("u1").await.unwrap();
    let order_id = ticket.challenge.order_id;

    let (paid, message) = service.verify_check_in(&order_id, "u1").await.unwrap();
    assert!(!paid);
    assert_eq!(message, "PENDING_CONFIRMATION");
    let stored = ledger.get(ticket.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::PendingPayment);

    gateway.push_verify(Ok(VerifyOutcome::Settled {
        payer_tx_hash: Some("0xpayer".to_string()),
    }));
    let (paid, message) = service.verify_check_in(&order_id, "u1").await.unwrap();
    assert!(paid);
    assert_eq!(message, PAYMENT_VERIFIED);

    let stored = ledger.get(ticket.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::PaymentSuccess);
    assert_eq!(
        stored.payment.unwrap().payer_tx_hash.as_deref(),
        Some("0xpayer")
    );

    // Already paid: answered locally
    let (paid, _) = service.verify_check_in(&order_id, "u1").await.unwrap();
    assert!(paid);
    assert_eq!(gateway.verify_calls(), 2);
    assert!(gateway.state.lock().unwrap().settled.is_empty());
}

#[tokio::test]
async fn test_verify_unpaid_messages() {
    let cases = [
        (VerifyOutcome::NotFound, "NO_TRANSACTION"),
        (VerifyOutcome::InsufficientAmount, "INSUFFICIENT_AMOUNT"),
        (VerifyOutcome::Rejected("ORDER_EXPIRED".to_string()), "ORDER_EXPIRED"),
    ];
    for (outcome, expected) in cases {
        let (ledger, accounts) = stores_with_user("u1");
        let gateway = ScriptedGateway::new();
        let service = service(&ledger, &accounts, &gateway);
        let ticket = service.check_in("u1").await.unwrap();

        gateway.push_verify(Ok(outcome));
        let (paid, message) = service
            .verify_check_in(&ticket.challenge.order_id, "u1")
            .await
            .unwrap();
        assert!(!paid);
        assert_eq!(message, expected);

        let stored = ledger.get(ticket.record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CheckInStatus::PendingPayment);
    }
}

#[tokio::test]
async fn test_verify_rejections() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);
    let ticket = service.check_in("u1").await.unwrap();

    let err = service.verify_check_in("missing", "u1").await.unwrap_err();
    assert!(matches!(err, CheckInError::RecordNotFound(_)));

    let err = service
        .verify_check_in(&ticket.challenge.order_id, "u2")
        .await
        .unwrap_err();
    assert!(matches!(err, CheckInError::Unauthorized));

    let mut failed = ticket.record.clone();
    failed.status = CheckInStatus::PaymentFailed;
    ledger.update(&failed).await.unwrap();
    let err = service
        .verify_check_in(&ticket.challenge.order_id, "u1")
        .await
        .unwrap_err();
    assert!(matches!(err, CheckInError::InvalidStatus(CheckInStatus::PaymentFailed)));

    assert_eq!(gateway.verify_calls(), 0);
}

#[tokio::test]
async fn test_verify_throttled_locally() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let config = CheckInConfig {
        verify_window_secs: 30,
        ..checkin_config()
    };
    let service = service_with(&ledger, &accounts, &gateway, config);
    let ticket = service.check_in("u1").await.unwrap();
    let order_id = ticket.challenge.order_id;

    service.verify_check_in(&order_id, "u1").await.unwrap();
    let err = service.verify_check_in(&order_id, "u1").await.unwrap_err();
    match err {
        CheckInError::RateLimited { retry_after } => {
            assert!(retry_after.as_secs() <= 30);
            assert!(!retry_after.is_zero());
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(gateway.verify_calls(), 1);
}

#[tokio::test]
async fn test_settle_after_verify() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let config = CheckInConfig {
        settle_after_verify: true,
        ..checkin_config()
    };
    let service = service_with(&ledger, &accounts, &gateway, config);
    let ticket = service.check_in("u1").await.unwrap();

    gateway.push_verify(Ok(VerifyOutcome::Settled { payer_tx_hash: None }));
    service
        .verify_check_in(&ticket.challenge.order_id, "u1")
        .await
        .unwrap();
    assert_eq!(
        gateway.state.lock().unwrap().settled,
        vec![ticket.challenge.order_id.clone()]
    );
}

#[tokio::test]
async fn test_history_and_summary() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);

    for i in 0..3 {
        let record = seed_record(
            &ledger,
            "u1",
            &format!("ord-{i}"),
            CheckInStatus::PaymentSuccess,
            None,
        )
        .await;
        assert!(ledger.mark_success(record.id, "0xabc", 10).await.unwrap());
        accounts.credit_reward("u1", 10, Utc::now()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let page = service.my_check_ins("u1", 1, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].order_id.as_deref(), Some("ord-2"));
    assert_eq!(page.records[1].order_id.as_deref(), Some("ord-1"));

    let page = service.my_check_ins("u1", 2, 2).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].order_id.as_deref(), Some("ord-0"));

    let page = service.my_check_ins("u1", 0, 1_000).await.unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 100);

    let summary = service.summary("u1").await.unwrap();
    assert!(summary.checked_in_today);
    assert_eq!(summary.total_rewards, 30);
    assert_eq!(summary.total_check_ins, 3);
    assert!(summary.last_check_in_at.is_some());
    assert_eq!(summary.daily_stats.len(), 1);
    assert_eq!(summary.daily_stats[0].date, Utc::now().date_naive());
    assert_eq!(summary.daily_stats[0].tokens, 30);

    let err = service.summary("nobody").await.unwrap_err();
    assert!(matches!(err, CheckInError::UserNotFound(_)));
}

#[tokio::test]
async fn test_check_in_settles_end_to_end() {
    let (ledger, accounts) = stores_with_user("u1");
    let gateway = ScriptedGateway::new();
    let service = service(&ledger, &accounts, &gateway);

    let chain = MockChain::new();
    let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, 137).unwrap();
    let issuer = TokenIssuer::new(
        Arc::new(chain.clone()),
        wallet,
        fast_chain_config(),
        ShutdownSignal::never(),
    )
    .unwrap();
    let worker = SettlementWorker::new(
        ledger.clone(),
        accounts.clone(),
        Arc::new(issuer),
        checkin_config(),
        ShutdownSignal::never(),
    );

    let ticket = service.check_in("u1").await.unwrap();
    gateway.push_verify(Ok(VerifyOutcome::Settled { payer_tx_hash: None }));
    let (paid, _) = service
        .verify_check_in(&ticket.challenge.order_id, "u1")
        .await
        .unwrap();
    assert!(paid);

    let report = worker.tick().await;
    assert_eq!(report.outcomes, vec![(ticket.record.id, RecordOutcome::Succeeded)]);
    assert_eq!(chain.submitted().len(), 1);

    let stored = ledger.get(ticket.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Success);
    assert_eq!(stored.reward_amount, 10);

    let summary = service.summary("u1").await.unwrap();
    assert!(summary.checked_in_today);
    assert_eq!(summary.total_rewards, 10);

    // The gateway now reports today's check-in as done
    gateway.push_grant(Ok(CheckInGrant::AlreadyDone));
    let err = service.check_in("u1").await.unwrap_err();
    assert!(matches!(err, CheckInError::AlreadyCheckedIn));

    // Nothing is resubmitted on later ticks
    let report = worker.tick().await;
    assert!(report.outcomes.is_empty());
    assert_eq!(chain.submitted().len(), 1);
}

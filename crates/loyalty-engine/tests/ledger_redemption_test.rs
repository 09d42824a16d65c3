//! 积分账本与兑换流程集成测试

mod common;

use chrono::Duration;
use common::Engine;
use loyalty_engine::{
    Clock, LoyaltyError, OperatorRole, ParticipantKind, RedemptionStatus,
    repository::RedemptionRepository,
};

/// 给参与者入账 `reward` 积分
async fn credit(engine: &Engine, pid: i64, kind: ParticipantKind, reward: i64) {
    let code = engine.registry.create(kind, Some(reward)).await.unwrap();
    assert!(engine.scans.scan(pid, &code.code).await.unwrap().is_credited());
}

// ==================== 余额 ====================

#[tokio::test]
async fn test_scan_request_cancel_scenario() {
    let engine = Engine::new();
    let pid = engine.participant(1, Some(ParticipantKind::Electrician)).await;
    assert_eq!(engine.ledger.balance(pid, true).await.unwrap(), 0);

    let code = engine
        .registry
        .create(ParticipantKind::Electrician, None)
        .await
        .unwrap();
    assert!(engine.scans.scan(pid, &code.code).await.unwrap().is_credited());
    assert_eq!(engine.ledger.balance(pid, false).await.unwrap(), 50);

    let gift = engine.gift(30, None).await;
    let requested = engine.redemptions.request_gift(pid, gift).await.unwrap();
    assert_eq!(requested.balance, 20);
    assert_eq!(requested.request.status, RedemptionStatus::Pending);
    assert_eq!(requested.request.points_cost, 30);

    let cancelled = engine
        .redemptions
        .cancel(requested.request.id, pid)
        .await
        .unwrap();
    assert_eq!(cancelled.balance, 50);
    assert_eq!(cancelled.request.status, RedemptionStatus::CancelledByUser);
    assert_eq!(engine.ledger.balance(pid, false).await.unwrap(), 50);
}

#[tokio::test]
async fn test_fresh_recompute_is_stable() {
    let engine = Engine::new();
    let pid = engine.participant(2, Some(ParticipantKind::Seller)).await;
    credit(&engine, pid, ParticipantKind::Seller, 20).await;
    credit(&engine, pid, ParticipantKind::Seller, 15).await;

    engine.ledger.invalidate(pid).await;
    assert!(!engine.cache.contains(pid));
    let first = engine.ledger.balance(pid, true).await.unwrap();
    engine.ledger.invalidate(pid).await;
    let second = engine.ledger.balance(pid, true).await.unwrap();

    assert_eq!(first, 35);
    assert_eq!(first, second);
    assert!(engine.cache.contains(pid));
}

#[tokio::test]
async fn test_price_change_does_not_rewrite_history() {
    let engine = Engine::new();
    let pid = engine.participant(3, Some(ParticipantKind::Electrician)).await;
    credit(&engine, pid, ParticipantKind::Electrician, 100).await;

    let gift = engine.gift(40, None).await;
    engine.redemptions.request_gift(pid, gift).await.unwrap();
    engine.store.update_gift_cost(gift, 90).await.unwrap();

    assert_eq!(engine.ledger.balance(pid, true).await.unwrap(), 60);

    let err = engine.redemptions.request_gift(pid, gift).await.unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InsufficientPoints {
            required: 90,
            available: 60,
        }
    ));
}

#[tokio::test]
async fn test_leaderboard_orders_by_balance() {
    let engine = Engine::new();
    let low = engine.participant(10, Some(ParticipantKind::Seller)).await;
    let high = engine.participant(11, Some(ParticipantKind::Seller)).await;
    engine.participant(12, Some(ParticipantKind::Seller)).await;

    credit(&engine, low, ParticipantKind::Seller, 20).await;
    credit(&engine, high, ParticipantKind::Seller, 80).await;

    let board = engine.ledger.leaderboard(10).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].participant_id, high);
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[1].participant_id, low);
    assert_eq!(board[1].balance, 20);
}

// ==================== 申请与取消 ====================

#[tokio::test]
async fn test_cancel_window() {
    let engine = Engine::new();
    let pid = engine.participant(4, Some(ParticipantKind::Electrician)).await;
    credit(&engine, pid, ParticipantKind::Electrician, 100).await;
    let gift = engine.gift(10, None).await;

    let inside = engine.redemptions.request_gift(pid, gift).await.unwrap();
    let outside = engine.redemptions.request_gift(pid, gift).await.unwrap();
    assert_eq!(outside.balance, 80);

    engine.clock.advance(Duration::minutes(59));
    let ok = engine
        .redemptions
        .cancel(inside.request.id, pid)
        .await
        .unwrap();
    assert_eq!(ok.balance, 90);

    engine.clock.advance(Duration::minutes(2));
    let err = engine
        .redemptions
        .cancel(outside.request.id, pid)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::NotCancellable { .. }));
    assert_eq!(engine.ledger.balance(pid, true).await.unwrap(), 90);
}

#[tokio::test]
async fn test_request_guards() {
    let engine = Engine::new();
    let seller = engine.participant(5, Some(ParticipantKind::Seller)).await;
    let stranger = engine.participant(6, Some(ParticipantKind::Seller)).await;
    credit(&engine, seller, ParticipantKind::Seller, 20).await;

    let electrician_only = engine.gift(5, Some(ParticipantKind::Electrician)).await;
    assert!(matches!(
        engine.redemptions.request_gift(seller, electrician_only).await,
        Err(LoyaltyError::GiftNotAvailableForKind { .. })
    ));

    let expensive = engine.gift(25, None).await;
    assert!(matches!(
        engine.redemptions.request_gift(seller, expensive).await,
        Err(LoyaltyError::InsufficientPoints {
            required: 25,
            available: 20,
        })
    ));

    assert!(matches!(
        engine.redemptions.request_gift(seller, 9999).await,
        Err(LoyaltyError::GiftNotFound(9999))
    ));

    let cheap = engine.gift(5, None).await;
    let request = engine.redemptions.request_gift(seller, cheap).await.unwrap();
    // 只有申请人本人可以取消
    assert!(matches!(
        engine.redemptions.cancel(request.request.id, stranger).await,
        Err(LoyaltyError::RedemptionNotFound(_))
    ));
    assert_eq!(engine.redemptions.list_requests(seller).await.unwrap().len(), 1);
}

// ==================== 运营流转 ====================

#[tokio::test]
async fn test_operator_flow_with_role_gating() {
    let engine = Engine::new();
    let pid = engine.participant(7, Some(ParticipantKind::Electrician)).await;
    credit(&engine, pid, ParticipantKind::Electrician, 50).await;
    let gift = engine.gift(30, None).await;
    let id = engine
        .redemptions
        .request_gift(pid, gift)
        .await
        .unwrap()
        .request
        .id;

    assert!(matches!(
        engine
            .redemptions
            .operator_transition(id, OperatorRole::Agent, RedemptionStatus::Approved, None)
            .await,
        Err(LoyaltyError::PermissionDenied { .. })
    ));

    let approved = engine
        .redemptions
        .operator_transition(
            id,
            OperatorRole::CallCenter,
            RedemptionStatus::Approved,
            Some("ok".into()),
        )
        .await
        .unwrap();
    assert_eq!(approved.request.status, RedemptionStatus::Approved);
    assert!(approved.request.processed_at.is_some());
    assert_eq!(approved.balance, 20);

    // 已审批后不能再取消
    assert!(matches!(
        engine.redemptions.cancel(id, pid).await,
        Err(LoyaltyError::NotCancellable { .. })
    ));

    let sent = engine
        .redemptions
        .operator_transition(id, OperatorRole::CallCenter, RedemptionStatus::Sent, None)
        .await
        .unwrap();
    assert_eq!(sent.request.status, RedemptionStatus::Sent);

    let completed = engine
        .redemptions
        .operator_transition(id, OperatorRole::Agent, RedemptionStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(completed.request.status, RedemptionStatus::Completed);
    assert_eq!(completed.balance, 20);

    assert!(matches!(
        engine
            .redemptions
            .operator_transition(
                id,
                OperatorRole::Administrator,
                RedemptionStatus::Rejected,
                None,
            )
            .await,
        Err(LoyaltyError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_reject_refunds_cost() {
    let engine = Engine::new();
    let pid = engine.participant(8, Some(ParticipantKind::Seller)).await;
    credit(&engine, pid, ParticipantKind::Seller, 40).await;
    let gift = engine.gift(40, None).await;
    let id = engine
        .redemptions
        .request_gift(pid, gift)
        .await
        .unwrap()
        .request
        .id;

    assert!(matches!(
        engine
            .redemptions
            .operator_transition(id, OperatorRole::CallCenter, RedemptionStatus::Rejected, None)
            .await,
        Err(LoyaltyError::PermissionDenied { .. })
    ));

    let rejected = engine
        .redemptions
        .operator_transition(
            id,
            OperatorRole::Administrator,
            RedemptionStatus::Rejected,
            Some("缺货".into()),
        )
        .await
        .unwrap();
    assert_eq!(rejected.request.status, RedemptionStatus::Rejected);
    assert_eq!(rejected.request.admin_notes, "缺货");
    assert_eq!(rejected.balance, 40);
}

#[tokio::test]
async fn test_participant_confirmation() {
    let engine = Engine::new();
    let pid = engine.participant(9, Some(ParticipantKind::Electrician)).await;
    credit(&engine, pid, ParticipantKind::Electrician, 100).await;
    let gift = engine.gift(30, None).await;

    let first = engine.redemptions.request_gift(pid, gift).await.unwrap().request.id;
    let second = engine.redemptions.request_gift(pid, gift).await.unwrap().request.id;

    // 未发货时不能确认
    assert!(matches!(
        engine.redemptions.confirm_receipt(first, pid, true, None).await,
        Err(LoyaltyError::InvalidTransition { .. })
    ));

    for id in [first, second] {
        engine
            .redemptions
            .operator_transition(id, OperatorRole::CallCenter, RedemptionStatus::Sent, None)
            .await
            .unwrap();
    }

    let received = engine
        .redemptions
        .confirm_receipt(first, pid, true, Some("收到了".into()))
        .await
        .unwrap();
    assert_eq!(received.request.status, RedemptionStatus::Completed);
    assert!(received.request.user_confirmed);
    assert!(received.request.confirmed_at.is_some());
    assert_eq!(received.request.user_comment, "收到了");
    assert_eq!(received.balance, 40);

    let missing = engine
        .redemptions
        .confirm_receipt(second, pid, false, None)
        .await
        .unwrap();
    assert_eq!(missing.request.status, RedemptionStatus::NotReceived);
    assert!(!missing.request.user_confirmed);
    assert_eq!(missing.request.confirmed_at, Some(engine.clock.now()));
    assert_eq!(missing.balance, 70);
}

mod common;

use chrono::Duration;
use common::{actor, receipt, setup};
use wifi_credits::{
    domain::{NotificationKind, PaymentStatus, Role},
    error::AppError,
    repository::PaymentRepository,
};

#[tokio::test]
async fn test_approve_credits_owner_then_token_debits() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("maria", Role::User).await?;
    assert_eq!(t.balance(user.id).await?, 0);

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "2h", "SINPE-001", receipt("a"))
        .await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.duration_minutes, 120);
    assert!(payment.token.is_none());
    assert_eq!(t.blobs.len(), 1);

    let approved = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await?;
    assert_eq!(approved.status, PaymentStatus::Approved);
    assert_eq!(approved.processed_by, Some(admin.id));
    assert!(approved.approved_at.is_some());
    let token = approved.token.expect("approved payment carries a token");
    assert!(token.starts_with("WIFI-"));
    assert_eq!(t.balance(user.id).await?, 120);

    let issued = t.ctx.token_service.issue_token(user.id, 90, None).await?;
    assert_eq!(issued.token.duration_minutes, 90);
    assert_eq!(issued.balance_after, 30);
    assert_eq!(t.balance(user.id).await?, 30);

    let notifications = t.ctx.notification_service.list_for_user(user.id, 10).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::PaymentApproved);
    assert_eq!(notifications[0].from_user_id, Some(admin.id));

    Ok(())
}

#[tokio::test]
async fn test_reject_leaves_ledger_untouched() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("jose", Role::User).await?;
    t.grant(user.id, 45).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-002", receipt("b"))
        .await?;

    let rejected = t.ctx.payment_service
        .reject_payment(actor(&admin), payment.id, Some("  Blurry receipt ".to_string()))
        .await?;

    assert_eq!(rejected.status, PaymentStatus::Rejected);
    assert!(rejected.token.is_none());
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Blurry receipt"));
    assert!(rejected.rejected_at.is_some());
    assert_eq!(t.balance(user.id).await?, 45);

    // A rejected payment cannot be approved afterwards
    let err = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyProcessed(_)));
    assert_eq!(t.balance(user.id).await?, 45);

    Ok(())
}

#[tokio::test]
async fn test_second_approval_is_already_processed() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("lucia", Role::User).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-003", receipt("c"))
        .await?;

    let first = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await?;
    let err = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await.unwrap_err();

    assert!(matches!(err, AppError::AlreadyProcessed(_)));
    assert_eq!(t.balance(user.id).await?, 60);

    // The stored token is the one from the first approval
    let stored = t.ctx.payment_repo.find_by_id(payment.id).await?.unwrap();
    assert_eq!(stored.token, first.token);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_approvals_credit_once() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let other_admin = t.create_user("admin2", Role::Admin).await?;
    let user = t.create_user("pedro", Role::User).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "2h", "SINPE-004", receipt("d"))
        .await?;

    let mut handles = Vec::new();
    for approver in [actor(&admin), actor(&other_admin), actor(&admin), actor(&other_admin)] {
        let payments = t.ctx.payment_service.clone();
        let id = payment.id;
        handles.push(tokio::spawn(async move { payments.approve_payment(approver, id).await }));
    }

    let mut approved = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => approved += 1,
            Err(AppError::AlreadyProcessed(_)) => already += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(already, 3);
    assert_eq!(t.balance(user.id).await?, 120);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_receipt_accepted_once() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("lucia", Role::User).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let payments = t.ctx.payment_service.clone();
        let user_id = user.id;
        handles.push(tokio::spawn(async move {
            payments
                .submit_payment(user_id, "1h", &format!("SINPE-2{}", i), receipt("same"))
                .await
        }));
    }

    let mut accepted = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await? {
            Ok(payment) => accepted.push(payment),
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(conflicts, 7);
    // Losing submissions clean up their uploads
    assert_eq!(t.blobs.len(), 1);

    for payment in &accepted {
        t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await?;
    }
    assert_eq!(t.balance(user.id).await?, 60);

    Ok(())
}

#[tokio::test]
async fn test_rejected_receipt_can_be_resubmitted() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("tomas", Role::User).await?;

    let first = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-030", receipt("retry"))
        .await?;
    t.ctx.payment_service
        .reject_payment(actor(&admin), first.id, Some("blurry".to_string()))
        .await?;

    let second = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-031", receipt("retry"))
        .await?;
    assert_eq!(second.status, PaymentStatus::Pending);
    assert_eq!(second.receipt_sha256, first.receipt_sha256);

    Ok(())
}

#[tokio::test]
async fn test_failed_credit_keeps_payment_pending() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("ana", Role::User).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-005", receipt("e"))
        .await?;

    // The status update succeeds, then the balance update fails.
    sqlx::query(
        r#"
        CREATE TRIGGER fail_credit BEFORE UPDATE OF credits_minutes ON users
        BEGIN
            SELECT RAISE(ABORT, 'ledger unavailable');
        END
        "#
    )
    .execute(&t.pool)
    .await?;

    let result = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await;
    assert!(result.is_err());

    let stored = t.ctx.payment_repo.find_by_id(payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(stored.token.is_none());
    assert!(stored.approved_at.is_none());
    assert_eq!(t.balance(user.id).await?, 0);

    sqlx::query("DROP TRIGGER fail_credit").execute(&t.pool).await?;

    // Once the store recovers the payment can still be approved
    let approved = t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await?;
    assert_eq!(approved.status, PaymentStatus::Approved);
    assert_eq!(t.balance(user.id).await?, 60);

    Ok(())
}

#[tokio::test]
async fn test_non_admin_cannot_process_payments() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("carlos", Role::User).await?;
    let reporter = t.create_user("reporter", Role::Reporter).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-006", receipt("f"))
        .await?;

    for caller in [actor(&user), actor(&reporter)] {
        let err = t.ctx.payment_service.approve_payment(caller, payment.id).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));

        let err = t.ctx.payment_service.reject_payment(caller, payment.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));

        let err = t.ctx.payment_service.list_pending(caller).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    let stored = t.ctx.payment_repo.find_by_id(payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(t.balance(user.id).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_upload_failure_records_nothing() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("sofia", Role::User).await?;

    t.blobs.fail_uploads(true);
    let err = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-007", receipt("g"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UploadFailed(_)));
    assert!(t.ctx.payment_service.list_for_user(user.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_failed_insert_removes_uploaded_receipt() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("diego", Role::User).await?;

    sqlx::query(
        "CREATE TRIGGER fail_insert BEFORE INSERT ON payments BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&t.pool)
    .await?;

    let result = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-008", receipt("h"))
        .await;

    assert!(result.is_err());
    assert_eq!(t.blobs.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_submission_validation() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("elena", Role::User).await?;

    let err = t.ctx.payment_service
        .submit_payment(user.id, "unknown", "SINPE-009", receipt("i"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = t.ctx.payment_service
        .submit_payment(user.id, "1h", "   ", receipt("i"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-009", receipt("i"))
        .await?;

    // Same receipt bytes again
    let err = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-010", receipt("i"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn test_owner_and_admin_visibility() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let owner = t.create_user("owner", Role::User).await?;
    let stranger = t.create_user("stranger", Role::User).await?;

    let payment = t.ctx.payment_service
        .submit_payment(owner.id, "1h", "SINPE-011", receipt("j"))
        .await?;

    assert!(t.ctx.payment_service.get_payment(actor(&owner), payment.id).await.is_ok());
    assert!(t.ctx.payment_service.get_payment(actor(&admin), payment.id).await.is_ok());
    let err = t.ctx.payment_service.get_payment(actor(&stranger), payment.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    Ok(())
}

#[tokio::test]
async fn test_pending_queue_is_oldest_first() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("rosa", Role::User).await?;

    let first = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-012", receipt("k"))
        .await?;
    t.clock.advance(Duration::minutes(5));
    let second = t.ctx.payment_service
        .submit_payment(user.id, "1d", "SINPE-013", receipt("l"))
        .await?;

    let pending = t.ctx.payment_service.list_pending(actor(&admin)).await?;
    let ids: Vec<_> = pending.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    t.ctx.payment_service.approve_payment(actor(&admin), first.id).await?;
    let pending = t.ctx.payment_service.list_pending(actor(&admin)).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);

    Ok(())
}

#[tokio::test]
async fn test_watch_payment_sees_approval() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("tomas", Role::User).await?;
    let noise_user = t.create_user("noise", Role::User).await?;

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-014", receipt("m"))
        .await?;
    let other = t.ctx.payment_service
        .submit_payment(noise_user.id, "1h", "SINPE-015", receipt("n"))
        .await?;

    let (snapshot, mut subscription) = t.ctx.payment_service
        .watch_payment(actor(&user), payment.id)
        .await?;
    assert_eq!(snapshot.status, PaymentStatus::Pending);

    // Changes to other payments are filtered out
    t.ctx.payment_service.reject_payment(actor(&admin), other.id, None).await?;
    t.ctx.payment_service.approve_payment(actor(&admin), payment.id).await?;

    let update = tokio::time::timeout(std::time::Duration::from_secs(1), subscription.next())
        .await?
        .expect("feed is open");
    assert_eq!(update.id, payment.id);
    assert_eq!(update.status, PaymentStatus::Approved);

    drop(subscription);
    assert_eq!(t.ctx.payment_feed.subscriber_count(), 0);

    Ok(())
}

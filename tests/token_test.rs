mod common;

use common::setup;
use wifi_credits::{domain::Role, error::AppError, repository::TokenRepository};

#[tokio::test]
async fn test_overdraw_fails_without_mutation() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("valeria", Role::User).await?;
    t.grant(user.id, 30).await?;

    let err = t.ctx.token_service.issue_token(user.id, 50, None).await.unwrap_err();
    match err {
        AppError::InsufficientCredits { requested, available } => {
            assert_eq!(requested, 50);
            assert_eq!(available, 30);
        }
        other => panic!("expected InsufficientCredits, got {:?}", other),
    }

    assert_eq!(t.balance(user.id).await?, 30);
    assert!(t.ctx.token_service.list_tokens(user.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_balance_never_goes_negative() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("mateo", Role::User).await?;
    t.grant(user.id, 100).await?;

    let mut expected = 100;
    for minutes in [40, 70, 30, 10, 25, 20, 1] {
        match t.ctx.token_service.issue_token(user.id, minutes, None).await {
            Ok(issued) => {
                assert!(minutes <= expected);
                expected -= minutes;
                assert_eq!(issued.balance_after, expected);
            }
            Err(AppError::InsufficientCredits { available, .. }) => {
                assert!(minutes > expected);
                assert_eq!(available, expected);
            }
            Err(e) => return Err(e.into()),
        }
        let balance = t.balance(user.id).await?;
        assert!(balance >= 0);
        assert_eq!(balance, expected);
    }

    // 40 + 30 + 10 + 20 issued; 70, 25 and the last 1 refused
    assert_eq!(expected, 0);
    assert_eq!(t.ctx.token_service.list_tokens(user.id).await?.len(), 4);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_issuance_never_overdraws() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("isabel", Role::User).await?;
    t.grant(user.id, 100).await?;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let tokens = t.ctx.token_service.clone();
        let user_id = user.id;
        handles.push(tokio::spawn(async move { tokens.issue_token(user_id, 30, None).await }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => issued += 1,
            Err(AppError::InsufficientCredits { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(issued, 3);
    assert_eq!(t.balance(user.id).await?, 10);

    Ok(())
}

#[tokio::test]
async fn test_idempotency_key_replays_without_second_debit() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("andres", Role::User).await?;
    t.grant(user.id, 120).await?;

    let first = t.ctx.token_service
        .issue_token(user.id, 60, Some("checkout-42".to_string()))
        .await?;
    assert!(!first.replayed);
    assert_eq!(first.balance_after, 60);

    let again = t.ctx.token_service
        .issue_token(user.id, 60, Some(" checkout-42 ".to_string()))
        .await?;
    assert!(again.replayed);
    assert_eq!(again.token.id, first.token.id);
    assert_eq!(again.token.token_string, first.token.token_string);
    assert_eq!(t.balance(user.id).await?, 60);

    let stored = t.ctx.token_repo.find_by_token_string(&first.token.token_string).await?;
    assert_eq!(stored.map(|tok| tok.id), Some(first.token.id));

    Ok(())
}

#[tokio::test]
async fn test_invalid_requests() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("camila", Role::User).await?;
    t.grant(user.id, 60).await?;

    let err = t.ctx.token_service.issue_token(user.id, 0, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = t.ctx.token_service.issue_token(user.id, -5, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = t.ctx.token_service
        .issue_token(user.id, 10, Some("x".repeat(65)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = t.ctx.token_service
        .issue_token(uuid::Uuid::new_v4(), 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(t.balance(user.id).await?, 60);

    Ok(())
}

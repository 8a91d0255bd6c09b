mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use common::{receipt, setup, TestContext};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wifi_credits::{api, auth::JwtVerifier, domain::Role};

fn app(t: &TestContext) -> Router {
    api::create_app(t.ctx.clone(), Arc::new(t.settings.clone()))
}

fn bearer(t: &TestContext, id: Uuid, email: &str) -> String {
    let verifier = JwtVerifier::new(&t.settings.auth.jwt_secret, t.settings.auth.jwt_issuer.clone());
    format!("Bearer {}", verifier.issue(id, email, Duration::hours(1)).unwrap())
}

async fn send(app: Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, body))
}

fn json_request(method: &str, uri: &str, auth: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, auth: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() -> anyhow::Result<()> {
    let t = setup().await?;
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let (status, body) = send(app(&t), request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    Ok(())
}

#[tokio::test]
async fn test_auth_is_required() -> anyhow::Result<()> {
    let t = setup().await?;

    let request = Request::builder().uri("/api/users/me").body(Body::empty())?;
    let (status, body) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = send(app(&t), get_request("/api/users/me", "Bearer not-a-jwt")).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid identity, but not registered yet
    let auth = bearer(&t, Uuid::new_v4(), "new@example.com");
    let (status, _) = send(app(&t), get_request("/api/users/me", &auth)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn test_register_then_me() -> anyhow::Result<()> {
    let t = setup().await?;
    let id = Uuid::new_v4();
    let auth = bearer(&t, id, "nuevo@example.com");

    let (status, body) = send(
        app(&t),
        json_request("POST", "/api/users/register", &auth, json!({ "username": "nuevo" })),
    ).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], id.to_string());
    assert_eq!(body["role"], "User");

    let (status, body) = send(app(&t), get_request("/api/users/me", &auth)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "nuevo");
    assert_eq!(body["credits_minutes"], 0);

    let (status, _) = send(
        app(&t),
        json_request("POST", "/api/users/register", &auth, json!({ "username": "nuevo2" })),
    ).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn test_token_issuance_over_http() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("buyer", Role::User).await?;
    t.grant(user.id, 30).await?;
    let auth = bearer(&t, user.id, &user.email);

    let (status, body) = send(
        app(&t),
        json_request("POST", "/api/tokens", &auth, json!({ "minutes": 50 })),
    ).await?;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "insufficient_credits");
    assert_eq!(t.balance(user.id).await?, 30);

    let request = Request::builder()
        .method("POST")
        .uri("/api/tokens")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .header("Idempotency-Key", "order-1")
        .body(Body::from(json!({ "minutes": 20 }).to_string()))?;
    let (status, body) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["balance_after"], 10);
    assert_eq!(body["token"]["duration_minutes"], 20);

    let request = Request::builder()
        .method("POST")
        .uri("/api/tokens")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .header("Idempotency-Key", "order-1")
        .body(Body::from(json!({ "minutes": 20 }).to_string()))?;
    let (status, body) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], true);
    assert_eq!(t.balance(user.id).await?, 10);

    let (status, body) = send(app(&t), get_request("/api/tokens", &auth)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    Ok(())
}

#[tokio::test]
async fn test_multipart_submission_and_admin_approval() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("client", Role::User).await?;
    let user_auth = bearer(&t, user.id, &user.email);
    let admin_auth = bearer(&t, admin.id, &admin.email);

    let boundary = "X-WIFI-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"package_id\"\r\n\r\n2h\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"sinpe_id\"\r\n\r\nSINPE-77\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"receipt\"; filename=\"voucher.png\"\r\n\
         Content-Type: image/png\r\n\r\nfake-png-data\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/payments")
        .header(header::AUTHORIZATION, &user_auth)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))?;

    let (status, body) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["duration_minutes"], 120);
    let payment_id = body["id"].as_str().unwrap_or_default().to_string();

    let approve_uri = format!("/api/admin/payments/{}/approve", payment_id);

    let (status, _) = send(app(&t), json_request("POST", &approve_uri, &user_auth, json!({}))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(app(&t), get_request("/api/admin/payments/pending", &admin_auth)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, body) = send(app(&t), json_request("POST", &approve_uri, &admin_auth, json!({}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Approved");
    assert!(body["token"].as_str().unwrap_or_default().starts_with("WIFI-"));

    let (status, body) = send(app(&t), json_request("POST", &approve_uri, &admin_auth, json!({}))).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_processed");

    assert_eq!(t.balance(user.id).await?, 120);

    Ok(())
}

#[tokio::test]
async fn test_truncated_multipart_field_is_bad_request() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("cutoff", Role::User).await?;
    let auth = bearer(&t, user.id, &user.email);

    // The package_id field never reaches its closing boundary
    let boundary = "X-WIFI-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"package_id\"\r\n\r\n2h",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/payments")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))?;

    let (status, body) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert!(t.ctx.payment_service.list_for_user(user.id).await?.is_empty());
    assert_eq!(t.blobs.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_referral_cooldown_over_http() -> anyhow::Result<()> {
    let t = setup().await?;
    let user = t.create_user("friendly", Role::User).await?;
    let auth = bearer(&t, user.id, &user.email);

    let referral = json!({
        "referred_email": "amigo@example.com",
        "referred_name": "Amigo",
        "relationship": "friend"
    });

    let (status, _) = send(app(&t), json_request("POST", "/api/referrals", &auth, referral.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(app(&t), json_request("POST", "/api/referrals", &auth, referral)).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "cooldown_active");

    let (status, body) = send(app(&t), get_request("/api/referrals/eligibility", &auth)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["strike_count"], 1);
    assert_eq!(body["state"]["state"], "warned");

    Ok(())
}

#[tokio::test]
async fn test_payment_rejection_over_http_notifies_owner() -> anyhow::Result<()> {
    let t = setup().await?;
    let admin = t.create_user("admin", Role::Admin).await?;
    let user = t.create_user("owner", Role::User).await?;
    let admin_auth = bearer(&t, admin.id, &admin.email);
    let user_auth = bearer(&t, user.id, &user.email);

    let payment = t.ctx.payment_service
        .submit_payment(user.id, "1h", "SINPE-88", receipt("http"))
        .await?;

    let uri = format!("/api/admin/payments/{}/reject", payment.id);
    let (status, body) = send(
        app(&t),
        json_request("POST", &uri, &admin_auth, json!({ "reason": "Amount does not match" })),
    ).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Rejected");

    let (status, body) = send(app(&t), get_request("/api/notifications", &user_auth)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["kind"], "PaymentRejected");
    let notification_id = body[0]["id"].as_str().unwrap_or_default().to_string();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/notifications/{}/read", notification_id))
        .header(header::AUTHORIZATION, &user_auth)
        .body(Body::empty())?;
    let (status, _) = send(app(&t), request).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(t.balance(user.id).await?, 0);

    Ok(())
}

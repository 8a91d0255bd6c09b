#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;
use wifi_credits::{
    config::Settings,
    domain::{codes::generate_referral_code, Actor, CreateUserRequest, ReceiptUpload, Role, User},
    error::{AppError, Result},
    service::{clock::{Clock, ManualClock}, ServiceContext},
    storage::BlobStore,
};

/// In-memory blob store that can be told to fail.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, usize>>,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, folder: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::UploadFailed("bucket unavailable".to_string()));
        }
        let url = format!("memory://{}/{}-{}", folder, Uuid::new_v4(), filename);
        self.objects.lock().unwrap().insert(url.clone(), bytes.len());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(url);
        Ok(())
    }
}

pub struct TestContext {
    pub pool: SqlitePool,
    pub ctx: Arc<ServiceContext>,
    pub clock: Arc<ManualClock>,
    pub blobs: Arc<MemoryBlobStore>,
    pub settings: Settings,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub async fn setup() -> anyhow::Result<TestContext> {
    setup_with(Settings::default()).await
}

pub async fn setup_with(settings: Settings) -> anyhow::Result<TestContext> {
    // One connection: every connection to :memory: is a separate database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let clock = Arc::new(ManualClock::new(start_time()));
    let blobs = Arc::new(MemoryBlobStore::default());

    let ctx = Arc::new(ServiceContext::new(
        pool.clone(),
        blobs.clone(),
        clock.clone(),
        &settings,
    )?);

    Ok(TestContext { pool, ctx, clock, blobs, settings })
}

impl TestContext {
    pub async fn create_user(&self, username: &str, role: Role) -> anyhow::Result<User> {
        let id = Uuid::new_v4();
        let user = self.ctx.user_repo.create(CreateUserRequest {
            id,
            email: format!("{}@example.com", username),
            username: username.to_string(),
            role,
            referral_code: generate_referral_code(id),
        }, self.clock.now()).await?;
        Ok(user)
    }

    pub async fn balance(&self, user_id: Uuid) -> anyhow::Result<i64> {
        Ok(self.ctx.ledger_service.balance(user_id).await?)
    }

    pub async fn grant(&self, user_id: Uuid, minutes: i64) -> anyhow::Result<i64> {
        Ok(self.ctx.ledger_service.increment(user_id, minutes).await?)
    }
}

pub fn actor(user: &User) -> Actor {
    Actor::from(user)
}

pub fn receipt(tag: &str) -> ReceiptUpload {
    ReceiptUpload {
        filename: "receipt.png".to_string(),
        bytes: format!("png-bytes-{}", tag).into_bytes(),
    }
}

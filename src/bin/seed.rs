use clap::Parser;
use fake::{
    faker::{internet::en::SafeEmail, name::en::FirstName},
    Fake,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;
use wifi_credits::{
    auth::JwtVerifier,
    config::Settings,
    domain::{codes::generate_referral_code, CreateUserRequest, NewPayment, PackageCatalog, Role},
    repository::{
        PaymentRepository, SqlitePaymentRepository, SqliteUserRepository, UserRepository,
    },
};

/// Fills a database with an admin, demo users and a pending payment queue.
#[derive(Parser, Debug)]
#[command(name = "seed")]
struct Args {
    /// Database URL; defaults to the configured one.
    #[arg(long)]
    database_url: Option<String>,

    /// Number of demo users to create.
    #[arg(long, default_value_t = 5)]
    users: usize,

    /// Pending payments to create per demo user.
    #[arg(long, default_value_t = 1)]
    payments_per_user: usize,

    /// Starting balance of each demo user, in minutes.
    #[arg(long, default_value_t = 120)]
    credits: i64,

    #[arg(long, default_value = "admin@wifi-credits.local")]
    admin_email: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let settings = Settings::new().unwrap_or_default();

    println!("🌱 Starting database seeding...");

    let database_url = args.database_url.clone().unwrap_or_else(|| settings.database.url.clone());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let user_repo = SqliteUserRepository::new(db_pool.clone());
    let payment_repo = SqlitePaymentRepository::new(db_pool.clone());
    let catalog = PackageCatalog::from_config(&settings.packages)?;
    let verifier = JwtVerifier::new(&settings.auth.jwt_secret, settings.auth.jwt_issuer.clone());
    let now = chrono::Utc::now();

    println!("👥 Creating users...");

    let admin_id = Uuid::new_v4();
    let admin = user_repo.create(CreateUserRequest {
        id: admin_id,
        email: args.admin_email.clone(),
        username: "admin".to_string(),
        role: Role::Admin,
        referral_code: generate_referral_code(admin_id),
    }, now).await?;

    let admin_token = verifier.issue(admin.id, &admin.email, chrono::Duration::days(30))?;
    println!("  ✅ Created admin {} ({})", admin.email, admin.id);

    let mut demo_users = Vec::with_capacity(args.users);
    for i in 0..args.users {
        let first: String = FirstName().fake();
        let username: String = format!("{}_{}", first, i)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(20)
            .collect::<String>()
            .to_lowercase();
        let email = format!("{}.{}", i, SafeEmail().fake::<String>());
        let id = Uuid::new_v4();

        let user = user_repo.create(CreateUserRequest {
            id,
            email,
            username,
            role: Role::User,
            referral_code: generate_referral_code(id),
        }, now).await?;

        if args.credits > 0 {
            user_repo.increment_credits(user.id, args.credits, now).await?;
        }

        demo_users.push(user);
    }

    println!("  ✅ Created {} demo users with {} minutes each", demo_users.len(), args.credits);

    println!("💳 Creating pending payments...");

    let packages = catalog.list();
    let mut created = 0;
    for user in &demo_users {
        for _ in 0..args.payments_per_user {
            let Some(package) = packages.get(rand::thread_rng().gen_range(0..packages.len().max(1))) else {
                break;
            };

            let receipt: [u8; 16] = rand::thread_rng().gen();
            payment_repo.create(NewPayment {
                user_id: user.id,
                package_id: package.id.clone(),
                package_name: package.name.clone(),
                price: package.price,
                duration_minutes: package.duration_minutes,
                sinpe_id: format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u32)),
                receipt_image_url: format!(
                    "{}/uploads/receipts/{}/{}.png",
                    settings.storage.public_base_url.trim_end_matches('/'),
                    user.id,
                    Uuid::new_v4()
                ),
                receipt_sha256: hex::encode(Sha256::digest(receipt)),
                created_at: now,
            }).await?;
            created += 1;
        }
    }

    println!("  ✅ Created {} pending payments", created);

    println!("\n✨ Database seeding complete!");
    println!("\n📝 Admin bearer token (30 days):\n  {}", admin_token);
    for user in demo_users.iter().take(3) {
        let token = verifier.issue(user.id, &user.email, chrono::Duration::days(30))?;
        println!("  {} ({}): {}", user.username, user.email, token);
    }

    Ok(())
}

// src/main.rs

use std::{sync::Arc, time::Duration};

use exam_engine::{
    ExamEngine,
    config::Config,
    models::{
        exam::{DifficultyDistribution, Exam, ExamConfiguration},
        question::{Difficulty, QuestionSnapshot, QuestionType},
    },
    repository::{
        AccessPolicy, ExamStore, PurchaseAccess, QuestionRepository,
        memory::{InMemoryQuestionRepository, InMemoryStore},
        postgres::{PgQuestionRepository, PgStore},
    },
    routes,
    state::AppState,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env included)
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let (store, repository): (Arc<dyn ExamStore>, Arc<dyn QuestionRepository>) =
        match &config.database_url {
            Some(url) => {
                let pool = connect(url).await;

                tracing::info!("Running migrations...");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Migrations applied successfully.");

                (
                    Arc::new(PgStore::new(pool.clone())),
                    Arc::new(PgQuestionRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store with demo data");
                let store = InMemoryStore::new();
                store.insert_exam(demo_exam());
                (
                    Arc::new(store),
                    Arc::new(InMemoryQuestionRepository::new(demo_questions())),
                )
            }
        };

    let access: Arc<dyn AccessPolicy> = Arc::new(PurchaseAccess::new(store.clone()));
    let engine = Arc::new(ExamEngine::new(
        store,
        repository,
        access,
        config.engine_config(),
    ));

    spawn_expiry_sweep(engine.clone(), Duration::from_secs(config.session_sweep_secs.max(1)));

    let state = AppState {
        engine,
        config: config.clone(),
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Initialize Database Pool with Retry
async fn connect(database_url: &str) -> PgPool {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("Database connected...");
                return pool;
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Completes sessions whose time limit ran out while nobody was calling in.
fn spawn_expiry_sweep(engine: Arc<ExamEngine>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.finish_expired_sessions().await {
                tracing::error!("Expired session sweep failed: {:?}", e);
            }
        }
    });
}

fn demo_exam() -> Exam {
    Exam {
        id: 1,
        subject_id: 1,
        title: "Arithmetic Basics".to_string(),
        is_published: true,
        is_active: true,
        configuration: ExamConfiguration {
            total_questions: 6,
            time_limit_minutes: Some(30),
            distribution: Some(DifficultyDistribution {
                easy: 3,
                medium: 2,
                hard: 1,
            }),
            ..Default::default()
        },
    }
}

fn demo_questions() -> Vec<QuestionSnapshot> {
    let mut bank = Vec::new();
    for (offset, difficulty) in Difficulty::ALL.into_iter().enumerate() {
        for n in 1..=8i64 {
            let id = offset as i64 * 100 + n;
            let (a, b) = (n * (offset as i64 + 1), n + 3);
            let sum = (a + b).to_string();
            bank.push(QuestionSnapshot {
                id,
                subject_id: 1,
                question_type: QuestionType::Single,
                content: format!("What is {} + {}?", a, b),
                options: vec![sum.clone(), (a + b + 1).to_string(), (a * b).to_string()],
                answer: vec![sum],
                analysis: Some(format!("{} plus {} is {}.", a, b, a + b)),
                difficulty,
                category: "arithmetic".to_string(),
                tags: vec!["addition".to_string()],
            });
        }
    }
    bank
}

// tests/api_tests.rs

use std::sync::Arc;

use exam_engine::{
    ExamEngine,
    config::Config,
    engine::EngineConfig,
    models::{
        exam::{DifficultyDistribution, Exam, ExamConfiguration},
        question::{Difficulty, QuestionSnapshot, QuestionType},
    },
    repository::{
        PurchaseAccess,
        memory::{InMemoryQuestionRepository, InMemoryStore},
    },
    routes,
    state::AppState,
    utils::jwt::sign_jwt,
};
use serde_json::{Value, json};

const SECRET: &str = "test_secret_for_integration_tests";
const EXAM: i64 = 7;

fn question_bank() -> Vec<QuestionSnapshot> {
    let mut bank = Vec::new();
    for (offset, difficulty) in Difficulty::ALL.into_iter().enumerate() {
        for n in 1..=5 {
            bank.push(QuestionSnapshot {
                id: offset as i64 * 10 + n,
                subject_id: 4,
                question_type: QuestionType::Multiple,
                content: format!("Which of these apply? ({})", n),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                answer: vec!["A".into(), "C".into()],
                analysis: None,
                difficulty,
                category: "history".to_string(),
                tags: vec![],
            });
        }
    }
    bank
}

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
async fn spawn_app() -> String {
    // 1. In-memory collaborators seeded with one published exam
    let store = Arc::new(InMemoryStore::new());
    store.insert_exam(Exam {
        id: EXAM,
        subject_id: 4,
        title: "Dynasties".to_string(),
        is_published: true,
        is_active: true,
        configuration: ExamConfiguration {
            total_questions: 4,
            time_limit_minutes: Some(20),
            passing_score: 50,
            distribution: Some(DifficultyDistribution {
                easy: 2,
                medium: 1,
                hard: 1,
            }),
            ..Default::default()
        },
    });
    let repository = Arc::new(InMemoryQuestionRepository::new(question_bank()));
    let access = Arc::new(PurchaseAccess::new(store.clone()));
    let engine = Arc::new(ExamEngine::new(
        store,
        repository,
        access,
        EngineConfig::default(),
    ));

    // 2. Create the router with the app state
    let state = AppState {
        engine,
        config: Config::for_tests(SECRET),
    };
    let app = routes::create_router(state);

    // 3. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 4. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

fn token(user_id: i64) -> String {
    sign_jwt(user_id, "user", SECRET, 600).unwrap()
}

fn admin_token() -> String {
    sign_jwt(99, "admin", SECRET, 600).unwrap()
}

async fn generate(client: &reqwest::Client, address: &str, user_id: i64, body: Value) -> reqwest::Response {
    client
        .post(format!("{}/api/exams/{}/questions", address, EXAM))
        .bearer_auth(token(user_id))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request")
}

async fn start(client: &reqwest::Client, address: &str, user_id: i64) -> reqwest::Response {
    client
        .post(format!("{}/api/exams/{}/sessions", address, EXAM))
        .bearer_auth(token(user_id))
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn unknown_path_is_404() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let missing = client
        .post(format!("{}/api/exams/{}/questions", address, EXAM))
        .json(&json!({}))
        .send()
        .await
        .expect("Failed to execute request");
    let forged = client
        .get(format!("{}/api/cache/stats", address))
        .bearer_auth(sign_jwt(1, "user", "wrong_secret", 600).unwrap())
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(missing.status().as_u16(), 401);
    assert_eq!(forged.status().as_u16(), 401);
}

#[tokio::test]
async fn full_exam_flow_scores_and_locks_session() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act: allocate
    let response = generate(&client, &address, 1, json!({})).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let questions = body["questions"].as_array().unwrap().clone();
    assert_eq!(questions.len(), 4);
    assert!(questions[0].get("answer").is_none(), "answer keys must not leak");
    assert_eq!(body["cache_info"]["type"], "miss");
    assert_eq!(body["repetition_info"]["current_repetition"], 1);

    // Act: start
    let response = start(&client, &address, 1).await;
    assert_eq!(response.status().as_u16(), 201);
    let session: Value = response.json().await.unwrap();
    assert_eq!(session["status"], "IN_PROGRESS");
    assert_eq!(session["time_limit_seconds"], 1200);
    let session_id = session["id"].as_str().unwrap().to_string();

    // Act: answer three correctly and one wrongly
    for (i, q) in questions.iter().enumerate() {
        let selected = if i == 0 { json!(["B"]) } else { json!(["C", "A"]) };
        let response = client
            .post(format!("{}/api/sessions/{}/answers", address, session_id))
            .bearer_auth(token(1))
            .json(&json!({
                "question_id": q["id"],
                "selected_options": selected,
                "time_spent_seconds": 30
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
    }

    // Act: finish
    let response = client
        .post(format!("{}/api/sessions/{}/finish", address, session_id))
        .bearer_auth(token(1))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let finished: Value = response.json().await.unwrap();
    assert_eq!(finished["session"]["status"], "COMPLETED");
    assert_eq!(finished["result"]["correct_answers"], 3);
    assert_eq!(finished["result"]["incorrect_answers"], 1);
    assert_eq!(finished["result"]["unanswered_questions"], 0);

    let response = client
        .get(format!("{}/api/sessions/{}/result", address, session_id))
        .bearer_auth(token(1))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["score"], finished["result"]["score"]);

    let late = client
        .post(format!("{}/api/sessions/{}/answers", address, session_id))
        .bearer_auth(token(1))
        .json(&json!({ "question_id": questions[0]["id"], "selected_options": ["A"] }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(late.status().as_u16(), 409);
}

#[tokio::test]
async fn second_fresh_allocation_conflicts_and_repetitions_run_out() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    generate(&client, &address, 1, json!({})).await;

    // Act
    let duplicate = generate(&client, &address, 1, json!({})).await;
    let repeat = generate(&client, &address, 1, json!({ "is_repetition": true })).await;
    let exhausted = generate(&client, &address, 1, json!({ "is_repetition": true })).await;

    // Assert
    assert_eq!(duplicate.status().as_u16(), 409);
    assert_eq!(repeat.status().as_u16(), 200);
    let body: Value = repeat.json().await.unwrap();
    assert_eq!(body["cache_info"]["type"], "snapshot");
    assert_eq!(body["repetition_info"]["can_repeat"], false);
    assert_eq!(exhausted.status().as_u16(), 409);
}

#[tokio::test]
async fn starting_without_purchase_requires_payment() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = start(&client, &address, 5).await;

    // Assert
    assert_eq!(response.status().as_u16(), 402);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pricing"]["currency"], "USD");
}

#[tokio::test]
async fn other_users_cannot_touch_a_session() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    generate(&client, &address, 1, json!({})).await;
    let session: Value = start(&client, &address, 1).await.json().await.unwrap();
    let session_id = session["id"].as_str().unwrap();

    // Act
    let peek = client
        .get(format!("{}/api/sessions/{}", address, session_id))
        .bearer_auth(token(2))
        .send()
        .await
        .expect("Failed to execute request");
    let finish = client
        .post(format!("{}/api/sessions/{}/finish", address, session_id))
        .bearer_auth(token(2))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(peek.status().as_u16(), 403);
    assert_eq!(finish.status().as_u16(), 403);
}

#[tokio::test]
async fn oversized_answer_payload_is_rejected() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let body: Value = generate(&client, &address, 1, json!({})).await.json().await.unwrap();
    let session: Value = start(&client, &address, 1).await.json().await.unwrap();

    // Act
    let response = client
        .post(format!("{}/api/sessions/{}/answers", address, session["id"].as_str().unwrap()))
        .bearer_auth(token(1))
        .json(&json!({
            "question_id": body["questions"][0]["id"],
            "text_answer": "x".repeat(6000)
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn paused_session_rejects_answers_until_resumed() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let body: Value = generate(&client, &address, 1, json!({})).await.json().await.unwrap();
    let session: Value = start(&client, &address, 1).await.json().await.unwrap();
    let base = format!("{}/api/sessions/{}", address, session["id"].as_str().unwrap());
    let submit = json!({ "question_id": body["questions"][0]["id"], "selected_options": ["A"] });

    // Act
    let paused = client
        .post(format!("{}/pause", base))
        .bearer_auth(token(1))
        .send()
        .await
        .unwrap();
    let blocked = client
        .post(format!("{}/answers", base))
        .bearer_auth(token(1))
        .json(&submit)
        .send()
        .await
        .unwrap();
    let resumed = client
        .post(format!("{}/resume", base))
        .bearer_auth(token(1))
        .send()
        .await
        .unwrap();
    let accepted = client
        .post(format!("{}/answers", base))
        .bearer_auth(token(1))
        .json(&submit)
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(paused.status().as_u16(), 200);
    assert_eq!(blocked.status().as_u16(), 409);
    assert_eq!(resumed.status().as_u16(), 200);
    assert_eq!(accepted.status().as_u16(), 200);
}

#[tokio::test]
async fn cache_stats_and_admin_invalidation() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    generate(&client, &address, 1, json!({})).await;
    generate(&client, &address, 2, json!({})).await;

    // Act
    let stats: Value = client
        .get(format!("{}/api/cache/stats", address))
        .bearer_auth(token(1))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let as_user = client
        .delete(format!("{}/api/cache/subjects/4", address))
        .bearer_auth(token(1))
        .send()
        .await
        .unwrap();
    let as_admin = client
        .delete(format!("{}/api/cache/subjects/4", address))
        .bearer_auth(admin_token())
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(stats["entry_count"], 3);
    assert_eq!(stats["total_hits"], 3);
    assert_eq!(stats["total_misses"], 3);
    assert_eq!(as_user.status().as_u16(), 403);
    assert_eq!(as_admin.status().as_u16(), 200);
    let removed: Value = as_admin.json().await.unwrap();
    assert_eq!(removed["removed_entries"], 3);
}

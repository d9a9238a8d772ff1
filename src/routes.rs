// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{cache, exam, session},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Every route requires a bearer token; cache administration also requires
///   the 'admin' role.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let exam_routes = Router::new()
        .route("/{exam_id}/questions", post(exam::generate_questions))
        .route("/{exam_id}/sessions", post(exam::start_session))
        .layer(auth.clone());

    let session_routes = Router::new()
        .route("/{id}", get(session::get_session))
        .route("/{id}/answers", post(session::submit_answer))
        .route("/{id}/pause", post(session::pause_session))
        .route("/{id}/resume", post(session::resume_session))
        .route("/{id}/finish", post(session::finish_session))
        .route("/{id}/result", get(session::get_result))
        .layer(auth.clone());

    let cache_admin_routes = Router::new()
        .route("/", delete(cache::clear_cache))
        .route("/subjects/{subject_id}", delete(cache::invalidate_subject))
        .layer(middleware::from_fn(admin_middleware));

    let cache_routes = Router::new()
        .route("/stats", get(cache::cache_stats))
        .merge(cache_admin_routes)
        .layer(auth);

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/sessions", session_routes)
        .nest("/api/cache", cache_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

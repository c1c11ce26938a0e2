use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use whistle_core::{observability, AppConfig, AppState};

pub mod error;
pub mod routes;

pub fn build_router(config: &AppConfig) -> Router<AppState> {
    let cors = build_cors_layer(config.cors_origin.as_deref());
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/chat/message", post(routes::chat::send_message))
        .route("/chat/message/{message_id}", get(routes::chat::get_message))
        .route(
            "/chat/conversations/{user_id}",
            get(routes::chat::list_conversations),
        )
        .route(
            "/chat/{conversation_id}/messages",
            get(routes::chat::list_messages),
        )
        .route(
            "/chat/{conversation_id}/read",
            put(routes::chat::mark_read),
        )
        .route(
            "/chat/{conversation_id}",
            delete(routes::chat::burn_conversation),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(str::trim).filter(|o| !o.is_empty() && *o != "*") {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS origin, allowing any origin");
                AllowOrigin::from(Any)
            }
        },
        None => AllowOrigin::from(Any),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "whistle-chat" })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        observability::render_prometheus(&state.connections),
    )
}

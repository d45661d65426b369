use axum::{
    http::{header, Method},
    middleware,
    routing::post,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{handlers, request_context::request_context_middleware, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", post(handlers::handle_action))
        .route("/api", post(handlers::handle_action))
        .with_state(state)
        .layer(middleware::from_fn(request_context_middleware))
        .layer(cors)
}

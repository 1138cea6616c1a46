use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header::STRICT_TRANSPORT_SECURITY},
    middleware,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::{AppState, handlers, middleware_auth};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full HTTP application: public identity routes, authenticated
/// catalog and circulation routes, and the cross-cutting tower layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/register", post(handlers::register))
        .route("/api/v1/login", post(handlers::login))
        .route("/api/v1/refresh", post(handlers::refresh_token));

    let protected_routes = Router::new()
        .route(
            "/api/v1/books",
            get(handlers::list_books).post(handlers::create_book),
        )
        .route("/api/v1/books/{id}", get(handlers::get_book))
        .route(
            "/api/v1/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route("/api/v1/transactions/checkout", post(handlers::checkout))
        .route("/api/v1/transactions/{id}", get(handlers::get_transaction))
        .route(
            "/api/v1/transactions/{id}/return_book",
            post(handlers::return_book),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::auth_middleware,
        ));

    let hsts_value: HeaderValue =
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload");

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            hsts_value,
        ))
}

// OAuth Gateway - Library root

pub mod auth;
pub mod config;
pub mod consent;
pub mod error;
pub mod middleware;
pub mod routes;

/// Build the application with all routes and middleware
pub fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    // Health check routes (no auth required)
    let health_routes = routes::health_routes();

    // Initiate (with auth) and callback routes
    let auth_routes = routes::auth_routes(state);

    // Apply middleware stack: Trace → CORS → (Auth is per-route)
    Router::new()
        .merge(health_routes)
        .merge(auth_routes)
        .layer(middleware::cors_layer())
        .layer(middleware::trace_layer())
}

pub mod customers;
pub mod services;
pub mod system;

use axum::{
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{services::provisioning::ProvisionError, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(system::root))
        .route("/version", get(system::version))
        .route("/health", get(system::health_check))
        .route("/metrics", get(system::metrics_handler))
        // Customers
        .route("/customers", get(customers::list_customers).put(system::missing_id))
        .route("/customers/", get(customers::list_customers).put(system::missing_id))
        .route("/customers/{id}", get(customers::get_customer).put(customers::put_customer))
        // Services
        .route("/services", get(services::list_services).put(system::missing_id))
        .route("/services/", get(services::list_services).put(system::missing_id))
        .route("/services/{id}", get(services::get_service).put(services::put_service))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps engine errors onto responses. Server-side failures are logged here and
/// reported to the caller without detail.
pub fn error_response(err: ProvisionError) -> (StatusCode, Json<Value>) {
    match &err {
        ProvisionError::NotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": err.to_string() })),
        ),
        ProvisionError::InvalidIdentifier { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        ),
        ProvisionError::MissingRole(_) | ProvisionError::Database(_) => {
            tracing::error!("Provisioning request failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal server error" })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn offline_config() -> Config {
        Config {
            database_host: "127.0.0.1".into(),
            database_port: 1,
            connect_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    async fn send(config: Config, method: Method, uri: &str) -> (StatusCode, String) {
        let app = router(AppState::new(config));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn version_is_plain_text() {
        let (status, body) = send(offline_config(), Method::GET, "/version").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1.0");
    }

    #[tokio::test]
    async fn root_is_empty() {
        let (status, body) = send(offline_config(), Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn put_without_id_is_not_implemented() {
        for uri in ["/customers", "/customers/", "/services", "/services/"] {
            let (status, _) = send(offline_config(), Method::PUT, uri).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "{uri}");
        }
    }

    #[tokio::test]
    async fn invalid_id_is_a_bad_request() {
        let (status, body) = send(offline_config(), Method::PUT, "/customers/a%20b").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("invalid customer identifier"));
    }

    #[tokio::test]
    async fn database_failures_are_generic_server_errors() {
        let (status, body) = send(offline_config(), Method::GET, "/customers").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"internal server error"}"#);
    }

    #[tokio::test]
    async fn health_reports_unreachable_database() {
        let (status, body) = send(offline_config(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"status\":\"error\""));
    }

    #[tokio::test]
    async fn admin_key_guards_mutations() {
        let config = Config {
            admin_key: Some("s3cret".into()),
            ..offline_config()
        };
        let (status, _) = send(config.clone(), Method::PUT, "/services/billing").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let app = router(AppState::new(config));
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/services/bad%20id")
            .header("X-Admin-Key", "s3cret")
            .body(Body::empty())
            .unwrap();
        // Past the guard, the id is rejected before any database access.
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let (status, Json(body)) = error_response(ProvisionError::NotFound {
            kind: "customer",
            id: "99".into(),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "customer 99 not found");
    }
}

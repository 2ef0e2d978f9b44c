//! Aggregate health endpoint shared by the service binaries.
//!
//! # Example
//!
//! ```ignore
//! use grist_core::health::{Health, HealthIndicator, HealthStatus};
//!
//! struct DbHealth { pool: PgPool }
//!
//! impl HealthIndicator for DbHealth {
//!     fn name(&self) -> &str { "db" }
//!     async fn check(&self) -> HealthStatus {
//!         match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
//!             Ok(_) => HealthStatus::Up,
//!             Err(e) => HealthStatus::Down(e.to_string()),
//!         }
//!     }
//! }
//!
//! let router = app.merge(Health::new().register(DbHealth { pool }).into_router());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

/// Result of a single health check.
#[derive(Debug, Clone)]
pub enum HealthStatus {
    Up,
    Down(String),
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// A named health indicator that can be registered with [`Health`].
pub trait HealthIndicator: Send + Sync + 'static {
    /// The name of this health check (e.g. `"db"`, `"bus"`).
    fn name(&self) -> &str;

    /// Perform the health check.
    fn check(&self) -> impl Future<Output = HealthStatus> + Send;
}

type BoxedCheck =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = HealthStatus> + Send>> + Send + Sync>;

/// Builder that assembles registered indicators into a `GET /health` router.
///
/// Responds 200 with `{"status":"UP", "checks":{…}}` when every check passes,
/// 503 with the failing details otherwise.
#[derive(Default)]
pub struct Health {
    checks: Vec<(String, BoxedCheck)>,
}

impl Health {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn register<I: HealthIndicator>(mut self, indicator: I) -> Self {
        let indicator = Arc::new(indicator);
        let name = indicator.name().to_string();
        let check: BoxedCheck = Arc::new(move || {
            let indicator = indicator.clone();
            Box::pin(async move { indicator.check().await })
        });
        self.checks.push((name, check));
        self
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .with_state(Arc::new(self.checks))
    }
}

async fn health_handler(
    State(checks): State<Arc<Vec<(String, BoxedCheck)>>>,
) -> impl IntoResponse {
    let mut all_up = true;
    let mut details = serde_json::Map::new();
    for (name, check) in checks.iter() {
        let status = check().await;
        let entry = match &status {
            HealthStatus::Up => serde_json::json!({ "status": "UP" }),
            HealthStatus::Down(reason) => {
                all_up = false;
                serde_json::json!({ "status": "DOWN", "error": reason })
            }
        };
        details.insert(name.clone(), entry);
    }

    let status = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if all_up { "UP" } else { "DOWN" },
        "checks": details,
    });
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Fixed {
        name: &'static str,
        status: HealthStatus,
    }

    impl HealthIndicator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> HealthStatus {
            self.status.clone()
        }
    }

    async fn probe(router: Router) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn all_checks_up_returns_200() {
        let router = Health::new()
            .register(Fixed {
                name: "db",
                status: HealthStatus::Up,
            })
            .into_router();
        let (status, body) = probe(router).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["checks"]["db"]["status"], "UP");
    }

    #[tokio::test]
    async fn one_check_down_returns_503() {
        let router = Health::new()
            .register(Fixed {
                name: "db",
                status: HealthStatus::Up,
            })
            .register(Fixed {
                name: "bus",
                status: HealthStatus::Down("broker unreachable".into()),
            })
            .into_router();
        let (status, body) = probe(router).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "DOWN");
        assert_eq!(body["checks"]["bus"]["error"], "broker unreachable");
    }

    #[tokio::test]
    async fn empty_registry_is_up() {
        let (status, body) = probe(Health::new().into_router()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
    }
}

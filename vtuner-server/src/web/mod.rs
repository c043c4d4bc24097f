//! Web API server for device status and pool control.

pub mod api;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use vtuner_core::TunerContext;
use state::WebState;

/// Build the API router.
pub fn router(context: Arc<TunerContext>) -> Router {
    let web_state = Arc::new(WebState::new(context));

    Router::new()
        // Status
        .route("/api/devices", get(api::get_devices))
        .route("/api/pools", get(api::get_pools))
        .route("/api/parents", get(api::get_parents))
        .route("/api/descriptors", get(api::get_descriptors))
        // Tuning
        .route("/api/tune", post(api::tune))
        .route("/api/release/:alias", post(api::release))
        // Device configuration
        .route("/api/device/:name", post(api::update_device))
        .route("/api/device/:name/external-lock", post(api::set_external_lock))
        .with_state(web_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the web API server.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    context: Arc<TunerContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(context);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Web API listening on http://{}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use vtuner_core::DeviceSettings;

    use crate::devices::{self, software};

    fn context() -> Arc<TunerContext> {
        let context = Arc::new(TunerContext::new(true));
        devices::register_implementations(&context);
        for (name, merit) in [("File-1", 10), ("File-2", 20)] {
            context
                .configure_device(
                    name,
                    DeviceSettings {
                        pool: Some("Files".into()),
                        merit: Some(merit),
                    },
                )
                .unwrap();
            let recipe = software::recipe(name, "/srv/captures/sample.ts", "default");
            devices::ensure_loaded(&context, name, recipe, true).unwrap();
        }
        context
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_get_devices() {
        let app = router(context());
        let (status, body) = send(&app, "GET", "/api/devices", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["devices"][0]["name"], "File-1");
        assert_eq!(body["devices"][0]["pool_name"], "Files");
        assert_eq!(body["devices"][0]["alias"], Value::Null);
    }

    #[tokio::test]
    async fn test_tune_release_cycle() {
        let app = router(context());

        let request = serde_json::json!({"alias": "Tuner A", "pool": "Files", "channel": "7"});
        let (status, body) = send(&app, "POST", "/api/tune", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"], "File-2");
        assert_eq!(body["retuned"], false);

        let (_, body) = send(&app, "GET", "/api/pools", None).await;
        assert_eq!(body["pools"][0]["name"], "Files");
        assert_eq!(body["pools"][0]["members"], serde_json::json!(["File-2", "File-1"]));
        assert_eq!(body["pools"][0]["available"], 1);
        assert_eq!(body["bindings"][0]["alias"], "Tuner A");

        let (status, body) = send(&app, "POST", "/api/release/Tuner%20A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"], "File-2");

        let (status, _) = send(&app, "POST", "/api/release/Tuner%20A", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_unavailable() {
        let app = router(context());
        for alias in ["A", "B"] {
            let (status, _) = send(
                &app,
                "POST",
                "/api/tune",
                Some(serde_json::json!({"alias": alias, "pool": "Files"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app,
            "POST",
            "/api/tune",
            Some(serde_json::json!({"alias": "C", "pool": "Files"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_external_lock_excludes_device() {
        let app = router(context());
        let (status, _) = send(
            &app,
            "POST",
            "/api/device/File-2/external-lock",
            Some(serde_json::json!({"locked": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(
            &app,
            "POST",
            "/api/tune",
            Some(serde_json::json!({"alias": "A", "pool": "Files"})),
        )
        .await;
        assert_eq!(body["device"], "File-1");

        let (status, _) = send(
            &app,
            "POST",
            "/api/device/Missing/external-lock",
            Some(serde_json::json!({"locked": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_device_deferred_while_bound() {
        let app = router(context());
        send(
            &app,
            "POST",
            "/api/tune",
            Some(serde_json::json!({"alias": "A", "pool": "Files"})),
        )
        .await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/device/File-2",
            Some(serde_json::json!({"merit": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "deferred");

        let (_, body) = send(
            &app,
            "POST",
            "/api/device/File-1",
            Some(serde_json::json!({"pool": "Spare"})),
        )
        .await;
        assert_eq!(body["result"], "applied");

        let (_, body) = send(
            &app,
            "POST",
            "/api/device/HDHR-9",
            Some(serde_json::json!({"merit": 3})),
        )
        .await;
        assert_eq!(body["result"], "stored");

        let (status, _) = send(&app, "POST", "/api/device/File-1", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_descriptors_and_parents() {
        let context = context();
        context
            .register(
                "File-9",
                software::recipe("File-9", "/srv/captures/other.ts", "default"),
                false,
            )
            .unwrap();
        let app = router(context);

        let (_, body) = send(&app, "GET", "/api/descriptors", None).await;
        // Loaded persistent descriptors are hidden.
        assert_eq!(body["descriptors"].as_array().unwrap().len(), 1);
        assert_eq!(body["descriptors"][0]["name"], "File-9");
        assert_eq!(body["implementations"], serde_json::json!(["http", "software"]));

        let (_, body) = send(&app, "GET", "/api/parents", None).await;
        assert_eq!(body["parents"], serde_json::json!([]));
    }
}

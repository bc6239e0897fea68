use crate::metrics::Registry;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Expands a bare `:port` into an address on every interface.
pub fn listen_address(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(registry)
}

async fn metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], registry.render())
}

/// Serves `/metrics` until `shutdown` is cancelled.
pub async fn start_server(
    listen: &str,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let addr = listen_address(listen);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Web server received shutdown signal, stopping...");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricDesc;

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":8080"), "0.0.0.0:8080");
        assert_eq!(listen_address("127.0.0.1:9100"), "127.0.0.1:9100");
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_registry() {
        let registry = Arc::new(Registry::new());
        registry.register(MetricDesc::gauge("livebox_up", "Device reachable.", &[]));
        registry.set_gauge("livebox_up", &[], 1.0);

        let response = metrics(State(registry)).await.into_response();

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            TEXT_FORMAT
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# TYPE livebox_up gauge"));
        assert!(text.contains("livebox_up 1"));
    }

    #[tokio::test]
    async fn test_server_stops_on_cancelled_token() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            start_server("127.0.0.1:0", Arc::new(Registry::new()), shutdown),
        )
        .await
        .expect("server stops once shut down");

        assert!(result.is_ok());
    }
}

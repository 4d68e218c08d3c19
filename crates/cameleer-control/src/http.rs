//! HTTP GET control.
//!
//! Any GET whose path contains `control/command/` is a command: the
//! substring after the marker is split on spaces, the first token is the
//! command. 200 with the rendered result on success, 500 with the error
//! text on failure.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use tokio::task::JoinHandle;

use cameleer_runtime::{Cameleer, Control};

use crate::command::{CommandProcessor, ControlError};

/// Path marker commands live behind.
const COMMAND_MARKER: &str = "control/command/";

pub struct HttpControl {
    server: JoinHandle<()>,
    port: u16,
}

impl HttpControl {
    /// Bind the endpoint on localhost. Port 0 picks an ephemeral port.
    pub async fn bind(engine: Arc<Cameleer>, port: u16) -> Result<Arc<Self>, ControlError> {
        let processor = Arc::new(CommandProcessor::new(Arc::clone(&engine)));
        let app = Router::new().fallback(handle).with_state(processor);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        let logger = engine.get_logger("HttpControl");
        logger.info(format!("command endpoint on port {}", port));

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                logger.error(format!("server stopped: {}", e));
            }
        });
        Ok(Arc::new(Self { server, port }))
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

async fn handle(
    State(processor): State<Arc<CommandProcessor>>,
    uri: Uri,
) -> (StatusCode, String) {
    let path = uri.path();
    let Some(index) = path.find(COMMAND_MARKER) else {
        return (StatusCode::NOT_FOUND, "unknown path".to_string());
    };
    let command = path[index + COMMAND_MARKER.len()..].replace("%20", " ");

    match processor.execute(&command).await {
        Ok(result) => (StatusCode::OK, result),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[async_trait]
impl Control for HttpControl {
    fn name(&self) -> &str {
        "http"
    }

    async fn teardown(&self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cameleer_config::{CameleerConfig, ConfigProvider};
    use cameleer_core::TaskConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct EmptyProvider {
        config: CameleerConfig,
    }

    impl ConfigProvider for EmptyProvider {
        fn cameleer_config(&self) -> CameleerConfig {
            self.config.clone()
        }

        fn all_task_configs(&self) -> Vec<TaskConfig> {
            Vec::new()
        }
    }

    fn test_engine(dir: &tempfile::TempDir) -> Arc<Cameleer> {
        let config = CameleerConfig {
            static_task_context_path: dir.path().join("context.json"),
            ..CameleerConfig::default()
        };
        Cameleer::new(Arc::new(EmptyProvider { config })).unwrap()
    }

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_command_path_executes_and_returns_200() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        let control = HttpControl::bind(engine, 0).await.unwrap();

        let response = get(control.port(), "/control/command/isidle").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("true"));

        control.teardown().await;
    }

    #[tokio::test]
    async fn test_unknown_command_returns_500_with_error_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        let control = HttpControl::bind(engine, 0).await.unwrap();

        let response = get(control.port(), "/control/command/frobnicate").await;
        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(response.contains("frobnicate"));

        control.teardown().await;
    }

    #[tokio::test]
    async fn test_non_command_path_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        let control = HttpControl::bind(engine, 0).await.unwrap();

        let response = get(control.port(), "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        control.teardown().await;
    }

    #[tokio::test]
    async fn test_encoded_spaces_split_into_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        let control = HttpControl::bind(engine, 0).await.unwrap();

        // A well-formed method with a bogus argument still dispatches.
        let response = get(control.port(), "/control/command/interruptjob%20999").await;
        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(response.contains("999"));

        control.teardown().await;
    }
}

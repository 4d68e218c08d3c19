//! Shared command dispatch.

use std::sync::Arc;

use thiserror::Error;

use cameleer_runtime::{Cameleer, EngineError};

/// Command execution errors.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("empty command")]
    Empty,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses one command line and applies it to the engine.
pub struct CommandProcessor {
    engine: Arc<Cameleer>,
}

impl CommandProcessor {
    pub fn new(engine: Arc<Cameleer>) -> Self {
        Self { engine }
    }

    /// Execute one whitespace-tokenized command line.
    ///
    /// `shutdown` is detached: the surface that carried the command is torn
    /// down by the shutdown itself, so the work runs on its own task and the
    /// command returns immediately.
    pub async fn execute(&self, line: &str) -> Result<String, ControlError> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().ok_or(ControlError::Empty)?;
        let args: Vec<String> = tokens.map(str::to_string).collect();

        match command {
            "run" => {
                self.engine.run();
                Ok("running".to_string())
            }
            "load" => {
                let loaded = self.engine.load_tasks().await?;
                Ok(format!("{} task(s) loaded", loaded))
            }
            "pause" => {
                self.engine.pause();
                Ok("paused".to_string())
            }
            "pausewait" => {
                self.engine.pause_wait().await;
                Ok("paused and idle".to_string())
            }
            "shutdown" => {
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move { engine.shutdown().await });
                Ok("shutting down".to_string())
            }
            method => {
                let value = self.engine.invoke(method, &args).await?;
                Ok(value.to_string())
            }
        }
    }
}

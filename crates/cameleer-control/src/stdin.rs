//! Standard-input control.
//!
//! One command per newline, whitespace-separated tokens. Results and errors
//! go to the control's logger.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use cameleer_core::Logger;
use cameleer_runtime::{Cameleer, Control};

use crate::command::CommandProcessor;

pub struct StdinControl {
    listener: JoinHandle<()>,
}

impl StdinControl {
    /// Attach to the process's standard input.
    pub fn spawn(engine: Arc<Cameleer>) -> Arc<Self> {
        let reader = BufReader::new(tokio::io::stdin());
        Self::spawn_with_reader(engine, reader)
    }

    /// Attach to any line source. Used by tests.
    pub fn spawn_with_reader<R>(engine: Arc<Cameleer>, reader: R) -> Arc<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let logger = engine.get_logger("StdinControl");
        let processor = CommandProcessor::new(engine);
        let listener = tokio::spawn(read_loop(reader, processor, logger));
        Arc::new(Self { listener })
    }
}

async fn read_loop<R>(reader: R, processor: CommandProcessor, logger: Logger)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match processor.execute(&line).await {
                    Ok(result) => logger.info(result),
                    Err(e) => logger.error(format!("command failed: {}", e)),
                }
            }
            Ok(None) => break,
            Err(e) => {
                logger.error(format!("stdin read failed: {}", e));
                break;
            }
        }
    }
}

#[async_trait]
impl Control for StdinControl {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn teardown(&self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cameleer_config::{CameleerConfig, ConfigProvider};
    use cameleer_core::TaskConfig;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::sleep;

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

    #[tokio::test]
    async fn test_lines_become_commands() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        engine.run();

        let (mut writer, reader) = tokio::io::duplex(256);
        let control = StdinControl::spawn_with_reader(Arc::clone(&engine), BufReader::new(reader));

        writer.write_all(b"pause\n").await.unwrap();
        writer.flush().await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // Every queue went paused; nothing to run means still idle.
        assert!(engine.is_idle());
        assert_eq!(
            engine.invoke("queues", &[]).await.unwrap()[0]["paused"],
            serde_json::json!(true)
        );

        control.teardown().await;
    }
}

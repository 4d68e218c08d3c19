//! Engine entry point.
//!
//! Loads the YAML engine configuration, wires the requested control surface,
//! and runs until shutdown. Task configurations carry closures, so they come
//! from a [`ConfigProvider`]; this binary runs with the provider's engine
//! half only; applications embed the engine and supply their own tasks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cameleer_config::{load_config, CameleerConfig, ConfigProvider, ControlSpec};
use cameleer_control::{HttpControl, StdinControl};
use cameleer_core::TaskConfig;
use cameleer_runtime::Cameleer;

#[derive(Debug, Parser)]
#[command(name = "cameleer", about = "Schedule-driven task orchestration engine")]
struct Cli {
    /// Path to the engine configuration file (YAML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control surface: none, stdin, http or http-<port>.
    #[arg(long, default_value = "none")]
    instrument: String,

    /// Construct the engine but do not load tasks or run.
    #[arg(long)]
    norun: bool,

    /// Override the configured log level.
    #[arg(long)]
    loglevel: Option<String>,
}

/// Provider over a loaded engine configuration. Tasks come from embedding
/// applications; the standalone binary runs with an empty set.
struct FileProvider {
    config: CameleerConfig,
}

impl ConfigProvider for FileProvider {
    fn cameleer_config(&self) -> CameleerConfig {
        self.config.clone()
    }

    fn all_task_configs(&self) -> Vec<TaskConfig> {
        Vec::new()
    }
}

fn parse_instrument(value: &str) -> anyhow::Result<Option<ControlSpec>> {
    match value {
        "none" => Ok(None),
        "stdin" => Ok(Some(ControlSpec::Stdin)),
        "http" => Ok(Some(ControlSpec::Http {
            port: ControlSpec::default_http_port(),
        })),
        other => match other.strip_prefix("http-") {
            Some(port) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("invalid http port '{}'", port))?;
                Ok(Some(ControlSpec::Http { port }))
            }
            None => anyhow::bail!("unknown instrument '{}'", other),
        },
    }
}

async fn attach_control(engine: &Arc<Cameleer>, spec: &ControlSpec) -> anyhow::Result<()> {
    match spec {
        ControlSpec::Stdin => {
            engine.attach_control(StdinControl::spawn(Arc::clone(engine)));
        }
        ControlSpec::Http { port } => {
            let control = HttpControl::bind(Arc::clone(engine), *port)
                .await
                .context("binding the http control")?;
            engine.attach_control(control);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            load_config(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => CameleerConfig::default(),
    };

    let level = cli
        .loglevel
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let instrument = parse_instrument(&cli.instrument)?;
    let controls: Vec<ControlSpec> = config
        .controls
        .iter()
        .cloned()
        .chain(instrument)
        .collect();

    let engine = Cameleer::new(Arc::new(FileProvider { config })).context("constructing engine")?;
    for spec in &controls {
        attach_control(&engine, spec).await?;
    }

    if cli.norun {
        return Ok(());
    }

    engine.load_tasks().await.context("loading tasks")?;
    engine.run_async().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instrument_variants() {
        assert!(parse_instrument("none").unwrap().is_none());
        assert!(matches!(
            parse_instrument("stdin").unwrap(),
            Some(ControlSpec::Stdin)
        ));
        assert!(matches!(
            parse_instrument("http").unwrap(),
            Some(ControlSpec::Http { port: 8080 })
        ));
        assert!(matches!(
            parse_instrument("http-9001").unwrap(),
            Some(ControlSpec::Http { port: 9001 })
        ));
        assert!(parse_instrument("telnet").is_err());
        assert!(parse_instrument("http-notaport").is_err());
    }

    #[test]
    fn test_cli_parses_all_options() {
        let cli = Cli::parse_from([
            "cameleer",
            "--config",
            "engine.yaml",
            "--instrument",
            "http-9001",
            "--norun",
            "--loglevel",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("engine.yaml")));
        assert_eq!(cli.instrument, "http-9001");
        assert!(cli.norun);
        assert_eq!(cli.loglevel, Some("debug".to_string()));
    }
}

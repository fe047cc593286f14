//! Run command - Execute a playbook
//!
//! This module implements the `run` subcommand. The process exit code is
//! the run status code.

use super::CommandContext;
use crate::callback::{CallbackManager, CallbackPlugin, DefaultCallback, NullCallback};
use crate::executor::{PlaybookExecutor, RunStatus};
use crate::loader::YamlLoader;
use crate::playbook::PlaySource;
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the playbook file
    #[arg(required = true)]
    pub playbook: PathBuf,

    /// Number of concurrent workers
    #[arg(short = 'f', long)]
    pub forks: Option<usize>,

    /// Default strategy for plays that do not set one (linear, free)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Run handlers even on hosts that failed
    #[arg(long)]
    pub force_handlers: bool,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let start_time = Instant::now();

        if !self.playbook.exists() {
            ctx.output.error(&format!(
                "Playbook file not found: {}",
                self.playbook.display()
            ));
            return Ok(RunStatus::RunError.code());
        }

        if let Some(forks) = self.forks {
            ctx.config.defaults.forks = forks;
        }
        if let Some(strategy) = &self.strategy {
            ctx.config.defaults.strategy = strategy.clone();
        }
        if self.force_handlers {
            ctx.config.defaults.force_handlers = true;
        }

        ctx.output.banner(&format!(
            "PLAYBOOK: {}",
            self.playbook
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        ));

        let loader = YamlLoader::new(std::env::current_dir()?);
        let plays = PlaySource::new(&loader, ctx.config.defaults.roles_path.clone())
            .load_playbook(&self.playbook)
            .with_context(|| format!("Failed to load playbook: {}", self.playbook.display()))?;
        ctx.output.info(&format!("Loaded {} play(s)", plays.len()));

        let inventory = ctx.load_inventory()?;
        let extra_vars = ctx.parse_extra_vars()?;

        let plugin: Arc<dyn CallbackPlugin> = if ctx.output.is_json() {
            Arc::new(NullCallback::new())
        } else {
            Arc::new(DefaultCallback::new(ctx.verbosity))
        };
        let callbacks = CallbackManager::new(vec![plugin]);

        let mut executor = PlaybookExecutor::new(ctx.config.clone(), inventory, callbacks)?
            .with_extra_vars(extra_vars);

        // Ctrl-C stops dispatching; in-flight workers are left to finish
        let terminated = executor.terminate_handle();
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after in-flight tasks");
                terminated.store(true, Ordering::SeqCst);
            }
        });

        let status = match executor.run_playbook(&plays).await {
            Ok(status) => status,
            Err(e) => {
                ctx.output.error(&e.to_string());
                RunStatus::RunError
            }
        };
        signal.abort();

        let elapsed = start_time.elapsed();
        info!(status = %status, elapsed_ms = elapsed.as_millis() as u64, "Run complete");
        if ctx.output.is_json() {
            let summary = json!({
                "playbook": self.playbook.display().to_string(),
                "status": status.to_string(),
                "code": status.code(),
                "stats": executor.stats(),
                "elapsed_ms": elapsed.as_millis() as u64,
            });
            ctx.output.json(&summary);
        } else {
            ctx.output.run_status(status, elapsed);
        }
        ctx.output.flush();

        Ok(status.code())
    }
}

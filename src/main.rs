//! `armada` binary: parse flags, set up tracing, dispatch the subcommand and
//! turn its outcome into the process exit code.

use anyhow::Result;
use armada::cli::commands::CommandContext;
use armada::cli::{Cli, Commands};
use armada::config::Config;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_result = Config::load(cli.config.as_ref());

    // Logging comes up before the config error is reported
    let json_logs = cli.log_json
        || config_result
            .as_ref()
            .map(|c| c.logging.json)
            .unwrap_or(false);
    init_logging(cli.verbosity(), json_logs);

    if cli.verbosity() >= 2 {
        eprintln!("Armada v{}", VERSION);
    }

    let config = config_result.unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        Config::default()
    });

    let mut ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Hosts(args) => args.execute(&mut ctx).await,
        Commands::Groups(args) => args.execute(&mut ctx).await,
        Commands::Run(args) => args.execute(&mut ctx).await,
    }
    .unwrap_or_else(|e| {
        ctx.output.error(&format!("{:#}", e));
        1
    });

    std::process::exit(exit_code);
}

/// stderr subscriber; `RUST_LOG` overrides the -v derived level
fn init_logging(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

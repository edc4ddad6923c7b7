//! stash CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

#[cfg(test)]
mod cli_tests;

use commands::{Commands, ConfigCommands, GlobalArgs};
use config::StashConfig;
use stash_core::Logger;

#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about = "Glob-driven artifact cache for CI", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Logs go to stderr so `unpack --stream` can write to stdout.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file settings with command-line overrides applied.
fn effective_config(global: &GlobalArgs) -> Result<StashConfig, Box<dyn std::error::Error>> {
    let mut config = StashConfig::load(global.config.as_deref())?;
    config.merge(global);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let logger = Logger::new(cli.global.verbose);

    match cli.command {
        Commands::Put {
            bucket,
            key,
            artifacts,
            s3_class,
            format,
        } => {
            let action = handlers::put_action(bucket, key, artifacts, s3_class, format);
            handlers::run_action(&effective_config(&cli.global)?, action, logger).await?
        }
        Commands::Get {
            bucket,
            key,
            root,
            format,
            output,
        } => {
            let action = handlers::get_action(bucket, key, root, format, output);
            handlers::run_action(&effective_config(&cli.global)?, action, logger).await?
        }
        Commands::Delete { bucket, key } => {
            let action = stash_core::Action::new(stash_core::ActionKind::Delete, bucket, key);
            handlers::run_action(&effective_config(&cli.global)?, action, logger).await?
        }
        Commands::Action => {
            handlers::action_from_env(&effective_config(&cli.global)?, logger).await?
        }
        Commands::Pack {
            destination,
            patterns,
            stream,
        } => {
            let config = effective_config(&cli.global)?;
            handlers::pack(&config, &destination, &patterns, stream, logger)?
        }
        Commands::Unpack {
            source,
            root,
            stream,
            output,
        } => handlers::unpack(&source, &root, stream, output.as_deref(), logger)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                handlers::show_config(&effective_config(&cli.global)?, cli.global.config)?
            }
            ConfigCommands::Path => println!(
                "{}",
                match cli.global.config {
                    Some(path) => path,
                    None => StashConfig::config_path()?,
                }
                .display()
            ),
            ConfigCommands::Set { key, value } => {
                handlers::set_config(cli.global.config, &key, &value)?
            }
        },
    }

    Ok(())
}

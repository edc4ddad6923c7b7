//! Command handlers.

use crate::config::StashConfig;
use console::style;
use stash_cache::{
    DispatchOptions, Dispatcher, FilesystemStore, Outcome, PipelineOptions, S3Store,
    extract_archive, unpack_stream, write_archive, write_archive_parallel,
};
use stash_core::{Action, ActionKind, ArchiveFormat, Logger, ObjectStore};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Open the configured object store.
pub async fn open_store(config: &StashConfig) -> Arc<dyn ObjectStore> {
    tracing::debug!(
        store_dir = ?config.store_dir,
        endpoint = ?config.endpoint,
        "opening object store"
    );
    match &config.store_dir {
        Some(dir) => Arc::new(FilesystemStore::new(dir)),
        None => Arc::new(S3Store::connect(&config.s3_settings()).await),
    }
}

fn pipeline_options(config: &StashConfig) -> PipelineOptions {
    match config.workers {
        Some(workers) => PipelineOptions::default().with_workers(workers),
        None => PipelineOptions::default(),
    }
}

fn dispatcher(store: Arc<dyn ObjectStore>, config: &StashConfig, logger: Logger) -> Dispatcher {
    Dispatcher::new(
        store,
        DispatchOptions {
            timeout: config.timeout(),
            pipeline: pipeline_options(config),
            staging_dir: None,
            logger,
        },
    )
}

/// Dispatch one action against the configured store and report the outcome.
pub async fn run_action(config: &StashConfig, mut action: Action, logger: Logger) -> HandlerResult {
    if action.action == ActionKind::Put && action.s3_class.is_none() {
        action.s3_class = config.s3_class.clone();
    }
    let store = open_store(config).await;
    let outcome = dispatcher(store, config, logger).dispatch(&action).await?;
    report(&action, &outcome);
    Ok(())
}

/// Run the action described by `INPUT_*` variables.
pub async fn action_from_env(config: &StashConfig, logger: Logger) -> HandlerResult {
    let action = Action::from_env()?;
    eprintln!(
        "{} {} {}/{}",
        style("▶").cyan(),
        action.action,
        action.bucket,
        style(&action.key).bold()
    );
    run_action(config, action, logger).await
}

fn report(action: &Action, outcome: &Outcome) {
    match outcome {
        Outcome::Stored {
            bytes,
            checksum,
            files,
            duration,
        } => {
            eprintln!(
                "{} Stored {} ({} files, {} bytes) in {:.2?}",
                style("✓").green(),
                style(&action.key).bold(),
                files,
                bytes,
                duration
            );
            eprintln!("  sha256: {}", style(checksum).dim());
        }
        Outcome::Restored {
            bytes,
            files,
            duration,
        } => {
            eprintln!(
                "{} Restored {} ({} files, {} bytes) in {:.2?}",
                style("✓").green(),
                style(&action.key).bold(),
                files,
                bytes,
                duration
            );
        }
        Outcome::Miss => {
            eprintln!(
                "{} Cache miss for {}",
                style("!").yellow(),
                style(&action.key).bold()
            );
        }
        Outcome::Deleted => {
            eprintln!(
                "{} Deleted {}/{}",
                style("✓").green(),
                action.bucket,
                style(&action.key).bold()
            );
        }
    }
}

/// Build an archive locally.
pub fn pack(
    config: &StashConfig,
    destination: &Path,
    patterns: &[String],
    stream: bool,
    logger: Logger,
) -> HandlerResult {
    if stream {
        let report =
            write_archive_parallel(destination, patterns, &pipeline_options(config), &logger)?;
        eprintln!(
            "{} Wrote {} ({} files, {} -> {} bytes)",
            style("✓").green(),
            destination.display(),
            report.files,
            report.bytes_in,
            report.bytes_out
        );
    } else {
        let report = write_archive(destination, patterns, &logger)?;
        eprintln!(
            "{} Wrote {} ({} files, {} directories, {} bytes)",
            style("✓").green(),
            destination.display(),
            report.files,
            report.directories,
            report.bytes
        );
    }
    Ok(())
}

/// Restore a local archive into `root`, or decode a stream archive.
pub fn unpack(
    source: &Path,
    root: &Path,
    stream: bool,
    output: Option<&Path>,
    logger: Logger,
) -> HandlerResult {
    if !stream {
        std::fs::create_dir_all(root)?;
        let report = extract_archive(source, root, &logger)?;
        eprintln!(
            "{} Restored {} files and {} directories into {}",
            style("✓").green(),
            report.files,
            report.directories,
            root.display()
        );
        return Ok(());
    }

    let written = match output {
        Some(path) => unpack_stream(source, BufWriter::new(File::create(path)?))?,
        None => unpack_stream(source, io::stdout().lock())?,
    };
    eprintln!("{} Decoded {} bytes", style("✓").green(), written);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &StashConfig, path: Option<PathBuf>) -> HandlerResult {
    println!("Current configuration:");
    println!(
        "  store: {}",
        match &config.store_dir {
            Some(dir) => format!("filesystem ({})", dir.display()),
            None => "s3".to_string(),
        }
    );
    println!(
        "  region: {}",
        config.region.as_deref().unwrap_or("(from environment)")
    );
    println!(
        "  endpoint: {}",
        config.endpoint.as_deref().unwrap_or("(default)")
    );
    println!("  force_path_style: {}", config.force_path_style);
    println!(
        "  timeout: {}",
        config
            .timeout_secs
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!(
        "  workers: {}",
        config
            .workers
            .map(|w| w.to_string())
            .unwrap_or_else(|| "(all cores)".to_string())
    );
    println!(
        "  s3_class: {}",
        config.s3_class.as_deref().unwrap_or("(bucket default)")
    );

    if let Some(path) = path.or_else(|| StashConfig::config_path().ok()) {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

/// Set a value in the config file.
pub fn set_config(path: Option<PathBuf>, key: &str, value: &str) -> HandlerResult {
    let path = match path {
        Some(path) => path,
        None => StashConfig::config_path()?,
    };
    let mut config = if path.exists() {
        StashConfig::load_from(&path)?
    } else {
        StashConfig::default()
    };
    config.set(key, value)?;
    config.save(&path)?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

/// Build the action for `stash put`.
pub fn put_action(
    bucket: String,
    key: String,
    artifacts: Vec<String>,
    s3_class: Option<String>,
    format: ArchiveFormat,
) -> Action {
    let mut action = Action::new(ActionKind::Put, bucket, key).with_artifacts(artifacts);
    action.s3_class = s3_class;
    action.format = format;
    action
}

/// Build the action for `stash get`.
pub fn get_action(
    bucket: String,
    key: String,
    root: PathBuf,
    format: ArchiveFormat,
    output: Option<PathBuf>,
) -> Action {
    let mut action = Action::new(ActionKind::Get, bucket, key);
    action.root = root;
    action.format = format;
    action.output = output;
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("dist");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("bundle.js"), b"console.log(1)").unwrap();

        let archive = dir.path().join("dist.tar.gz");
        let patterns = vec![format!("{}/*.js", src.display())];
        pack(&StashConfig::default(), &archive, &patterns, false, Logger::quiet()).unwrap();

        let root = dir.path().join("restore");
        unpack(&archive, &root, false, None, Logger::quiet()).unwrap();
        let restored = root.join(src.strip_prefix("/").unwrap()).join("bundle.js");
        assert_eq!(std::fs::read(restored).unwrap(), b"console.log(1)");
    }

    #[test]
    fn test_pack_stream_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), b"hello ").unwrap();

        let archive = dir.path().join("logs.gz");
        let config = StashConfig {
            workers: Some(2),
            ..StashConfig::default()
        };
        let patterns = vec![format!("{}/*.log", dir.path().display())];
        pack(&config, &archive, &patterns, true, Logger::quiet()).unwrap();

        let output = dir.path().join("decoded.txt");
        unpack(&archive, dir.path(), true, Some(&output), Logger::quiet()).unwrap();
        assert_eq!(std::fs::read(output).unwrap(), b"hello ");
    }

    #[tokio::test]
    async fn test_run_action_against_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deps.lock"), b"lock").unwrap();
        let config = StashConfig {
            store_dir: Some(dir.path().join("store")),
            ..StashConfig::default()
        };

        let put = put_action(
            "ci".into(),
            "lockfile".into(),
            vec![format!("{}/deps.lock", dir.path().display())],
            None,
            ArchiveFormat::Tar,
        );
        run_action(&config, put, Logger::quiet()).await.unwrap();
        assert!(dir.path().join("store/ci/lockfile").exists());

        let missing = get_action(
            "ci".into(),
            "other".into(),
            dir.path().join("out"),
            ArchiveFormat::Tar,
            None,
        );
        run_action(&config, missing, Logger::quiet()).await.unwrap();
        assert!(!dir.path().join("out").exists());
    }
}

//! Argument parsing tests.

use crate::Cli;
use crate::commands::{Commands, ConfigCommands};
use clap::Parser;
use stash_core::ArchiveFormat;
use std::path::PathBuf;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_put_with_patterns() {
    let cli = parse(&[
        "stash",
        "put",
        "ci-cache",
        "main/deps",
        "target/release/*.rlib",
        "Cargo.lock",
        "--s3-class",
        "STANDARD_IA",
    ]);
    match cli.command {
        Commands::Put {
            bucket,
            key,
            artifacts,
            s3_class,
            format,
        } => {
            assert_eq!(bucket, "ci-cache");
            assert_eq!(key, "main/deps");
            assert_eq!(artifacts, vec!["target/release/*.rlib", "Cargo.lock"]);
            assert_eq!(s3_class.as_deref(), Some("STANDARD_IA"));
            assert_eq!(format, ArchiveFormat::Tar);
        }
        _ => panic!("Expected put command"),
    }
}

#[test]
fn test_put_requires_artifacts() {
    assert!(Cli::try_parse_from(["stash", "put", "bucket", "key"]).is_err());
}

#[test]
fn test_get_stream_format() {
    let cli = parse(&[
        "stash", "get", "b", "k", "--format", "stream", "-o", "out.bin",
    ]);
    match cli.command {
        Commands::Get {
            format,
            output,
            root,
            ..
        } => {
            assert_eq!(format, ArchiveFormat::Stream);
            assert_eq!(output, Some(PathBuf::from("out.bin")));
            assert_eq!(root, PathBuf::from("."));
        }
        _ => panic!("Expected get command"),
    }
}

#[test]
fn test_unknown_format_is_rejected() {
    assert!(Cli::try_parse_from(["stash", "get", "b", "k", "--format", "zip"]).is_err());
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = parse(&[
        "stash",
        "pack",
        "out.gz",
        "logs/**",
        "--stream",
        "-v",
        "--workers",
        "3",
    ]);
    assert!(cli.global.verbose);
    assert_eq!(cli.global.workers, Some(3));
    assert!(matches!(cli.command, Commands::Pack { stream: true, .. }));
}

#[test]
fn test_config_subcommands() {
    let cli = parse(&["stash", "config", "set", "workers", "4"]);
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommands::Set { .. }
        }
    ));
    let cli = parse(&["stash", "--config", "/tmp/stash.yaml", "config", "path"]);
    assert_eq!(cli.global.config, Some(PathBuf::from("/tmp/stash.yaml")));
}

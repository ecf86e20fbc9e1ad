//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_fetch_defaults() {
    match parse(&["httpq", "fetch", "http://tracker.example/announce"]) {
        CliCommand::Fetch {
            urls,
            max_active,
            output_dir,
            json,
            timeout,
        } => {
            assert_eq!(urls, vec!["http://tracker.example/announce".to_string()]);
            assert!(max_active.is_none());
            assert!(output_dir.is_none());
            assert!(!json);
            assert_eq!(timeout, 120);
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_all_options() {
    match parse(&[
        "httpq",
        "fetch",
        "--max-active",
        "4",
        "--output-dir",
        "/tmp/out",
        "--json",
        "--timeout",
        "30",
        "http://a.example/announce",
        "https://b.example/meta.torrent",
    ]) {
        CliCommand::Fetch {
            urls,
            max_active,
            output_dir,
            json,
            timeout,
        } => {
            assert_eq!(urls.len(), 2);
            assert_eq!(max_active, Some(4));
            assert_eq!(output_dir, Some(PathBuf::from("/tmp/out")));
            assert!(json);
            assert_eq!(timeout, 30);
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_fetch_requires_a_url() {
    assert!(Cli::try_parse_from(["httpq", "fetch"]).is_err());
}

#[test]
fn cli_parse_config() {
    match parse(&["httpq", "config"]) {
        CliCommand::Config => {}
        _ => panic!("expected Config"),
    }
}

//! Tests for jobs, run, status, history and the global options.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_jobs() {
    match parse(&["gleaner", "jobs"]) {
        CliCommand::Jobs { category, due } => {
            assert!(category.is_none());
            assert!(!due);
        }
        _ => panic!("expected Jobs"),
    }
}

#[test]
fn cli_parse_jobs_filters() {
    match parse(&["gleaner", "jobs", "--category", "vendors", "--due"]) {
        CliCommand::Jobs { category, due } => {
            assert_eq!(category.as_deref(), Some("vendors"));
            assert!(due);
        }
        _ => panic!("expected Jobs"),
    }
}

#[test]
fn cli_parse_run() {
    match parse(&["gleaner", "run", "catalog"]) {
        CliCommand::Run { category, sample } => {
            assert_eq!(category, "catalog");
            assert!(sample.is_none());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_sample() {
    match parse(&["gleaner", "run", "catalog", "--sample", "25"]) {
        CliCommand::Run { sample, .. } => assert_eq!(sample, Some(25)),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_requires_category() {
    assert!(Cli::try_parse_from(["gleaner", "run"]).is_err());
}

#[test]
fn cli_parse_status() {
    match parse(&["gleaner", "status"]) {
        CliCommand::Status { operation } => assert!(operation.is_none()),
        _ => panic!("expected Status"),
    }
    match parse(&["gleaner", "status", "run-catalog"]) {
        CliCommand::Status { operation } => assert_eq!(operation.as_deref(), Some("run-catalog")),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_history_limit() {
    match parse(&["gleaner", "history"]) {
        CliCommand::History { limit } => assert_eq!(limit, 20),
        _ => panic!("expected History"),
    }
    match parse(&["gleaner", "history", "--limit", "5"]) {
        CliCommand::History { limit } => assert_eq!(limit, 5),
        _ => panic!("expected History"),
    }
}

#[test]
fn cli_parse_global_jobs_file() {
    let cli = Cli::try_parse_from(["gleaner", "jobs", "--jobs-file", "/etc/gleaner/jobs.toml"]).unwrap();
    assert_eq!(
        cli.jobs_file.as_deref(),
        Some(std::path::Path::new("/etc/gleaner/jobs.toml"))
    );
    let cli = Cli::try_parse_from(["gleaner", "--jobs-file", "j.toml", "history"]).unwrap();
    assert!(cli.jobs_file.is_some());
}

#[test]
fn cli_rejects_unknown_command() {
    assert!(Cli::try_parse_from(["gleaner", "download", "x"]).is_err());
}

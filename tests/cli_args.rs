// tests/cli_args.rs

use std::error::Error;

use clap::Parser;

use bddrun::cli::{CliArgs, Command, LogLevel};
use bddrun::engine::RunRequest;
use bddrun::logging::resolve_level;
use bddrun::types::{ExecutionType, TagLogic};

type TestResult = Result<(), Box<dyn Error>>;

fn run_request(argv: &[&str]) -> Result<RunRequest, Box<dyn Error>> {
    let args = CliArgs::try_parse_from(argv)?;
    match args.command {
        Command::Run(run) => Ok(run.to_request()),
        other => Err(format!("expected run command, got {other:?}").into()),
    }
}

#[test]
fn run_all_with_id() -> TestResult {
    let request = run_request(&["bddrun", "run", "all", "--id", "exec_42"])?;
    assert_eq!(request, RunRequest::all().with_id("exec_42"));
    Ok(())
}

#[test]
fn run_features() -> TestResult {
    let request = run_request(&["bddrun", "run", "feature", "login", "checkout.feature"])?;
    assert_eq!(request.execution_type, ExecutionType::Feature);
    assert_eq!(request.feature_files, vec!["login", "checkout.feature"]);
    assert_eq!(request.execution_id, None);
    Ok(())
}

#[test]
fn run_tags_defaults_to_and() -> TestResult {
    let request = run_request(&["bddrun", "run", "tags", "@smoke", "@login"])?;
    assert_eq!(request, RunRequest::tags(["@smoke", "@login"], TagLogic::And));

    let request = run_request(&["bddrun", "run", "tags", "@smoke", "--logic", "or"])?;
    assert_eq!(request.tag_logic, TagLogic::Or);
    Ok(())
}

#[test]
fn exclusions_make_a_complex_request() -> TestResult {
    let request = run_request(&[
        "bddrun", "run", "tags", "@smoke", "--logic", "or", "--exclude", "@wip",
    ])?;
    assert_eq!(request.execution_type, ExecutionType::ComplexTag);
    assert_eq!(request.tag_logic, TagLogic::And);
    assert_eq!(request.exclude_tags, vec!["@wip"]);
    Ok(())
}

#[test]
fn feature_and_tag_targets_need_arguments() {
    assert!(CliArgs::try_parse_from(["bddrun", "run", "feature"]).is_err());
    assert!(CliArgs::try_parse_from(["bddrun", "run", "tags"]).is_err());
}

#[test]
fn zero_timeout_override_is_rejected() {
    assert!(CliArgs::try_parse_from(["bddrun", "run", "all", "--timeout-secs", "0"]).is_err());
    assert!(CliArgs::try_parse_from(["bddrun", "run", "all", "--timeout-secs", "5"]).is_ok());
}

#[test]
fn global_flags_and_history_defaults() -> TestResult {
    let args = CliArgs::try_parse_from([
        "bddrun",
        "history",
        "--config",
        "other.toml",
        "--dry-run",
    ])?;
    assert_eq!(args.config, "other.toml");
    assert!(args.dry_run);
    match args.command {
        Command::History { tag, limit } => {
            assert_eq!(tag, None);
            assert_eq!(limit, 20);
        }
        other => panic!("expected history, got {other:?}"),
    }
    Ok(())
}

#[test]
fn log_level_prefers_flag_then_env() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), tracing::Level::DEBUG);
    assert_eq!(resolve_level(None, Some(" Warning ")), tracing::Level::WARN);
    assert_eq!(resolve_level(None, Some("verbose")), tracing::Level::INFO);
    assert_eq!(resolve_level(None, None), tracing::Level::INFO);
}

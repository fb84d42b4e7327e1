// tests/registry_cancel.rs

mod common;
use crate::common::{drain, init_tracing};

use std::error::Error;
use std::sync::Arc;

use tokio::process::Command;

use bddrun::engine::{ExecutionRegistry, Termination, TerminationFlag};
use bddrun::errors::BddrunError;
use bddrun::exec::SpawnedProcess;
use bddrun::exec::process;
use bddrun::progress::ProgressBroadcaster;
use bddrun::record::ExecutionRecord;
use bddrun::types::ExecutionType;
use bddrun_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn sleeper() -> Result<SpawnedProcess, BddrunError> {
    let mut cmd = Command::new("sleep");
    cmd.arg("30");
    process::spawn(cmd, "sleep")
}

fn registry() -> (Arc<ProgressBroadcaster>, ExecutionRegistry) {
    let broadcaster = Arc::new(ProgressBroadcaster::default());
    let registry = ExecutionRegistry::new(Arc::clone(&broadcaster));
    (broadcaster, registry)
}

#[tokio::test]
async fn cancel_kills_once_and_publishes_once() -> TestResult {
    init_tracing();
    let (broadcaster, registry) = registry();
    let mut sub = broadcaster.subscribe();

    let spawned = sleeper()?;
    let exit = spawned.exit.clone();
    let flag = Arc::new(TerminationFlag::new());
    registry.register(
        ExecutionRecord::new("exec_1", ExecutionType::All),
        spawned.handle,
        Arc::clone(&flag),
    )?;

    let snapshot = registry.lookup("exec_1").ok_or("not registered")?;
    assert!(snapshot.alive);
    assert_eq!(registry.running_ids(), vec!["exec_1"]);

    assert!(with_timeout(registry.cancel("exec_1")).await);
    assert!(!with_timeout(registry.cancel("exec_1")).await);

    assert!(!exit.is_alive());
    assert_eq!(flag.get(), Some(Termination::Cancelled));
    assert!(registry.is_empty());
    assert!(!registry.complete("exec_1"));

    let events = drain(&mut sub);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "Execution cancelled by user");
    assert_eq!(events[0].progress, -1);
    assert_eq!(events[0].execution_id, "exec_1");
    Ok(())
}

#[tokio::test]
async fn cancelling_unknown_id_does_nothing() -> TestResult {
    init_tracing();
    let (broadcaster, registry) = registry();
    let mut sub = broadcaster.subscribe();

    assert!(!registry.cancel("exec_missing").await);
    assert!(drain(&mut sub).is_empty());
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> TestResult {
    init_tracing();
    let (_broadcaster, registry) = registry();

    let first = sleeper()?;
    registry.register(
        ExecutionRecord::new("exec_dup", ExecutionType::All),
        first.handle,
        Arc::new(TerminationFlag::new()),
    )?;

    let second = sleeper()?;
    let second_exit = second.exit.clone();
    let result = registry.register(
        ExecutionRecord::new("exec_dup", ExecutionType::All),
        second.handle,
        Arc::new(TerminationFlag::new()),
    );

    assert!(matches!(result, Err(BddrunError::ValidationError(_))));
    assert_eq!(registry.len(), 1);
    assert!(with_timeout(second_exit.wait()).await.is_some());

    assert!(registry.terminate("exec_dup", Termination::Aborted).await);
    Ok(())
}

#[tokio::test]
async fn completion_claims_the_flag_first() -> TestResult {
    init_tracing();
    let (_broadcaster, registry) = registry();

    let spawned = sleeper()?;
    let flag = Arc::new(TerminationFlag::new());
    registry.register(
        ExecutionRecord::new("exec_done", ExecutionType::All),
        spawned.handle,
        Arc::clone(&flag),
    )?;

    assert!(registry.complete("exec_done"));
    assert!(!registry.terminate("exec_done", Termination::TimedOut).await);
    assert_eq!(flag.get(), Some(Termination::Completed));
    Ok(())
}

#[tokio::test]
async fn exited_process_cannot_be_terminated() -> TestResult {
    init_tracing();
    let (broadcaster, registry) = registry();
    let mut sub = broadcaster.subscribe();

    let spawned = process::spawn(Command::new("true"), "true")?;
    let exit = spawned.exit.clone();
    let flag = Arc::new(TerminationFlag::new());
    registry.register(
        ExecutionRecord::new("exec_exited", ExecutionType::All),
        spawned.handle,
        Arc::clone(&flag),
    )?;
    assert!(with_timeout(exit.wait()).await.is_some());

    assert!(!registry.cancel("exec_exited").await);
    assert!(!registry.terminate("exec_exited", Termination::TimedOut).await);
    assert_eq!(flag.get(), None);
    assert_eq!(registry.len(), 1);
    assert!(drain(&mut sub).is_empty());

    assert!(registry.complete("exec_exited"));
    assert_eq!(flag.get(), Some(Termination::Completed));
    Ok(())
}

#[test]
fn reserved_ids_stay_taken_until_released() {
    let (_broadcaster, registry) = registry();

    assert!(registry.reserve("exec_r"));
    assert!(!registry.reserve("exec_r"));
    assert!(registry.contains("exec_r"));
    assert!(registry.is_empty());
    assert!(registry.record("exec_r").is_none());

    let mut record = ExecutionRecord::new("exec_r", ExecutionType::All);
    record.add_note("staged");
    registry.stage(record);
    let staged = registry.record("exec_r").map(|r| r.notes);
    assert_eq!(staged, Some(Some("staged".to_string())));

    registry.release("exec_r");
    assert!(!registry.contains("exec_r"));
    assert!(registry.record("exec_r").is_none());
    assert!(registry.reserve("exec_r"));
}

#[tokio::test]
async fn completed_entry_stays_visible_until_released() -> TestResult {
    init_tracing();
    let (_broadcaster, registry) = registry();

    let spawned = process::spawn(Command::new("true"), "true")?;
    registry.register(
        ExecutionRecord::new("exec_fin", ExecutionType::All),
        spawned.handle,
        Arc::new(TerminationFlag::new()),
    )?;

    assert!(registry.complete("exec_fin"));
    assert!(registry.is_empty());
    assert!(registry.lookup("exec_fin").is_none());
    assert!(registry.record("exec_fin").is_some());
    assert!(!registry.reserve("exec_fin"));

    registry.release("exec_fin");
    assert!(registry.record("exec_fin").is_none());
    assert!(!registry.contains("exec_fin"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_and_cancel_race_has_one_winner() -> TestResult {
    init_tracing();
    for round in 0..20 {
        let (_broadcaster, registry) = registry();
        let registry = Arc::new(registry);
        let id = format!("exec_race_{round}");

        let spawned = sleeper()?;
        let flag = Arc::new(TerminationFlag::new());
        registry.register(
            ExecutionRecord::new(&id, ExecutionType::All),
            spawned.handle,
            Arc::clone(&flag),
        )?;

        let timer = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.terminate(&id, Termination::TimedOut).await })
        };
        let user = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.cancel(&id).await })
        };

        let timed_out = with_timeout(timer).await?;
        let cancelled = with_timeout(user).await?;

        assert!(timed_out ^ cancelled, "round {round}: both or neither won");
        let expected = if cancelled {
            Termination::Cancelled
        } else {
            Termination::TimedOut
        };
        assert_eq!(flag.get(), Some(expected));
        assert!(registry.is_empty());
    }
    Ok(())
}

#[test]
fn termination_flag_is_single_assignment() {
    let flag = TerminationFlag::new();
    assert_eq!(flag.get(), None);
    assert!(flag.claim(Termination::TimedOut));
    assert!(!flag.claim(Termination::Cancelled));
    assert_eq!(flag.get(), Some(Termination::TimedOut));
}

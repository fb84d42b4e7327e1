// tests/orchestrator_runs.rs

mod common;
use crate::common::{drain, init_tracing, messages};

use std::error::Error;
use std::time::Duration;

use bddrun::engine::RunRequest;
use bddrun::errors::BddrunError;
use bddrun::record::ExecutionRecord;
use bddrun::tags::KnownTags;
use bddrun::types::{ExecutionStatus, ExecutionType, TagLogic};
use bddrun_test_utils::builders::HarnessBuilder;
use bddrun_test_utils::fakes::{ExplodingParser, MemoryHistory, ScriptLauncher};
use bddrun_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

const PASSING_RUN: &str = r#"
echo '[INFO] Running RunCucumberTest'
echo 'Scenario: first'
echo 'Scenario: second'
echo '2 Scenarios (2 passed)'
echo '6 Steps (6 passed)'
echo '0m1.500s'
echo '[INFO] BUILD SUCCESS'
"#;

#[tokio::test]
async fn all_with_no_features_is_skipped_without_launching() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new().build();
    let mut sub = h.broadcaster.subscribe();

    let ticket = h.orchestrator.start(RunRequest::all())?;
    let id = ticket.execution_id().to_string();
    let record = with_timeout(ticket.wait()).await?;

    assert_eq!(record.status(), ExecutionStatus::Skipped);
    assert_eq!(record.execution_type, ExecutionType::All);
    assert_eq!(record.total_scenarios, 0);
    assert_eq!(record.notes.as_deref(), Some("No feature files found to execute"));
    assert!(record.feature_files.is_empty());

    assert_eq!(h.launcher.launch_count(), 0);
    assert!(h.registry.is_empty());
    assert_eq!(h.history.append_count(&id), 1);

    let events = drain(&mut sub);
    let last = events.last().ok_or("no progress events")?;
    assert_eq!(last.progress, 100);
    assert_eq!(events.first().map(|e| e.progress), Some(0));
    Ok(())
}

#[tokio::test]
async fn tag_run_launches_with_expression_and_records_matches() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &["@smoke"])
        .feature("b.feature", &["@smoke", "@login"])
        .feature("c.feature", &["@login"])
        .script(PASSING_RUN)
        .build();
    let mut sub = h.broadcaster.subscribe();

    let ticket = h
        .orchestrator
        .start(RunRequest::tags(["@smoke"], TagLogic::And))?;
    let record = with_timeout(ticket.wait()).await?;

    let requested = h.launcher.requested();
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].property("cucumber.filter.tags"), Some("@smoke"));
    assert_eq!(requested[0].args[0], "test");

    assert_eq!(record.execution_type, ExecutionType::TagBased);
    assert_eq!(record.feature_files, vec!["a.feature", "b.feature"]);
    assert_eq!(record.tags, vec!["@smoke"]);
    assert_eq!(record.tag_logic, Some(TagLogic::And));
    assert_eq!(record.status(), ExecutionStatus::Passed);
    assert_eq!(record.total_scenarios, 2);
    assert_eq!(record.passed_scenarios, 2);
    assert_eq!(record.total_steps, 6);
    assert_eq!(record.duration, "0m1.500s");

    let events = drain(&mut sub);
    let msgs = messages(&events);
    assert!(msgs.contains(&"Found 2 features to execute"));
    assert!(msgs.contains(&"Build succeeded"));
    assert_eq!(msgs.last(), Some(&"Execution completed!"));
    assert_eq!(events.last().map(|e| e.progress), Some(100));
    assert!(events.iter().all(|e| e.execution_id == record.execution_id()));
    Ok(())
}

#[tokio::test]
async fn progress_events_arrive_in_publish_order() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &["@smoke"])
        .script(PASSING_RUN)
        .build();
    let mut sub = h.broadcaster.subscribe();

    let ticket = h.orchestrator.start(RunRequest::tags(["smoke"], TagLogic::Or))?;
    with_timeout(ticket.wait()).await?;

    let events = drain(&mut sub);
    let position = |msg: &str| messages(&events).iter().position(|m| *m == msg);

    let preparing = position("Preparing test execution...").ok_or("missing preparing")?;
    let found = position("Found 1 features to execute").ok_or("missing found")?;
    let executing = position("Executing tests...").ok_or("missing executing")?;
    let processing = position("Processing results...").ok_or("missing processing")?;
    let completed = position("Execution completed!").ok_or("missing completed")?;

    assert!(preparing < found && found < executing);
    assert!(executing < processing && processing < completed);
    assert_eq!(completed, events.len() - 1);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    Ok(())
}

#[tokio::test]
async fn zero_scenarios_downgrades_success_to_skipped() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("echo '[INFO] BUILD SUCCESS'; exit 0")
        .build();

    let record = with_timeout(h.orchestrator.start(RunRequest::all())?.wait()).await?;

    assert_eq!(record.status(), ExecutionStatus::Skipped);
    let notes = record.notes.clone().unwrap_or_default();
    assert!(notes.contains("No scenarios executed"), "notes: {notes}");
    assert_eq!(h.launcher.launch_count(), 1);
    assert_eq!(h.history.append_count(record.execution_id()), 1);
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_is_a_failed_record_not_an_error() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("echo '2 Scenarios (1 passed, 1 failed)'; echo '[INFO] BUILD FAILURE'; exit 1")
        .build();
    let mut sub = h.broadcaster.subscribe();

    let record = with_timeout(h.orchestrator.start(RunRequest::all())?.wait()).await?;

    assert_eq!(record.status(), ExecutionStatus::Failed);
    assert_eq!(record.failed_scenarios, 1);
    assert_eq!(record.passed_scenarios, 1);
    let notes = record.notes.clone().unwrap_or_default();
    assert!(notes.contains("Runner exited with code 1"), "notes: {notes}");

    let events = drain(&mut sub);
    assert!(
        events
            .iter()
            .any(|e| e.message == "Build failed" && e.progress == -1)
    );
    assert_eq!(events.last().map(|e| e.progress), Some(-1));
    Ok(())
}

#[tokio::test]
async fn generated_report_is_recorded() -> TestResult {
    init_tracing();
    let reports = tempfile::tempdir()?;
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .reports_dir(reports.path())
        .script(
            r#"
echo '<html></html>' > "$BDDRUN_REPORT"
echo '1 Scenarios (1 passed)'
"#,
        )
        .build();

    let ticket = h.orchestrator.start(RunRequest::all().with_id("exec_report"))?;
    let record = with_timeout(ticket.wait()).await?;

    let expected = reports.path().join("cucumber-report-exec_report.html");
    assert_eq!(record.report_path.as_deref(), Some(expected.as_path()));
    assert_eq!(record.status(), ExecutionStatus::Passed);
    assert_eq!(record.notes, None);
    Ok(())
}

#[tokio::test]
async fn missing_report_is_noted() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("echo '1 Scenarios (1 passed)'")
        .build();
    let mut sub = h.broadcaster.subscribe();

    let record = with_timeout(h.orchestrator.start(RunRequest::all())?.wait()).await?;

    assert_eq!(record.status(), ExecutionStatus::Passed);
    assert_eq!(record.report_path, None);
    assert_eq!(record.duration, "N/A");
    assert_eq!(serde_json::to_value(&record)?["duration"], "N/A");
    let notes = record.notes.clone().unwrap_or_default();
    assert!(notes.starts_with("Report not generated: "), "notes: {notes}");
    assert!(
        drain(&mut sub)
            .iter()
            .any(|e| e.progress == 99 && e.message.starts_with("Report not generated"))
    );
    Ok(())
}

#[tokio::test]
async fn tags_without_matching_features_are_skipped() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new().feature("a.feature", &["@login"]).build();

    let record = with_timeout(
        h.orchestrator
            .start(RunRequest::tags(["@smoke"], TagLogic::And))?
            .wait(),
    )
    .await?;

    assert_eq!(record.status(), ExecutionStatus::Skipped);
    assert_eq!(
        record.notes.as_deref(),
        Some("No matching features found for tags: [@smoke]")
    );
    assert_eq!(record.tags, vec!["@smoke"]);
    assert_eq!(h.launcher.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_tags_are_rejected_before_anything_happens() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &["@smoke"])
        .tags(KnownTags::new(["@smoke"]))
        .build();
    let mut sub = h.broadcaster.subscribe();

    let result = h
        .orchestrator
        .start(RunRequest::tags(["@nope", "  "], TagLogic::And));

    match result {
        Err(BddrunError::ValidationError(msg)) => assert!(msg.contains("No valid tags")),
        other => panic!("expected ValidationError, got {other:?}"),
    }
    assert_eq!(h.launcher.launch_count(), 0);
    assert!(h.registry.is_empty());
    assert!(h.history.records().is_empty());
    assert!(drain(&mut sub).is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_feature_is_rejected() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new().feature("login.feature", &[]).build();

    let result = h
        .orchestrator
        .start(RunRequest::features(["login", "checkout.feature"]));

    assert!(matches!(result, Err(BddrunError::ValidationError(_))));
    assert_eq!(h.launcher.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn feature_run_passes_feature_paths() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("checkout.feature", &[])
        .feature("login.feature", &[])
        .script("echo '1 Scenarios (1 passed)'")
        .build();

    let record = with_timeout(
        h.orchestrator
            .start(RunRequest::features(["login", "checkout.feature"]))?
            .wait(),
    )
    .await?;

    let spec = &h.launcher.requested()[0];
    assert_eq!(
        spec.property("cucumber.features"),
        Some("features/login.feature,features/checkout.feature")
    );
    assert_eq!(record.execution_type, ExecutionType::Feature);
    assert_eq!(record.feature_files, vec!["login.feature", "checkout.feature"]);
    Ok(())
}

#[tokio::test]
async fn complex_request_records_exclusions_but_filters_on_includes() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &["@smoke", "@login"])
        .script("echo '1 Scenarios (1 passed)'")
        .build();

    let record = with_timeout(
        h.orchestrator
            .start(RunRequest::complex(["@smoke", "@login"], ["@wip"]))?
            .wait(),
    )
    .await?;

    let spec = &h.launcher.requested()[0];
    assert_eq!(spec.property("cucumber.filter.tags"), Some("@smoke and @login"));
    assert_eq!(record.execution_type, ExecutionType::ComplexTag);
    assert_eq!(record.tag_logic, Some(TagLogic::And));
    assert_eq!(record.exclude_tags, vec!["@wip"]);
    Ok(())
}

#[tokio::test]
async fn reused_execution_id_is_rejected() -> TestResult {
    init_tracing();
    let existing = ExecutionRecord::new("exec_dup", ExecutionType::All);
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .history(MemoryHistory::with_records(vec![existing]))
        .build();

    let result = h.orchestrator.start(RunRequest::all().with_id("exec_dup"));

    assert!(matches!(result, Err(BddrunError::ValidationError(_))));
    assert_eq!(h.launcher.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn same_id_is_accepted_once_while_in_flight() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("sleep 0.2; echo '1 Scenarios (1 passed)'")
        .build();

    let first = h.orchestrator.start(RunRequest::all().with_id("exec_same"));
    let second = h.orchestrator.start(RunRequest::all().with_id("exec_same"));
    assert!(matches!(second, Err(BddrunError::ValidationError(_))));

    let record = with_timeout(first?.wait()).await?;
    assert_eq!(record.status(), ExecutionStatus::Passed);
    assert_eq!(h.launcher.launch_count(), 1);
    assert_eq!(h.history.append_count("exec_same"), 1);

    let again = h.orchestrator.start(RunRequest::all().with_id("exec_same"));
    assert!(matches!(again, Err(BddrunError::ValidationError(_))));
    Ok(())
}

#[tokio::test]
async fn same_id_is_accepted_once_for_skipped_runs() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new().build();

    let first = h.orchestrator.start(RunRequest::all().with_id("exec_skip_same"));
    let second = h.orchestrator.start(RunRequest::all().with_id("exec_skip_same"));
    assert!(matches!(second, Err(BddrunError::ValidationError(_))));

    let record = with_timeout(first?.wait()).await?;
    assert_eq!(record.status(), ExecutionStatus::Skipped);
    assert_eq!(h.history.append_count("exec_skip_same"), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_start_frees_its_id() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new().feature("a.feature", &[]).build();

    let bad = h
        .orchestrator
        .start(RunRequest::features(["missing.feature"]).with_id("exec_retry"));
    assert!(matches!(bad, Err(BddrunError::ValidationError(_))));
    assert!(!h.registry.contains("exec_retry"));

    let record = with_timeout(
        h.orchestrator
            .start(RunRequest::features(["a.feature"]).with_id("exec_retry"))?
            .wait(),
    )
    .await?;
    assert_eq!(record.execution_id(), "exec_retry");
    Ok(())
}

#[tokio::test]
async fn finished_run_stays_visible_while_history_append_is_slow() -> TestResult {
    init_tracing();
    let history = MemoryHistory::new();
    history.delay_appends(Duration::from_millis(800));
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .history(history)
        .script("echo '1 Scenarios (1 passed)'")
        .build();

    let ticket = h.orchestrator.start(RunRequest::all())?;
    let id = ticket.execution_id().to_string();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.history.records().is_empty());
    let during = h.orchestrator.status(&id)?;
    assert_eq!(during.status(), ExecutionStatus::Passed);
    assert_eq!(during.total_scenarios, 1);

    with_timeout(ticket.wait()).await?;
    assert_eq!(h.history.append_count(&id), 1);
    assert!(!h.registry.contains(&id));
    assert_eq!(h.orchestrator.status(&id)?.status(), ExecutionStatus::Passed);
    Ok(())
}

#[tokio::test]
async fn panicking_run_is_recorded_as_failed_without_touching_others() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("explode.feature", &[])
        .feature("calm.feature", &[])
        .parser(ExplodingParser::new("EXPLODE-PARSER"))
        .script(
            "case \"$BDDRUN_ARGS\" in *explode*) echo 'EXPLODE-PARSER';; esac; \
             sleep 0.2; echo '1 Scenarios (1 passed)'",
        )
        .build();
    let mut sub = h.broadcaster.subscribe();

    let boom = h
        .orchestrator
        .start(RunRequest::features(["explode.feature"]).with_id("exec_boom"))?;
    let calm = h
        .orchestrator
        .start(RunRequest::features(["calm.feature"]).with_id("exec_calm"))?;

    let (boom, calm) = with_timeout(async { tokio::join!(boom.wait(), calm.wait()) }).await;
    let boom = boom?;
    let calm = calm?;

    assert_eq!(boom.status(), ExecutionStatus::Failed);
    let notes = boom.notes.clone().unwrap_or_default();
    assert!(notes.contains("Execution failed:"), "notes: {notes}");
    assert_eq!(calm.status(), ExecutionStatus::Passed);
    assert_eq!(calm.total_scenarios, 1);

    let events = drain(&mut sub);
    let last_boom = events
        .iter()
        .rev()
        .find(|e| e.execution_id == "exec_boom")
        .ok_or("no events for exec_boom")?;
    assert_eq!(last_boom.progress, -1);
    assert!(last_boom.message.starts_with("Execution failed:"), "{}", last_boom.message);
    let last_calm = events
        .iter()
        .rev()
        .find(|e| e.execution_id == "exec_calm")
        .ok_or("no events for exec_calm")?;
    assert_eq!(last_calm.progress, 100);

    assert!(h.registry.is_empty());
    assert!(!h.registry.contains("exec_boom"));
    assert_eq!(h.history.append_count("exec_boom"), 1);
    assert_eq!(h.orchestrator.status("exec_boom")?.status(), ExecutionStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn launch_error_creates_no_record() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .launcher(ScriptLauncher::unlaunchable())
        .build();

    let result = h.orchestrator.start(RunRequest::all().with_id("exec_nolaunch"));

    assert!(matches!(result, Err(BddrunError::LaunchError { .. })));
    assert!(h.registry.is_empty());
    assert!(h.history.records().is_empty());
    assert!(matches!(
        h.orchestrator.status("exec_nolaunch"),
        Err(BddrunError::ExecutionNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn scenario_progress_is_monotonic_and_capped() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("for i in 1 2 3 4 5 6 7 8 9 10; do echo \"Scenario: s$i\"; done; echo '10 Scenarios (10 passed)'")
        .build();
    let mut sub = h.broadcaster.subscribe();

    with_timeout(h.orchestrator.start(RunRequest::features(["a.feature"]))?.wait()).await?;

    let scenario_progress: Vec<i32> = drain(&mut sub)
        .iter()
        .filter(|e| e.message.starts_with("Running: "))
        .map(|e| e.progress)
        .collect();

    assert_eq!(scenario_progress.len(), 10);
    assert_eq!(scenario_progress.first(), Some(&40));
    assert!(scenario_progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(scenario_progress.iter().max(), Some(&90));
    Ok(())
}

#[tokio::test]
async fn build_failure_does_not_reset_scenario_progress() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script(
            "echo 'Scenario: one'; echo '[ERROR] BUILD FAILURE'; echo 'Scenario: two'; \
             echo '2 Scenarios (1 passed, 1 failed)'; exit 1",
        )
        .build();
    let mut sub = h.broadcaster.subscribe();

    let record =
        with_timeout(h.orchestrator.start(RunRequest::features(["a.feature"]))?.wait()).await?;
    assert_eq!(record.status(), ExecutionStatus::Failed);

    let events = drain(&mut sub);
    let progress: Vec<(String, i32)> = events
        .iter()
        .filter(|e| e.message.starts_with("Running: ") || e.message == "Build failed")
        .map(|e| (e.message.clone(), e.progress))
        .collect();
    assert_eq!(
        progress,
        vec![
            ("Running: Scenario: one".to_string(), 40),
            ("Build failed".to_string(), -1),
            ("Running: Scenario: two".to_string(), 50),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failed_history_append_still_finishes_the_run() -> TestResult {
    init_tracing();
    let history = MemoryHistory::new();
    history.fail_appends(true);
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .history(history)
        .script("echo '1 Scenarios (1 passed)'")
        .build();
    let mut sub = h.broadcaster.subscribe();

    let record = with_timeout(h.orchestrator.start(RunRequest::all())?.wait()).await?;

    assert_eq!(record.status(), ExecutionStatus::Passed);
    let notes = record.notes.clone().unwrap_or_default();
    assert!(notes.contains("History append failed"), "notes: {notes}");
    assert_eq!(drain(&mut sub).last().map(|e| e.progress), Some(100));
    assert!(h.registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_are_independent() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new()
        .feature("a.feature", &[])
        .script("sleep 0.2; echo '1 Scenarios (1 passed)'")
        .build();

    let first = h.orchestrator.start(RunRequest::all())?;
    let second = h.orchestrator.start(RunRequest::all())?;
    assert_ne!(first.execution_id(), second.execution_id());
    assert_eq!(h.registry.len(), 2);

    let (a, b) = with_timeout(async { tokio::join!(first.wait(), second.wait()) }).await;
    assert_eq!(a?.status(), ExecutionStatus::Passed);
    assert_eq!(b?.status(), ExecutionStatus::Passed);
    assert!(h.registry.is_empty());
    assert_eq!(h.history.records().len(), 2);
    Ok(())
}

//! End-to-end tests of the check engine against an in-memory file system

use chrono::{DateTime, Duration, Utc};
use convenient_futd::{
    rules, BuildAction, BuildUpToDateCheck, CancellationSignal, CriticalBuildTasks,
    FailureReason, FileSystem, FutdConfig, FutdResult, GlobalProperties, JsonStatePersistence,
    MemoryFileSystem, ProjectChangeBundle, RuleSnapshot,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use tokio::task::JoinSet;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// `/src/app/app.csproj` with `Program.cs` compiling into `bin/app.dll`.
fn app_bundle(sources: &[&str]) -> ProjectChangeBundle {
    let mut compile = RuleSnapshot::default();
    for source in sources {
        compile = compile.with_item(*source, &[]);
    }
    ProjectChangeBundle::new(1)
        .with_rule(
            rules::CONFIGURATION_GENERAL,
            RuleSnapshot::default()
                .with_property(rules::PROJECT_FULL_PATH_PROPERTY, "/src/app/app.csproj")
                .with_property(rules::OUTPUT_PATH_PROPERTY, "bin"),
        )
        .with_rule(rules::ITEM_TYPE, RuleSnapshot::default().with_item("Compile", &[]))
        .with_rule(
            rules::UP_TO_DATE_CHECK_BUILT,
            RuleSnapshot::default().with_item("bin/app.dll", &[]),
        )
        .with_source_items("Compile", compile)
}

fn app_files() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.set("/src/app/app.csproj", at(100));
    fs.set("/src/app/Program.cs", at(150));
    fs.set("/src/app/bin/app.dll", at(200));
    fs
}

async fn loaded_engine(fs: &Arc<MemoryFileSystem>) -> BuildUpToDateCheck {
    let engine = BuildUpToDateCheck::new("app", fs.clone());
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    engine
}

async fn check(engine: &BuildUpToDateCheck) -> bool {
    engine
        .is_up_to_date(BuildAction::Build, &GlobalProperties::new(), &CancellationSignal::new())
        .await
}

fn last_reason(engine: &BuildUpToDateCheck) -> Option<FailureReason> {
    engine.last_outcome().and_then(|outcome| outcome.reason())
}

#[tokio::test]
async fn first_run_records_a_baseline_then_checks_agree() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;

    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::FirstRun));

    assert!(check(&engine).await);
    assert!(check(&engine).await);
    assert_eq!(last_reason(&engine), None);
}

#[tokio::test]
async fn stale_stays_stale_until_outputs_are_rebuilt() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;

    fs.set("/src/app/Program.cs", at(250));
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::InputNewerThanEarliestOutput));
    assert!(!check(&engine).await);

    fs.set("/src/app/bin/app.dll", at(300));
    assert!(check(&engine).await);
}

#[tokio::test]
async fn input_touched_after_last_check_is_caught() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;
    assert!(check(&engine).await);
    let checked_at = engine.last_outcome().unwrap().committed_at.unwrap();

    // Touched while the build ran; the build then wrote a newer output
    fs.set("/src/app/Program.cs", checked_at + Duration::seconds(60));
    fs.set("/src/app/bin/app.dll", checked_at + Duration::seconds(120));

    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::InputModifiedSinceLastCheck));
    // The negative answer still committed its start instant
    assert!(engine.last_outcome().unwrap().committed_at.unwrap() >= checked_at);
}

#[tokio::test]
async fn item_changes_after_load_are_detected() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;
    assert!(check(&engine).await);

    fs.set("/src/app/Helpers.cs", at(120));
    engine
        .apply_project_change(
            "net8.0",
            &ProjectChangeBundle::new(2).with_source_items(
                "Compile",
                RuleSnapshot::default()
                    .with_item("Program.cs", &[])
                    .with_item("Helpers.cs", &[]),
            ),
        )
        .await
        .unwrap();

    assert!(!check(&engine).await);
    assert_eq!(
        last_reason(&engine),
        Some(FailureReason::ProjectItemsChangedSinceEarliestOutput)
    );
}

#[tokio::test]
async fn validation_does_not_commit() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;
    assert!(check(&engine).await);
    let states = engine.states().await;

    let validation = engine.validate_up_to_date(&CancellationSignal::new()).await;
    assert!(validation.up_to_date);
    assert_eq!(engine.states().await, states);

    fs.set("/src/app/Program.cs", at(250));
    let validation = engine.validate_up_to_date(&CancellationSignal::new()).await;
    assert!(!validation.up_to_date);
    assert_eq!(validation.reason, Some(FailureReason::InputNewerThanEarliestOutput));
    assert_eq!(engine.states().await, states);
    // The cached answer is from the last real check
    assert!(engine.last_outcome().unwrap().up_to_date);
}

#[tokio::test]
async fn validation_reuses_last_global_properties() {
    let fs = app_files();
    let engine = BuildUpToDateCheck::new("app", fs.clone());
    let _ = engine.set_configurations(["net8.0"]);
    let bundle = app_bundle(&["Program.cs"]).with_rule(
        rules::UP_TO_DATE_CHECK_INPUT,
        RuleSnapshot::default().with_item("docs/readme.md", &[(rules::KIND_METADATA, "Docs")]),
    );
    engine.apply_project_change("net8.0", &bundle).await.unwrap();
    fs.set("/src/app/docs/readme.md", at(500));

    let mut properties = GlobalProperties::new();
    let _ = properties.insert(rules::IGNORE_KINDS_GLOBAL_PROPERTY.to_string(), "Docs".to_string());
    let cancel = CancellationSignal::new();

    let _ = engine.is_up_to_date(BuildAction::Build, &properties, &cancel).await;
    assert!(engine.is_up_to_date(BuildAction::Build, &properties, &cancel).await);
    assert!(engine.validate_up_to_date(&cancel).await.up_to_date);

    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::InputNewerThanEarliestOutput));
}

#[tokio::test]
async fn every_configuration_must_pass() {
    let fs = app_files();
    fs.set("/src/app/bin/net472/app.dll", at(200));
    let engine = BuildUpToDateCheck::new("app", fs.clone());
    let _ = engine.set_configurations(["net472", "net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    engine
        .apply_project_change(
            "net472",
            &app_bundle(&["Program.cs"]).with_rule(
                rules::UP_TO_DATE_CHECK_BUILT,
                RuleSnapshot::default().with_item("bin/net472/app.dll", &[]),
            ),
        )
        .await
        .unwrap();

    let _ = check(&engine).await;
    assert!(check(&engine).await);

    fs.set("/src/app/bin/net472/app.dll", at(120));
    assert!(!check(&engine).await);
    let outcome = engine.last_outcome().unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::InputNewerThanEarliestOutput));
    assert_eq!(outcome.configuration.as_deref(), Some("net472"));
}

#[tokio::test]
async fn options_can_disable_the_check() {
    let fs = app_files();
    let engine = BuildUpToDateCheck::new("app", fs.clone()).with_options(Arc::new(FutdConfig {
        enabled: false,
        ..FutdConfig::default()
    }));
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();

    assert!(!check(&engine).await);
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::Disabled));
}

#[tokio::test]
async fn project_property_can_disable_the_check() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;
    engine
        .apply_project_change(
            "net8.0",
            &ProjectChangeBundle::new(2).with_rule(
                rules::CONFIGURATION_GENERAL,
                RuleSnapshot::default()
                    .with_property(rules::PROJECT_FULL_PATH_PROPERTY, "/src/app/app.csproj")
                    .with_property(rules::OUTPUT_PATH_PROPERTY, "bin")
                    .with_property(rules::DISABLE_PROPERTY, "true"),
            ),
        )
        .await
        .unwrap();

    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::Disabled));
}

struct PendingTasks(AtomicBool);

impl CriticalBuildTasks for PendingTasks {
    fn has_pending_tasks(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn pending_critical_tasks_force_a_build() {
    let fs = app_files();
    let tasks = Arc::new(PendingTasks(AtomicBool::new(false)));
    let engine = BuildUpToDateCheck::new("app", fs.clone()).with_build_tasks(tasks.clone());
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    let _ = check(&engine).await;

    tasks.0.store(true, Ordering::SeqCst);
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::CriticalTasks));

    tasks.0.store(false, Ordering::SeqCst);
    assert!(check(&engine).await);
}

#[tokio::test]
async fn answers_given_before_comparing_files_do_not_advance_last_check() {
    let fs = app_files();
    let tasks = Arc::new(PendingTasks(AtomicBool::new(false)));
    let engine = BuildUpToDateCheck::new("app", fs.clone()).with_build_tasks(tasks.clone());
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    let _ = check(&engine).await;
    assert!(check(&engine).await);
    let checked_at = engine.last_outcome().unwrap().committed_at.unwrap();

    // Touched while a build ran, which then wrote a newer output
    fs.set("/src/app/Program.cs", checked_at + Duration::milliseconds(5));
    fs.set("/src/app/bin/app.dll", checked_at + Duration::milliseconds(10));

    tasks.0.store(true, Ordering::SeqCst);
    assert!(!check(&engine).await);
    let outcome = engine.last_outcome().unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::CriticalTasks));
    assert_eq!(outcome.committed_at, None);
    assert_eq!(
        engine.states().await["net8.0"].last_checked_at_utc,
        Some(checked_at)
    );

    tasks.0.store(false, Ordering::SeqCst);
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::InputModifiedSinceLastCheck));
}

#[tokio::test]
async fn configurations_not_reached_keep_their_last_check() {
    let fs = app_files();
    fs.set("/src/app/bin/b/app.dll", at(200));
    let engine = BuildUpToDateCheck::new("app", fs.clone());
    let _ = engine.set_configurations(["a", "b"]);
    engine
        .apply_project_change("a", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    engine
        .apply_project_change(
            "b",
            &app_bundle(&["Program.cs"]).with_rule(
                rules::UP_TO_DATE_CHECK_BUILT,
                RuleSnapshot::default().with_item("bin/b/app.dll", &[]),
            ),
        )
        .await
        .unwrap();

    // The first check gives every configuration a baseline
    assert!(!check(&engine).await);
    assert!(check(&engine).await);
    let checked_at = engine.last_outcome().unwrap().committed_at.unwrap();

    fs.remove("/src/app/bin/app.dll");
    assert!(!check(&engine).await);
    let outcome = engine.last_outcome().unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::OutputNotFound));
    assert_eq!(outcome.configuration.as_deref(), Some("a"));

    assert!(outcome.committed_at.is_some());
    let states = engine.states().await;
    assert_eq!(states["a"].last_checked_at_utc, outcome.committed_at);
    assert_eq!(states["b"].last_checked_at_utc, Some(checked_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_validations_and_changes_agree() {
    let fs = app_files();
    let engine = Arc::new(loaded_engine(&fs).await);
    let _ = check(&engine).await;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let checker = Arc::clone(&engine);
        let _ = tasks.spawn(async move { check(&checker).await });

        let validator = Arc::clone(&engine);
        let _ = tasks.spawn(async move {
            validator
                .validate_up_to_date(&CancellationSignal::new())
                .await
                .up_to_date
        });

        // Re-applying the same items must never be observed half done
        let loader = Arc::clone(&engine);
        let _ = tasks.spawn(async move {
            loader
                .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
                .await
                .is_ok()
        });
    }

    let observer = Arc::clone(&engine);
    let last_checked = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..32 {
            seen.push(observer.states().await["net8.0"].last_checked_at_utc);
            tokio::task::yield_now().await;
        }
        seen
    });

    while let Some(answer) = tasks.join_next().await {
        assert!(answer.unwrap());
    }
    let seen = last_checked.await.unwrap();
    assert!(seen.iter().all(Option::is_some));
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
}

/// Blocks the first timestamp read after `arm` until the test releases it.
struct GatedFileSystem {
    inner: Arc<MemoryFileSystem>,
    armed: AtomicBool,
    gate: Arc<Barrier>,
}

impl GatedFileSystem {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl FileSystem for GatedFileSystem {
    fn last_write_time_utc(&self, path: &Path) -> FutdResult<Option<DateTime<Utc>>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            // Entered, then wait for release
            let _ = self.gate.wait();
            let _ = self.gate.wait();
        }
        self.inner.last_write_time_utc(path)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn check_in_flight_completes_when_configurations_change() {
    let gate = Arc::new(Barrier::new(2));
    let fs = Arc::new(GatedFileSystem {
        inner: app_files(),
        armed: AtomicBool::new(false),
        gate: Arc::clone(&gate),
    });
    let engine = Arc::new(BuildUpToDateCheck::new("app", fs.clone()));
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    let _ = check(&engine).await;

    fs.arm();
    let checker = Arc::clone(&engine);
    let in_flight = tokio::spawn(async move { check(&checker).await });

    let entered = Arc::clone(&gate);
    let _ = tokio::task::spawn_blocking(move || entered.wait()).await.unwrap();
    assert!(engine.set_configurations(["net8.0", "net472"]));
    let release = Arc::clone(&gate);
    let _ = tokio::task::spawn_blocking(move || release.wait()).await.unwrap();

    // The check answers from the states it started with
    assert!(in_flight.await.unwrap());
    let outcome = engine.last_outcome().unwrap();
    assert!(outcome.committed_at.is_some());

    // The new configuration set starts without state
    assert!(engine.states().await.is_empty());
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::NoProjectState));
}

#[tokio::test]
async fn cancelled_checks_do_not_commit() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;

    let cancel = CancellationSignal::new();
    cancel.cancel();
    assert!(
        !engine
            .is_up_to_date(BuildAction::Build, &GlobalProperties::new(), &cancel)
            .await
    );
    assert_eq!(last_reason(&engine), Some(FailureReason::Cancelled));

    // Still the first real run
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::FirstRun));
}

#[tokio::test]
async fn faults_answer_not_up_to_date_without_committing() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;

    fs.fail_on("/src/app/bin/app.dll");
    assert!(!check(&engine).await);
    let outcome = engine.last_outcome().unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::Exception));
    assert_eq!(outcome.committed_at, None);
}

#[tokio::test]
async fn deactivation_discards_state() {
    let fs = app_files();
    let engine = loaded_engine(&fs).await;
    let _ = check(&engine).await;
    assert!(check(&engine).await);

    engine.deactivate();
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::NoProjectState));

    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::FirstRun));
}

#[tokio::test]
async fn history_is_restored_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("futd-state.json");
    let fs = app_files();

    {
        let persistence = Arc::new(JsonStatePersistence::open(&history).unwrap());
        let engine = BuildUpToDateCheck::new("app", fs.clone()).with_persistence(persistence);
        let _ = engine.set_configurations(["net8.0"]);
        engine
            .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
            .await
            .unwrap();
        let _ = check(&engine).await;
        assert!(check(&engine).await);
    }
    assert!(history.exists());

    // Same items: the first check of the new session can pass
    let persistence = Arc::new(JsonStatePersistence::open(&history).unwrap());
    let engine = BuildUpToDateCheck::new("app", fs.clone()).with_persistence(persistence);
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs"]))
        .await
        .unwrap();
    assert!(engine.states().await["net8.0"].was_state_restored);
    assert!(check(&engine).await);

    // Different items: history does not apply
    fs.set("/src/app/Other.cs", at(120));
    let persistence = Arc::new(JsonStatePersistence::open(&history).unwrap());
    let engine = BuildUpToDateCheck::new("app", fs.clone()).with_persistence(persistence);
    let _ = engine.set_configurations(["net8.0"]);
    engine
        .apply_project_change("net8.0", &app_bundle(&["Program.cs", "Other.cs"]))
        .await
        .unwrap();
    let states = engine.states().await;
    let state = &states["net8.0"];
    assert!(!state.was_state_restored);
    assert!(state.last_items_changed_at_utc.is_some());
    assert!(!check(&engine).await);
    assert_eq!(last_reason(&engine), Some(FailureReason::FirstRun));
}

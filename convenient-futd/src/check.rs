//! The up-to-date check engine
//!
//! `BuildUpToDateCheck` is the surface a build host talks to. It takes in
//! project changes per configuration, answers "can this build be skipped",
//! and can re-validate its last answer after the build was skipped.

use crate::cancel::CancellationSignal;
use crate::change::{rules, ProjectChangeBundle};
use crate::error::{FutdError, FutdResult};
use crate::fs::FileSystem;
use crate::log::CheckLog;
use crate::options::{FutdConfig, ProjectSystemOptions};
use crate::persistence::{PersistedCheckState, StatePersistence};
use crate::pipeline::UpToDateChecker;
use crate::reason::{CheckFailure, CheckOutcome, FailureReason, ValidationResult};
use crate::state::ProjectState;
use crate::subscription::{ProjectStates, Subscription, SubscriptionSlot};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// What the host is about to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildAction {
    /// Incremental build; the only action the check can skip
    Build,
    /// Clean then build
    Rebuild,
    /// Remove outputs
    Clean,
}

/// Global properties of the requested build.
pub type GlobalProperties = BTreeMap<String, String>;

/// Kinds listed in the `FastUpToDateCheckIgnoresKinds` global property.
#[must_use]
pub fn ignore_kinds(global_properties: &GlobalProperties) -> BTreeSet<String> {
    global_properties
        .get(rules::IGNORE_KINDS_GLOBAL_PROPERTY)
        .map(|value| {
            value
                .split(';')
                .map(str::trim)
                .filter(|kind| !kind.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Queue of build-critical background work.
pub trait CriticalBuildTasks: Send + Sync {
    /// Whether any task the build depends on has not finished.
    fn has_pending_tasks(&self) -> bool;
}

/// No critical tasks ever pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCriticalTasks;

impl CriticalBuildTasks for NoCriticalTasks {
    fn has_pending_tasks(&self) -> bool {
        false
    }
}

/// Fast up-to-date check for one project.
pub struct BuildUpToDateCheck {
    project: String,
    fs: Arc<dyn FileSystem>,
    options: Arc<dyn ProjectSystemOptions>,
    build_tasks: Arc<dyn CriticalBuildTasks>,
    persistence: Option<Arc<dyn StatePersistence>>,
    subscription: SubscriptionSlot,
    last_global_properties: Mutex<GlobalProperties>,
    last_outcome: Mutex<Option<CheckOutcome>>,
}

impl std::fmt::Debug for BuildUpToDateCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildUpToDateCheck")
            .field("project", &self.project)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl BuildUpToDateCheck {
    /// Engine for `project` reading timestamps from `fs`.
    ///
    /// Starts with default options, no critical tasks, no persistence and
    /// no active configurations.
    pub fn new(project: impl Into<String>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            project: project.into(),
            fs,
            options: Arc::new(FutdConfig::default()),
            build_tasks: Arc::new(NoCriticalTasks),
            persistence: None,
            subscription: SubscriptionSlot::default(),
            last_global_properties: Mutex::new(GlobalProperties::new()),
            last_outcome: Mutex::new(None),
        }
    }

    /// Use `options` as the options source.
    #[must_use]
    pub fn with_options(mut self, options: Arc<dyn ProjectSystemOptions>) -> Self {
        self.options = options;
        self
    }

    /// Use `build_tasks` as the critical task queue.
    #[must_use]
    pub fn with_build_tasks(mut self, build_tasks: Arc<dyn CriticalBuildTasks>) -> Self {
        self.build_tasks = build_tasks;
        self
    }

    /// Restore and store check history through `persistence`.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Display name of the project.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Activate `configurations`.
    ///
    /// Returns whether the set changed. A change discards every state, since
    /// states are only meaningful for the configuration set they were built for.
    pub fn set_configurations<I, S>(&self, configurations: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next = Subscription::new(configurations);
        if self.subscription.current().configurations() == next.configurations() {
            return false;
        }
        info!(
            project = %self.project,
            "Active configurations changed to {:?}",
            next.configurations()
        );
        let _ = self.subscription.replace(next);
        true
    }

    /// Drop all states, keeping the active configurations.
    pub fn deactivate(&self) {
        let configurations = self.subscription.current().configurations().clone();
        let _ = self.subscription.replace(Subscription::new(configurations));
        debug!(project = %self.project, "Deactivated");
    }

    /// Fold `change` into the state of `configuration`.
    ///
    /// The first change that populates a configuration consults persisted
    /// history.
    ///
    /// # Errors
    ///
    /// Fails when `configuration` is not active or the subscription was
    /// replaced concurrently.
    pub async fn apply_project_change(
        &self,
        configuration: &str,
        change: &ProjectChangeBundle,
    ) -> FutdResult<()> {
        let subscription = self.subscription.current();
        if !subscription.configurations().contains(configuration) {
            return Err(FutdError::InvalidChange(format!(
                "configuration '{configuration}' is not active for {}",
                self.project
            )));
        }

        let now = Utc::now();
        subscription
            .update(|states| {
                let previous = states.get(configuration).cloned().unwrap_or_default();
                let mut next = previous.update(change, now);
                if !previous.has_item_types() && next.has_item_types() {
                    next = self.restore(configuration, next, now);
                }
                debug!(
                    project = %self.project,
                    configuration,
                    version = next.version,
                    "Applied project change"
                );
                let _ = states.insert(configuration.to_string(), next);
                Ok(())
            })
            .await
    }

    fn restore(&self, configuration: &str, state: ProjectState, now: DateTime<Utc>) -> ProjectState {
        let (Some(persistence), Some(project)) =
            (&self.persistence, state.project_full_path.as_deref())
        else {
            return state;
        };

        match persistence.restore(project, configuration) {
            Ok(Some(history)) if history.item_hash == state.item_hash() => {
                info!(project = %self.project, configuration, "Restored check history");
                state.restored(history.last_items_changed_at_utc, history.last_checked_at_utc)
            }
            Ok(Some(_)) => {
                info!(
                    project = %self.project,
                    configuration,
                    "Items changed since check history was written"
                );
                ProjectState {
                    last_items_changed_at_utc: Some(now),
                    ..state
                }
            }
            Ok(None) => state,
            Err(e) => {
                warn!(project = %self.project, configuration, "Failed to restore check history: {e}");
                state
            }
        }
    }

    async fn persist(&self, subscription: &Subscription) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        let entries: Vec<_> = subscription
            .snapshot()
            .await
            .into_iter()
            .filter_map(|(configuration, state)| {
                let project = state.project_full_path.clone()?;
                Some((configuration, project, PersistedCheckState::capture(&state)))
            })
            .collect();

        // Stores write files synchronously
        let written = tokio::task::spawn_blocking({
            let project = self.project.clone();
            move || {
                for (configuration, path, entry) in &entries {
                    if let Err(e) = persistence.store(path, configuration, entry) {
                        warn!(
                            project = %project,
                            configuration = configuration.as_str(),
                            "Failed to store check history: {e}"
                        );
                    }
                }
            }
        })
        .await;
        if let Err(e) = written {
            warn!(project = %self.project, "Check history writer did not finish: {e}");
        }
    }

    /// Whether the build can be skipped.
    ///
    /// Only `BuildAction::Build` is ever up to date. A conclusive answer
    /// commits the instant the check started as the last-checked instant of
    /// each configuration whose files it examined.
    pub async fn is_up_to_date(
        &self,
        build_action: BuildAction,
        global_properties: &GlobalProperties,
        cancel: &CancellationSignal,
    ) -> bool {
        if build_action != BuildAction::Build {
            debug!(project = %self.project, "{build_action:?} is never up to date");
            return false;
        }

        *self
            .last_global_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = global_properties.clone();

        let outcome = self.evaluate(global_properties, cancel, true).await;
        let up_to_date = outcome.up_to_date;
        *self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        up_to_date
    }

    /// Re-run the check with the last global properties without committing.
    ///
    /// Warns when a project previously reported up to date no longer is.
    pub async fn validate_up_to_date(&self, cancel: &CancellationSignal) -> ValidationResult {
        let global_properties = self
            .last_global_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let outcome = self.evaluate(&global_properties, cancel, false).await;

        let previously_up_to_date = self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|last| last.up_to_date);
        if previously_up_to_date && !outcome.up_to_date {
            warn!(
                project = %self.project,
                reason = ?outcome.reason(),
                "Project was reported up-to-date but validation found it is not"
            );
        }

        ValidationResult::from(&outcome)
    }

    /// Outcome of the last `is_up_to_date` that ran the pipeline.
    #[must_use]
    pub fn last_outcome(&self) -> Option<CheckOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the current states.
    pub async fn states(&self) -> ProjectStates {
        self.subscription.current().snapshot().await
    }

    async fn evaluate(
        &self,
        global_properties: &GlobalProperties,
        cancel: &CancellationSignal,
        commit: bool,
    ) -> CheckOutcome {
        let mut log = CheckLog::new(self.options.logging_level().await, self.project.as_str());

        if !self.options.is_fast_up_to_date_check_enabled().await {
            let failure = CheckFailure::new(
                FailureReason::Disabled,
                "The fast up-to-date check is disabled in options",
            );
            log.fail(&failure);
            return CheckOutcome::failed(failure, None, log.into_entries());
        }

        let ignore_kinds = ignore_kinds(global_properties);
        if !ignore_kinds.is_empty() {
            log.info(
                "FUTD_IgnoringKinds",
                format_args!("Ignoring up-to-date check items with kinds: {ignore_kinds:?}"),
            );
        }

        let critical_tasks_pending = self.build_tasks.has_pending_tasks();
        let subscription = self.subscription.current();
        let configurations = subscription.configurations();
        let fs = self.fs.as_ref();

        let outcome = subscription
            .run(
                |states, cancel| {
                    check_configurations(
                        fs,
                        configurations,
                        states,
                        &ignore_kinds,
                        critical_tasks_pending,
                        cancel,
                        log,
                    )
                },
                commit,
                cancel,
            )
            .await;

        if outcome.committed_at.is_some() {
            self.persist(&subscription).await;
        }
        outcome
    }
}

fn check_configurations(
    fs: &dyn FileSystem,
    configurations: &BTreeSet<String>,
    states: &ProjectStates,
    ignore_kinds: &BTreeSet<String>,
    critical_tasks_pending: bool,
    cancel: &CancellationSignal,
    mut log: CheckLog,
) -> CheckOutcome {
    if configurations.is_empty() {
        let failure = CheckFailure::new(FailureReason::NoProjectState, "No configuration is active");
        log.fail(&failure);
        return CheckOutcome::failed(failure, None, log.into_entries());
    }

    let mut checked = BTreeSet::new();
    for configuration in configurations {
        let Some(state) = states.get(configuration) else {
            let failure = CheckFailure::new(
                FailureReason::NoProjectState,
                format!("Configuration '{configuration}' has not been loaded"),
            );
            log.fail(&failure);
            return CheckOutcome::failed(failure, Some(configuration.clone()), log.into_entries())
                .with_checked_configurations(checked);
        };

        log.verbose(
            "FUTD_CheckingConfiguration",
            format_args!("Checking configuration '{configuration}':"),
        );
        log.indent();
        let run = UpToDateChecker::new(state, fs, &mut log, ignore_kinds, cancel)
            .run(critical_tasks_pending);
        log.unindent();

        if run.checked {
            let _ = checked.insert(configuration.clone());
        }
        if let Err(failure) = run.result {
            log.fail(&failure);
            if failure.reason.is_conclusive() {
                // The build that follows also covers configurations without a
                // baseline, so they get one now
                checked.extend(
                    states
                        .iter()
                        .filter(|(name, state)| configurations.contains(*name) && state.is_first_run())
                        .map(|(name, _)| name.clone()),
                );
            }
            return CheckOutcome::failed(failure, Some(configuration.clone()), log.into_entries())
                .with_checked_configurations(checked);
        }
    }

    log.info("FUTD_UpToDate", format_args!("Project is up-to-date."));
    CheckOutcome::up_to_date(log.into_entries()).with_checked_configurations(checked)
}

//! Serialized access to the per-configuration states of one project
//!
//! A `Subscription` owns the states of every active configuration. Checks
//! and state updates take the same async lock, so a check always sees a
//! consistent set of states and commits its start instant atomically.
//! When the set of configurations changes the engine replaces the whole
//! subscription through a `SubscriptionSlot`.

use crate::cancel::CancellationSignal;
use crate::error::{FutdError, FutdResult};
use crate::reason::{CheckFailure, CheckOutcome};
use crate::state::ProjectState;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

/// States by configuration name.
pub type ProjectStates = BTreeMap<String, ProjectState>;

/// The states of one set of active configurations.
#[derive(Debug, Default)]
pub struct Subscription {
    configurations: BTreeSet<String>,
    states: Mutex<ProjectStates>,
    disposed: AtomicBool,
}

impl Subscription {
    /// An empty subscription for `configurations`.
    pub fn new<I, S>(configurations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            configurations: configurations.into_iter().map(Into::into).collect(),
            states: Mutex::new(ProjectStates::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Active configurations.
    #[must_use]
    pub fn configurations(&self) -> &BTreeSet<String> {
        &self.configurations
    }

    /// Apply `f` to the states under the lock.
    ///
    /// # Errors
    ///
    /// Fails with `FutdError::Disposed` once the subscription is disposed,
    /// and propagates errors from `f`.
    pub async fn update<F, T>(&self, f: F) -> FutdResult<T>
    where
        F: FnOnce(&mut ProjectStates) -> FutdResult<T>,
    {
        if self.is_disposed() {
            return Err(FutdError::Disposed);
        }
        let mut states = self.states.lock().await;
        // Disposal may have raced with acquiring the lock
        if self.is_disposed() {
            return Err(FutdError::Disposed);
        }
        f(&mut states)
    }

    /// Run `check` against the states.
    ///
    /// The instant captured before `check` runs becomes the
    /// `last_checked_at_utc` of every configuration the outcome lists as
    /// checked, when `update_last_checked_at` is set and the outcome is
    /// conclusive, whether or not it is up to date. Other states keep their
    /// instant.
    pub async fn run<F>(
        &self,
        check: F,
        update_last_checked_at: bool,
        cancel: &CancellationSignal,
    ) -> CheckOutcome
    where
        F: FnOnce(&ProjectStates, &CancellationSignal) -> CheckOutcome,
    {
        let mut states = self.states.lock().await;
        if cancel.is_cancelled() {
            return CheckOutcome::failed(CheckFailure::cancelled(), None, Vec::new());
        }

        let started_at = Utc::now();
        let mut outcome = check(&states, cancel);
        if !update_last_checked_at || !outcome.is_conclusive() {
            return outcome;
        }

        let mut committed = 0_usize;
        for configuration in &outcome.checked_configurations {
            if let Some(state) = states.get_mut(configuration) {
                *state = state.with_last_checked_at_utc(started_at);
                committed += 1;
            }
        }
        if committed > 0 {
            outcome.committed_at = Some(started_at);
            debug!("Committed last-checked instant {started_at} for {committed} configurations");
        }

        outcome
    }

    /// Copy of the current states.
    pub async fn snapshot(&self) -> ProjectStates {
        self.states.lock().await.clone()
    }

    /// Reject further updates. Runs already waiting on the lock still complete.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Whether `dispose` was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Holder of the current subscription.
#[derive(Debug, Default)]
pub struct SubscriptionSlot {
    current: std::sync::Mutex<Arc<Subscription>>,
}

impl SubscriptionSlot {
    /// A slot holding `subscription`.
    #[must_use]
    pub fn new(subscription: Subscription) -> Self {
        Self {
            current: std::sync::Mutex::new(Arc::new(subscription)),
        }
    }

    /// The current subscription.
    #[must_use]
    pub fn current(&self) -> Arc<Subscription> {
        Arc::clone(&self.current.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `next` and dispose the subscription it replaces.
    pub fn replace(&self, next: Subscription) -> Arc<Subscription> {
        let next = Arc::new(next);
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&next))
        };
        previous.dispose();
        next
    }
}

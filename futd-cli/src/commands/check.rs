//! `check` and `validate` commands

use super::{open_engine, Settings};
use convenient_futd::{
    rules, BuildAction, CancellationSignal, CheckOutcome, GlobalProperties, LogEntry,
};
use std::error::Error;
use std::path::Path;
use tracing::warn;

/// Cancel `signal` on Ctrl-C.
fn cancel_on_interrupt(signal: &CancellationSignal) {
    let signal = signal.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling check");
            signal.cancel();
        }
    });
}

fn print_log(log: &[LogEntry]) {
    for entry in log {
        println!("{entry}");
    }
}

fn print_outcome(project: &str, outcome: &CheckOutcome) {
    print_log(&outcome.log);
    match (&outcome.failure, &outcome.configuration) {
        (None, _) => println!("{project}: up-to-date"),
        (Some(failure), Some(configuration)) => {
            println!("{project} [{configuration}]: not up-to-date ({failure})");
        }
        (Some(failure), None) => println!("{project}: not up-to-date ({failure})"),
    }
}

/// Run a recorded check. Returns whether the project is up to date.
pub async fn run_check(
    settings: &Settings,
    snapshot: &Path,
    ignore_kinds: Option<&str>,
    configurations: &[String],
) -> Result<bool, Box<dyn Error>> {
    let engine = open_engine(settings, snapshot, configurations).await?;

    let mut properties = GlobalProperties::new();
    if let Some(kinds) = ignore_kinds {
        let _ = properties.insert(rules::IGNORE_KINDS_GLOBAL_PROPERTY.to_string(), kinds.to_string());
    }

    let cancel = CancellationSignal::new();
    cancel_on_interrupt(&cancel);

    let up_to_date = engine
        .is_up_to_date(BuildAction::Build, &properties, &cancel)
        .await;
    if let Some(outcome) = engine.last_outcome() {
        print_outcome(engine.project(), &outcome);
    }
    Ok(up_to_date)
}

/// Run an unrecorded check. Returns whether the project is up to date.
pub async fn run_validate(
    settings: &Settings,
    snapshot: &Path,
    configurations: &[String],
) -> Result<bool, Box<dyn Error>> {
    let engine = open_engine(settings, snapshot, configurations).await?;

    let cancel = CancellationSignal::new();
    cancel_on_interrupt(&cancel);

    let result = engine.validate_up_to_date(&cancel).await;
    match (result.reason, result.message) {
        (Some(reason), Some(message)) => {
            println!("{}: not up-to-date ({reason}: {message})", engine.project());
        }
        _ => println!("{}: up-to-date", engine.project()),
    }
    Ok(result.up_to_date)
}

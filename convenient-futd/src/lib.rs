//! Fast up-to-date check for incremental builds.
//!
//! Decides, without invoking the build, whether a project's outputs are
//! current with respect to its inputs. The decision is made from file
//! timestamps and from the inputs and outputs the project declares, and is
//! conservative: whenever the answer cannot be established it is "not up
//! to date".
//!
//! # Features
//!
//! - Incremental folding of project change notifications into immutable,
//!   structurally shared per-configuration state
//! - Per-set input/output comparison with kind filtering
//! - Race protection against inputs touched during the previous build
//! - Copy-marker, copy-to-output and copied-output checks
//! - Keyed diagnostic log mirrored to `tracing`
//! - Optional check history persisted between sessions
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::DateTime;
//! use convenient_futd::{
//!     rules, BuildAction, BuildUpToDateCheck, CancellationSignal, GlobalProperties,
//!     MemoryFileSystem, ProjectChangeBundle, RuleSnapshot,
//! };
//!
//! let at = |secs| DateTime::from_timestamp(secs, 0).unwrap();
//! let fs = Arc::new(MemoryFileSystem::new());
//! fs.set("/src/app/app.csproj", at(100));
//! fs.set("/src/app/Program.cs", at(150));
//! fs.set("/src/app/bin/app.dll", at(200));
//!
//! let bundle = ProjectChangeBundle::new(1)
//!     .with_rule(
//!         rules::CONFIGURATION_GENERAL,
//!         RuleSnapshot::default()
//!             .with_property(rules::PROJECT_FULL_PATH_PROPERTY, "/src/app/app.csproj")
//!             .with_property(rules::OUTPUT_PATH_PROPERTY, "bin"),
//!     )
//!     .with_rule(rules::ITEM_TYPE, RuleSnapshot::default().with_item("Compile", &[]))
//!     .with_rule(
//!         rules::UP_TO_DATE_CHECK_BUILT,
//!         RuleSnapshot::default().with_item("bin/app.dll", &[]),
//!     )
//!     .with_source_items("Compile", RuleSnapshot::default().with_item("Program.cs", &[]));
//!
//! let engine = BuildUpToDateCheck::new("app", fs);
//! let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! runtime.block_on(async {
//!     engine.set_configurations(["net8.0"]);
//!     engine.apply_project_change("net8.0", &bundle).await.unwrap();
//!
//!     let properties = GlobalProperties::new();
//!     let cancel = CancellationSignal::new();
//!     // Nothing is known about the previous build yet; this answer records
//!     // the baseline
//!     assert!(!engine.is_up_to_date(BuildAction::Build, &properties, &cancel).await);
//!     // From here on, repeated checks of unchanged files agree
//!     assert!(engine.is_up_to_date(BuildAction::Build, &properties, &cancel).await);
//!     assert!(engine.is_up_to_date(BuildAction::Build, &properties, &cancel).await);
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod cancel;
pub mod change;
pub mod check;
pub mod error;
pub mod fs;
pub mod items;
pub mod log;
pub mod options;
pub mod persistence;
pub mod pipeline;
pub mod reason;
pub mod state;
pub mod subscription;
pub mod timestamp;

pub use cancel::CancellationSignal;
pub use change::{rules, ProjectChangeBundle, ProjectSnapshot, RuleChange, RuleSnapshot};
pub use check::{
    ignore_kinds, BuildAction, BuildUpToDateCheck, CriticalBuildTasks, GlobalProperties,
    NoCriticalTasks,
};
pub use error::{FutdError, FutdResult};
pub use fs::{FileSystem, MemoryFileSystem, RealFileSystem};
pub use items::{CopyType, UpToDateCheckItem};
pub use log::{CheckLog, LogEntry, LogLevel};
pub use options::{FutdConfig, ProjectSystemOptions};
pub use persistence::{JsonStatePersistence, PersistedCheckState, StatePersistence};
pub use pipeline::{PipelineRun, UpToDateChecker};
pub use reason::{CheckFailure, CheckOutcome, FailureReason, ValidationResult};
pub use state::ProjectState;
pub use subscription::{ProjectStates, Subscription, SubscriptionSlot};
pub use timestamp::TimestampCache;

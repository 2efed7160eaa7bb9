//! `inspect` command

use super::{open_engine, Settings};
use chrono::{DateTime, Utc};
use convenient_futd::ProjectState;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::Write;
use std::path::Path;

fn instant(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
}

fn path(path: Option<&Path>) -> String {
    path.map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
}

fn count_paths(map: &convenient_futd::items::PathsBySetAndKind) -> usize {
    map.values().flat_map(|by_kind| by_kind.values()).map(Vec::len).sum()
}

/// Human-readable summary of one configuration's state.
pub fn describe(configuration: &str, state: &ProjectState) -> String {
    let item_types: Vec<String> = state
        .item_types
        .iter()
        .map(|(name, is_input)| {
            if *is_input {
                name.clone()
            } else {
                format!("{name} (not an input)")
            }
        })
        .collect();
    let sets: BTreeSet<&str> = state.named_sets();

    let mut out = String::new();
    let _ = writeln!(out, "{configuration}:");
    let _ = writeln!(out, "  project file:       {}", path(state.project_full_path.as_deref()));
    let _ = writeln!(out, "  output directory:   {}", state.output_directory().display());
    let _ = writeln!(out, "  newest import:      {}", path(state.newest_import_input.as_deref()));
    let _ = writeln!(out, "  disabled:           {}", state.is_disabled);
    let _ = writeln!(out, "  item types:         {}", item_types.join(", "));
    let _ = writeln!(out, "  items:              {}", state.all_items().count());
    let _ = writeln!(out, "  custom inputs:      {}", count_paths(&state.custom_inputs_by_set));
    let _ = writeln!(out, "  custom outputs:     {}", count_paths(&state.custom_outputs_by_set));
    let _ = writeln!(out, "  built outputs:      {}", count_paths(&state.built_outputs_by_set));
    let _ = writeln!(out, "  copied outputs:     {}", state.copied_output_files.len());
    let _ = writeln!(
        out,
        "  named sets:         {}",
        sets.into_iter().collect::<Vec<_>>().join(", ")
    );
    let _ = writeln!(
        out,
        "  references:         {} analyzer, {} compilation, {} copy markers",
        state.analyzer_reference_paths.len(),
        state.compilation_reference_paths.len(),
        state.copy_reference_input_paths.len()
    );
    let _ = writeln!(out, "  copy marker:        {}", path(state.copy_up_to_date_marker.as_deref()));
    let _ = writeln!(out, "  items changed at:   {}", instant(state.last_items_changed_at_utc));
    let _ = writeln!(out, "  last checked at:    {}", instant(state.last_checked_at_utc));
    let _ = writeln!(out, "  history restored:   {}", state.was_state_restored);
    let _ = writeln!(out, "  item hash:          {}", state.item_hash());
    out
}

/// Print the folded state of every selected configuration.
pub async fn run_inspect(
    settings: &Settings,
    snapshot: &Path,
    configurations: &[String],
) -> Result<(), Box<dyn Error>> {
    let engine = open_engine(settings, snapshot, configurations).await?;
    println!("{}", engine.project());
    for (configuration, state) in &engine.states().await {
        print!("{}", describe(configuration, state));
    }
    Ok(())
}

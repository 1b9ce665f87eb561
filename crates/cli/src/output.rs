use crate::error::CliError;
use engine_runtime::{
    orchestrator::{CycleReport, SourceOutcome, TableOutcome},
    provision::{ProvisionReport, ProvisionStatus},
};
use model::tracking::TrackedTable;
use std::fmt::Write;

pub fn state_table(tables: &[TrackedTable]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<32} {:<20} {:<28} {:>12} {:<28}",
        "Source", "Table", "Watermark column", "Watermark", "Rows", "Last run"
    );
    let _ = writeln!(out, "{}", "-".repeat(131));
    for t in tables {
        let last_run = t
            .last_run_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            out,
            "{:<6} {:<32} {:<20} {:<28} {:>12} {:<28}",
            t.key.source,
            t.key.name,
            t.watermark_column,
            t.watermark.to_rfc3339(),
            t.last_row_count,
            last_run
        );
    }
    out
}

pub fn state_json(tables: &[TrackedTable]) -> Result<String, CliError> {
    let mut out = String::new();
    for t in tables {
        out.push_str(&serde_json::to_string(t)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn cycle_summary(report: &CycleReport) -> String {
    let mut out = String::new();
    for (source, outcome) in &report.sources {
        match outcome {
            SourceOutcome::NotStarted => {
                let _ = writeln!(out, "source {source}: not started");
            }
            SourceOutcome::Aborted { reason } => {
                let _ = writeln!(out, "source {source}: aborted ({reason})");
            }
            SourceOutcome::Completed(tables) => {
                let _ = writeln!(out, "source {source}: {} table(s)", tables.len());
                for (key, table) in tables {
                    let status = match table {
                        TableOutcome::Committed { window, rows } => format!(
                            "committed {} -> {} ({} rows)",
                            window.from.to_rfc3339(),
                            window.to.to_rfc3339(),
                            rows.map_or("?".to_string(), |r| r.to_string())
                        ),
                        TableOutcome::Extracted { window } => format!(
                            "extracted {} -> {} (not committed)",
                            window.from.to_rfc3339(),
                            window.to.to_rfc3339()
                        ),
                        TableOutcome::Failed { reason } => format!("failed: {reason}"),
                        TableOutcome::Skipped { reason } => format!("skipped: {reason}"),
                    };
                    let _ = writeln!(out, "  {:<32} {status}", key.name);
                }
            }
        }
    }
    out
}

pub fn provision_summary(report: &ProvisionReport) -> String {
    let mut out = String::new();
    for (key, status) in &report.tables {
        let status = match status {
            ProvisionStatus::Created => "created".to_string(),
            ProvisionStatus::Unchanged => "unchanged".to_string(),
            ProvisionStatus::Drifted => "schema drift".to_string(),
            ProvisionStatus::Conflict(reason) => format!("conflict: {reason}"),
            ProvisionStatus::Failed(reason) => format!("failed: {reason}"),
        };
        let _ = writeln!(out, "{:<40} {status}", key.to_string());
    }
    out
}

//! Output formatting for CLI commands.
//!
//! Every formatter returns a `String`; `main` decides where it goes.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Manifest, ValidationReport};
use crate::graph::DependencyGraph;
use crate::planner::{DeploymentPlan, DiffType, DriftStatus};
use crate::reconciler::{DriftReport, NodeStatus, RunReport};
use crate::state::DeploymentState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Node outcome row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Drift row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Recorded resource row.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Graph node row.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when producing JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a deployment plan, with field-level changes when `detailed`.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        let mut output = String::new();

        for conflict in &plan.conflicts {
            if let Some(message) = conflict.conflict_message() {
                let _ = writeln!(output, "{} {}: {message}", "⚠".yellow(), conflict.name);
            }
        }

        if !plan.has_work() {
            let _ = writeln!(
                output,
                "{} No changes required - infrastructure is up to date.",
                "✓".green()
            );
            return output;
        }

        let _ = writeln!(output, "\nExecution plan (manifest {})\n", short(&plan.manifest_hash));

        let rows: Vec<PlanActionRow> = plan
            .actionable()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a.action),
                resource: a.name.clone(),
                kind: a.kind.to_string(),
                reason: Self::truncate(&a.reason, 50),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actionable().filter(|a| !a.details.is_empty()) {
                let _ = writeln!(output, "\n{} {}", action.action.symbol(), action.name.bold());
                for detail in &action.details {
                    let marker = if detail.forces_replace {
                        " (forces replacement)".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(
                        output,
                        "    {}: {} -> {}{marker}",
                        detail.field,
                        render(detail.old_value.as_ref()),
                        render(detail.new_value.as_ref()),
                    );
                }
            }
        }

        let _ = writeln!(output, "\nPlan: {}", plan.summary());
        output
    }

    /// Formats the outcome of an apply or destroy.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = String::new();
                let rows: Vec<NodeRow> = report
                    .nodes
                    .iter()
                    .filter(|n| n.action.is_none_or(DiffType::is_change) || n.status == NodeStatus::Failed)
                    .map(|n| NodeRow {
                        name: n.name.clone(),
                        kind: n.kind.to_string(),
                        action: n.action.map_or_else(|| "-".to_string(), Self::format_action),
                        status: Self::format_status(n.status),
                        error: n.error.as_deref().map_or_else(String::new, |e| Self::truncate(e, 60)),
                    })
                    .collect();

                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push_str("\n\n");
                }

                let headline = if report.success() {
                    format!("{} {report}", "✓".green())
                } else {
                    format!("{} {report}", "✗".red())
                };
                let _ = writeln!(output, "{headline}");

                if !report.outputs.is_empty() {
                    output.push('\n');
                    output.push_str(&Self::format_outputs_text(&report.outputs));
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.entries.is_empty() {
                    return "No resources recorded.\n".to_string();
                }
                let rows: Vec<DriftRow> = report
                    .entries
                    .iter()
                    .map(|e| DriftRow {
                        name: e.name.clone(),
                        kind: e.kind.to_string(),
                        id: Self::truncate(&e.provider_id, 24),
                        status: match &e.status {
                            DriftStatus::InSync => "in sync".green().to_string(),
                            DriftStatus::Error { .. } => e.status.to_string().yellow().to_string(),
                            _ => e.status.to_string().red().to_string(),
                        },
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push_str("\n\n");
                let drifted = report.drifted().count();
                if drifted == 0 {
                    let _ = writeln!(output, "{} No drift detected.", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} {drifted}/{} resources have drifted.",
                        "⚠".yellow(),
                        report.entries.len()
                    );
                }
                output
            }
        }
    }

    /// Formats the state summary with recent history.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nState: {}/{}\n", state.project, state.stack);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.records.len());
                let _ = writeln!(output, "   Outputs: {}", state.outputs.len());

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} applied, {} failed, manifest {})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.applied,
                            entry.failed,
                            short(&entry.manifest_hash)
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the recorded resources as a table.
    #[must_use]
    pub fn format_records(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => to_json(&state.records.values().collect::<Vec<_>>()),
            OutputFormat::Text => {
                if state.records.is_empty() {
                    return "No resources recorded.\n".to_string();
                }
                let rows: Vec<RecordRow> = state
                    .records
                    .values()
                    .map(|r| RecordRow {
                        name: r.name.clone(),
                        kind: r.kind.to_string(),
                        id: Self::truncate(&r.provider_id, 24),
                        hash: short(&r.hash).to_string(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the graph in execution order.
    #[must_use]
    pub fn format_graph(&self, graph: &DependencyGraph) -> String {
        #[derive(Serialize)]
        struct GraphNodeJson {
            name: String,
            kind: String,
            depends_on: Vec<String>,
        }

        let nodes = graph.topological_order().into_iter().map(|i| GraphNodeJson {
            name: graph.name(i).to_string(),
            kind: graph.node(i).kind.to_string(),
            depends_on: graph.dependency_names(i),
        });

        match self.format {
            OutputFormat::Json => to_json(&nodes.collect::<Vec<_>>()),
            OutputFormat::Text => {
                let rows: Vec<GraphRow> = nodes
                    .enumerate()
                    .map(|(i, n)| GraphRow {
                        index: i + 1,
                        name: n.name,
                        kind: n.kind,
                        depends_on: n.depends_on.join(", "),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                let _ = write!(
                    output,
                    "\n\n{} resources, {} edges\n",
                    graph.len(),
                    graph.edge_count()
                );
                output
            }
        }
    }

    /// Formats stack outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => to_json(outputs),
            OutputFormat::Text if outputs.is_empty() => "No outputs recorded.\n".to_string(),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, Value>) -> String {
        let mut output = String::from("Outputs:\n");
        for (name, value) in outputs {
            let _ = writeln!(output, "   {} = {}", name.bold(), render(Some(value)));
        }
        output
    }

    /// Formats the result of `validate`.
    #[must_use]
    pub fn format_validation(
        &self,
        manifest: &Manifest,
        graph: &DependencyGraph,
        report: &ValidationReport,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "project": manifest.project.name,
                "stack": manifest.project.stack,
                "resources": graph.len(),
                "edges": graph.edge_count(),
                "outputs": manifest.outputs.len(),
                "warnings": report.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} {} is valid: {} resources, {} edges, {} outputs\n",
                    "✓".green(),
                    manifest.stack_id(),
                    graph.len(),
                    graph.edge_count(),
                    manifest.outputs.len()
                );
                if show_warnings {
                    for warning in &report.warnings {
                        let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                    }
                } else if report.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "{} warning(s); run with --warnings to show them",
                        report.warning_count()
                    );
                }
                output
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, status: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                to_json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => {
                let marker = match status {
                    "success" => "✓".green(),
                    "error" => "✗".red(),
                    _ => "⚠".yellow(),
                };
                format!("{marker} {message}")
            }
        }
    }

    fn format_action(action: DiffType) -> String {
        let label = format!("{}{action}", action.symbol().trim());
        match action {
            DiffType::Create => label.green().to_string(),
            DiffType::Update | DiffType::Replace => label.yellow().to_string(),
            DiffType::Delete => label.red().to_string(),
            DiffType::Read => label.cyan().to_string(),
            DiffType::NoChange => label.dimmed().to_string(),
        }
    }

    fn format_status(status: NodeStatus) -> String {
        match status {
            NodeStatus::Applied => status.to_string().green().to_string(),
            NodeStatus::Failed => status.to_string().red().to_string(),
            NodeStatus::Pending | NodeStatus::InProgress => status.to_string().yellow().to_string(),
        }
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => "(none)".dimmed().to_string(),
        Some(Value::String(s)) => format!("\"{s}\""),
        Some(other) => other.to_string(),
    }
}

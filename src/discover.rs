//! Offline maintenance tool that re-derives the parameter override table.
//!
//! Every catalog task is called with dummy arguments keyed by its *declared*
//! parameter names. When binding fails because the runtime expects another
//! name, the name is parsed out of the failure message and recorded as a
//! correction for the first declared parameter. Only single missing-argument
//! mismatches on that first parameter are detected; anything else needs a
//! manual entry.

use chrono::Local;
use colored::*;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::tasks::{CallConvention, OverrideTable, RawParameter, TaskDefinition, TaskKind};

const IMAGE_PATH: &str = "test_assets/sample.jpg";
const AUDIO_PATH: &str = "test_assets/sample.wav";
const VIDEO_PATH: &str = "test_assets/sample.mp4";

static MISSING_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"missing \d+ required positional arguments?: '(\w+)'").expect("valid regex")
});

/// What happened when one task was called.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The dummy call bound (and ran, unless binding only).
    Ok,
    /// The runtime wanted `runtime` where the signature declares `declared`.
    Inconsistency { declared: String, runtime: String },
    /// Binding failed with a message the heuristic cannot interpret.
    Unparsed(String),
    /// Loading or running the pipeline failed.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub tasks: Vec<TaskReport>,
    pub overrides: OverrideTable,
}

/// Plausible value for a declared parameter, picked from its name.
fn dummy_value(kind: TaskKind, name: &str) -> Value {
    if name.contains("image") {
        json!(IMAGE_PATH)
    } else if name.contains("video") {
        json!(VIDEO_PATH)
    } else if name.contains("audio") {
        json!(AUDIO_PATH)
    } else if name.contains("candidate_labels") {
        json!(["first label", "second label"])
    } else if name.contains("example") {
        json!({"question": "Who?", "context": "He did it."})
    } else if kind == TaskKind::FillMask {
        json!("Hello, I'm a [MASK] model.")
    } else {
        json!("This is a test sentence.")
    }
}

/// Dummy arguments for the required declared parameters of a task.
pub fn dummy_inputs(definition: &TaskDefinition) -> Map<String, Value> {
    definition
        .signature
        .iter()
        .filter(|p| p.is_required())
        .map(|p| (p.name.to_string(), dummy_value(definition.kind, p.name)))
        .collect()
}

/// Name captured from a missing-argument failure message.
pub fn missing_argument(message: &str) -> Option<&str> {
    MISSING_ARGUMENT
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn first_required(definition: &TaskDefinition) -> Option<&'static RawParameter> {
    definition.signature.iter().find(|p| p.is_required())
}

fn check_task(dispatcher: &Dispatcher, definition: &TaskDefinition, bind_only: bool) -> Outcome {
    let inputs = dummy_inputs(definition);

    // Keyword binding: the check is about names, whatever the serving convention.
    let message = match dispatcher.bind(definition.name, inputs.clone(), CallConvention::Keyword) {
        Ok(_) if bind_only => return Outcome::Ok,
        Ok(_) => {
            return match dispatcher.run_as(definition.name, inputs, CallConvention::Keyword) {
                Ok(_) => Outcome::Ok,
                Err(e) => Outcome::Failed(e.to_string()),
            }
        }
        Err(e) => e.to_string(),
    };

    match (missing_argument(&message), first_required(definition)) {
        (Some(runtime), Some(declared)) if declared.name != runtime => Outcome::Inconsistency {
            declared: declared.name.to_string(),
            runtime: runtime.to_string(),
        },
        _ => Outcome::Unparsed(message),
    }
}

/// Calls every catalog task known to the dispatcher's registry.
pub fn discover(dispatcher: &Dispatcher, catalog: &[TaskDefinition], bind_only: bool) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    for definition in catalog {
        if dispatcher.registry().get(definition.name).is_none() {
            continue;
        }
        pb.set_message(format!("Analyzing task: {}", definition.name));

        let outcome = check_task(dispatcher, definition, bind_only);
        match &outcome {
            Outcome::Ok => info!("'{}' OK", definition.name),
            Outcome::Inconsistency { declared, runtime } => {
                info!("Inconsistency for '{}': declared '{}', runtime needs '{}'", definition.name, declared, runtime);
                report.overrides.insert(definition.name, declared, runtime);
            }
            Outcome::Unparsed(msg) => warn!("Could not parse failure for '{}': {}", definition.name, msg),
            Outcome::Failed(msg) => warn!("Failed to run '{}': {}", definition.name, msg),
        }
        report.tasks.push(TaskReport { task: definition.name.to_string(), outcome });
    }

    pb.finish_with_message(format!("Analyzed {} tasks", report.tasks.len()));
    report
}

/// Per-task status table.
pub fn render_report(report: &DiscoveryReport) -> String {
    let mut table = Table::new();
    table
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Status").fg(Color::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Details").fg(Color::Cyan).add_attribute(Attribute::Bold),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for entry in &report.tasks {
        let (status, details) = match &entry.outcome {
            Outcome::Ok => (Cell::new("OK").fg(Color::Green), String::new()),
            Outcome::Inconsistency { declared, runtime } => (
                Cell::new("MISMATCH").fg(Color::Yellow),
                format!("declared '{}', runtime needs '{}'", declared, runtime),
            ),
            Outcome::Unparsed(msg) => (Cell::new("UNPARSED").fg(Color::Magenta), msg.clone()),
            Outcome::Failed(msg) => (Cell::new("FAILED").fg(Color::Red), msg.clone()),
        };
        table.add_row(vec![Cell::new(&entry.task).fg(Color::White), status, Cell::new(details)]);
    }
    table.to_string()
}

/// The override table as a constant ready to paste into the task schema.
pub fn render_overrides(overrides: &OverrideTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Regenerated by `hfpipe discover` on {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "const BUILTIN_OVERRIDES: &[(&str, &[(&str, &str)])] = &[");
    for (task, corrections) in overrides.iter() {
        let pairs: Vec<String> = corrections
            .iter()
            .map(|(raw, fixed)| format!("(\"{}\", \"{}\")", raw, fixed))
            .collect();
        let _ = writeln!(out, "    (\"{}\", &[{}]),", task, pairs.join(", "));
    }
    out.push_str("];");
    out
}

/// Prints the report and the regenerated table to stdout.
pub fn print_report(report: &DiscoveryReport) {
    println!("\n{}", render_report(report));
    println!("{}", "=".repeat(80).bright_black());
    if report.overrides == *OverrideTable::builtin() {
        println!("{}", "Override table is up to date.".bright_green());
    } else {
        println!("{}", "Override table differs from the shipped one.".yellow());
    }
    println!("\n{}", render_overrides(&report.overrides));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FakeSource, ModelCacheLoader};
    use crate::dispatch::tests::EchoFactory;
    use crate::tasks::{TaskRegistry, SUPPORTED_TASKS};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir, source: Arc<FakeSource>) -> Dispatcher {
        dispatcher_over(TaskRegistry::builtin(), dir, source)
    }

    fn dispatcher_over(registry: TaskRegistry, dir: &TempDir, source: Arc<FakeSource>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            ModelCacheLoader::new(dir.path().to_path_buf(), source),
            Arc::new(EchoFactory { fail_with: None }),
        )
    }

    #[test]
    fn test_bind_only_discovery_regenerates_builtin_overrides() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new());
        let report = discover(&dispatcher(&dir, source.clone()), SUPPORTED_TASKS, true);

        assert_eq!(report.overrides, *OverrideTable::builtin());
        assert_eq!(report.tasks.len(), SUPPORTED_TASKS.len());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discovery_without_overrides_rederives_builtin_table() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new());
        let registry = TaskRegistry::from_catalog(SUPPORTED_TASKS, &OverrideTable::default());
        let report = discover(&dispatcher_over(registry, &dir, source.clone()), SUPPORTED_TASKS, true);

        assert_eq!(report.overrides, *OverrideTable::builtin());
        let zero_shot = report.tasks.iter().find(|t| t.task == "zero-shot-classification").unwrap();
        assert_eq!(
            zero_shot.outcome,
            Outcome::Inconsistency { declared: "inputs".to_string(), runtime: "sequences".to_string() }
        );
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_regex_accepts_singular_and_plural() {
        assert_eq!(missing_argument("f() missing 1 required positional argument: 'inputs'"), Some("inputs"));
        assert_eq!(
            missing_argument("f() missing 2 required positional arguments: 'question' and 'context'"),
            Some("question")
        );
        assert_eq!(missing_argument("f() got an unexpected keyword argument 'x'"), None);
    }

    #[test]
    fn test_dummy_inputs_follow_parameter_names() {
        let zero_shot = crate::tasks::find_definition("zero-shot-classification").unwrap();
        let inputs = dummy_inputs(zero_shot);
        assert_eq!(inputs["candidate_labels"], json!(["first label", "second label"]));
        assert_eq!(inputs["inputs"], json!("This is a test sentence."));

        let fill_mask = crate::tasks::find_definition("fill-mask").unwrap();
        assert!(dummy_inputs(fill_mask)["inputs"].as_str().unwrap().contains("[MASK]"));
    }

    #[test]
    fn test_rendered_overrides_list_every_task() {
        let rendered = render_overrides(OverrideTable::builtin());
        assert!(rendered.contains("(\"token-classification\", &[(\"sentence\", \"inputs\")]),"));
        assert!(rendered.contains("(\"text-generation\", &[(\"prompt_text\", \"text_inputs\")]),"));
    }
}

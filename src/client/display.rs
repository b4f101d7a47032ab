use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::server::types::TaskSummary;

/// Displays the registered tasks with their default models and parameters.
///
/// # Arguments
///
/// * `tasks` - The task listing returned by the server
pub fn display_tasks_table(tasks: &BTreeMap<String, TaskSummary>) {
    if tasks.is_empty() {
        println!("{}", "No tasks registered".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Default model").fg(Color::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Parameters").fg(Color::Cyan).add_attribute(Attribute::Bold),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (name, task) in tasks {
        let parameters: Vec<String> = task
            .parameters
            .iter()
            .map(|p| {
                if p.is_required() {
                    format!("{}: {} (required)", p.name, p.type_hint)
                } else {
                    format!("{}: {} = {}", p.name, p.type_hint, p.default_value)
                }
            })
            .collect();
        table.add_row(vec![
            Cell::new(name).fg(Color::Yellow),
            Cell::new(&task.default_model).fg(Color::Green),
            Cell::new(parameters.join("\n")).set_alignment(CellAlignment::Left),
        ]);
    }

    println!("\n{}", table);
    println!("{}", "=".repeat(100).bright_black());
    println!("{}", format!("Total tasks: {}", tasks.len()).bright_green());
}

/// Pretty-prints a pipeline result.
pub fn display_result(task_name: &str, result: &Value) {
    println!("{} {}", "Task:".cyan().bold(), task_name);
    match serde_json::to_string_pretty(result) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", result),
    }
}

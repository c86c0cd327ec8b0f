//! Plain-text rendering of tools and tasks for the terminal.

use tasklink_mcp::{ToolCallResult, ToolDescriptor};
use tasklink_tasks::AssignedTask;

/// One line per tool: name, then its description if any.
pub fn tools_table(tools: &[ToolDescriptor]) -> String {
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for tool in tools {
        let description = tool.description.lines().next().unwrap_or_default();
        out.push_str(&format!("{:<width$}  {description}", tool.name));
        out.push('\n');
    }
    out
}

/// Task list with id, status, priority, due date and title columns.
pub fn tasks_table(tasks: &[AssignedTask]) -> String {
    if tasks.is_empty() {
        return "No tasks.\n".to_string();
    }
    let mut out = format!(
        "{:>6}  {:<11}  {:<8}  {:<10}  {}\n",
        "ID", "STATUS", "PRIORITY", "DUE", "TITLE"
    );
    for task in tasks {
        out.push_str(&format!(
            "{:>6}  {:<11}  {:<8}  {:<10}  {}\n",
            task.id,
            task.status.as_str(),
            task.priority.as_deref().unwrap_or("-"),
            task.due_date.as_deref().unwrap_or("-"),
            task.title,
        ));
    }
    out
}

/// Text content of a tool result, falling back to pretty JSON for results
/// without any text items.
pub fn tool_result(raw: &serde_json::Value) -> String {
    match ToolCallResult::from_value(raw.clone()) {
        Ok(result) if result.texts().next().is_some() => {
            let mut out = result.texts().collect::<Vec<_>>().join("\n");
            out.push('\n');
            out
        }
        _ => {
            let mut out = serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string());
            out.push('\n');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasklink_tasks::TaskStatus;

    #[test]
    fn test_tools_table_aligns_names() {
        let tools = vec![
            ToolDescriptor {
                name: "get_assigned_tasks".into(),
                description: "List tasks\nwith more detail".into(),
                input_schema: json!({}),
            },
            ToolDescriptor {
                name: "update_task".into(),
                description: String::new(),
                input_schema: json!({}),
            },
        ];
        let table = tools_table(&tools);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "get_assigned_tasks  List tasks");
        assert!(lines[1].starts_with("update_task         "));
    }

    #[test]
    fn test_tasks_table() {
        let task: AssignedTask = serde_json::from_value(json!({
            "id": 7,
            "title": "Ship it",
            "status": "BLOCKED",
            "due_date": "2026-10-31"
        }))
        .unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        let table = tasks_table(&[task]);
        let row = table.lines().nth(1).unwrap();
        assert!(row.contains("BLOCKED"));
        assert!(row.contains("2026-10-31"));
        assert!(row.ends_with("Ship it"));
        assert_eq!(tasks_table(&[]), "No tasks.\n");
    }

    #[test]
    fn test_tool_result_prefers_text() {
        let raw = json!({"content": [{"type": "text", "text": "done"}]});
        assert_eq!(tool_result(&raw), "done\n");

        let raw = json!({"content": []});
        assert!(tool_result(&raw).contains("\"content\""));
    }
}

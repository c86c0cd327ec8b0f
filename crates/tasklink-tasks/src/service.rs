//! Task operations over an initialized MCP client.

use crate::decode::{decode_assigned_tasks, decode_update_result};
use crate::model::{AssignedTask, TaskQuery, TaskStatus, TaskUpdate};
use std::sync::Arc;
use tasklink_mcp::{McpClient, McpError};

/// Tool that lists a user's tasks.
pub const GET_ASSIGNED_TASKS: &str = "get_assigned_tasks";

/// Tool that changes a task's status, dates or logged hours.
pub const UPDATE_TASK: &str = "update_task";

/// Typed front end for the task tools of one server.
#[derive(Clone)]
pub struct TaskService {
    client: Arc<McpClient>,
}

impl TaskService {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Fetch the tasks assigned to `username`, optionally filtered.
    ///
    /// Transport and protocol failures are returned as errors; malformed
    /// records in an otherwise good reply are skipped.
    pub async fn get_assigned_tasks(
        &self,
        username: &str,
        status: Option<TaskStatus>,
        priority: Option<&str>,
    ) -> Result<Vec<AssignedTask>, McpError> {
        let query = TaskQuery {
            status,
            priority: priority.map(str::to_string),
            ..TaskQuery::new(username)
        };
        self.query_tasks(&query).await
    }

    /// Same as [`Self::get_assigned_tasks`] with a prepared query.
    pub async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<AssignedTask>, McpError> {
        let arguments = serde_json::to_value(query)?;
        let result = self.client.call_tool(GET_ASSIGNED_TASKS, arguments).await?;
        let tasks = decode_assigned_tasks(&result);
        tracing::debug!(username = %query.username, count = tasks.len(), "Fetched assigned tasks");
        Ok(tasks)
    }

    /// Apply `update`. Returns the server's success flag, or `false` if the
    /// reply could not be read.
    pub async fn update_task(&self, update: &TaskUpdate) -> Result<bool, McpError> {
        let arguments = serde_json::to_value(update)?;
        let result = self.client.call_tool(UPDATE_TASK, arguments).await?;
        let success = decode_update_result(&result);
        tracing::debug!(task_id = update.task_id, success, "Updated task");
        Ok(success)
    }
}

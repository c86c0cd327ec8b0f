//! Task records from a Tasklink tool server.
//!
//! Wraps the generic `tools/call` surface of [`tasklink_mcp::McpClient`] with
//! the two task tools the assistant uses, decoding their results into typed
//! values. Decoding is lenient: a malformed record is logged and skipped
//! rather than failing the whole call.

pub mod decode;
pub mod model;
pub mod service;

pub use decode::{decode_assigned_tasks, decode_update_result};
pub use model::{AssignedTask, ParseStatusError, TaskQuery, TaskStatus, TaskUpdate};
pub use service::{GET_ASSIGNED_TASKS, TaskService, UPDATE_TASK};

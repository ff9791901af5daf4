pub mod local_api;
pub mod tasks;

pub use local_api::{create_router, serve, AppState};
pub use tasks::{TaskRegistry, TaskState, TaskStatus};

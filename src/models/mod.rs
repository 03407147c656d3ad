pub mod history;
pub mod task;

pub use history::{EventType, NewTaskHistory, TaskHistory};
pub use task::{
    CreateTaskRequest, CreateTaskResponse, Task, TaskResponse, TaskStats, TaskStatus,
};

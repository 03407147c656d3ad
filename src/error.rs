use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    DatabaseError(String),
    TaskNotFound(i64),
    HandlerNotFound(String),
    ExecutionError(String),
    ValidationError(String),
    ConfigurationError(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::DatabaseError(msg) => write!(f, "database error: {msg}"),
            QueueError::TaskNotFound(id) => write!(f, "task {id} not found"),
            QueueError::HandlerNotFound(task_type) => {
                write!(f, "no handler registered for type: {task_type}")
            }
            QueueError::ExecutionError(msg) => write!(f, "{msg}"),
            QueueError::ValidationError(msg) => write!(f, "validation error: {msg}"),
            QueueError::ConfigurationError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        QueueError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

//! Built-in task handlers.

pub mod run_query;
pub mod send_email;

pub use run_query::RunQueryHandler;
pub use send_email::SendEmailHandler;

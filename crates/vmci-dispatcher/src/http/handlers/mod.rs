//! HTTP request handlers.

mod dispatcher;
mod events;
mod health;
mod tasks;
mod workers;

pub use dispatcher::{keep_alive, poll_task, update_finish, update_shell, update_start};
pub use events::task_events;
pub use health::{health_check, metrics_handler};
pub use tasks::{create_task, get_task, get_task_shell, list_tasks};
pub use workers::list_workers;

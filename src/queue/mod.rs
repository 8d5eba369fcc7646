pub mod repository;
pub mod task;
pub mod worker;

pub use repository::TaskQueue;
pub use task::{Priority, Task, TaskPayload, TaskState, TaskType};

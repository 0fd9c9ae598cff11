pub mod broker;
pub mod store;

pub use broker::{ClaimedTask, JobQueue, SubmitRequest};
pub use store::{FjallQueue, QueueError};

//! Protobuf messages persisted by the transcode queue
//!
//! - `TranscodeTask` - one queued transcode job, as submitted by the backend
//! - `TaskClaim` - marker written when a worker claims a task
//! - `DeadLetterTask` - task that exhausted its attempts or failed terminally
//!
//! The backend only has to agree on `TranscodeTask`; the other messages are
//! worker-internal bookkeeping.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hlsworker::proto::TranscodeTask;
//! use prost::Message;
//!
//! let task = TranscodeTask {
//!     job_id: "job-123".to_string(),
//!     video_id: "v1".to_string(),
//!     source_locator: "v1".to_string(),
//!     ..Default::default()
//! };
//!
//! let bytes = task.encode_to_vec();
//! let decoded = TranscodeTask::decode(&bytes[..])?;
//! ```

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TranscodeTask {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub video_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub source_locator: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "4")]
    pub category_partition: ::core::option::Option<::prost::alloc::string::String>,
    /// Attempts already made when this task was (re)enqueued
    #[prost(uint32, tag = "5")]
    pub attempt: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskClaim {
    #[prost(string, tag = "1")]
    pub worker_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub claimed_at_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeadLetterTask {
    #[prost(message, optional, tag = "1")]
    pub task: ::core::option::Option<TranscodeTask>,
    #[prost(string, tag = "2")]
    pub failure_code: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub failure_message: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub attempts: u32,
    #[prost(uint64, tag = "5")]
    pub failed_at_ms: u64,
}

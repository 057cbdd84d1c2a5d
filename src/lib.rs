// XBake Library Entry Point

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod hash;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod supervisor;
pub mod tools;
pub mod transfer;
pub mod xcode;

pub use config::Config;
pub use coordinator::{Coordinator, SubmitResult, SubmitStatus};
pub use error::{Result, XBakeError};
pub use queue::{Envelope, JobQueue, QueueName};

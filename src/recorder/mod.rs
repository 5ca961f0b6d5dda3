//! Record listener: receives commands recorded on a device
//!
//! This module provides:
//! - A session that turns recording on and off on an agent
//! - A JSON server handler accepting RECORD messages
//! - A bounded queue handing recorded commands to a consumer

pub mod queue;
pub mod record_server;

pub use queue::{CommandQueue, QueueError, QueueSender};
pub use record_server::{start_record_server, RecordListener, RecordSession};

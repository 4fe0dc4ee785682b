//! Elastic thread pools with a fixed core and on-demand overflow workers.
//!
//! Two variants share the same lifecycle machinery:
//!
//! - [`WorkerPool`] runs a homogeneous [`Job`] type: one long-lived job
//!   instance per worker thread, fed typed inputs, producing typed
//!   outputs.
//! - [`TaskPool`] runs arbitrary closures and hands back type-erased
//!   results to downcast at the call site.
//!
//! Both preserve FIFO submission order into the task queue but complete
//! tasks concurrently, so results come back in completion order, not
//! submission order. That is a design property, not a defect; run the
//! pool with a maximum of one worker when output order matters.

pub mod pool;
mod signal;
pub mod taskpool;


pub use crate::pool::{Job, WorkerPool};
pub use crate::taskpool::{TaskOutput, TaskPool};

use std::time::Duration;

/// Idle period after which an overflow worker leaves the pool.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

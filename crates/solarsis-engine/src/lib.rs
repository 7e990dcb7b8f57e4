//! Transaction engine for half-duplex inverter links.
//!
//! Exactly one exchange is outstanding at a time. On-demand commands are
//! served before due periodic ones; a reply that does not arrive within the
//! restart threshold resets the link.
//!
//! - [`Engine`] holds queue, cache and in-flight state and decides what to
//!   do next without performing any I/O
//! - [`Driver`] owns the link, runs the scheduler tick and feeds reply
//!   lines back into the engine
//! - [`EngineHandle`] submits commands and reads results while the driver
//!   runs

pub mod cache;
pub mod callbacks;
pub mod driver;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{cache_key, ResultCache};
pub use callbacks::{Callbacks, FollowUps, PreSendHook, ReceiveHook, Reply, ReplyObserver};
pub use driver::{Driver, EngineHandle};
pub use engine::{Action, Engine, EngineStats, InFlight, PendingResponse, Phase, Submission};
pub use error::{EngineError, Result};
pub use metrics::{metric_line, MetricsSink, RecordingSink, TracingSink};
pub use queue::{CommandQueue, QueueCommand, Responder};
pub use session::{IntervalCommand, OnInit, QuickCommand, SessionConfig, DEFAULT_MAX_QUEUED};

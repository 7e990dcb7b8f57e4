//! Schema-driven serial protocol engine for solar inverters.
//!
//! solarsis turns a declarative JSON protocol document into command frames,
//! talks to the inverter over a half-duplex serial link and merges the
//! replies back into structured results.
//!
//! # Crate Structure
//!
//! - [`transport`]: link abstraction and the `tokio-serial` opener
//! - [`frame`]: checksums, 8-byte chunk writer and reply line reader
//! - [`schema`]: protocol document model, frame builder and reply parser
//! - [`engine`]: command queue, result cache and transaction driver

/// Re-export transport types.
pub mod transport {
    pub use solarsis_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use solarsis_frame::*;
}

/// Re-export schema types.
pub mod schema {
    pub use solarsis_schema::*;
}

/// Re-export engine types.
pub mod engine {
    pub use solarsis_engine::*;
}

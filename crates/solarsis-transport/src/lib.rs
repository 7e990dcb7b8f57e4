//! Link abstraction for the inverter's half-duplex serial line.
//!
//! This is the lowest layer of solarsis. The engine never touches a port
//! directly: it asks a [`LinkOpener`] for a fresh [`LinkStream`] whenever the
//! link has to be (re)opened, and closes the link by dropping the stream.

pub mod error;
pub mod traits;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::{Result, TransportError};
pub use traits::{LinkOpener, LinkStream};

#[cfg(feature = "serial")]
pub use serial::{SerialConfig, SerialLink};

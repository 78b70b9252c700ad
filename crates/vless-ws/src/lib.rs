//! Protocol and relay primitives for the vless-ws server.
//!
//! Everything here is transport-agnostic with respect to the HTTP listener:
//! the codec works on byte slices, the copier on any `AsyncRead +
//! AsyncWrite` carrier, and the meter on plain UUIDs. The service crate
//! wires these to hyper and tungstenite.

pub mod buffer;
pub mod config;
pub mod metering;
pub mod net;
pub mod relay;
pub mod timeout;
pub mod vless;

pub use buffer::BufferPool;
pub use config::{Config, ConfigError};
pub use metering::UsageMeter;
pub use net::{DialError, Dialer, Resolver};
pub use relay::{Copier, FlowStat};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Remote instrument control.
//!
//! One process hosts an instrument behind an `InstrumentServer`; another
//! connects a `RemoteInstrument` and works with the same parameters through
//! proxy cells, plus an arbitrary `call()` passthrough for registered
//! methods. One point-to-point TCP connection per pair of endpoints,
//! half-duplex request/response, JSON frames.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteInstrument;
pub use protocol::{Reply, Request};
pub use server::{InstrumentServer, ServerHandle};

//! Parameter framework for simulations and experiments.
//!
//! A [`Parameter`] is a named, bounds-checked scalar cell with optional
//! read/write hooks and post-write callbacks. The [`algebra`] module derives
//! new cells from existing ones (`2*x`, `x+1`, ...) with correct inverse
//! setters, an [`Instrument`] groups cells into a recursively enumerable
//! registry, and the [`remote`] module hosts a registry over TCP so another
//! process can get, set, and call it transparently.
//!
//! ```no_run
//! use parametric::{algebra, Bounds, Instrument, Parameter};
//! use parametric::remote::{InstrumentServer, RemoteInstrument};
//!
//! # fn main() -> parametric::Result<()> {
//! let mut rig = Instrument::new("rig");
//! let x = rig.declare(
//!     Parameter::builder("x").initial(2.0).bounds(Bounds::closed(2.0, 4.0)).build(),
//! )?;
//!
//! // Derived cell: reads double the source, writes halve back into it.
//! let doubled = algebra::scale(&x, 2.0)?;
//! doubled.write(6.0)?;
//! assert_eq!(x.read()?, 3.0);
//!
//! // Host the rig; a peer mirrors it by name.
//! let server = InstrumentServer::bind("127.0.0.1:1105", rig)?;
//! let handle = server.start()?;
//!
//! let mut template = Instrument::new("rig");
//! template.declare(Parameter::new("x"))?;
//! let remote = RemoteInstrument::connect("127.0.0.1:1105", &template)?;
//! remote.write("x", 3.5)?;
//! # handle.stop()
//! # }
//! ```

pub mod algebra;
pub mod error;
pub mod instrument;
pub mod parameter;
pub mod remote;

pub use algebra::{combine, negate, offset, power, scale, transform, BinaryOp, ScalarOp};
pub use error::{Error, Result};
pub use instrument::{Instrument, Method};
pub use parameter::{
    Access, Bounds, Callback, Kind, Operand, Parameter, ParameterBuilder, Parser, ReadHook,
    WriteHook,
};

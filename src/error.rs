//! Error taxonomy for the parametric crate.
//!
//! Cell-level failures (`UnsetValue`, `OutOfBounds`, `ReadOnly`) surface
//! synchronously at the call site. Dispatch failures (`UnknownParameter`,
//! `UnknownMethod`) are logged by the server loop, which keeps serving.
//! Transport and codec failures are fatal to the session that hit them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Read attempted on a cell with no stored value and no read hook.
    #[error("value of parameter '{0}' not yet set")]
    UnsetValue(String),

    /// Write value violates the cell's closed interval. The stored value
    /// is left unchanged.
    #[error("setpoint {value} outside bounds {bounds} of parameter '{name}'")]
    OutOfBounds {
        name: String,
        value: f64,
        bounds: String,
    },

    /// Write attempted on a read-only cell (composite derivations and
    /// measurements have no write path).
    #[error("parameter '{0}' is read-only")]
    ReadOnly(String),

    /// Arithmetic combination with an operand that is not a usable scalar
    /// (non-finite, or a constant the operator cannot invert).
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Registry declaration collision.
    #[error("name '{0}' already declared")]
    DuplicateName(String),

    /// Server-side dispatch failure: no such parameter in the registry.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Server-side dispatch failure: no such registered method.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// Malformed wire frame (bad length prefix, oversized payload).
    #[error("malformed frame: {0}")]
    Frame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_parameter() {
        let err = Error::UnsetValue("x".into());
        assert_eq!(err.to_string(), "value of parameter 'x' not yet set");

        let err = Error::OutOfBounds {
            name: "x".into(),
            value: 5.0,
            bounds: "[2, 4]".into(),
        };
        assert!(err.to_string().contains("5"));
        assert!(err.to_string().contains("[2, 4]"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Transport(_)));
    }
}

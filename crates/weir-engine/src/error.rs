use thiserror::Error;

/// Startup and configuration failures. Runtime contract violations are
/// [`weir_core::WorkFault`]s, since blocks can also raise them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{what} has {got} entries for {expected} input ports")]
    PortVectorMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("relative rate must be positive, got {rate}")]
    NonPositiveRate { rate: f64 },
    #[error(
        "input {port}: staging buffers of {aux_bytes} bytes cannot satisfy a \
         reserve of {reserve_bytes} bytes"
    )]
    AuxTooSmall {
        port: usize,
        aux_bytes: usize,
        reserve_bytes: usize,
    },
}

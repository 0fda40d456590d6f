//! Shared leaf types for the weir dataflow engine: reference-counted buffer
//! windows and their recycling shelf, stream tags, interest tokens, the
//! block work interface, and the dispatcher-facing message seam.

pub mod block;
pub mod buffer;
pub mod message;
pub mod pool;
pub mod rate;
pub mod tag;
pub mod token;

pub use block::{
    Block, GeneralWork, GeneralWorkBlock, InputSpan, OutputSpan, WorkFault, WorkIo, WorkOutcome,
};
pub use buffer::SBuffer;
pub use message::{PortMessage, TaskContext};
pub use pool::BufferShelf;
pub use tag::Tag;
pub use token::{Token, TokenPool};

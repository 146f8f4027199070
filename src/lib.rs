//! Threaded session engine for hardware-accelerated video decoding.
//!
//! The external hardware decode library does the actual decoding; this
//! crate builds the machinery that makes it usable through a synchronous
//! push/pull call:
//!
//! - a bounded input queue with backpressure ([`buffer`]),
//! - a single background decode worker and its lifecycle register
//!   ([`worker`]),
//! - caller-side output acquisition and the session owning init/teardown
//!   ([`session`]),
//! - drop-enforced return of hardware surfaces to the pool ([`frame`]).
//!
//! The decode library, surface allocator, and native display are reached
//! through the traits in [`backend`]; the host framework drives a
//! [`session::DecoderSession`] with encoded packets and receives
//! [`frame::VideoFrame`]s back.

pub mod backend;
pub mod buffer;
pub mod frame;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use thiserror::Error;

/// Errors surfaced to the host framework.
///
/// Worker-side decode failures are not in here: they terminate the worker
/// and become visible only as a drained stream (no further frames, register
/// at `Exited`).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot initialize decoder: {0}")]
    Init(String),
    #[error("surface operation failed: {0}")]
    Surface(String),
    #[error("decode session is closed")]
    SessionClosed,
}

pub use backend::{
    ConfigBuffer, DecodeStatus, FormatInfo, HwDecoder, HwFrame, MediaBackend, NativeDisplay,
    PixelFormat, PlanarImage, SurfaceAllocator, SurfaceId, SurfaceRequest,
};
pub use buffer::{DECODE_QUEUE_SIZE, DecodeBuffer};
pub use frame::{FrameData, VideoFrame};
pub use session::{
    DecodeOutcome, DecoderSession, Packet, SessionCounters, StreamParameters, TimeBase, VideoCodec,
};
pub use worker::WorkerState;

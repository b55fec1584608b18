//! Action protocol: codes, payloads and framing.

pub mod action;
pub mod codec;
pub mod payload;

pub use action::{ActionCode, CLAIM_SENTINEL, ResultCode, SHUTDOWN_CODE};
pub use codec::{DEFAULT_MAX_FRAME_BYTES, Frame, read_frame, write_frame, write_shutdown};
pub use payload::{MAX_NESTING, Payload, RemoteFile};

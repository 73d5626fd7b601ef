#![forbid(unsafe_code)]

//! Browser host for the Snipline engine.
//!
//! - [`protocol`]: JSON bridge for page callbacks, controller messages,
//!   requests and acks. Plain data, available on every target.
//! - `wasm` (only on `wasm32`): `WebHost`, the `web-sys` implementation of
//!   [`snipline_core::Host`], and the exported `SniplineRuntime`.
//!
//! The page glue owns the event loop: it forwards callbacks with
//! `pushEvent`, calls `tick(performance.now())` whenever `nextDeadlineMs`
//! comes due or after forwarding events, and answers every request from
//! `takeRequests` with the matching event.

pub mod protocol;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use protocol::{ProtocolError, decode_event, decode_message, encode_ack, encode_requests};

#[cfg(target_arch = "wasm32")]
pub use wasm::{SniplineRuntime, WebHost};

#![forbid(unsafe_code)]

//! Core building blocks for the Snipline insertion engine.
//!
//! Snipline runs inside pages it does not control. Everything that touches the
//! page goes through the [`host::Host`] trait so the engine can be driven by a
//! real browser (see `snipline-web`) or by a deterministic in-memory document
//! in tests (see `snipline-harness`).
//!
//! This crate holds the pieces shared by every layer:
//! - [`host`]: the page abstraction and its snapshot types,
//! - [`scheduler`] and [`clock`]: host-driven time and the single timer table,
//! - [`config`]: policy-as-data tunables,
//! - [`snippet`], [`site`], [`message`]: data exchanged with external collaborators,
//! - [`sanitize`] and [`key`]: input normalization.

pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod host;
pub mod key;
pub mod message;
pub mod sanitize;
pub mod scheduler;
pub mod site;
pub mod snippet;

pub use clock::DeterministicClock;
pub use config::EngineConfig;
pub use error::HostError;
pub use geometry::{Point, Rect};
pub use host::{ElementId, Host};
pub use scheduler::{TimerKind, TimerScheduler};
pub use snippet::Snippet;

#![forbid(unsafe_code)]

//! Test harness for the Snipline engine.
//!
//! [`FakeDom`] is a deterministic, in-memory document that implements
//! [`snipline_core::Host`]. Tests build a page with [`ElementSpec`], drive an
//! engine session against it, then assert on the resulting tree and on the
//! [`HostOp`] journal.
//!
//! ```rust,ignore
//! let mut dom = FakeDom::new("https://chatgpt.com/");
//! let form = dom.append(dom.body(), ElementSpec::new("form"));
//! let prompt = dom.append(form, ElementSpec::textarea().id("prompt-textarea"));
//! dom.inject_fault(prompt, Fault::ExecRejected);
//! ```
//!
//! Selectors are evaluated by a small CSS subset engine ([`selector`]);
//! anything outside it is reported as an invalid selector, the same way a
//! browser throws on syntax it does not understand.

pub mod dom;
pub mod selector;

pub use dom::{ElementSpec, FakeDom, Fault, HostOp};
pub use selector::{SelectorError, SelectorList};

#![forbid(unsafe_code)]

//! Snipline Engine
//!
//! Finds the text-entry surface on a page the engine does not control, keeps
//! a trigger control next to it, and inserts stored snippets using whatever
//! mechanism the page's editor accepts as genuine input.
//!
//! # Key Components
//!
//! - [`EngineSession`] - Owner of all per-page state; the only entry point hosts use
//! - [`AcquisitionEngine`] - Ranks and validates candidate editing surfaces
//! - [`ChangeMonitor`] / [`MutationBudget`] - Relevance filter and adaptive throttle for page mutations
//! - [`NavigationDetector`] - Same-document navigation and epochs
//! - [`StrategyRegistry`] / [`InsertionStrategy`] - Platform strategies and their technique chains
//! - [`InsertionEngine`] - Strategy-then-technique fallback with read-back verification
//! - [`TriggerInjector`] - Control bar, floating and custom placement of the trigger
//! - [`CustomSitePositioner`] / [`RetryState`] - Backoff state machine for user-declared anchors
//! - [`PanelState`] - Searchable, keyboard-navigable snippet list
//!
//! # How it fits together
//!
//! ```text
//! navigation / mutations ──► acquisition ──► trigger ──► panel ──► insertion
//!            ▲                                                        │
//!            └────────────── single TimerScheduler ◄──────────────────┘
//! ```
//!
//! All page access goes through [`snipline_core::Host`]; tests drive the
//! engine against the in-memory document in `snipline-harness`.

pub mod acquisition;
pub mod custom_site;
pub mod editor;
pub mod insertion;
pub mod monitor;
pub mod navigation;
pub mod panel;
pub mod profile;
pub mod session;
pub mod strategy;
pub mod technique;
pub mod trigger;

pub use acquisition::{Acquired, AcquisitionEngine};
pub use custom_site::{CustomAttempt, CustomSitePositioner, Rejection, RetryPhase, RetryState};
pub use editor::{EditorHandle, EditorKind};
pub use insertion::{InsertOutcome, InsertionEngine};
pub use monitor::{BudgetDecision, ChangeMonitor, MonitorOutcome, MutationBudget};
pub use navigation::{NavigationChange, NavigationDetector};
pub use panel::{PanelAction, PanelState};
pub use profile::{SiteProfile, TargetDescriptor, TriggerBar};
pub use session::{
    EngineSession, InsertRecord, SessionEvent, SessionPhase, TeardownFailure, TeardownReport,
};
pub use strategy::{InsertionStrategy, StrategyRegistry};
pub use technique::{TechniqueChain, TechniqueError, TechniqueKind};
pub use trigger::{InjectOutcome, TriggerControl, TriggerInjector, TriggerPlacement};

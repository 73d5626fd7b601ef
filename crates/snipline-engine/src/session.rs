#![forbid(unsafe_code)]

//! The engine session: one explicit owner of all per-page state.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive --ACTIVATE--> AwaitingGate --SiteEnabled(true)--> Active
//!    ^                        |                                |
//!    +----SiteEnabled(false)--+         DEACTIVATE / unload ---+
//! ```
//!
//! `REINITIALIZE` tears down and activates again in a fresh epoch.
//!
//! # Driving the session
//!
//! Everything is host-driven and single-threaded:
//! - controller commands go through [`EngineSession::handle_message`];
//! - page callbacks (mutations, history, scroll, keys, ...) and answers to
//!   queued [`HostRequest`]s go through [`EngineSession::dispatch`];
//! - time goes through [`EngineSession::advance_to`]; the host arms one real
//!   timer for [`EngineSession::next_deadline`].
//!
//! # Epochs
//!
//! A same-document navigation starts a new epoch: every timer except the
//! navigation poll is cleared, retry and mutation budgets reset, and the
//! previous editor and trigger are discarded.
//!
//! # Teardown
//!
//! [`EngineSession::teardown`] disconnects every subscription and removes
//! every element of this session. Each step runs even if an earlier one
//! failed; failures are logged and returned in a [`TeardownReport`].

use snipline_core::clock::DeterministicClock;
use snipline_core::config::{EngineConfig, InsertMode};
use snipline_core::error::HostError;
use snipline_core::host::{ElementId, Host, MutationRecord, SessionId};
use snipline_core::key::KeyInput;
use snipline_core::message::{Ack, ControlMessage, HostRequest};
use snipline_core::scheduler::{TimerKind, TimerScheduler};
use snipline_core::site::CustomSiteConfig;
use snipline_core::snippet::Snippet;
use tracing::{debug, info, trace, warn};
use web_time::Duration;

use crate::acquisition::AcquisitionEngine;
use crate::custom_site::{CustomAttempt, CustomSitePositioner};
use crate::editor::EditorHandle;
use crate::insertion::{InsertOutcome, InsertionEngine};
use crate::monitor::{ChangeMonitor, MonitorOutcome};
use crate::navigation::NavigationDetector;
use crate::panel::{PanelAction, PanelState};
use crate::profile::{SiteProfile, profile_for};
use crate::strategy::StrategyRegistry;
use crate::trigger::{InjectOutcome, TriggerInjector};

/// Status shown in the panel after every technique failed.
pub const INSERT_FAILED_STATUS: &str = "Couldn't insert the snippet here";
/// Status shown when the editor disappeared before insertion.
pub const NO_EDITOR_STATUS: &str = "No input field found";

// ============================================================================
// Events
// ============================================================================

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Inactive,
    /// Activated; waiting for the site-enablement answer.
    AwaitingGate,
    Active,
}

/// Host callback or answer to a [`HostRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Answer to [`HostRequest::CheckSiteEnabled`].
    SiteEnabled(bool),
    /// Answer to [`HostRequest::LoadCustomSite`].
    CustomSiteLoaded(Option<CustomSiteConfig>),
    /// Answer to [`HostRequest::LoadSnippets`].
    SnippetsLoaded(Vec<Snippet>),
    Mutations(Vec<MutationRecord>),
    /// `pushState`, `replaceState` or `popstate`.
    HistoryChanged,
    Scroll,
    Resize,
    AnimationFrame,
    /// Intersection observer report for the observed editor.
    Intersection { visible: bool },
    VisibilityChanged { visible: bool },
    Unload,
    /// The trigger control was clicked.
    TriggerActivated,
    /// Key pressed while the panel has focus.
    PanelKey(KeyInput),
    /// The panel's search field changed.
    PanelQuery(String),
    /// Pointer activation of a panel item.
    PanelPick { id: String },
    /// Pointer down outside the panel and the trigger.
    OutsideClick,
}

impl SessionEvent {
    /// Stable label used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SiteEnabled(_) => "site_enabled",
            Self::CustomSiteLoaded(_) => "custom_site_loaded",
            Self::SnippetsLoaded(_) => "snippets_loaded",
            Self::Mutations(_) => "mutations",
            Self::HistoryChanged => "history_changed",
            Self::Scroll => "scroll",
            Self::Resize => "resize",
            Self::AnimationFrame => "animation_frame",
            Self::Intersection { .. } => "intersection",
            Self::VisibilityChanged { .. } => "visibility_changed",
            Self::Unload => "unload",
            Self::TriggerActivated => "trigger_activated",
            Self::PanelKey(_) => "panel_key",
            Self::PanelQuery(_) => "panel_query",
            Self::PanelPick { .. } => "panel_pick",
            Self::OutsideClick => "outside_click",
        }
    }
}

/// One teardown step that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: &'static str,
    pub error: HostError,
}

/// What happened to the most recent insertion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub snippet_id: String,
    pub outcome: InsertOutcome,
    /// The unverified fallback ran after every technique failed and reported
    /// success.
    pub legacy: bool,
}

impl InsertRecord {
    #[must_use]
    pub fn landed(&self) -> bool {
        self.outcome.is_success() || self.legacy
    }
}

/// Outcome of [`EngineSession::teardown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: &'static str, result: Result<(), HostError>) {
        if let Err(error) = result {
            warn!(step, error = %error, "teardown step failed, continuing");
            self.failures.push(TeardownFailure { step, error });
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Owner of every engine component for one page activation.
#[derive(Debug)]
pub struct EngineSession<H: Host> {
    host: H,
    id: SessionId,
    config: EngineConfig,
    phase: SessionPhase,
    clock: DeterministicClock,
    timers: TimerScheduler,
    hostname: String,
    profile: SiteProfile,
    registry: StrategyRegistry,
    navigation: NavigationDetector,
    acquisition: AcquisitionEngine,
    monitor: ChangeMonitor,
    insertion: InsertionEngine,
    trigger: TriggerInjector,
    custom: CustomSitePositioner,
    panel: PanelState,
    editor: Option<EditorHandle>,
    snippets: Vec<Snippet>,
    pending_insert: Option<Snippet>,
    last_insert: Option<InsertRecord>,
    requests: Vec<HostRequest>,
    subscribed: bool,
    torn_down: bool,
}

impl<H: Host> EngineSession<H> {
    /// Build a session for the page behind `host`. Nothing runs until
    /// `ACTIVATE`.
    pub fn new(host: H, id: SessionId, config: EngineConfig) -> Self {
        let hostname = host.hostname();
        let profile = profile_for(&hostname);
        let registry = StrategyRegistry::for_site(&profile, &hostname);
        let seed = session_seed(&id);
        debug!(
            session = %id,
            %hostname,
            profile = profile.name,
            strategies = ?registry.names(),
            "session created"
        );
        Self {
            navigation: NavigationDetector::new(host.location()),
            acquisition: AcquisitionEngine::new(&config.acquisition),
            monitor: ChangeMonitor::new(&config.mutation),
            insertion: InsertionEngine::new(config.insertion.clone()),
            trigger: TriggerInjector::new(config.trigger.clone(), id.clone()),
            custom: CustomSitePositioner::new(&config.retry, seed),
            host,
            id,
            config,
            phase: SessionPhase::Inactive,
            clock: DeterministicClock::new(),
            timers: TimerScheduler::new(),
            hostname,
            profile,
            registry,
            panel: PanelState::new(),
            editor: None,
            snippets: Vec::new(),
            pending_insert: None,
            last_insert: None,
            requests: Vec::new(),
            subscribed: false,
            torn_down: false,
        }
    }

    // --- Accessors ----------------------------------------------------------

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.navigation.epoch()
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    #[must_use]
    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    #[must_use]
    pub fn editor(&self) -> Option<&EditorHandle> {
        self.editor.as_ref()
    }

    #[must_use]
    pub fn trigger(&self) -> &TriggerInjector {
        &self.trigger
    }

    #[must_use]
    pub fn panel(&self) -> &PanelState {
        &self.panel
    }

    #[must_use]
    pub fn monitor(&self) -> &ChangeMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn custom_positioner(&self) -> &CustomSitePositioner {
        &self.custom
    }

    #[must_use]
    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    /// Outcome of the most recent insertion.
    #[must_use]
    pub fn last_insert(&self) -> Option<&InsertRecord> {
        self.last_insert.as_ref()
    }

    /// Earliest pending timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Requests queued for the host since the last drain.
    pub fn drain_requests(&mut self) -> Vec<HostRequest> {
        std::mem::take(&mut self.requests)
    }

    // --- Controller channel -------------------------------------------------

    /// Handle one controller command.
    pub fn handle_message(&mut self, message: ControlMessage) -> Ack {
        debug!(action = message.name(), phase = ?self.phase, "control message");
        match message {
            ControlMessage::Activate => {
                self.activate();
                Ack::OK
            }
            ControlMessage::Deactivate => {
                self.teardown();
                Ack::OK
            }
            ControlMessage::SettingsUpdated { settings } => self.settings_updated(settings),
            ControlMessage::Reinitialize => {
                self.teardown();
                let location = self.host.location();
                let epoch = self.navigation.bump(&location);
                debug!(epoch, "reinitializing");
                self.activate();
                Ack::OK
            }
        }
    }

    fn activate(&mut self) {
        if self.phase != SessionPhase::Inactive {
            trace!("already activated");
            return;
        }
        self.torn_down = false;
        self.sweep_stale_controls();
        self.phase = SessionPhase::AwaitingGate;
        self.requests.push(HostRequest::CheckSiteEnabled {
            hostname: self.hostname.clone(),
        });
        self.requests.push(HostRequest::LoadCustomSite {
            hostname: self.hostname.clone(),
        });
    }

    fn settings_updated(&mut self, settings: Option<EngineConfig>) -> Ack {
        if let Some(config) = settings {
            let errors = config.validate();
            if !errors.is_empty() {
                warn!(?errors, "settings rejected");
                return Ack::FAILED;
            }
            self.apply_config(config);
        }
        if self.phase == SessionPhase::Inactive {
            return Ack::OK;
        }
        self.requests.push(HostRequest::LoadCustomSite {
            hostname: self.hostname.clone(),
        });
        self.acquisition.invalidate();
        if self.phase == SessionPhase::Active {
            self.timers
                .schedule(TimerKind::Rescan, self.clock.now(), Duration::ZERO);
        }
        Ack::OK
    }

    fn apply_config(&mut self, config: EngineConfig) {
        self.monitor.set_config(&config.mutation);
        self.acquisition.set_config(&config.acquisition);
        self.custom.set_config(&config.retry);
        self.trigger.set_config(config.trigger.clone());
        self.insertion.set_config(config.insertion.clone());
        self.config = config;
        debug!("settings applied");
    }

    /// Remove controls left behind by earlier sessions.
    fn sweep_stale_controls(&mut self) -> usize {
        let stale: Vec<ElementId> = self
            .host
            .tagged_controls()
            .into_iter()
            .filter(|c| c.session != self.id.as_str())
            .map(|c| c.element)
            .collect();
        for el in &stale {
            if let Err(err) = self.host.remove_element(*el) {
                debug!(element = el.get(), error = %err, "stale control already gone");
            }
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "swept stale controls");
        }
        stale.len()
    }

    fn start(&mut self) {
        self.phase = SessionPhase::Active;
        info!(
            session = %self.id,
            hostname = %self.hostname,
            epoch = self.navigation.epoch(),
            "snipline active"
        );
        self.subscribe();
        let now = self.clock.now();
        self.timers.schedule(
            TimerKind::NavigationPoll,
            now,
            Duration::from_millis(self.config.navigation.poll_interval_ms),
        );
        self.requests.push(HostRequest::LoadSnippets);
        if self.host.is_document_visible() {
            self.rescan();
        } else {
            // The visibility event schedules the first scan.
            debug!("document hidden, deferring the first scan");
        }
    }

    fn subscribe(&mut self) {
        let scope = ChangeMonitor::resolve_scope(&self.host, self.profile.observe_scope);
        if let Err(err) = self.host.observe_mutations(&ChangeMonitor::filter(scope)) {
            warn!(error = %err, "mutation subscription failed");
        }
        if let Err(err) = self.host.install_history_hooks() {
            warn!(error = %err, "history hooks unavailable, relying on location poll");
        }
        if let Err(err) = self.host.set_page_listeners(true) {
            warn!(error = %err, "page listeners unavailable");
        }
        self.subscribed = true;
    }

    // --- Host events --------------------------------------------------------

    /// Handle one host callback.
    ///
    /// Returns `true` when the session consumed the event (for key events:
    /// the host should suppress the page's default handling).
    pub fn dispatch(&mut self, event: SessionEvent) -> bool {
        trace!(event = event.name(), phase = ?self.phase, "dispatch");
        match event {
            SessionEvent::SiteEnabled(enabled) => {
                if self.phase != SessionPhase::AwaitingGate {
                    return false;
                }
                if enabled {
                    self.start();
                } else {
                    debug!(hostname = %self.hostname, "site not enabled");
                    self.phase = SessionPhase::Inactive;
                }
                true
            }
            SessionEvent::CustomSiteLoaded(site) => {
                self.custom_site_loaded(site);
                true
            }
            SessionEvent::SnippetsLoaded(snippets) => {
                debug!(count = snippets.len(), "snippets loaded");
                self.snippets = snippets;
                if self.panel.is_open() {
                    self.panel.set_snippets(self.snippets.clone());
                    self.render_panel();
                }
                true
            }
            _ if self.phase != SessionPhase::Active => false,
            SessionEvent::Mutations(records) => {
                self.on_mutations(&records);
                true
            }
            SessionEvent::HistoryChanged => {
                self.check_navigation();
                true
            }
            SessionEvent::Scroll | SessionEvent::Resize => {
                self.trigger.on_viewport_change(&mut self.host);
                true
            }
            SessionEvent::AnimationFrame => {
                self.trigger
                    .on_animation_frame(&mut self.host, self.editor.as_ref());
                true
            }
            SessionEvent::Intersection { visible } => {
                self.trigger.on_intersection(&mut self.host, visible);
                true
            }
            SessionEvent::VisibilityChanged { visible } => {
                if visible {
                    self.timers
                        .schedule(TimerKind::Rescan, self.clock.now(), Duration::ZERO);
                } else {
                    self.close_panel();
                }
                true
            }
            SessionEvent::Unload => {
                self.teardown();
                true
            }
            SessionEvent::TriggerActivated => {
                self.toggle_panel();
                true
            }
            SessionEvent::PanelKey(input) => self.on_panel_key(&input),
            SessionEvent::PanelQuery(query) => {
                if !self.panel.is_open() {
                    return false;
                }
                self.panel.set_query(&query);
                self.render_panel();
                true
            }
            SessionEvent::PanelPick { id } => match self.panel.pick(&id) {
                Some(snippet) => {
                    self.insert_snippet(snippet);
                    true
                }
                None => false,
            },
            SessionEvent::OutsideClick => {
                let was_open = self.panel.is_open();
                self.close_panel();
                was_open
            }
        }
    }

    fn custom_site_loaded(&mut self, site: Option<CustomSiteConfig>) {
        let site = site.filter(|s| s.applies_to(&self.hostname));
        if self.custom.set_site(site) {
            self.timers.cancel(TimerKind::CustomRetry);
            if let Err(err) = self.trigger.remove(&mut self.host) {
                trace!(error = %err, "previous trigger already gone");
            }
            if self.phase == SessionPhase::Active {
                self.timers
                    .schedule(TimerKind::Rescan, self.clock.now(), Duration::ZERO);
            }
        }
    }

    fn on_mutations(&mut self, records: &[MutationRecord]) {
        let editor = self.editor.as_ref().map(EditorHandle::element);
        match self
            .monitor
            .on_batch(&self.host, records, editor, self.clock.now())
        {
            MonitorOutcome::Ignored | MonitorOutcome::Suspended => {}
            MonitorOutcome::Rescan(delay) => {
                self.timers
                    .schedule(TimerKind::Rescan, self.clock.now(), delay);
            }
            MonitorOutcome::Throttled { cooldown } => {
                self.timers.cancel(TimerKind::Rescan);
                self.timers
                    .schedule(TimerKind::MutationCooldown, self.clock.now(), cooldown);
            }
        }
    }

    fn check_navigation(&mut self) {
        let location = self.host.location();
        if let Some(change) = self.navigation.observe(&location) {
            info!(from = %change.from, to = %change.to, epoch = change.epoch, "navigation epoch started");
            self.new_epoch();
        }
    }

    fn new_epoch(&mut self) {
        let now = self.clock.now();
        self.timers.clear_except(&[TimerKind::NavigationPoll]);
        self.monitor.budget_mut().reset();
        self.custom.reset_epoch();
        self.acquisition.invalidate();
        self.close_panel();
        if let Err(err) = self.trigger.remove(&mut self.host) {
            trace!(error = %err, "previous trigger already gone");
        }
        self.trigger.reset_attempts();
        self.editor = None;

        // The observed container may have been replaced by the new view.
        if let Err(err) = self.host.disconnect_mutations() {
            debug!(error = %err, "mutation disconnect failed");
        }
        let scope = ChangeMonitor::resolve_scope(&self.host, self.profile.observe_scope);
        if let Err(err) = self.host.observe_mutations(&ChangeMonitor::filter(scope)) {
            warn!(error = %err, "mutation subscription failed");
        }

        if !self.timers.is_pending(TimerKind::NavigationPoll) {
            self.timers.schedule(
                TimerKind::NavigationPoll,
                now,
                Duration::from_millis(self.config.navigation.poll_interval_ms),
            );
        }
        self.timers.schedule(
            TimerKind::NavigationSettle,
            now,
            Duration::from_millis(self.config.navigation.settle_delay_ms),
        );
    }

    // --- Time ---------------------------------------------------------------

    /// Advance host time to `now` and fire every due timer.
    pub fn advance_to(&mut self, now: Duration) {
        self.clock.set(now);
        let now = self.clock.now();
        // Timers armed by a firing timer wait for the next call.
        for kind in self.timers.take_due(now) {
            trace!(timer = kind.as_str(), "timer fired");
            self.fire(kind);
        }
    }

    fn fire(&mut self, kind: TimerKind) {
        if self.phase != SessionPhase::Active {
            return;
        }
        match kind {
            TimerKind::Rescan | TimerKind::NavigationSettle => self.rescan(),
            TimerKind::NavigationPoll => {
                self.check_navigation();
                if self.trigger_lost() {
                    self.timers
                        .schedule(TimerKind::Rescan, self.clock.now(), Duration::ZERO);
                }
                self.timers.schedule(
                    TimerKind::NavigationPoll,
                    self.clock.now(),
                    Duration::from_millis(self.config.navigation.poll_interval_ms),
                );
            }
            TimerKind::MutationCooldown => {
                debug!("mutation cool-down over");
                self.monitor.budget_mut().resume();
                self.rescan();
            }
            TimerKind::TriggerRetry | TimerKind::CustomRetry => self.ensure_trigger(),
            TimerKind::FocusSettle => {
                if let Some(snippet) = self.pending_insert.take() {
                    self.perform_insert(&snippet);
                }
            }
            TimerKind::StatusExpiry => {
                if self.panel.status().is_some() {
                    self.panel.clear_status();
                    self.render_panel();
                }
            }
        }
    }

    /// The page removed our control while the editor is still there.
    fn trigger_lost(&self) -> bool {
        let Some(control) = self.trigger.control() else {
            return false;
        };
        self.editor.is_some() && !self.host.probe(control.element).is_some_and(|p| p.connected)
    }

    // --- Acquisition and trigger --------------------------------------------

    fn rescan(&mut self) {
        let now = self.clock.now();
        let Some(acquired) = self
            .acquisition
            .acquire(&self.host, &self.profile.descriptor, now)
        else {
            if let Some(previous) = self.editor.take() {
                debug!(editor = previous.element().get(), "editing surface lost");
                if let Err(err) = self.trigger.remove(&mut self.host) {
                    trace!(error = %err, "trigger already gone");
                }
                self.trigger.reset_attempts();
            }
            return;
        };

        let epoch = self.navigation.epoch();
        let changed = self
            .editor
            .as_ref()
            .is_none_or(|e| e.element() != acquired.element || e.epoch() != epoch);
        if changed {
            debug!(
                editor = acquired.element.get(),
                kind = acquired.kind.as_str(),
                epoch,
                "editing surface changed"
            );
            if let Err(err) = self.trigger.remove(&mut self.host) {
                trace!(error = %err, "trigger already gone");
            }
            self.trigger.reset_attempts();
            self.timers.cancel(TimerKind::TriggerRetry);
        }
        self.editor = Some(EditorHandle::new(
            acquired.element,
            acquired.kind,
            epoch,
            acquired.probe.rect,
            acquired.pattern_index,
        ));
        self.ensure_trigger();
    }

    fn ensure_trigger(&mut self) {
        let Some(editor) = self.editor.clone() else {
            return;
        };
        if self.custom.is_active() {
            match self.custom.attempt(&self.host) {
                CustomAttempt::Resolved {
                    anchor,
                    placement,
                    offset,
                    z_index,
                } => {
                    self.timers.cancel(TimerKind::CustomRetry);
                    if let Err(err) = self.trigger.place_custom(
                        &mut self.host,
                        &editor,
                        anchor,
                        placement,
                        offset,
                        z_index,
                    ) {
                        warn!(error = %err, "custom trigger placement failed");
                    }
                    return;
                }
                CustomAttempt::Retry(delay) => {
                    self.timers
                        .schedule(TimerKind::CustomRetry, self.clock.now(), delay);
                    return;
                }
                CustomAttempt::Exhausted | CustomAttempt::Inactive => {}
            }
        }

        let Some(strategy) = self.registry.select(&self.host, &editor) else {
            trace!("no compatible strategy for trigger");
            return;
        };
        let bar = strategy
            .trigger_bar()
            .or(self.profile.descriptor.control_bar());
        match self.trigger.inject(&mut self.host, strategy, bar, &editor) {
            InjectOutcome::Retry(delay) => {
                self.timers
                    .schedule(TimerKind::TriggerRetry, self.clock.now(), delay);
            }
            InjectOutcome::AlreadyPresent(_)
            | InjectOutcome::Placed(_)
            | InjectOutcome::Floating(_) => {
                self.timers.cancel(TimerKind::TriggerRetry);
            }
            // Logged by the injector; the next re-scan tries again.
            InjectOutcome::Failed(_) => {}
        }
    }

    // --- Panel --------------------------------------------------------------

    fn toggle_panel(&mut self) {
        if self.panel.is_open() {
            self.close_panel();
            return;
        }
        let anchor = self
            .trigger
            .element()
            .and_then(|el| self.host.probe(el))
            .map(|p| p.rect)
            .or_else(|| self.editor.as_ref().map(EditorHandle::rect))
            .unwrap_or_default();
        self.panel.open(self.snippets.clone(), anchor);
        self.render_panel();
        if let Err(err) = self.host.focus_panel_search() {
            debug!(error = %err, "panel search focus failed");
        }
        // Pick up edits made in the library since the last load.
        self.requests.push(HostRequest::LoadSnippets);
    }

    fn on_panel_key(&mut self, input: &KeyInput) -> bool {
        match self.panel.handle_key(input) {
            PanelAction::None => self.panel.is_open(),
            PanelAction::Moved => {
                self.render_panel();
                true
            }
            PanelAction::Insert(snippet) => {
                self.insert_snippet(snippet);
                true
            }
            PanelAction::Close => {
                self.close_panel();
                true
            }
            PanelAction::PassThrough => false,
            PanelAction::FocusSearch => {
                if let Err(err) = self.host.focus_panel_search() {
                    debug!(error = %err, "panel search focus failed");
                }
                false
            }
        }
    }

    fn render_panel(&mut self) {
        if !self.panel.is_open() {
            return;
        }
        let view = self.panel.view(&self.id, &self.config.panel);
        if let Err(err) = self.host.render_panel(&view) {
            warn!(error = %err, "panel render failed");
        }
    }

    fn close_panel(&mut self) {
        if !self.panel.is_open() {
            return;
        }
        self.panel.close();
        self.pending_insert = None;
        self.timers.cancel(TimerKind::FocusSettle);
        self.timers.cancel(TimerKind::StatusExpiry);
        if let Err(err) = self.host.close_panel() {
            debug!(error = %err, "panel close failed");
        }
    }

    fn show_status(&mut self, status: &str) {
        self.panel.set_busy(false);
        self.panel.set_status(status);
        self.render_panel();
        self.timers.schedule(
            TimerKind::StatusExpiry,
            self.clock.now(),
            Duration::from_millis(self.config.panel.status_ttl_ms),
        );
    }

    // --- Insertion ----------------------------------------------------------

    fn insert_snippet(&mut self, snippet: Snippet) {
        let Some(editor) = self.editor.clone().filter(|e| e.is_attached(&self.host)) else {
            debug!(snippet = %snippet.id, "no editor to insert into");
            self.last_insert = Some(InsertRecord {
                snippet_id: snippet.id.clone(),
                outcome: InsertOutcome::Failed {
                    reason: "no editor".into(),
                },
                legacy: false,
            });
            self.show_status(NO_EDITOR_STATUS);
            self.timers
                .schedule(TimerKind::Rescan, self.clock.now(), Duration::ZERO);
            return;
        };
        match self.insertion.mode() {
            InsertMode::Append => self.perform_insert(&snippet),
            InsertMode::Replace => {
                if let Err(err) = self.host.focus(editor.element()) {
                    debug!(error = %err, "pre-focus failed");
                }
                self.pending_insert = Some(snippet);
                self.panel.set_busy(true);
                self.render_panel();
                self.timers.schedule(
                    TimerKind::FocusSettle,
                    self.clock.now(),
                    Duration::from_millis(self.config.insertion.focus_settle_ms),
                );
            }
        }
    }

    fn perform_insert(&mut self, snippet: &Snippet) {
        let Some(editor) = self.editor.clone() else {
            self.show_status(NO_EDITOR_STATUS);
            return;
        };
        let outcome = self
            .insertion
            .insert(&self.registry, &mut self.host, &editor, &snippet.content);
        let legacy = !outcome.is_success()
            && self.config.insertion.legacy_fallback
            && self
                .insertion
                .insert_legacy(&mut self.host, &editor, &snippet.content);
        let record = InsertRecord {
            snippet_id: snippet.id.clone(),
            outcome,
            legacy,
        };
        if record.landed() {
            info!(
                snippet = %snippet.id,
                method = ?record.outcome.method_used(),
                legacy,
                "snippet inserted"
            );
            self.close_panel();
        } else {
            warn!(snippet = %snippet.id, outcome = ?record.outcome, "snippet insertion failed");
            self.show_status(INSERT_FAILED_STATUS);
        }
        self.last_insert = Some(record);
    }

    // --- Teardown -----------------------------------------------------------

    /// Disconnect everything and remove every element of this session.
    ///
    /// Idempotent: a second call does nothing and returns a clean report.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        if self.panel.is_open() {
            self.panel.close();
            report.record("close_panel", self.host.close_panel());
        }
        let floating = self.trigger.is_floating();
        match self.trigger.remove(&mut self.host) {
            // Already detached by the page: nothing left to clean.
            Err(HostError::Detached(_)) => {}
            other => report.record("remove_trigger", other),
        }
        for control in self.host.tagged_controls() {
            if control.session == self.id.as_str() {
                report.record("remove_control", self.host.remove_element(control.element));
            }
        }
        if self.subscribed {
            report.record("disconnect_mutations", self.host.disconnect_mutations());
            if !floating {
                report.record("disconnect_intersection", self.host.disconnect_intersection());
            }
            report.record("remove_history_hooks", self.host.remove_history_hooks());
            report.record("page_listeners", self.host.set_page_listeners(false));
            self.subscribed = false;
        }

        self.timers.clear();
        self.editor = None;
        self.pending_insert = None;
        self.requests.clear();
        self.monitor.budget_mut().reset();
        self.custom.reset_epoch();
        self.acquisition.invalidate();
        self.phase = SessionPhase::Inactive;
        debug!(session = %self.id, failures = report.failures.len(), "session torn down");
        report
    }
}

/// FNV-1a of the session id; seeds the backoff jitter.
fn session_seed(id: &SessionId) -> u64 {
    id.as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipline_harness::{ElementSpec, FakeDom, HostOp};

    fn session(dom: FakeDom) -> EngineSession<FakeDom> {
        EngineSession::new(dom, SessionId::new("s1"), EngineConfig::default())
    }

    fn activated(dom: FakeDom) -> EngineSession<FakeDom> {
        let mut s = session(dom);
        assert_eq!(s.handle_message(ControlMessage::Activate), Ack::OK);
        s.dispatch(SessionEvent::SiteEnabled(true));
        s
    }

    #[test]
    fn activation_waits_for_the_gate() {
        let mut s = session(FakeDom::new("https://example.com/"));
        s.handle_message(ControlMessage::Activate);
        assert_eq!(s.phase(), SessionPhase::AwaitingGate);
        assert_eq!(
            s.drain_requests(),
            vec![
                HostRequest::CheckSiteEnabled {
                    hostname: "example.com".into()
                },
                HostRequest::LoadCustomSite {
                    hostname: "example.com".into()
                },
            ]
        );
        assert!(!s.host().history_hooks_installed());

        s.dispatch(SessionEvent::SiteEnabled(false));
        assert_eq!(s.phase(), SessionPhase::Inactive);
        assert!(s.host().mutation_filter().is_none());
    }

    #[test]
    fn start_subscribes_and_acquires() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let mut s = activated(dom);
        assert_eq!(s.phase(), SessionPhase::Active);
        assert!(s.host().history_hooks_installed());
        assert!(s.host().page_listeners_enabled());
        assert!(s.host().mutation_filter().is_some());
        assert_eq!(s.editor().map(EditorHandle::element), Some(field));
        assert!(s.trigger().is_floating());
        assert!(s.drain_requests().contains(&HostRequest::LoadSnippets));
        assert!(s.timers().is_pending(TimerKind::NavigationPoll));
    }

    #[test]
    fn hidden_tab_defers_the_first_scan() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        dom.set_document_visible(false);
        let mut s = activated(dom);
        assert_eq!(s.phase(), SessionPhase::Active);
        assert!(s.editor().is_none());

        s.host_mut().set_document_visible(true);
        s.dispatch(SessionEvent::VisibilityChanged { visible: true });
        s.advance_to(Duration::from_millis(1));
        assert_eq!(s.editor().map(EditorHandle::element), Some(field));
    }

    #[test]
    fn stale_controls_of_other_sessions_are_swept() {
        let mut dom = FakeDom::new("https://example.com/");
        let old = dom.append(
            dom.body(),
            ElementSpec::new("button").attr(snipline_core::host::SESSION_ATTRIBUTE, "old"),
        );
        let mut s = session(dom);
        s.handle_message(ControlMessage::Activate);
        assert!(!s.host().is_connected(old));
    }

    #[test]
    fn invalid_settings_are_refused() {
        let mut s = session(FakeDom::new("https://example.com/"));
        let mut config = EngineConfig::default();
        config.mutation.base_delay_ms = 10_000;
        config.mutation.max_delay_ms = 1;
        assert_eq!(
            s.handle_message(ControlMessage::SettingsUpdated {
                settings: Some(config)
            }),
            Ack::FAILED
        );
        assert_eq!(s.config(), &EngineConfig::default());
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut dom = FakeDom::new("https://example.com/");
        dom.append(dom.body(), ElementSpec::textarea());
        let mut s = activated(dom);
        assert!(!s.host().controls().is_empty());

        let report = s.teardown();
        assert!(report.is_clean(), "{report:?}");
        assert!(s.host().controls().is_empty());
        assert!(s.host().mutation_filter().is_none());
        assert!(!s.host().history_hooks_installed());
        assert!(!s.host().page_listeners_enabled());
        assert_eq!(s.phase(), SessionPhase::Inactive);
        assert_eq!(s.next_deadline(), None);

        s.host_mut().take_journal();
        assert!(s.teardown().is_clean());
        assert!(s.host().journal().is_empty());
    }

    #[test]
    fn events_are_ignored_while_inactive() {
        let mut s = session(FakeDom::new("https://example.com/"));
        assert!(!s.dispatch(SessionEvent::TriggerActivated));
        assert!(s.host().journal().iter().all(|op| !matches!(op, HostOp::RenderPanel)));
    }

    #[test]
    fn seed_depends_on_session_id() {
        assert_ne!(
            session_seed(&SessionId::new("a")),
            session_seed(&SessionId::new("b"))
        );
        assert_eq!(
            session_seed(&SessionId::new("a")),
            session_seed(&SessionId::new("a"))
        );
    }
}

//! Discovery and binding loop.
//!
//! [`PreviewCoordinator`] waits for the sanitizer engine, then for the
//! document, scans for code blocks that look like HTML and gives each one a
//! trigger. A subtree observer on `body` rescans whenever nodes are added.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use htmlpreview_markup::{looks_like_html, SanitizationAdapter, Sanitizer};

use crate::binding::{
    bind, candidate_text, has_trigger, is_own_node, resolve_container, resolve_target,
    CandidateBinding, PreviewPipeline,
};
use crate::config::PreviewConfig;
use crate::dom::NodeId;
use crate::error::StartupError;
use crate::renderer::{IsolationRenderer, RenderOptions};
use crate::window::{EventKind, ListenerId, ObserverId, ReadyState, TimerId, Window};

/// Handle through which the sanitizer engine arrives, possibly after startup.
#[derive(Clone, Default)]
pub struct SanitizerSlot {
    engine: Rc<OnceCell<Arc<dyn Sanitizer>>>,
}

impl SanitizerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(engine: Arc<dyn Sanitizer>) -> Self {
        let slot = Self::new();
        slot.provide(engine);
        slot
    }

    /// Returns false if an engine was already provided.
    pub fn provide(&self, engine: Arc<dyn Sanitizer>) -> bool {
        self.engine.set(engine).is_ok()
    }

    pub fn get(&self) -> Option<Arc<dyn Sanitizer>> {
        self.engine.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }
}

impl std::fmt::Debug for SanitizerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanitizerSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    WaitingForSanitizer,
    WaitingForDocument,
    Running,
}

/// What one scan (including coalesced follow-up passes) found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub passes: usize,
    pub candidates: usize,
    pub bound: usize,
    pub already_bound: usize,
    pub not_html: usize,
    /// Bindings dropped because their code block left the document.
    pub pruned: usize,
}

impl ScanReport {
    fn absorb(&mut self, other: ScanReport) {
        self.passes += other.passes;
        self.candidates += other.candidates;
        self.bound += other.bound;
        self.already_bound += other.already_bound;
        self.not_html += other.not_html;
        self.pruned += other.pruned;
    }
}

#[derive(Debug)]
struct CoordinatorInner {
    config: PreviewConfig,
    sanitizer: SanitizerSlot,
    phase: Phase,
    scan_state: ScanState,
    rescan_requested: bool,
    pipeline: Option<Rc<PreviewPipeline>>,
    bindings: Vec<CandidateBinding>,
    poll_timer: Option<TimerId>,
    ready_listener: Option<ListenerId>,
    observer: Option<ObserverId>,
}

/// Owns startup, scanning and every binding it created. Clones share state.
#[derive(Debug, Clone)]
pub struct PreviewCoordinator {
    inner: Rc<RefCell<CoordinatorInner>>,
}

impl PreviewCoordinator {
    pub fn new(config: PreviewConfig, sanitizer: SanitizerSlot) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CoordinatorInner {
                config,
                sanitizer,
                phase: Phase::Stopped,
                scan_state: ScanState::Idle,
                rescan_requested: false,
                pipeline: None,
                bindings: Vec::new(),
                poll_timer: None,
                ready_listener: None,
                observer: None,
            })),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.borrow().phase
    }

    pub fn scan_state(&self) -> ScanState {
        self.inner.borrow().scan_state
    }

    pub fn config(&self) -> PreviewConfig {
        self.inner.borrow().config.clone()
    }

    pub fn bindings(&self) -> Vec<CandidateBinding> {
        self.inner.borrow().bindings.clone()
    }

    /// Binding whose trigger lives in `container`, if any.
    pub fn binding_for(&self, container: NodeId) -> Option<CandidateBinding> {
        self.inner
            .borrow()
            .bindings
            .iter()
            .find(|b| b.container() == container)
            .cloned()
    }

    pub fn active_previews(&self) -> usize {
        self.inner
            .borrow()
            .bindings
            .iter()
            .filter(|b| b.is_active())
            .count()
    }

    /// Begin waiting for the sanitizer, then the document, then scan and observe.
    pub fn start(&self, window: &mut Window) -> Result<(), StartupError> {
        if let Err(err) = self.check_startable(window) {
            tracing::error!(error = %err, "failed to initialize HTML preview");
            return Err(err);
        }
        self.inner.borrow_mut().phase = Phase::WaitingForSanitizer;
        tracing::debug!("preview coordinator starting");
        self.poll_sanitizer(window);
        Ok(())
    }

    fn check_startable(&self, window: &Window) -> Result<(), StartupError> {
        let inner = self.inner.borrow();
        if inner.phase != Phase::Stopped {
            return Err(StartupError::AlreadyStarted);
        }
        inner.config.validate()?;
        let doc = window.document();
        doc.matches(doc.body(), &inner.config.candidate_selector())?;
        Ok(())
    }

    fn poll_sanitizer(&self, window: &mut Window) {
        let engine = {
            let mut inner = self.inner.borrow_mut();
            inner.poll_timer = None;
            if inner.phase != Phase::WaitingForSanitizer {
                return;
            }
            inner.sanitizer.get()
        };

        match engine {
            Some(engine) => {
                tracing::info!("sanitizer loaded");
                {
                    let mut inner = self.inner.borrow_mut();
                    let adapter = SanitizationAdapter::new(engine, inner.config.script_policy);
                    let renderer = IsolationRenderer::new(RenderOptions::from(&inner.config));
                    inner.pipeline = Some(Rc::new(PreviewPipeline::new(adapter, renderer)));
                }
                self.await_document(window);
            }
            None => {
                let interval = self.inner.borrow().config.poll_interval();
                let me = self.clone();
                let id = window.set_timeout(interval, move |window| me.poll_sanitizer(window));
                self.inner.borrow_mut().poll_timer = Some(id);
            }
        }
    }

    fn await_document(&self, window: &mut Window) {
        if window.ready_state() == ReadyState::Complete {
            self.begin(window);
            return;
        }
        self.inner.borrow_mut().phase = Phase::WaitingForDocument;
        let root = window.document().root();
        let me = self.clone();
        let id = window.add_event_listener_once(root, EventKind::DomContentLoaded, move |window, _| {
            me.inner.borrow_mut().ready_listener = None;
            me.begin(window);
        });
        self.inner.borrow_mut().ready_listener = Some(id);
    }

    fn begin(&self, window: &mut Window) {
        self.inner.borrow_mut().phase = Phase::Running;
        self.scan(window);

        let body = window.document().body();
        let me = self.clone();
        let observer = window.observe(body, move |window, records| {
            if records.iter().any(|r| !r.added.is_empty()) {
                me.scan(window);
            }
        });
        self.inner.borrow_mut().observer = Some(observer);
    }

    /// Scan the document and bind new candidates. A request made while a
    /// scan is running is folded into one follow-up pass and returns `None`,
    /// as does a request while the coordinator is not running.
    pub fn scan(&self, window: &mut Window) -> Option<ScanReport> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.phase != Phase::Running {
                return None;
            }
            if inner.scan_state == ScanState::Scanning {
                inner.rescan_requested = true;
                return None;
            }
            inner.scan_state = ScanState::Scanning;
        }

        let mut report = ScanReport::default();
        loop {
            report.absorb(self.scan_once(window));
            let again = std::mem::take(&mut self.inner.borrow_mut().rescan_requested);
            if !again {
                break;
            }
        }
        self.inner.borrow_mut().scan_state = ScanState::Idle;

        tracing::debug!(
            passes = report.passes,
            candidates = report.candidates,
            bound = report.bound,
            "scanned for code blocks"
        );
        Some(report)
    }

    fn scan_once(&self, window: &mut Window) -> ScanReport {
        let (selector, label, pipeline) = {
            let inner = self.inner.borrow();
            (
                inner.config.candidate_selector(),
                inner.config.trigger_label.clone(),
                inner.pipeline.clone(),
            )
        };
        let mut report = ScanReport {
            passes: 1,
            pruned: self.prune_detached(window),
            ..ScanReport::default()
        };
        let Some(pipeline) = pipeline else {
            return report;
        };

        let root = window.document().root();
        let candidates = match window.document().query_selector_all(root, &selector) {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::error!(error = %err, "initialization failed");
                return report;
            }
        };

        for candidate in candidates {
            report.candidates += 1;
            let doc = window.document();
            if is_own_node(doc, candidate) {
                continue;
            }
            let target = resolve_target(doc, candidate);
            let Some(container) = resolve_container(doc, target) else {
                continue;
            };
            if has_trigger(doc, container) {
                report.already_bound += 1;
                continue;
            }
            if !looks_like_html(&candidate_text(doc, target)) {
                report.not_html += 1;
                continue;
            }

            match bind(window, candidate, target, container, Rc::clone(&pipeline), &label) {
                Ok(binding) => {
                    report.bound += 1;
                    self.inner.borrow_mut().bindings.push(binding);
                }
                Err(err) => {
                    tracing::error!(candidate = %candidate, error = %err, "failed to attach trigger")
                }
            }
        }
        report
    }

    /// Unbind every binding whose container is no longer in the document,
    /// closing its preview. Returns how many were dropped.
    fn prune_detached(&self, window: &mut Window) -> usize {
        let detached: Vec<CandidateBinding> = {
            let doc = window.document();
            let mut inner = self.inner.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.bindings)
                .into_iter()
                .partition(|b| !doc.is_connected(b.container()));
            inner.bindings = kept;
            gone
        };
        for binding in &detached {
            binding.unbind(window);
        }
        if !detached.is_empty() {
            tracing::debug!(pruned = detached.len(), "dropped bindings for detached code blocks");
        }
        detached.len()
    }

    /// Cancel pending startup work, stop observing, close every preview and
    /// remove every trigger this coordinator attached.
    pub fn stop(&self, window: &mut Window) {
        let (timer, listener, observer, bindings) = {
            let mut inner = self.inner.borrow_mut();
            if inner.phase == Phase::Stopped {
                return;
            }
            inner.phase = Phase::Stopped;
            inner.scan_state = ScanState::Idle;
            inner.rescan_requested = false;
            inner.pipeline = None;
            (
                inner.poll_timer.take(),
                inner.ready_listener.take(),
                inner.observer.take(),
                std::mem::take(&mut inner.bindings),
            )
        };

        if let Some(id) = timer {
            window.clear_timeout(id);
        }
        if let Some(id) = listener {
            window.remove_event_listener(id);
        }
        if let Some(id) = observer {
            window.disconnect(id);
        }
        for binding in &bindings {
            binding.unbind(window);
        }
        tracing::info!(bindings = bindings.len(), "preview coordinator stopped");
    }
}

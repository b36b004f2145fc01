//! Headless host window.
//!
//! Owns the [`Document`] and every platform service the preview pipeline
//! touches: event listeners, animation frames, timers, a task queue,
//! mutation observers, fullscreen and element layout sizes.
//!
//! Everything runs on one thread. Callbacks receive `&mut Window` and may
//! schedule more work; nothing is re-entered while a task is running; queued
//! work drains at the next checkpoint ([`Window::run_until_idle`], or the end
//! of a dispatch, frame or timer turn).

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::dom::{Document, MutationRecord, NodeId};
use crate::error::PlatformRequestError;

/// Size reported for elements that have neither a layout box nor a px size.
pub const DEFAULT_OFFSET_SIZE: (f64, f64) = (640.0, 400.0);

/// Upper bound on task/observer rounds per checkpoint.
const MAX_CHECKPOINT_ROUNDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    MouseDown,
    MouseMove,
    MouseUp,
    FullscreenChange,
    TransitionEnd,
    AnimationEnd,
    DomContentLoaded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub target: NodeId,
    pub client_x: f64,
    pub client_y: f64,
}

impl Event {
    pub fn new(kind: EventKind, target: NodeId) -> Self {
        Self::pointer(kind, target, 0.0, 0.0)
    }

    pub fn pointer(kind: EventKind, target: NodeId, client_x: f64, client_y: f64) -> Self {
        Self {
            kind,
            target,
            client_x,
            client_y,
        }
    }
}

macro_rules! handle_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);
    };
}

handle_id!(ListenerId);
handle_id!(FrameId);
handle_id!(TimerId);
handle_id!(ObserverId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Complete,
}

type Handler = Rc<dyn Fn(&mut Window, &Event)>;
type Callback = Box<dyn FnOnce(&mut Window)>;
type MutationCallback = Rc<dyn Fn(&mut Window, &[MutationRecord])>;

struct Listener {
    id: ListenerId,
    target: NodeId,
    kind: EventKind,
    once: bool,
    handler: Handler,
}

struct Timer {
    id: TimerId,
    due: Duration,
    callback: Callback,
}

struct Observer {
    id: ObserverId,
    target: NodeId,
    callback: MutationCallback,
}

pub struct Window {
    document: Document,
    ready_state: ReadyState,
    listeners: Vec<Listener>,
    frames: Vec<(FrameId, Callback)>,
    timers: Vec<Timer>,
    tasks: VecDeque<Callback>,
    observers: Vec<Observer>,
    now: Duration,
    fullscreen_element: Option<NodeId>,
    fullscreen_denial: Option<String>,
    layout: HashMap<NodeId, (f64, f64)>,
    next_handle: u64,
    in_checkpoint: bool,
}

impl Default for Window {
    fn default() -> Self {
        Self::new()
    }
}

impl Window {
    /// A window whose document has finished loading.
    pub fn new() -> Self {
        Self::with_ready_state(ReadyState::Complete)
    }

    /// A window still parsing its document; see [`Window::finish_loading`].
    pub fn loading() -> Self {
        Self::with_ready_state(ReadyState::Loading)
    }

    fn with_ready_state(ready_state: ReadyState) -> Self {
        Self {
            document: Document::new(),
            ready_state,
            listeners: Vec::new(),
            frames: Vec::new(),
            timers: Vec::new(),
            tasks: VecDeque::new(),
            observers: Vec::new(),
            now: Duration::ZERO,
            fullscreen_element: None,
            fullscreen_denial: None,
            layout: HashMap::new(),
            next_handle: 1,
            in_checkpoint: false,
        }
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Mark the document parsed and fire `DOMContentLoaded` on the document node.
    pub fn finish_loading(&mut self) {
        if self.ready_state == ReadyState::Complete {
            return;
        }
        self.ready_state = ReadyState::Complete;
        tracing::debug!("document finished loading");
        let root = self.document.root();
        self.dispatch_event(&Event::new(EventKind::DomContentLoaded, root));
    }

    // --- events ---

    pub fn add_event_listener<F>(&mut self, target: NodeId, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&mut Window, &Event) + 'static,
    {
        self.push_listener(target, kind, false, Rc::new(handler))
    }

    /// Listener removed automatically before its first invocation.
    pub fn add_event_listener_once<F>(
        &mut self,
        target: NodeId,
        kind: EventKind,
        handler: F,
    ) -> ListenerId
    where
        F: Fn(&mut Window, &Event) + 'static,
    {
        self.push_listener(target, kind, true, Rc::new(handler))
    }

    fn push_listener(
        &mut self,
        target: NodeId,
        kind: EventKind,
        once: bool,
        handler: Handler,
    ) -> ListenerId {
        let id = ListenerId(self.next_handle());
        self.listeners.push(Listener {
            id,
            target,
            kind,
            once,
            handler,
        });
        id
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|l| l.id == id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listeners_on(&self, target: NodeId, kind: EventKind) -> usize {
        self.listeners
            .iter()
            .filter(|l| l.target == target && l.kind == kind)
            .count()
    }

    /// Invoke the listeners registered on `event.target` for `event.kind`,
    /// then run a checkpoint.
    pub fn dispatch_event(&mut self, event: &Event) {
        let handlers: Vec<Handler> = self
            .listeners
            .iter()
            .filter(|l| l.target == event.target && l.kind == event.kind)
            .map(|l| Rc::clone(&l.handler))
            .collect();
        self.listeners
            .retain(|l| !(l.once && l.target == event.target && l.kind == event.kind));

        for handler in handlers {
            handler(self, event);
        }
        self.run_until_idle();
    }

    pub fn click(&mut self, target: NodeId) {
        self.dispatch_event(&Event::new(EventKind::Click, target));
    }

    /// Simulate the end of a CSS transition on `node`.
    pub fn complete_transition(&mut self, node: NodeId) {
        self.dispatch_event(&Event::new(EventKind::TransitionEnd, node));
    }

    /// Simulate the end of a CSS animation on `node`.
    pub fn complete_animation(&mut self, node: NodeId) {
        self.dispatch_event(&Event::new(EventKind::AnimationEnd, node));
    }

    // --- animation frames ---

    pub fn request_animation_frame<F>(&mut self, callback: F) -> FrameId
    where
        F: FnOnce(&mut Window) + 'static,
    {
        let id = FrameId(self.next_handle());
        self.frames.push((id, Box::new(callback)));
        id
    }

    pub fn cancel_animation_frame(&mut self, id: FrameId) -> bool {
        let before = self.frames.len();
        self.frames.retain(|(f, _)| *f != id);
        self.frames.len() != before
    }

    pub fn has_animation_frame(&self, id: FrameId) -> bool {
        self.frames.iter().any(|(f, _)| *f == id)
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Run one rendering turn: every frame callback requested before the turn.
    pub fn run_animation_frames(&mut self) -> usize {
        let frames = std::mem::take(&mut self.frames);
        let count = frames.len();
        for (_, callback) in frames {
            callback(self);
        }
        self.run_until_idle();
        count
    }

    // --- timers ---

    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&mut Window) + 'static,
    {
        let id = TimerId(self.next_handle());
        self.timers.push(Timer {
            id,
            due: self.now + delay,
            callback: Box::new(callback),
        });
        id
    }

    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Advance the clock, firing due timers in deadline order.
    pub fn advance_time(&mut self, delta: Duration) {
        let target = self.now + delta;
        loop {
            // ids grow monotonically, so (due, id) is a stable ordering
            let next = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.due <= target)
                .min_by_key(|(_, t)| (t.due, t.id))
                .map(|(i, _)| i);
            let Some(index) = next else {
                break;
            };
            let timer = self.timers.remove(index);
            self.now = timer.due;
            (timer.callback)(self);
            self.run_until_idle();
        }
        self.now = target;
    }

    // --- tasks and checkpoints ---

    pub fn queue_task<F>(&mut self, task: F)
    where
        F: FnOnce(&mut Window) + 'static,
    {
        self.tasks.push_back(Box::new(task));
    }

    /// Drain queued tasks and deliver mutation records until both are empty.
    /// Nested calls made from inside a task return immediately.
    pub fn run_until_idle(&mut self) {
        if self.in_checkpoint {
            return;
        }
        self.in_checkpoint = true;

        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > MAX_CHECKPOINT_ROUNDS {
                tracing::warn!(
                    pending_tasks = self.tasks.len(),
                    "checkpoint did not settle, deferring remaining work"
                );
                break;
            }
            let delivered = self.deliver_mutations();
            if let Some(task) = self.tasks.pop_front() {
                task(self);
                continue;
            }
            if !delivered {
                break;
            }
        }

        self.in_checkpoint = false;
    }

    // --- mutation observers ---

    /// Observe child-list changes anywhere under `target`.
    pub fn observe<F>(&mut self, target: NodeId, callback: F) -> ObserverId
    where
        F: Fn(&mut Window, &[MutationRecord]) + 'static,
    {
        let id = ObserverId(self.next_handle());
        self.observers.push(Observer {
            id,
            target,
            callback: Rc::new(callback),
        });
        self.document.set_mutation_recording(true);
        id
    }

    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        if self.observers.is_empty() {
            self.document.set_mutation_recording(false);
        }
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn deliver_mutations(&mut self) -> bool {
        let records = self.document.take_mutations();
        if records.is_empty() {
            return false;
        }

        let observers: Vec<(ObserverId, NodeId, MutationCallback)> = self
            .observers
            .iter()
            .map(|o| (o.id, o.target, Rc::clone(&o.callback)))
            .collect();
        for (id, target, callback) in observers {
            // an earlier callback may have disconnected this one
            if !self.observers.iter().any(|o| o.id == id) {
                continue;
            }
            let relevant: Vec<MutationRecord> = records
                .iter()
                .filter(|r| self.document.contains(target, r.target))
                .cloned()
                .collect();
            if !relevant.is_empty() {
                callback(self, &relevant);
            }
        }
        true
    }

    // --- fullscreen ---

    pub fn fullscreen_element(&self) -> Option<NodeId> {
        self.fullscreen_element
    }

    /// Make every future fullscreen request fail with `reason`, or allow them again.
    pub fn deny_fullscreen(&mut self, reason: Option<&str>) {
        self.fullscreen_denial = reason.map(String::from);
    }

    pub fn request_fullscreen(&mut self, element: NodeId) -> Result<(), PlatformRequestError> {
        if let Some(reason) = &self.fullscreen_denial {
            return Err(PlatformRequestError::FullscreenDenied {
                reason: reason.clone(),
            });
        }
        if !self.document.is_connected(element) {
            return Err(PlatformRequestError::NotConnected(element));
        }
        self.fullscreen_element = Some(element);
        self.queue_fullscreen_change();
        Ok(())
    }

    pub fn exit_fullscreen(&mut self) -> Result<(), PlatformRequestError> {
        if self.fullscreen_element.take().is_none() {
            return Err(PlatformRequestError::NotFullscreen);
        }
        self.queue_fullscreen_change();
        Ok(())
    }

    /// Leave fullscreen the way a user would (Escape key), outside any control.
    pub fn user_exit_fullscreen(&mut self) {
        if self.fullscreen_element.take().is_some() {
            self.queue_fullscreen_change();
            self.run_until_idle();
        }
    }

    fn queue_fullscreen_change(&mut self) {
        self.queue_task(|window| {
            let root = window.document.root();
            window.dispatch_event(&Event::new(EventKind::FullscreenChange, root));
        });
    }

    // --- layout ---

    pub fn set_layout_size(&mut self, node: NodeId, width: f64, height: f64) {
        self.layout.insert(node, (width, height));
    }

    /// Rendered size: explicit layout box, then px inline size, then the default.
    pub fn offset_size(&self, node: NodeId) -> (f64, f64) {
        if let Some(size) = self.layout.get(&node) {
            return *size;
        }
        let px = |prop: &str| {
            self.document
                .style(node, prop)
                .and_then(|v| v.trim().strip_suffix("px"))
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        (
            px("width").unwrap_or(DEFAULT_OFFSET_SIZE.0),
            px("height").unwrap_or(DEFAULT_OFFSET_SIZE.1),
        )
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("ready_state", &self.ready_state)
            .field("listeners", &self.listeners.len())
            .field("frames", &self.frames.len())
            .field("timers", &self.timers.len())
            .field("observers", &self.observers.len())
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_once_listener_fires_once() {
        let mut window = Window::new();
        let body = window.document().body();
        let hits = Rc::new(RefCell::new(0));
        let h = Rc::clone(&hits);
        window.add_event_listener_once(body, EventKind::Click, move |_, _| *h.borrow_mut() += 1);
        window.click(body);
        window.click(body);
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(window.listener_count(), 0);
    }

    #[test]
    fn test_remove_listener() {
        let mut window = Window::new();
        let body = window.document().body();
        let id = window.add_event_listener(body, EventKind::Click, |_, _| {});
        assert!(window.has_listener(id));
        assert!(window.remove_event_listener(id));
        assert!(!window.remove_event_listener(id));
    }

    #[test]
    fn test_animation_frames() {
        let mut window = Window::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&hits), Rc::clone(&hits));
        window.request_animation_frame(move |_| a.borrow_mut().push("a"));
        let cancelled = window.request_animation_frame(move |_| b.borrow_mut().push("b"));
        assert!(window.cancel_animation_frame(cancelled));
        assert_eq!(window.run_animation_frames(), 1);
        assert_eq!(*hits.borrow(), vec!["a"]);
        assert_eq!(window.pending_frames(), 0);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut window = Window::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&hits), Rc::clone(&hits));
        window.set_timeout(Duration::from_millis(200), move |_| a.borrow_mut().push(200));
        window.set_timeout(Duration::from_millis(100), move |_| b.borrow_mut().push(100));
        window.advance_time(Duration::from_millis(150));
        assert_eq!(*hits.borrow(), vec![100]);
        window.advance_time(Duration::from_millis(50));
        assert_eq!(*hits.borrow(), vec![100, 200]);
        assert_eq!(window.now(), Duration::from_millis(200));
    }

    #[test]
    fn test_observer_sees_subtree_changes() {
        let mut window = Window::new();
        let body = window.document().body();
        let seen = Rc::new(RefCell::new(0));
        let s = Rc::clone(&seen);
        let id = window.observe(body, move |_, records| *s.borrow_mut() += records.len());

        let div = window.document_mut().create_element("div");
        window.document_mut().append_child(body, div).unwrap();
        window.run_until_idle();
        assert_eq!(*seen.borrow(), 1);

        window.disconnect(id);
        let span = window.document_mut().create_element("span");
        window.document_mut().append_child(div, span).unwrap();
        window.run_until_idle();
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_dom_content_loaded() {
        let mut window = Window::loading();
        let root = window.document().root();
        let fired = Rc::new(RefCell::new(false));
        let f = Rc::clone(&fired);
        window.add_event_listener_once(root, EventKind::DomContentLoaded, move |_, _| {
            *f.borrow_mut() = true
        });
        assert_eq!(window.ready_state(), ReadyState::Loading);
        window.finish_loading();
        assert!(*fired.borrow());
        assert_eq!(window.ready_state(), ReadyState::Complete);
    }

    #[test]
    fn test_fullscreen_request_and_denial() {
        let mut window = Window::new();
        let body = window.document().body();
        window.request_fullscreen(body).unwrap();
        assert_eq!(window.fullscreen_element(), Some(body));
        window.exit_fullscreen().unwrap();
        assert_eq!(window.exit_fullscreen(), Err(PlatformRequestError::NotFullscreen));

        window.deny_fullscreen(Some("permissions policy"));
        assert_eq!(
            window.request_fullscreen(body),
            Err(PlatformRequestError::FullscreenDenied {
                reason: "permissions policy".to_string()
            })
        );

        let detached = window.document_mut().create_element("div");
        window.deny_fullscreen(None);
        assert_eq!(
            window.request_fullscreen(detached),
            Err(PlatformRequestError::NotConnected(detached))
        );
    }

    #[test]
    fn test_offset_size() {
        let mut window = Window::new();
        let div = window.document_mut().create_element("div");
        assert_eq!(window.offset_size(div), DEFAULT_OFFSET_SIZE);
        window.document_mut().set_style(div, "width", "320px").unwrap();
        assert_eq!(window.offset_size(div), (320.0, DEFAULT_OFFSET_SIZE.1));
        window.set_layout_size(div, 10.0, 20.0);
        assert_eq!(window.offset_size(div), (10.0, 20.0));
    }
}

//! Resource lifecycle: everything a preview schedules or attaches is
//! recorded here, and released in one pass when the preview goes away.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dom::NodeId;
use crate::window::{EventKind, FrameId, ListenerId, Window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedResource {
    AnimationFrame(FrameId),
    Listener {
        target: NodeId,
        kind: EventKind,
        id: ListenerId,
    },
    /// A script element inserted into a preview boundary.
    Script(NodeId),
}

impl TrackedResource {
    pub fn listener(target: NodeId, kind: EventKind, id: ListenerId) -> Self {
        TrackedResource::Listener { target, kind, id }
    }
}

/// Counts of what a release actually cancelled, removed or detached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub frames: usize,
    pub listeners: usize,
    pub scripts: usize,
}

impl ReleaseSummary {
    pub fn total(&self) -> usize {
        self.frames + self.listeners + self.scripts
    }
}

#[derive(Debug, Default)]
struct ResourceTracker {
    resources: Vec<TrackedResource>,
    released: bool,
}

/// Shared registry for one preview. Clones refer to the same registry.
#[derive(Debug, Clone, Default)]
pub struct ResourceLifecycle {
    tracker: Rc<RefCell<ResourceTracker>>,
}

impl ResourceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `resource`. Once the registry has been released, the resource
    /// is released on the spot instead.
    ///
    /// Entries that already fired, were removed or were detached elsewhere
    /// are dropped on the way, so a long-lived preview keeps a bounded list.
    pub fn register(&self, window: &mut Window, resource: TrackedResource) {
        let late = {
            let mut tracker = self.tracker.borrow_mut();
            if tracker.released {
                true
            } else {
                tracker.resources.retain(|tracked| is_live(window, tracked));
                tracker.resources.push(resource.clone());
                false
            }
        };
        if late {
            tracing::debug!(?resource, "resource registered after release");
            let mut summary = ReleaseSummary::default();
            release_one(window, &resource, &mut summary);
        }
    }

    /// Cancel frames, remove listeners and detach scripts, in registration
    /// order. Later calls are no-ops.
    pub fn release_all(&self, window: &mut Window) -> ReleaseSummary {
        let drained = {
            let mut tracker = self.tracker.borrow_mut();
            tracker.released = true;
            std::mem::take(&mut tracker.resources)
        };

        let mut summary = ReleaseSummary::default();
        for resource in &drained {
            release_one(window, resource, &mut summary);
        }
        if !drained.is_empty() {
            tracing::debug!(
                frames = summary.frames,
                listeners = summary.listeners,
                scripts = summary.scripts,
                "released preview resources"
            );
        }
        summary
    }

    pub fn pending(&self) -> usize {
        self.tracker.borrow().resources.len()
    }

    pub fn is_released(&self) -> bool {
        self.tracker.borrow().released
    }
}

fn is_live(window: &Window, resource: &TrackedResource) -> bool {
    match resource {
        TrackedResource::AnimationFrame(id) => window.has_animation_frame(*id),
        TrackedResource::Listener { id, .. } => window.has_listener(*id),
        TrackedResource::Script(node) => window.document().parent(*node).is_some(),
    }
}

fn release_one(window: &mut Window, resource: &TrackedResource, summary: &mut ReleaseSummary) {
    match resource {
        TrackedResource::AnimationFrame(id) => {
            if window.cancel_animation_frame(*id) {
                summary.frames += 1;
            }
        }
        TrackedResource::Listener { id, .. } => {
            if window.remove_event_listener(*id) {
                summary.listeners += 1;
            }
        }
        TrackedResource::Script(node) => {
            if window.document_mut().remove(*node) {
                summary.scripts += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_release_all_clears_everything() {
        let mut window = Window::new();
        let lifecycle = ResourceLifecycle::new();
        let body = window.document().body();

        let frame = window.request_animation_frame(|_| {});
        lifecycle.register(&mut window, TrackedResource::AnimationFrame(frame));
        let listener = window.add_event_listener(body, EventKind::Click, |_, _| {});
        lifecycle.register(
            &mut window,
            TrackedResource::listener(body, EventKind::Click, listener),
        );
        let script = window.document_mut().create_element("script");
        window.document_mut().append_child(body, script).unwrap();
        lifecycle.register(&mut window, TrackedResource::Script(script));
        assert_eq!(lifecycle.pending(), 3);

        let summary = lifecycle.release_all(&mut window);
        assert_eq!(
            summary,
            ReleaseSummary {
                frames: 1,
                listeners: 1,
                scripts: 1
            }
        );
        assert_eq!(window.pending_frames(), 0);
        assert_eq!(window.listener_count(), 0);
        assert_eq!(window.document().parent(script), None);
        assert_eq!(lifecycle.pending(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut window = Window::new();
        let lifecycle = ResourceLifecycle::new();
        let frame = window.request_animation_frame(|_| {});
        lifecycle.register(&mut window, TrackedResource::AnimationFrame(frame));

        assert_eq!(lifecycle.release_all(&mut window).total(), 1);
        assert_eq!(lifecycle.release_all(&mut window), ReleaseSummary::default());
    }

    #[test]
    fn test_already_fired_resources_are_not_counted() {
        let mut window = Window::new();
        let lifecycle = ResourceLifecycle::new();
        let frame = window.request_animation_frame(|_| {});
        lifecycle.register(&mut window, TrackedResource::AnimationFrame(frame));
        window.run_animation_frames();
        assert_eq!(lifecycle.release_all(&mut window).frames, 0);
    }

    #[test]
    fn test_spent_resources_are_pruned_on_register() {
        let mut window = Window::new();
        let lifecycle = ResourceLifecycle::new();
        let body = window.document().body();

        for _ in 0..100 {
            let frame = window.request_animation_frame(|_| {});
            lifecycle.register(&mut window, TrackedResource::AnimationFrame(frame));
            let once = window.add_event_listener_once(body, EventKind::TransitionEnd, |_, _| {});
            lifecycle.register(
                &mut window,
                TrackedResource::listener(body, EventKind::TransitionEnd, once),
            );
            window.run_animation_frames();
            window.complete_transition(body);
        }
        assert!(lifecycle.pending() <= 2);

        let kept = window.add_event_listener(body, EventKind::Click, |_, _| {});
        lifecycle.register(&mut window, TrackedResource::listener(body, EventKind::Click, kept));
        assert_eq!(lifecycle.pending(), 1);
        assert_eq!(lifecycle.release_all(&mut window).listeners, 1);
    }

    #[test]
    fn test_register_after_release_releases_immediately() {
        let mut window = Window::new();
        let lifecycle = ResourceLifecycle::new();
        lifecycle.release_all(&mut window);

        let frame = window.request_animation_frame(|_| {});
        lifecycle.register(&mut window, TrackedResource::AnimationFrame(frame));
        assert_eq!(window.pending_frames(), 0);
        assert_eq!(lifecycle.pending(), 0);
    }
}

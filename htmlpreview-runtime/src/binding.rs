//! Per-candidate binding: the trigger button and the `Absent`/`Active`
//! toggle state machine behind it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use htmlpreview_markup::{looks_like_document, SanitizationAdapter};

use crate::dom::{Document, NodeData, NodeId};
use crate::error::{DomResult, PreviewError};
use crate::lifecycle::ReleaseSummary;
use crate::preview::PreviewInstance;
use crate::renderer::{IsolationRenderer, RenderOutcome, ERROR_PLACEHOLDER_CLASS, PREVIEW_CONTAINER_CLASS};
use crate::window::{EventKind, ListenerId, Window};

pub const TRIGGER_CLASS: &str = "preview-button";
pub const BOUND_ATTRIBUTE: &str = "data-preview-bound";
pub const REMOVING_CLASS: &str = "removing";

const TRIGGER_STYLE: &[(&str, &str)] = &[
    ("position", "absolute"),
    ("right", "10px"),
    ("top", "10px"),
    ("padding", "4px 8px"),
    ("background", "#4f46e5"),
    ("color", "white"),
    ("border", "none"),
    ("border-radius", "4px"),
    ("cursor", "pointer"),
    ("font-size", "12px"),
    ("z-index", "1000"),
];

/// Sanitize, then render.
#[derive(Debug, Clone)]
pub struct PreviewPipeline {
    adapter: SanitizationAdapter,
    renderer: IsolationRenderer,
}

impl PreviewPipeline {
    pub fn new(adapter: SanitizationAdapter, renderer: IsolationRenderer) -> Self {
        Self { adapter, renderer }
    }

    pub fn adapter(&self) -> &SanitizationAdapter {
        &self.adapter
    }

    pub fn renderer(&self) -> &IsolationRenderer {
        &self.renderer
    }

    /// Build a detached preview (or error placeholder) for raw candidate text.
    pub fn build(&self, window: &mut Window, raw_text: &str) -> RenderOutcome {
        if looks_like_document(raw_text) {
            tracing::info!("rendering HTML document");
        }
        match self.adapter.sanitize(raw_text) {
            Ok(safe) => self.renderer.render(window, &safe),
            Err(err) => {
                tracing::error!(error = %err, "sanitization failed");
                self.renderer.failure(window, PreviewError::from(err))
            }
        }
    }
}

#[derive(Debug, Default)]
pub enum PreviewSlot {
    #[default]
    Absent,
    Active(RenderOutcome),
}

#[derive(Debug)]
struct BindingInner {
    candidate: NodeId,
    target: NodeId,
    container: NodeId,
    trigger: NodeId,
    trigger_listener: Cell<Option<ListenerId>>,
    slot: RefCell<PreviewSlot>,
    /// Boundary playing its exit animation, and the listener that detaches it.
    exiting: Cell<Option<(NodeId, ListenerId)>>,
    pipeline: Rc<PreviewPipeline>,
}

/// A code block that has been given a trigger. Clones share state.
#[derive(Debug, Clone)]
pub struct CandidateBinding {
    inner: Rc<BindingInner>,
}

/// Attach a trigger to `container` for the code in `target`.
pub fn bind(
    window: &mut Window,
    candidate: NodeId,
    target: NodeId,
    container: NodeId,
    pipeline: Rc<PreviewPipeline>,
    label: &str,
) -> DomResult<CandidateBinding> {
    let doc = window.document_mut();
    let trigger = doc.create_element("button");
    doc.set_attribute(trigger, "class", TRIGGER_CLASS)?;
    doc.set_attribute(trigger, "type", "button")?;
    for (prop, value) in TRIGGER_STYLE {
        doc.set_style(trigger, prop, value)?;
    }
    doc.set_text_content(trigger, label)?;
    doc.set_style(container, "position", "relative")?;
    doc.set_attribute(container, BOUND_ATTRIBUTE, "true")?;
    doc.append_child(container, trigger)?;

    let binding = CandidateBinding {
        inner: Rc::new(BindingInner {
            candidate,
            target,
            container,
            trigger,
            trigger_listener: Cell::new(None),
            slot: RefCell::new(PreviewSlot::Absent),
            exiting: Cell::new(None),
            pipeline,
        }),
    };

    let handler = binding.clone();
    let id = window.add_event_listener(trigger, EventKind::Click, move |window, _| {
        handler.toggle(window);
    });
    binding.inner.trigger_listener.set(Some(id));
    Ok(binding)
}

impl CandidateBinding {
    pub fn candidate(&self) -> NodeId {
        self.inner.candidate
    }

    /// Node whose text is previewed.
    pub fn target(&self) -> NodeId {
        self.inner.target
    }

    /// Node the trigger and previews are mounted in.
    pub fn container(&self) -> NodeId {
        self.inner.container
    }

    pub fn trigger(&self) -> NodeId {
        self.inner.trigger
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.inner.slot.borrow(), PreviewSlot::Active(_))
    }

    pub fn with_instance<R>(&self, f: impl FnOnce(&PreviewInstance) -> R) -> Option<R> {
        match &*self.inner.slot.borrow() {
            PreviewSlot::Active(RenderOutcome::Preview(instance)) => Some(f(instance)),
            _ => None,
        }
    }

    /// Error placeholder currently shown, if activation failed.
    pub fn placeholder(&self) -> Option<NodeId> {
        match &*self.inner.slot.borrow() {
            PreviewSlot::Active(RenderOutcome::Failed { placeholder, .. }) => Some(*placeholder),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<PreviewError> {
        match &*self.inner.slot.borrow() {
            PreviewSlot::Active(RenderOutcome::Failed { error, .. }) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn toggle(&self, window: &mut Window) {
        if self.is_active() {
            self.deactivate(window);
        } else {
            self.activate(window);
        }
    }

    /// `Absent -> Active`: render the current text and mount the result.
    pub fn activate(&self, window: &mut Window) {
        if self.is_active() {
            return;
        }
        let raw_text = candidate_text(window.document(), self.inner.target);
        let outcome = self.inner.pipeline.build(window, &raw_text);
        if let Err(err) = window
            .document_mut()
            .append_child(self.inner.container, outcome.root())
        {
            tracing::error!(candidate = %self.inner.candidate, error = %err, "failed to mount preview");
            if let RenderOutcome::Preview(instance) = &outcome {
                instance.release(window);
            }
            return;
        }
        *self.inner.slot.borrow_mut() = PreviewSlot::Active(outcome);
    }

    /// Whether a deactivated boundary is still waiting for its exit animation.
    pub fn is_exiting(&self) -> bool {
        self.inner.exiting.get().is_some()
    }

    /// `Active -> Absent`: release resources now, remove the boundary once
    /// its exit animation ends. At most one boundary is exiting at a time.
    pub fn deactivate(&self, window: &mut Window) -> ReleaseSummary {
        let previous = std::mem::take(&mut *self.inner.slot.borrow_mut());
        match previous {
            PreviewSlot::Active(RenderOutcome::Preview(instance)) => {
                let summary = instance.release(window);
                self.finish_exit(window);
                let wrapper = instance.wrapper();
                let container = instance.container();
                if let Err(err) = window.document_mut().add_class(wrapper, REMOVING_CLASS) {
                    tracing::warn!(error = %err, "could not start exit animation");
                    window.document_mut().remove(container);
                    return summary;
                }
                let binding = self.clone();
                let id = window.add_event_listener_once(wrapper, EventKind::AnimationEnd, move |window, _| {
                    if matches!(binding.inner.exiting.get(), Some((pending, _)) if pending == container) {
                        binding.inner.exiting.set(None);
                    }
                    window.document_mut().remove(container);
                });
                self.inner.exiting.set(Some((container, id)));
                summary
            }
            PreviewSlot::Active(RenderOutcome::Failed { placeholder, .. }) => {
                window.document_mut().remove(placeholder);
                ReleaseSummary::default()
            }
            PreviewSlot::Absent => ReleaseSummary::default(),
        }
    }

    /// Detach a boundary still playing its exit animation.
    fn finish_exit(&self, window: &mut Window) {
        if let Some((container, listener)) = self.inner.exiting.take() {
            window.remove_event_listener(listener);
            window.document_mut().remove(container);
        }
    }

    /// Tear down immediately, without the exit animation. A boundary still
    /// exiting from an earlier deactivation is detached as well.
    pub fn close(&self, window: &mut Window) -> ReleaseSummary {
        self.finish_exit(window);
        let previous = std::mem::take(&mut *self.inner.slot.borrow_mut());
        match previous {
            PreviewSlot::Active(RenderOutcome::Preview(instance)) => instance.close(window),
            PreviewSlot::Active(RenderOutcome::Failed { placeholder, .. }) => {
                window.document_mut().remove(placeholder);
                ReleaseSummary::default()
            }
            PreviewSlot::Absent => ReleaseSummary::default(),
        }
    }

    /// Close any preview and take the trigger back out of the page.
    pub fn unbind(&self, window: &mut Window) {
        self.close(window);
        if let Some(id) = self.inner.trigger_listener.take() {
            window.remove_event_listener(id);
        }
        let doc = window.document_mut();
        doc.remove(self.inner.trigger);
        if let Err(err) = doc.remove_attribute(self.inner.container, BOUND_ATTRIBUTE) {
            tracing::warn!(error = %err, "could not unmark container");
        }
    }
}

/// Code block element to read text from: the candidate if it is `code`,
/// else its first `code` descendant, else the candidate itself.
pub fn resolve_target(doc: &Document, candidate: NodeId) -> NodeId {
    if doc.tag_name(candidate) == Some("code") {
        return candidate;
    }
    doc.descendants(candidate)
        .into_iter()
        .find(|id| doc.tag_name(*id) == Some("code"))
        .unwrap_or(candidate)
}

/// Closest `pre` around the target, else its parent.
pub fn resolve_container(doc: &Document, target: NodeId) -> Option<NodeId> {
    doc.closest(target, "pre").or_else(|| doc.parent(target))
}

pub fn has_trigger(doc: &Document, container: NodeId) -> bool {
    doc.descendants(container)
        .into_iter()
        .any(|id| doc.has_class(id, TRIGGER_CLASS))
}

/// True for nodes this crate put in the page.
pub fn is_own_node(doc: &Document, node: NodeId) -> bool {
    [TRIGGER_CLASS, PREVIEW_CONTAINER_CLASS, ERROR_PLACEHOLDER_CLASS]
        .iter()
        .any(|class| doc.has_class(node, class))
}

/// Text of `target`, leaving out triggers and previews mounted inside it.
pub fn candidate_text(doc: &Document, target: NodeId) -> String {
    let mut out = String::new();
    collect_text(doc, target, &mut out);
    out
}

fn collect_text(doc: &Document, node: NodeId, out: &mut String) {
    match doc.data(node) {
        Some(NodeData::Text(text)) => out.push_str(text),
        Some(NodeData::Element(_)) if is_own_node(doc, node) => {}
        _ => {
            for child in doc.children(node) {
                collect_text(doc, *child, out);
            }
        }
    }
}

//! A live preview and the handles a host needs to drive it: the boundary
//! nodes, presentation state, tracked resources and the preview's script
//! scope.

use std::cell::RefCell;
use std::rc::Rc;

use crate::controls::{apply_control, ControlAction, ControlContext, ControlSurface, PresentationState, ZoomFactors};
use crate::dom::NodeId;
use crate::error::DomResult;
use crate::lifecycle::{ReleaseSummary, ResourceLifecycle};
use crate::script::ScriptScope;
use crate::window::Window;

/// One live preview: the isolation boundary, its presentation state, the
/// resources it holds and its own script realm.
#[derive(Debug)]
pub struct PreviewInstance {
    pub(crate) container: NodeId,
    pub(crate) shadow_root: NodeId,
    pub(crate) wrapper: NodeId,
    pub(crate) controls: ControlSurface,
    pub(crate) resize_handle: NodeId,
    pub(crate) loading_indicator: NodeId,
    pub(crate) state: Rc<RefCell<PresentationState>>,
    pub(crate) lifecycle: ResourceLifecycle,
    pub(crate) factors: ZoomFactors,
    pub(crate) scope: ScriptScope,
}

impl PreviewInstance {
    /// Host element (`div.preview-container`) carrying the shadow root.
    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn shadow_root(&self) -> NodeId {
        self.shadow_root
    }

    /// Content node (`div.wrapper`) inside the boundary.
    pub fn wrapper(&self) -> NodeId {
        self.wrapper
    }

    pub fn controls(&self) -> &ControlSurface {
        &self.controls
    }

    pub fn resize_handle(&self) -> NodeId {
        self.resize_handle
    }

    pub fn loading_indicator(&self) -> NodeId {
        self.loading_indicator
    }

    pub fn scale(&self) -> f64 {
        self.state.borrow().scale
    }

    pub fn is_fullscreen(&self) -> bool {
        self.state.borrow().fullscreen
    }

    pub fn script_scope(&self) -> &ScriptScope {
        &self.scope
    }

    pub fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }

    pub fn control_context(&self) -> ControlContext {
        ControlContext {
            wrapper: self.wrapper,
            state: Rc::clone(&self.state),
            lifecycle: self.lifecycle.clone(),
            factors: self.factors,
        }
    }

    /// Run a control as if its button had been pressed.
    pub fn apply(&self, window: &mut Window, action: ControlAction) -> DomResult<()> {
        apply_control(window, &self.control_context(), action)
    }

    /// Text of the rendered markup, without the preview's own chrome.
    pub fn content_text(&self, window: &Window) -> String {
        let doc = window.document();
        let chrome = [
            self.controls.container(),
            self.resize_handle,
            self.loading_indicator,
        ];
        doc.children(self.wrapper)
            .iter()
            .filter(|child| !chrome.contains(*child))
            .map(|child| doc.text_content(*child))
            .collect()
    }

    /// Release tracked resources and leave fullscreen if this preview holds
    /// it. The boundary stays in place.
    pub fn release(&self, window: &mut Window) -> ReleaseSummary {
        let summary = self.lifecycle.release_all(window);
        if window.fullscreen_element() == Some(self.wrapper) {
            if let Err(err) = window.exit_fullscreen() {
                tracing::warn!(reason = %err, "failed to exit fullscreen on release");
            }
            self.state.borrow_mut().fullscreen = false;
        }
        summary
    }

    /// Release everything and detach the boundary at once.
    pub fn close(&self, window: &mut Window) -> ReleaseSummary {
        let summary = self.release(window);
        window.document_mut().remove(self.container);
        summary
    }
}

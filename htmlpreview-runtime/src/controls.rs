//! Control surface: fullscreen, zoom in, zoom out, reset zoom.
//!
//! Controls act on the preview's content node (`div.wrapper`) and on the
//! shared [`PresentationState`]. Every listener they create is registered
//! with the preview's [`ResourceLifecycle`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::dom::NodeId;
use crate::error::DomResult;
use crate::lifecycle::{ResourceLifecycle, TrackedResource};
use crate::window::{EventKind, Window};

pub const CONTROL_BUTTONS_CLASS: &str = "control-buttons";
pub const FULLSCREEN_CLASS: &str = "fullscreen";
pub const FULLSCREEN_TRANSITION_CLASS: &str = "fullscreen-transition";
pub const ZOOM_TRANSITION_CLASS: &str = "zoom-transition";
pub const SCALE_ATTRIBUTE: &str = "data-scale";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentationState {
    pub scale: f64,
    pub fullscreen: bool,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    ToggleFullscreen,
    ZoomIn,
    ZoomOut,
    ResetZoom,
}

impl ControlAction {
    /// Display order.
    pub const ALL: [ControlAction; 4] = [
        ControlAction::ToggleFullscreen,
        ControlAction::ZoomIn,
        ControlAction::ZoomOut,
        ControlAction::ResetZoom,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ControlAction::ToggleFullscreen => "Toggle fullscreen",
            ControlAction::ZoomIn => "Zoom in",
            ControlAction::ZoomOut => "Zoom out",
            ControlAction::ResetZoom => "Reset zoom",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            ControlAction::ToggleFullscreen => concat!(
                r#"<svg viewBox="0 0 24 24" width="16" height="16" stroke="currentColor" fill="none" stroke-width="1.5">"#,
                r#"<path d="M4 4h4v4M4 4l5 5M20 4h-4v4M20 4l-5 5M4 20h4v-4M4 20l5-5M20 20h-4v-4M20 20l-5-5"></path>"#,
                "</svg>"
            ),
            ControlAction::ZoomIn => concat!(
                r#"<svg viewBox="0 0 24 24" width="16" height="16" stroke="currentColor" fill="none" stroke-width="1.5">"#,
                r#"<circle cx="10.5" cy="10.5" r="5.5"></circle>"#,
                r#"<line x1="14.5" y1="14.5" x2="19" y2="19"></line>"#,
                r#"<line x1="8.5" y1="10.5" x2="12.5" y2="10.5"></line>"#,
                r#"<line x1="10.5" y1="8.5" x2="10.5" y2="12.5"></line>"#,
                "</svg>"
            ),
            ControlAction::ZoomOut => concat!(
                r#"<svg viewBox="0 0 24 24" width="16" height="16" stroke="currentColor" fill="none" stroke-width="1.5">"#,
                r#"<circle cx="10.5" cy="10.5" r="5.5"></circle>"#,
                r#"<line x1="14.5" y1="14.5" x2="19" y2="19"></line>"#,
                r#"<line x1="8.5" y1="10.5" x2="12.5" y2="10.5"></line>"#,
                "</svg>"
            ),
            ControlAction::ResetZoom => concat!(
                r#"<svg viewBox="0 0 24 24" width="16" height="16" stroke="currentColor" fill="none" stroke-width="1.5">"#,
                r#"<circle cx="10.5" cy="10.5" r="5.5"></circle>"#,
                r#"<line x1="14.5" y1="14.5" x2="19" y2="19"></line>"#,
                r#"<path d="M8.5 8.5l4 4m0-4l-4 4"></path>"#,
                "</svg>"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomFactors {
    pub zoom_in: f64,
    pub zoom_out: f64,
}

impl Default for ZoomFactors {
    fn default() -> Self {
        Self {
            zoom_in: 1.2,
            zoom_out: 0.8,
        }
    }
}

/// What a control needs to act on one preview.
#[derive(Debug, Clone)]
pub struct ControlContext {
    pub wrapper: NodeId,
    pub state: Rc<RefCell<PresentationState>>,
    pub lifecycle: ResourceLifecycle,
    pub factors: ZoomFactors,
}

#[derive(Debug, Clone)]
pub struct ControlSurface {
    container: NodeId,
    buttons: Vec<(ControlAction, NodeId)>,
}

impl ControlSurface {
    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn button(&self, action: ControlAction) -> Option<NodeId> {
        self.buttons
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, node)| *node)
    }
}

/// Build the button row, wire each button and append the row to the wrapper.
pub fn install_controls(window: &mut Window, ctx: &ControlContext) -> DomResult<ControlSurface> {
    let container = window.document_mut().create_element("div");
    window
        .document_mut()
        .set_attribute(container, "class", CONTROL_BUTTONS_CLASS)?;

    let mut buttons = Vec::with_capacity(ControlAction::ALL.len());
    for action in ControlAction::ALL {
        let doc = window.document_mut();
        let button = doc.create_element("button");
        doc.set_attribute(button, "aria-label", action.label())?;
        doc.set_inner_html(button, action.icon())?;
        doc.append_child(container, button)?;

        let handler_ctx = ctx.clone();
        let id = window.add_event_listener(button, EventKind::Click, move |window, _| {
            if let Err(err) = apply_control(window, &handler_ctx, action) {
                tracing::error!(action = action.label(), error = %err, "control failed");
            }
        });
        ctx.lifecycle
            .register(window, TrackedResource::listener(button, EventKind::Click, id));
        buttons.push((action, button));
    }

    window.document_mut().append_child(ctx.wrapper, container)?;
    Ok(ControlSurface { container, buttons })
}

pub fn apply_control(window: &mut Window, ctx: &ControlContext, action: ControlAction) -> DomResult<()> {
    match action {
        ControlAction::ToggleFullscreen => toggle_fullscreen(window, ctx),
        ControlAction::ZoomIn => zoom(window, ctx, ctx.factors.zoom_in).map(|_| ()),
        ControlAction::ZoomOut => zoom(window, ctx, ctx.factors.zoom_out).map(|_| ()),
        ControlAction::ResetZoom => reset_zoom(window, ctx),
    }
}

/// Enter fullscreen on the wrapper, or leave it if the page is fullscreen.
///
/// A refused request reverts the wrapper to its pre-request look, both
/// classes included. Fullscreen can also end outside this control (Escape);
/// a one-shot `fullscreenchange` listener reconciles the state either way.
pub fn toggle_fullscreen(window: &mut Window, ctx: &ControlContext) -> DomResult<()> {
    let wrapper = ctx.wrapper;
    window
        .document_mut()
        .add_class(wrapper, FULLSCREEN_TRANSITION_CLASS)?;

    if window.fullscreen_element().is_none() {
        window.document_mut().add_class(wrapper, FULLSCREEN_CLASS)?;
        if let Err(err) = window.request_fullscreen(wrapper) {
            tracing::error!(reason = %err, "failed to enter fullscreen");
            let doc = window.document_mut();
            doc.remove_class(wrapper, FULLSCREEN_CLASS)?;
            doc.remove_class(wrapper, FULLSCREEN_TRANSITION_CLASS)?;
            return Ok(());
        }
        ctx.state.borrow_mut().fullscreen = true;
    } else {
        match window.exit_fullscreen() {
            Ok(()) => {
                window.document_mut().remove_class(wrapper, FULLSCREEN_CLASS)?;
                ctx.state.borrow_mut().fullscreen = false;
            }
            Err(err) => tracing::error!(reason = %err, "failed to exit fullscreen"),
        }
    }

    let state = Rc::clone(&ctx.state);
    let root = window.document().root();
    let id = window.add_event_listener_once(root, EventKind::FullscreenChange, move |window, _| {
        let doc_is_fullscreen = window.fullscreen_element().is_some();
        let doc = window.document_mut();
        if !doc_is_fullscreen {
            let _ = doc.remove_class(wrapper, FULLSCREEN_CLASS);
            state.borrow_mut().fullscreen = false;
        }
        let _ = doc.remove_class(wrapper, FULLSCREEN_TRANSITION_CLASS);
    });
    ctx.lifecycle.register(
        window,
        TrackedResource::listener(root, EventKind::FullscreenChange, id),
    );
    Ok(())
}

/// Multiply the current scale by `factor`. Returns the new scale.
pub fn zoom(window: &mut Window, ctx: &ControlContext, factor: f64) -> DomResult<f64> {
    let scale = {
        let mut state = ctx.state.borrow_mut();
        state.scale *= factor;
        state.scale
    };
    apply_scale(window, ctx, scale)?;
    Ok(scale)
}

pub fn reset_zoom(window: &mut Window, ctx: &ControlContext) -> DomResult<()> {
    ctx.state.borrow_mut().scale = 1.0;
    apply_scale(window, ctx, 1.0)
}

fn apply_scale(window: &mut Window, ctx: &ControlContext, scale: f64) -> DomResult<()> {
    let wrapper = ctx.wrapper;
    let doc = window.document_mut();
    doc.add_class(wrapper, ZOOM_TRANSITION_CLASS)?;
    doc.set_style(wrapper, "transform", &format!("scale({})", scale))?;
    doc.set_style(wrapper, "transform-origin", "0 0")?;
    doc.set_attribute(wrapper, SCALE_ATTRIBUTE, &scale.to_string())?;

    let id = window.add_event_listener_once(wrapper, EventKind::TransitionEnd, move |window, _| {
        let _ = window
            .document_mut()
            .remove_class(wrapper, ZOOM_TRANSITION_CLASS);
    });
    ctx.lifecycle.register(
        window,
        TrackedResource::listener(wrapper, EventKind::TransitionEnd, id),
    );
    Ok(())
}

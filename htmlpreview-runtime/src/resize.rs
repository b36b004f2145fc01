//! Drag-to-resize handle for the preview wrapper.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dom::NodeId;
use crate::error::DomResult;
use crate::lifecycle::{ResourceLifecycle, TrackedResource};
use crate::window::{Event, EventKind, ListenerId, Window};

pub const RESIZE_HANDLE_CLASS: &str = "resize-handle";

const RESIZE_ICON: &str = r#"<svg viewBox="0 0 24 24" width="16" height="16" fill="currentColor"><path d="M22 22L12 12M22 12L12 22"></path></svg>"#;

#[derive(Debug, Clone, Copy)]
struct Drag {
    width: f64,
    height: f64,
    x: f64,
    y: f64,
}

#[derive(Debug, Default)]
struct ResizeState {
    drag: Option<Drag>,
    document_listeners: Vec<ListenerId>,
}

/// Append a resize handle to `wrapper`. Both dimensions are clamped to
/// `min_size` px while dragging.
pub fn install_resize_handle(
    window: &mut Window,
    wrapper: NodeId,
    lifecycle: &ResourceLifecycle,
    min_size: f64,
) -> DomResult<NodeId> {
    let doc = window.document_mut();
    let handle = doc.create_element("div");
    doc.set_attribute(handle, "class", RESIZE_HANDLE_CLASS)?;
    doc.set_inner_html(handle, RESIZE_ICON)?;
    doc.append_child(wrapper, handle)?;

    let state = Rc::new(RefCell::new(ResizeState::default()));
    let lifecycle_for_drag = lifecycle.clone();
    let id = window.add_event_listener(handle, EventKind::MouseDown, move |window, event| {
        start_drag(window, event, wrapper, &state, &lifecycle_for_drag, min_size);
    });
    lifecycle.register(window, TrackedResource::listener(handle, EventKind::MouseDown, id));
    Ok(handle)
}

fn start_drag(
    window: &mut Window,
    event: &Event,
    wrapper: NodeId,
    state: &Rc<RefCell<ResizeState>>,
    lifecycle: &ResourceLifecycle,
    min_size: f64,
) {
    let (width, height) = window.offset_size(wrapper);
    let stale = {
        let mut s = state.borrow_mut();
        s.drag = Some(Drag {
            width,
            height,
            x: event.client_x,
            y: event.client_y,
        });
        std::mem::take(&mut s.document_listeners)
    };
    // a mousedown without a matching mouseup leaves listeners behind
    for id in stale {
        window.remove_event_listener(id);
    }

    let root = window.document().root();
    let move_state = Rc::clone(state);
    let on_move = window.add_event_listener(root, EventKind::MouseMove, move |window, event| {
        let Some(drag) = move_state.borrow().drag else {
            return;
        };
        let new_width = min_size.max(drag.width + (event.client_x - drag.x));
        let new_height = min_size.max(drag.height + (event.client_y - drag.y));
        let doc = window.document_mut();
        let sized = doc
            .set_style(wrapper, "width", &format!("{}px", new_width))
            .and_then(|_| doc.set_style(wrapper, "height", &format!("{}px", new_height)));
        if let Err(err) = sized {
            tracing::error!(error = %err, "resize failed");
        }
    });

    let up_state = Rc::clone(state);
    let on_up = window.add_event_listener(root, EventKind::MouseUp, move |window, _| {
        let listeners = {
            let mut s = up_state.borrow_mut();
            s.drag = None;
            std::mem::take(&mut s.document_listeners)
        };
        for id in listeners {
            window.remove_event_listener(id);
        }
    });

    state.borrow_mut().document_listeners = vec![on_move, on_up];
    lifecycle.register(window, TrackedResource::listener(root, EventKind::MouseMove, on_move));
    lifecycle.register(window, TrackedResource::listener(root, EventKind::MouseUp, on_up));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (Window, NodeId, NodeId, ResourceLifecycle) {
        let mut window = Window::new();
        let wrapper = window.document_mut().create_element("div");
        let body = window.document().body();
        window.document_mut().append_child(body, wrapper).unwrap();
        window.set_layout_size(wrapper, 400.0, 300.0);
        let lifecycle = ResourceLifecycle::new();
        let handle = install_resize_handle(&mut window, wrapper, &lifecycle, 200.0).unwrap();
        (window, wrapper, handle, lifecycle)
    }

    #[test]
    fn test_drag_resizes_wrapper() {
        let (mut window, wrapper, handle, _) = setup();
        let root = window.document().root();
        window.dispatch_event(&Event::pointer(EventKind::MouseDown, handle, 10.0, 10.0));
        window.dispatch_event(&Event::pointer(EventKind::MouseMove, root, 60.0, 30.0));

        let doc = window.document();
        assert_eq!(doc.style(wrapper, "width"), Some("450px"));
        assert_eq!(doc.style(wrapper, "height"), Some("320px"));
    }

    #[test]
    fn test_drag_clamps_to_minimum() {
        let (mut window, wrapper, handle, _) = setup();
        let root = window.document().root();
        window.dispatch_event(&Event::pointer(EventKind::MouseDown, handle, 500.0, 500.0));
        window.dispatch_event(&Event::pointer(EventKind::MouseMove, root, 0.0, 0.0));

        let doc = window.document();
        assert_eq!(doc.style(wrapper, "width"), Some("200px"));
        assert_eq!(doc.style(wrapper, "height"), Some("200px"));
    }

    #[test]
    fn test_mouse_up_detaches_document_listeners() {
        let (mut window, wrapper, handle, _) = setup();
        let root = window.document().root();
        window.dispatch_event(&Event::pointer(EventKind::MouseDown, handle, 0.0, 0.0));
        assert_eq!(window.listeners_on(root, EventKind::MouseMove), 1);
        window.dispatch_event(&Event::new(EventKind::MouseUp, root));
        assert_eq!(window.listeners_on(root, EventKind::MouseMove), 0);
        assert_eq!(window.listeners_on(root, EventKind::MouseUp), 0);

        window.dispatch_event(&Event::pointer(EventKind::MouseMove, root, 300.0, 300.0));
        assert_eq!(window.document().style(wrapper, "width"), None);
    }

    #[test]
    fn test_release_mid_drag() {
        let (mut window, _, handle, lifecycle) = setup();
        window.dispatch_event(&Event::pointer(EventKind::MouseDown, handle, 0.0, 0.0));
        assert_eq!(window.listener_count(), 3);
        let summary = lifecycle.release_all(&mut window);
        assert_eq!(summary.listeners, 3);
        assert_eq!(window.listener_count(), 0);
    }
}

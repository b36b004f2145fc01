use std::sync::Arc;

use htmlpreview_markup::{AmmoniaSanitizer, ScriptPolicy};
use htmlpreview_runtime::binding::{REMOVING_CLASS, TRIGGER_CLASS};
use htmlpreview_runtime::controls::{FULLSCREEN_CLASS, FULLSCREEN_TRANSITION_CLASS, SCALE_ATTRIBUTE};
use htmlpreview_runtime::renderer::PREVIEW_CONTAINER_CLASS;
use htmlpreview_runtime::{
    install, ControlAction, Event, EventKind, IsolationRenderer, Phase, PreviewConfig,
    PreviewCoordinator, ReleaseSummary, RenderOutcome, SanitizerSlot, Window,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn page(body: &str) -> Window {
    let mut window = Window::new();
    let root = window.document().body();
    window.document_mut().set_inner_html(root, body).unwrap();
    window
}

fn started(body: &str) -> (Window, PreviewCoordinator) {
    let mut window = page(body);
    let coordinator = install(&mut window, PreviewConfig::default()).unwrap();
    (window, coordinator)
}

fn count(window: &Window, selector: &str) -> usize {
    let doc = window.document();
    doc.query_selector_all(doc.root(), selector).unwrap().len()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// Discovery tests
#[test]
fn test_only_html_like_blocks_get_a_trigger() {
    let (window, coordinator) = started(
        "<pre><code>let x = 1;</code></pre>\
         <pre><code>a &lt; b</code></pre>\
         <pre><code>&lt;p&gt;hi&lt;/p&gt;</code></pre>",
    );
    assert_eq!(coordinator.bindings().len(), 1);
    assert_eq!(count(&window, &format!(".{}", TRIGGER_CLASS)), 1);
}

#[test]
fn test_repeated_scans_do_not_duplicate_triggers() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;Hello&lt;/div&gt;</code></pre>");
    let report = coordinator.scan(&mut window).unwrap();
    assert_eq!(report.bound, 0);
    assert_eq!(report.already_bound, 1);
    coordinator.scan(&mut window);
    assert_eq!(count(&window, &format!(".{}", TRIGGER_CLASS)), 1);
    assert_eq!(coordinator.bindings().len(), 1);
}

#[test]
fn test_blocks_added_later_are_bound() {
    let (mut window, coordinator) = started("<pre><code>&lt;b&gt;one&lt;/b&gt;</code></pre>");
    assert_eq!(coordinator.bindings().len(), 1);

    let doc = window.document_mut();
    let pre = doc.create_element("pre");
    doc.set_inner_html(pre, "<code>&lt;i&gt;two&lt;/i&gt;</code>").unwrap();
    let body = doc.body();
    doc.append_child(body, pre).unwrap();
    window.run_until_idle();

    assert_eq!(coordinator.bindings().len(), 2);
    assert_eq!(count(&window, &format!(".{}", TRIGGER_CLASS)), 2);
}

#[test]
fn test_startup_waits_for_sanitizer_and_document() {
    let mut window = Window::loading();
    let body = window.document().body();
    window
        .document_mut()
        .set_inner_html(body, "<pre><code>&lt;div&gt;x&lt;/div&gt;</code></pre>")
        .unwrap();

    let slot = SanitizerSlot::new();
    let coordinator = PreviewCoordinator::new(PreviewConfig::default(), slot.clone());
    coordinator.start(&mut window).unwrap();
    assert_eq!(coordinator.phase(), Phase::WaitingForSanitizer);

    slot.provide(Arc::new(AmmoniaSanitizer));
    window.advance_time(coordinator.config().poll_interval());
    assert_eq!(coordinator.phase(), Phase::WaitingForDocument);
    assert!(coordinator.bindings().is_empty());

    window.finish_loading();
    assert_eq!(coordinator.phase(), Phase::Running);
    assert_eq!(coordinator.bindings().len(), 1);
}

#[test]
fn test_stop_removes_every_trigger() {
    let (mut window, coordinator) = started(
        "<pre><code>&lt;b&gt;one&lt;/b&gt;</code></pre><pre><code>&lt;i&gt;two&lt;/i&gt;</code></pre>",
    );
    let first = coordinator.bindings()[0].clone();
    window.click(first.trigger());
    assert_eq!(coordinator.active_previews(), 1);

    coordinator.stop(&mut window);
    assert_eq!(count(&window, &format!(".{}", TRIGGER_CLASS)), 0);
    assert_eq!(count(&window, &format!(".{}", PREVIEW_CONTAINER_CLASS)), 0);
    assert_eq!(window.observer_count(), 0);
}

// Toggle flow tests
#[test]
fn test_hello_preview_opens_and_closes() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;Hello&lt;/div&gt;</code></pre>");
    let binding = coordinator.bindings()[0].clone();

    window.click(binding.trigger());
    assert_eq!(count(&window, &format!(".{}", PREVIEW_CONTAINER_CLASS)), 1);
    let (container, wrapper, text) = binding
        .with_instance(|i| (i.container(), i.wrapper(), i.content_text(&window)))
        .unwrap();
    assert_eq!(text, "Hello");

    window.click(binding.trigger());
    assert!(!binding.is_active());
    assert!(window.document().has_class(wrapper, REMOVING_CLASS));
    assert!(window.document().is_connected(container));

    window.complete_animation(wrapper);
    assert!(!window.document().is_connected(container));
    assert_eq!(count(&window, &format!(".{}", PREVIEW_CONTAINER_CLASS)), 0);
}

#[test]
fn test_previews_are_independent() {
    let (mut window, coordinator) = started(
        "<pre><code>&lt;b&gt;one&lt;/b&gt;</code></pre><pre><code>&lt;i&gt;two&lt;/i&gt;</code></pre>",
    );
    let bindings = coordinator.bindings();
    window.click(bindings[0].trigger());
    window.click(bindings[1].trigger());
    assert_eq!(coordinator.active_previews(), 2);

    let first_zoom = bindings[0]
        .with_instance(|i| i.controls().button(ControlAction::ZoomIn))
        .flatten()
        .unwrap();
    window.click(first_zoom);

    assert!(approx(bindings[0].with_instance(|i| i.scale()).unwrap(), 1.2));
    assert!(approx(bindings[1].with_instance(|i| i.scale()).unwrap(), 1.0));

    window.click(bindings[0].trigger());
    assert_eq!(coordinator.active_previews(), 1);
    assert!(bindings[1].is_active());
}

#[test]
#[traced_test]
fn test_full_document_is_logged() {
    let (mut window, coordinator) = started(
        "<pre><code>&lt;!DOCTYPE html&gt;&lt;html&gt;&lt;body&gt;&lt;p&gt;Doc&lt;/p&gt;&lt;/body&gt;&lt;/html&gt;</code></pre>",
    );
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());
    assert!(logs_contain("rendering HTML document"));
    assert_eq!(binding.with_instance(|i| i.content_text(&window)).unwrap(), "Doc");
}

// Control tests
#[test]
fn test_zoom_in_then_out_then_reset() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;z&lt;/div&gt;</code></pre>");
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());

    let (zoom_in, zoom_out, reset, wrapper) = binding
        .with_instance(|i| {
            (
                i.controls().button(ControlAction::ZoomIn).unwrap(),
                i.controls().button(ControlAction::ZoomOut).unwrap(),
                i.controls().button(ControlAction::ResetZoom).unwrap(),
                i.wrapper(),
            )
        })
        .unwrap();

    window.click(zoom_in);
    window.click(zoom_out);
    assert!(approx(binding.with_instance(|i| i.scale()).unwrap(), 0.96));

    window.click(reset);
    assert!(approx(binding.with_instance(|i| i.scale()).unwrap(), 1.0));
    let doc = window.document();
    assert_eq!(doc.style(wrapper, "transform"), Some("scale(1)"));
    assert_eq!(doc.attribute(wrapper, SCALE_ATTRIBUTE), Some("1"));
}

#[test]
#[traced_test]
fn test_refused_fullscreen_leaves_wrapper_unchanged() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;f&lt;/div&gt;</code></pre>");
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());
    window.deny_fullscreen(Some("not allowed"));

    let (button, wrapper) = binding
        .with_instance(|i| (i.controls().button(ControlAction::ToggleFullscreen).unwrap(), i.wrapper()))
        .unwrap();
    window.click(button);

    let doc = window.document();
    assert!(!doc.has_class(wrapper, FULLSCREEN_CLASS));
    assert!(!doc.has_class(wrapper, FULLSCREEN_TRANSITION_CLASS));
    assert_eq!(binding.with_instance(|i| i.is_fullscreen()), Some(false));
    assert!(logs_contain("failed to enter fullscreen"));
}

// Teardown tests
#[test]
fn test_release_cancels_everything_once() {
    let mut window = page("");
    let outcome = IsolationRenderer::default().render(&mut window, "<div>t</div>");
    let RenderOutcome::Preview(instance) = outcome else {
        panic!("expected a preview");
    };
    let body = window.document().body();
    window.document_mut().append_child(body, instance.container()).unwrap();

    instance.apply(&mut window, ControlAction::ZoomIn).unwrap();
    instance.apply(&mut window, ControlAction::ZoomIn).unwrap();
    window.dispatch_event(&Event::pointer(
        EventKind::MouseDown,
        instance.resize_handle(),
        10.0,
        10.0,
    ));

    // 4 buttons, the resize handle, 2 pending zoom transitions and a live drag
    let listeners_before = window.listener_count();
    let summary = instance.release(&mut window);
    assert_eq!(
        summary,
        ReleaseSummary {
            frames: 1,
            listeners: 9,
            scripts: 0,
        }
    );
    assert_eq!(window.pending_frames(), 0);
    assert_eq!(window.listener_count(), listeners_before - 9);

    assert_eq!(instance.release(&mut window), ReleaseSummary::default());
}

#[test]
fn test_repeated_zoom_keeps_tracked_resources_bounded() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;z&lt;/div&gt;</code></pre>");
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());
    window.run_animation_frames();
    let (zoom_in, wrapper) = binding
        .with_instance(|i| (i.controls().button(ControlAction::ZoomIn).unwrap(), i.wrapper()))
        .unwrap();

    window.click(zoom_in);
    window.complete_transition(wrapper);
    let pending = binding.with_instance(|i| i.lifecycle().pending()).unwrap();
    let listeners = window.listener_count();

    for _ in 0..1000 {
        window.click(zoom_in);
        window.complete_transition(wrapper);
    }
    assert_eq!(binding.with_instance(|i| i.lifecycle().pending()), Some(pending));
    assert_eq!(window.listener_count(), listeners);
}

#[test]
fn test_stop_during_exit_animation_leaves_nothing_behind() {
    let (mut window, coordinator) = started("<pre><code>&lt;div&gt;x&lt;/div&gt;</code></pre>");
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());
    window.click(binding.trigger());
    assert_eq!(count(&window, &format!(".{}", PREVIEW_CONTAINER_CLASS)), 1);

    coordinator.stop(&mut window);
    assert_eq!(count(&window, &format!(".{}", PREVIEW_CONTAINER_CLASS)), 0);
    assert_eq!(window.listener_count(), 0);
}

#[test]
fn test_closing_a_fullscreen_preview_leaves_fullscreen() {
    let (mut window, coordinator) = started(
        "<pre><code>&lt;b&gt;one&lt;/b&gt;</code></pre><pre><code>&lt;i&gt;two&lt;/i&gt;</code></pre>",
    );
    let bindings = coordinator.bindings();
    for binding in &bindings {
        window.click(binding.trigger());
        let button = binding
            .with_instance(|i| i.controls().button(ControlAction::ToggleFullscreen).unwrap())
            .unwrap();
        window.click(button);
        let wrapper = binding.with_instance(|i| i.wrapper()).unwrap();
        assert_eq!(window.fullscreen_element(), Some(wrapper));

        window.click(binding.trigger());
        assert_eq!(window.fullscreen_element(), None);
    }

    window.click(bindings[0].trigger());
    let button = bindings[0]
        .with_instance(|i| i.controls().button(ControlAction::ToggleFullscreen).unwrap())
        .unwrap();
    window.click(button);
    coordinator.stop(&mut window);
    assert_eq!(window.fullscreen_element(), None);
}

// Script isolation tests
#[test]
fn test_script_globals_stay_in_their_preview() {
    let (mut window, coordinator) = started(
        "<pre><code>&lt;script&gt;window.__marker=1&lt;/script&gt;&lt;div&gt;x&lt;/div&gt;</code></pre>\
         <pre><code>&lt;div&gt;y&lt;/div&gt;</code></pre>",
    );
    let bindings = coordinator.bindings();
    window.click(bindings[0].trigger());
    window.click(bindings[1].trigger());

    assert_eq!(
        bindings[0].with_instance(|i| i.script_scope().global_number("__marker")),
        Some(Some(1.0))
    );
    assert_eq!(
        bindings[1].with_instance(|i| i.script_scope().is_defined("__marker")),
        Some(false)
    );
}

#[test]
fn test_scripts_reach_only_their_own_preview() {
    let (mut window, coordinator) = started(
        "<p id=\"host\">page</p>\
         <pre><code>&lt;div id=\"t\"&gt;before&lt;/div&gt;\
         &lt;script&gt;document.getElementById('t').textContent = 'after';\
         window.hostCount = document.getElementById('host') === null ? 0 : 1;\
         window.preCount = document.querySelectorAll('pre').length;&lt;/script&gt;</code></pre>",
    );
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());

    assert_eq!(binding.with_instance(|i| i.content_text(&window)).unwrap(), "after");
    assert_eq!(
        binding.with_instance(|i| i.script_scope().global_number("preCount")),
        Some(Some(0.0))
    );
    assert_eq!(
        binding.with_instance(|i| i.script_scope().global_number("hostCount")),
        Some(Some(0.0))
    );
    let doc = window.document();
    let host = doc.query_selector(doc.body(), "#host").unwrap().unwrap();
    assert_eq!(doc.text_content(host), "page");
}

#[test]
fn test_strip_policy_runs_no_scripts() {
    let mut window = page("<pre><code>&lt;script&gt;window.ran=1&lt;/script&gt;&lt;p&gt;s&lt;/p&gt;</code></pre>");
    let config = PreviewConfig {
        script_policy: ScriptPolicy::Strip,
        ..PreviewConfig::default()
    };
    let coordinator = install(&mut window, config).unwrap();
    let binding = coordinator.bindings()[0].clone();
    window.click(binding.trigger());

    let (ran, shadow) = binding
        .with_instance(|i| (i.script_scope().is_defined("ran"), i.shadow_root()))
        .unwrap();
    assert!(!ran);
    let doc = window.document();
    assert!(doc.query_selector_all(shadow, "script").unwrap().is_empty());
}

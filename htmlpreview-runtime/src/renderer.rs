//! Isolation renderer.
//!
//! Turns sanitized markup into a [`PreviewInstance`]: a host element with a
//! shadow root holding the user's styles, the preview chrome stylesheet and
//! the content node; scripts re-executed in a per-instance [`ScriptScope`]
//! whose `document` sees only this boundary; controls, resize handle and a
//! loading indicator on top.
//!
//! Rendering never fails outwardly. Anything that goes wrong becomes an
//! inline error element, see [`RenderOutcome::Failed`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use htmlpreview_markup::{extract_fragments, ExtractedFragment};

use crate::config::PreviewConfig;
use crate::controls::{install_controls, ControlContext, PresentationState, ZoomFactors};
use crate::dom::NodeId;
use crate::error::{PreviewError, RenderError};
use crate::lifecycle::{ResourceLifecycle, TrackedResource};
use crate::preview::PreviewInstance;
use crate::resize::install_resize_handle;
use crate::script::{wrap_isolated, ScriptLimits, ScriptScope};
use crate::window::Window;

pub const PREVIEW_CONTAINER_CLASS: &str = "preview-container";
pub const WRAPPER_CLASS: &str = "wrapper";
pub const LOADING_INDICATOR_CLASS: &str = "loading-indicator";
pub const ERROR_PLACEHOLDER_CLASS: &str = "preview-error";

const CONTAINER_FAILURE_MESSAGE: &str = "Failed to create preview container";

const LOADING_MARKUP: &str = r#"<div class="spinner"></div><span>Loading preview...</span>"#;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Stylesheet for the preview chrome, injected after the user's styles.
pub const CHROME_CSS: &str = r#"
@keyframes fadeIn {
    from { opacity: 0; transform: translateY(-10px); }
    to { opacity: 1; transform: translateY(0); }
}
@keyframes fadeOut {
    from { opacity: 1; transform: translateY(0); }
    to { opacity: 0; transform: translateY(-10px); }
}
@keyframes spin {
    to { transform: rotate(360deg); }
}
.wrapper {
    width: 100%;
    min-height: 200px;
    border: 1px solid #e5e7eb;
    border-radius: 0.375rem;
    padding: 1rem;
    background-color: #f9fafb;
    font-family: system-ui, -apple-system, sans-serif;
    color: #111827;
    position: relative;
    resize: both;
    overflow: auto;
    animation: fadeIn 0.3s ease-out;
    transition: transform 0.3s ease;
}
.wrapper.removing {
    animation: fadeOut 0.3s ease-out;
}
.control-buttons {
    position: absolute;
    top: 8px;
    left: 8px;
    display: flex;
    gap: 6px;
    z-index: 10;
}
.control-buttons button {
    width: 32px;
    height: 32px;
    padding: 6px;
    border: 1px solid #e5e7eb;
    background: white;
    border-radius: 4px;
    cursor: pointer;
    display: flex;
    align-items: center;
    justify-content: center;
    color: #64748b;
    transition: all 0.15s ease;
}
.control-buttons svg {
    width: 20px;
    height: 20px;
}
.fullscreen-transition {
    transition: all 0.3s ease-in-out;
}
.zoom-transition {
    transition: transform 0.3s ease-out;
}
.loading-indicator {
    position: absolute;
    top: 50%;
    left: 50%;
    transform: translate(-50%, -50%);
    display: flex;
    align-items: center;
    gap: 0.5rem;
    color: #6b7280;
}
.spinner {
    width: 20px;
    height: 20px;
    border: 2px solid #e5e7eb;
    border-top-color: #4f46e5;
    border-radius: 50%;
    animation: spin 1s linear infinite;
}
.resize-handle {
    position: absolute;
    bottom: 0;
    right: 0;
    width: 20px;
    height: 20px;
    cursor: se-resize;
    color: #9ca3af;
    opacity: 0.5;
}
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub factors: ZoomFactors,
    pub min_resize_px: f64,
    pub script_limits: ScriptLimits,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&PreviewConfig::default())
    }
}

impl From<&PreviewConfig> for RenderOptions {
    fn from(config: &PreviewConfig) -> Self {
        Self {
            factors: ZoomFactors {
                zoom_in: config.zoom_in_factor,
                zoom_out: config.zoom_out_factor,
            },
            min_resize_px: config.min_resize_px,
            script_limits: config.script_limits(),
        }
    }
}

#[derive(Debug)]
pub enum RenderOutcome {
    Preview(PreviewInstance),
    /// Inline error element shown in place of a preview.
    Failed { placeholder: NodeId, error: PreviewError },
}

impl RenderOutcome {
    /// The node to mount in the host document.
    pub fn root(&self) -> NodeId {
        match self {
            RenderOutcome::Preview(instance) => instance.container(),
            RenderOutcome::Failed { placeholder, .. } => *placeholder,
        }
    }

    pub fn instance(&self) -> Option<&PreviewInstance> {
        match self {
            RenderOutcome::Preview(instance) => Some(instance),
            RenderOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IsolationRenderer {
    options: RenderOptions,
}

impl IsolationRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Build a detached preview for `safe_markup`. The caller mounts
    /// [`RenderOutcome::root`] wherever it belongs.
    pub fn render(&self, window: &mut Window, safe_markup: &str) -> RenderOutcome {
        let lifecycle = ResourceLifecycle::new();
        match self.build(window, safe_markup, &lifecycle) {
            Ok(instance) => RenderOutcome::Preview(instance),
            Err(error) => {
                tracing::error!(error = %error, "preview container creation failed");
                // listeners wired before the failure must not outlive it
                lifecycle.release_all(window);
                self.failure(window, error.into())
            }
        }
    }

    /// Inline error element for a preview that could not be built.
    pub fn failure(&self, window: &mut Window, error: PreviewError) -> RenderOutcome {
        let placeholder = error_element(window, CONTAINER_FAILURE_MESSAGE);
        RenderOutcome::Failed { placeholder, error }
    }

    fn build(
        &self,
        window: &mut Window,
        safe_markup: &str,
        lifecycle: &ResourceLifecycle,
    ) -> Result<PreviewInstance, RenderError> {
        if safe_markup.trim().is_empty() {
            return Err(RenderError::InvalidContent);
        }
        let markup = extract_fragments(safe_markup)?;
        let label = format!("preview-{}", NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed));
        let scope = ScriptScope::new(label, self.options.script_limits)?;

        let doc = window.document_mut();
        let container = doc.create_element("div");
        doc.set_attribute(container, "class", PREVIEW_CONTAINER_CLASS)?;
        let shadow_root = doc.attach_shadow(container)?;

        for style in &markup.styles {
            append_style(window, shadow_root, &style.content)?;
        }
        append_style(window, shadow_root, CHROME_CSS)?;

        let doc = window.document_mut();
        let wrapper = doc.create_element("div");
        doc.set_attribute(wrapper, "class", WRAPPER_CLASS)?;
        doc.set_inner_html(wrapper, &markup.body_html)?;
        doc.append_child(shadow_root, wrapper)?;

        for script in &markup.scripts {
            run_script(window, shadow_root, &scope, lifecycle, script)?;
        }

        let state = Rc::new(RefCell::new(PresentationState::default()));
        let ctx = ControlContext {
            wrapper,
            state: Rc::clone(&state),
            lifecycle: lifecycle.clone(),
            factors: self.options.factors,
        };
        let controls = install_controls(window, &ctx)?;
        let resize_handle =
            install_resize_handle(window, wrapper, lifecycle, self.options.min_resize_px)?;

        let doc = window.document_mut();
        let loading_indicator = doc.create_element("div");
        doc.set_attribute(loading_indicator, "class", LOADING_INDICATOR_CLASS)?;
        doc.set_inner_html(loading_indicator, LOADING_MARKUP)?;
        doc.append_child(wrapper, loading_indicator)?;
        let frame = window.request_animation_frame(move |window| {
            window.document_mut().remove(loading_indicator);
        });
        lifecycle.register(window, TrackedResource::AnimationFrame(frame));

        tracing::debug!(
            scope = scope.label(),
            styles = markup.styles.len(),
            scripts = markup.scripts.len(),
            "rendered preview"
        );

        Ok(PreviewInstance {
            container,
            shadow_root,
            wrapper,
            controls,
            resize_handle,
            loading_indicator,
            state,
            lifecycle: lifecycle.clone(),
            factors: self.options.factors,
            scope,
        })
    }
}

fn append_style(window: &mut Window, parent: NodeId, css: &str) -> Result<(), RenderError> {
    let doc = window.document_mut();
    let node = doc.create_element("style");
    doc.set_text_content(node, css)?;
    doc.append_child(parent, node)?;
    Ok(())
}

/// Inject and run one script fragment. Non-classic types are skipped; a
/// fragment that fails to evaluate is logged and does not stop the others.
fn run_script(
    window: &mut Window,
    shadow_root: NodeId,
    scope: &ScriptScope,
    lifecycle: &ResourceLifecycle,
    script: &ExtractedFragment,
) -> Result<(), RenderError> {
    if !script.is_executable() {
        tracing::debug!(script_type = ?script.script_type, "skipping non-classic script");
        return Ok(());
    }

    let source = wrap_isolated(&script.content);
    let doc = window.document_mut();
    let node = doc.create_element("script");
    doc.set_text_content(node, &source)?;
    doc.append_child(shadow_root, node)?;
    lifecycle.register(window, TrackedResource::Script(node));

    if let Err(err) = scope.execute_in(window, shadow_root, &source) {
        tracing::warn!(scope = scope.label(), error = %err, "script fragment failed");
    }
    Ok(())
}

fn error_element(window: &mut Window, message: &str) -> NodeId {
    let doc = window.document_mut();
    let node = doc.create_element("div");
    let styled = doc
        .set_attribute(node, "class", ERROR_PLACEHOLDER_CLASS)
        .and_then(|_| doc.set_style(node, "padding", "1rem"))
        .and_then(|_| doc.set_style(node, "background-color", "#fee2e2"))
        .and_then(|_| doc.set_style(node, "border", "1px solid #ef4444"))
        .and_then(|_| doc.set_style(node, "border-radius", "0.375rem"))
        .and_then(|_| doc.set_style(node, "color", "#991b1b"))
        .and_then(|_| doc.set_text_content(node, &format!("Error: {}", message)));
    if let Err(err) = styled {
        tracing::warn!(error = %err, "error placeholder incomplete");
    }
    node
}

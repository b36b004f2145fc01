//! # HTML Preview runtime
//!
//! Host-facing half of the code-block preview pipeline: finds code blocks
//! that contain HTML, attaches a "Preview" trigger to each and, on
//! activation, renders the sanitized markup inside an isolated boundary
//! with zoom, fullscreen and resize controls.
//!
//! The page is modelled by a headless [`Window`] owning a [`Document`];
//! hosts drive it (clicks, frames, timers, load completion) and the preview
//! machinery reacts through the same listener, frame, timer and observer
//! services a browser would offer.
//!
//! ## Example
//! ```ignore
//! use htmlpreview_runtime::{install, PreviewConfig, Window};
//!
//! let mut window = Window::new();
//! let body = window.document().body();
//! window
//!     .document_mut()
//!     .set_inner_html(body, "<pre><code>&lt;div&gt;Hello&lt;/div&gt;</code></pre>")?;
//!
//! let coordinator = install(&mut window, PreviewConfig::default())?;
//! let binding = coordinator.bindings()[0].clone();
//! window.click(binding.trigger());
//! assert_eq!(coordinator.active_previews(), 1);
//! ```

pub mod binding;
mod bridge;
pub mod config;
pub mod controls;
pub mod discovery;
pub mod dom;
pub mod error;
pub mod lifecycle;
pub mod preview;
pub mod renderer;
pub mod resize;
pub mod script;
pub mod selector;
pub mod window;

use std::sync::Arc;

use htmlpreview_markup::AmmoniaSanitizer;

pub use binding::{CandidateBinding, PreviewPipeline, PreviewSlot};
pub use config::PreviewConfig;
pub use controls::{ControlAction, PresentationState};
pub use discovery::{Phase, PreviewCoordinator, SanitizerSlot, ScanReport, ScanState};
pub use dom::{Document, NodeId};
pub use error::{
    ConfigError, DomError, PlatformRequestError, PreviewError, RenderError, ScriptExecutionError,
    StartupError,
};
pub use lifecycle::{ReleaseSummary, ResourceLifecycle, TrackedResource};
pub use preview::PreviewInstance;
pub use renderer::{IsolationRenderer, RenderOptions, RenderOutcome};
pub use script::{ConsoleLevel, ConsoleLine, ScriptScope};
pub use selector::CompiledSelector;
pub use window::{Event, EventKind, ReadyState, Window};

/// Start a coordinator backed by the built-in sanitizer engine.
pub fn install(window: &mut Window, config: PreviewConfig) -> Result<PreviewCoordinator, StartupError> {
    let coordinator = PreviewCoordinator::new(config, SanitizerSlot::ready(Arc::new(AmmoniaSanitizer)));
    coordinator.start(window)?;
    Ok(coordinator)
}

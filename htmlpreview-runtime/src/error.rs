use htmlpreview_markup::{FragmentError, SanitizationError};
use thiserror::Error;

use crate::dom::NodeId;

pub type DomResult<T> = Result<T, DomError>;

/// Misuse of the host document tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Cannot insert {child} into {parent}")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("Element {0} already hosts a shadow root")]
    ShadowRootExists(NodeId),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Failure while building the isolation boundary for a preview.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Invalid HTML content")]
    InvalidContent,

    #[error("Fragment extraction failed: {0}")]
    Fragment(#[from] FragmentError),

    #[error("Boundary construction failed: {0}")]
    Dom(#[from] DomError),

    #[error("Script scope unavailable: {0}")]
    ScriptScope(#[from] ScriptExecutionError),
}

/// A re-executed script fragment, or the scope hosting it, failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptExecutionError {
    #[error("Script runtime init error: {0}")]
    Init(String),

    #[error("Script error in '{scope}': {message}")]
    Exception { scope: String, message: String },

    #[error("Script in '{scope}' timed out after {timeout_ms}ms")]
    Timeout { scope: String, timeout_ms: u64 },
}

/// A platform service refused a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformRequestError {
    #[error("Fullscreen request denied: {reason}")]
    FullscreenDenied { reason: String },

    #[error("Element {0} is not connected to the document")]
    NotConnected(NodeId),

    #[error("Document is not in fullscreen mode")]
    NotFullscreen,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Coordinator is already started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid candidate selector: {0}")]
    Selector(#[from] DomError),
}

/// Anything that can go wrong between a trigger click and a mounted preview.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreviewError {
    #[error(transparent)]
    Sanitization(#[from] SanitizationError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

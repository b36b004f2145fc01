//! # HTML Preview markup stage
//!
//! Host-independent half of the code-block preview pipeline.
//!
//! ## Features
//! - Heuristic detection of code blocks that contain HTML
//! - Sanitization through a pluggable engine with a fixed preview whitelist
//!   (structured graphics, inline styles, optionally scripts)
//! - Whole-document output so `<html>`/`<body>` snippets round-trip
//! - Extraction of style and script fragments in document order
//!
//! ## Example
//! ```ignore
//! use htmlpreview_markup::{extract_fragments, sanitize};
//!
//! let safe = sanitize("<style>p{color:red}</style><p onclick=\"x()\">Hi</p>")?;
//! let parts = extract_fragments(&safe)?;
//! assert_eq!(parts.styles.len(), 1);
//! assert_eq!(parts.body_html, "<p>Hi</p>");
//! ```

pub mod detect;
pub mod error;
pub mod fragment;
pub mod sanitize;

pub use detect::{looks_like_document, looks_like_html};
pub use error::{FragmentError, FragmentResult, SanitizationError, SanitizeResult};
pub use fragment::{
    extract_fragments, is_classic_script_type, ExtractedFragment, ExtractedMarkup, FragmentKind,
    DEFAULT_SCRIPT_TYPE,
};
pub use sanitize::{
    AmmoniaSanitizer, SanitizationAdapter, SanitizeOptions, Sanitizer, ScriptPolicy,
};

/// Sanitize with the default engine and the default preview configuration.
pub fn sanitize(raw_text: &str) -> SanitizeResult<String> {
    SanitizationAdapter::default().sanitize(raw_text)
}

/// Sanitize with the default engine under an explicit script policy.
pub fn sanitize_with_policy(raw_text: &str, policy: ScriptPolicy) -> SanitizeResult<String> {
    SanitizationAdapter::new(std::sync::Arc::new(AmmoniaSanitizer), policy).sanitize(raw_text)
}

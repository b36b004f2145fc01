//! Sanitization adapter.
//!
//! The HTML sanitizer itself is an external engine reached through the
//! [`Sanitizer`] trait. [`SanitizationAdapter`] pins the configuration used for
//! previews so every caller gets the same whitelist and output mode.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use crate::error::{SanitizationError, SanitizeResult};

/// Structured-graphics and raw-text elements allowed beyond the engine defaults.
/// `script` is added separately, depending on [`ScriptPolicy`].
pub const EXTRA_TAGS: &[&str] = &["svg", "circle", "rect", "path", "line", "style"];

pub const SCRIPT_TAG: &str = "script";

/// Elements removed together with their text, on top of the engine's own list.
const DROPPED_CONTENT_TAGS: &[&str] = &["title", "noscript"];

/// Geometry and styling attributes allowed on every element.
pub const EXTRA_ATTRIBUTES: &[&str] = &[
    "cx",
    "cy",
    "r",
    "x",
    "y",
    "x1",
    "y1",
    "x2",
    "y2",
    "d",
    "width",
    "height",
    "viewBox",
    "xmlns",
    "class",
    "id",
    "fill",
    "stroke",
    "stroke-width",
    "transform",
    "style",
];

/// Names that must not be claimed by `id`/`name` attributes when DOM
/// clobbering protection is on.
const CLOBBERABLE_NAMES: &[&str] = &[
    "alert",
    "attributes",
    "body",
    "cookie",
    "createelement",
    "defaultview",
    "document",
    "documentelement",
    "domain",
    "eval",
    "forms",
    "frames",
    "getelementbyid",
    "head",
    "images",
    "implementation",
    "links",
    "localstorage",
    "location",
    "opener",
    "parent",
    "queryselector",
    "scripts",
    "self",
    "sessionstorage",
    "settimeout",
    "submit",
    "top",
    "window",
    "write",
];

/// Whether `script` elements survive sanitization and run inside previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPolicy {
    /// Keep scripts; the renderer re-executes them in a per-preview scope.
    #[default]
    Execute,
    /// Drop scripts together with their content.
    Strip,
}

/// Options handed to the sanitizer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeOptions {
    /// Kept for contract parity; strings are already the trusted form here.
    pub return_trusted_type: bool,
    pub add_tags: Vec<String>,
    pub add_attr: Vec<String>,
    /// Leading `style` elements stay in the body instead of being hoisted.
    pub force_body: bool,
    /// Return a complete `<html>` document instead of a body fragment.
    pub whole_document: bool,
    /// Drop `id`/`name` values that would shadow document or window properties.
    pub sanitize_dom: bool,
}

impl SanitizeOptions {
    /// The fixed configuration used for previews.
    pub fn preview(policy: ScriptPolicy) -> Self {
        let mut add_tags: Vec<String> = EXTRA_TAGS.iter().map(|t| t.to_string()).collect();
        if policy == ScriptPolicy::Execute {
            add_tags.push(SCRIPT_TAG.to_string());
        }

        Self {
            return_trusted_type: true,
            add_tags,
            add_attr: EXTRA_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            force_body: true,
            whole_document: true,
            sanitize_dom: true,
        }
    }

    pub fn allows_tag(&self, tag: &str) -> bool {
        self.add_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self::preview(ScriptPolicy::default())
    }
}

/// Contract of the external sanitizer engine.
pub trait Sanitizer {
    fn sanitize(&self, text: &str, options: &SanitizeOptions) -> SanitizeResult<String>;
}

/// [`Sanitizer`] backed by `ammonia`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmmoniaSanitizer;

impl Sanitizer for AmmoniaSanitizer {
    fn sanitize(&self, text: &str, options: &SanitizeOptions) -> SanitizeResult<String> {
        if !options.whole_document {
            return Ok(clean_with_ammonia(text, options));
        }
        // An explicit head keeps its (cleaned) content; everything else is body.
        let cleaned = match split_document(text) {
            Some((head, body)) => wrap_document(
                &clean_with_ammonia(&head, options),
                &clean_with_ammonia(&body, options),
            ),
            None => wrap_document("", &clean_with_ammonia(text, options)),
        };
        Ok(cleaned)
    }
}

fn clean_with_ammonia(text: &str, options: &SanitizeOptions) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .strip_comments(true)
        .add_tags(&options.add_tags)
        .add_generic_attributes(&options.add_attr);

    // Raw-text elements that are whitelisted must not also be content-stripped.
    let raw_text_allowed: Vec<&str> = [SCRIPT_TAG, "style"]
        .into_iter()
        .filter(|tag| options.allows_tag(tag))
        .collect();
    builder
        .rm_clean_content_tags(&raw_text_allowed)
        .add_clean_content_tags(DROPPED_CONTENT_TAGS);

    if options.allows_tag(SCRIPT_TAG) {
        builder.add_tag_attributes(SCRIPT_TAG, &["type"]);
    }

    if options.sanitize_dom {
        builder.attribute_filter(|_element, attribute, value| {
            if matches!(attribute, "id" | "name") && is_clobbering_name(value) {
                None
            } else {
                Some(Cow::Borrowed(value))
            }
        });
    }

    builder.clean(text).to_string()
}

fn is_clobbering_name(value: &str) -> bool {
    let folded = value.trim().to_ascii_lowercase();
    CLOBBERABLE_NAMES.contains(&folded.as_str())
}

fn wrap_document(head: &str, body: &str) -> String {
    format!("<html><head>{}</head><body>{}</body></html>", head, body)
}

/// Head and body markup of `text`, if it declares its own `<head>`.
fn split_document(text: &str) -> Option<(String, String)> {
    static HEAD_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = HEAD_REGEX.get_or_init(|| Regex::new(r"(?i)<head[\s/>]").unwrap());
    if !re.is_match(text) {
        return None;
    }

    let document = Html::parse_document(text);
    let section = |name: &str| {
        document
            .root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == name)
            .map(|el| el.inner_html())
            .unwrap_or_default()
    };
    Some((section("head"), section("body")))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "sanitizer panicked".to_string()
    }
}

/// The sanitizer engine plus the fixed preview configuration.
#[derive(Clone)]
pub struct SanitizationAdapter {
    engine: Arc<dyn Sanitizer>,
    options: SanitizeOptions,
}

impl SanitizationAdapter {
    pub fn new(engine: Arc<dyn Sanitizer>, policy: ScriptPolicy) -> Self {
        Self::with_options(engine, SanitizeOptions::preview(policy))
    }

    pub fn with_options(engine: Arc<dyn Sanitizer>, options: SanitizeOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &SanitizeOptions {
        &self.options
    }

    /// Sanitize raw candidate text into markup that is safe to re-host.
    pub fn sanitize(&self, raw_text: &str) -> SanitizeResult<String> {
        if raw_text.trim().is_empty() {
            return Err(SanitizationError::EmptyInput);
        }
        // Engines may assert on inconsistent configuration; a panic is an engine failure.
        panic::catch_unwind(AssertUnwindSafe(|| self.engine.sanitize(raw_text, &self.options)))
            .map_err(|payload| SanitizationError::Engine(panic_message(payload.as_ref())))?
    }
}

impl Default for SanitizationAdapter {
    fn default() -> Self {
        Self::new(Arc::new(AmmoniaSanitizer), ScriptPolicy::default())
    }
}

impl std::fmt::Debug for SanitizationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanitizationAdapter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

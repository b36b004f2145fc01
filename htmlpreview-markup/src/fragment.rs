//! Fragment extraction.
//!
//! Sanitized markup is parsed into a detached document; every `style` and
//! `script` element is lifted out (in document order, per kind) so the
//! renderer can re-host them under their own rules, and whatever is left in
//! `body` becomes the visible content.

use scraper::{ElementRef, Html, Selector};

use crate::error::{FragmentError, FragmentResult};

/// Script type assumed when a `script` element declares none.
pub const DEFAULT_SCRIPT_TYPE: &str = "text/javascript";

/// MIME types that make a `script` element a classic, synchronously executed script.
const CLASSIC_SCRIPT_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Style,
    Script,
}

/// A style or script element lifted out of sanitized markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFragment {
    pub kind: FragmentKind,
    pub content: String,
    /// Declared type for scripts (defaulted), `None` for styles.
    pub script_type: Option<String>,
}

impl ExtractedFragment {
    pub fn style(content: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Style,
            content: content.into(),
            script_type: None,
        }
    }

    pub fn script(content: impl Into<String>, declared_type: Option<&str>) -> Self {
        let script_type = declared_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_SCRIPT_TYPE);
        Self {
            kind: FragmentKind::Script,
            content: content.into(),
            script_type: Some(script_type.to_string()),
        }
    }

    /// True for script fragments the renderer should execute.
    pub fn is_executable(&self) -> bool {
        match (self.kind, self.script_type.as_deref()) {
            (FragmentKind::Script, Some(ty)) => is_classic_script_type(ty),
            _ => false,
        }
    }
}

/// Whether a declared script type names classic JavaScript.
pub fn is_classic_script_type(declared: &str) -> bool {
    let folded = declared.trim().to_ascii_lowercase();
    folded.is_empty() || CLASSIC_SCRIPT_TYPES.contains(&folded.as_str())
}

/// Sanitized markup split into its re-hostable parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMarkup {
    pub styles: Vec<ExtractedFragment>,
    pub scripts: Vec<ExtractedFragment>,
    /// Inner markup of `body` after styles and scripts were removed.
    pub body_html: String,
}

impl ExtractedMarkup {
    pub fn executable_scripts(&self) -> impl Iterator<Item = &ExtractedFragment> {
        self.scripts.iter().filter(|s| s.is_executable())
    }
}

/// Parse `safe_markup` and lift out its style and script fragments.
pub fn extract_fragments(safe_markup: &str) -> FragmentResult<ExtractedMarkup> {
    if safe_markup.trim().is_empty() {
        return Err(FragmentError::EmptyMarkup);
    }

    let mut document = Html::parse_document(safe_markup);

    let styles = take_elements(&mut document, "style", |el| {
        ExtractedFragment::style(el.text().collect::<String>())
    })?;
    let scripts = take_elements(&mut document, "script", |el| {
        ExtractedFragment::script(el.text().collect::<String>(), el.value().attr("type"))
    })?;

    let body = parse_selector("body")?;
    let body_html = document
        .select(&body)
        .next()
        .map(|b| b.inner_html())
        .ok_or(FragmentError::MissingBody)?;

    Ok(ExtractedMarkup {
        styles,
        scripts,
        body_html,
    })
}

/// Collect every element matching `tag` in document order, then detach them all.
fn take_elements<F>(
    document: &mut Html,
    tag: &str,
    build: F,
) -> FragmentResult<Vec<ExtractedFragment>>
where
    F: Fn(ElementRef<'_>) -> ExtractedFragment,
{
    let selector = parse_selector(tag)?;
    let (ids, fragments): (Vec<_>, Vec<_>) = document
        .select(&selector)
        .map(|el| (el.id(), build(el)))
        .unzip();

    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    Ok(fragments)
}

fn parse_selector(selector: &str) -> FragmentResult<Selector> {
    Selector::parse(selector).map_err(|err| FragmentError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", err),
    })
}

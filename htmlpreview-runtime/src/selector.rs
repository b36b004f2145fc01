//! CSS selectors over the arena [`Document`].
//!
//! Parsing and matching are scraper's: the selector list is parsed with
//! scraper's `selectors` parser and matched by `selectors::matching`, with
//! [`ArenaElement`] standing in for scraper's `ElementRef`.

use cssparser::{Parser as CssParser, ParserInput};
use html5ever::Namespace;
use scraper::error::SelectorErrorKind;
use scraper::selector::{CssLocalName, CssString, NonTSPseudoClass, Parser, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::BloomFilter;
use selectors::matching::{
    self, ElementSelectorFlags, MatchingContext, MatchingForInvalidation, MatchingMode,
    NeedsSelectorFlags, QuirksMode, SelectorCaches,
};
use selectors::parser::ParseRelative;
use selectors::{Element, OpaqueElement, SelectorList};

use crate::dom::{Document, ElementData, NodeData, NodeId};
use crate::error::{DomError, DomResult};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// A parsed selector group (`a, b c, d > e`).
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    source: String,
    list: SelectorList<Simple>,
}

impl CompiledSelector {
    pub fn parse(selector: &str) -> DomResult<Self> {
        let mut input = ParserInput::new(selector);
        let mut parser = CssParser::new(&mut input);
        SelectorList::parse(&Parser, &mut parser, ParseRelative::No)
            .map(|list| Self {
                source: selector.to_string(),
                list,
            })
            .map_err(|err| DomError::InvalidSelector {
                selector: selector.to_string(),
                reason: SelectorErrorKind::from(err).to_string(),
            })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let mut caches = SelectorCaches::default();
        self.matches_with(doc, id, &mut caches)
    }

    /// Matching elements among the light-tree descendants of `scope`, in
    /// document order.
    pub fn select(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        let mut caches = SelectorCaches::default();
        doc.descendants(scope)
            .into_iter()
            .filter(|id| self.matches_with(doc, *id, &mut caches))
            .collect()
    }

    fn matches_with(&self, doc: &Document, id: NodeId, caches: &mut SelectorCaches) -> bool {
        let Some(element) = ArenaElement::wrap(doc, id) else {
            return false;
        };
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );
        matching::matches_selector_list(&self.list, &element, &mut context)
    }
}

/// An element node seen through the `selectors` tree interface.
#[derive(Clone, Copy)]
pub struct ArenaElement<'a> {
    doc: &'a Document,
    id: NodeId,
    data: &'a ElementData,
}

impl<'a> ArenaElement<'a> {
    pub fn wrap(doc: &'a Document, id: NodeId) -> Option<Self> {
        doc.element(id).map(|data| Self { doc, id, data })
    }

    fn siblings(&self) -> &'a [NodeId] {
        self.doc
            .parent(self.id)
            .map(|parent| self.doc.children(parent))
            .unwrap_or(&[])
    }

    fn position(&self) -> Option<usize> {
        self.siblings().iter().position(|id| *id == self.id)
    }
}

impl std::fmt::Debug for ArenaElement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}> {}", self.data.tag, self.id)
    }
}

impl<'a> Element for ArenaElement<'a> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self.data)
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc
            .parent(self.id)
            .and_then(|parent| ArenaElement::wrap(self.doc, parent))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        matches!(
            self.doc.parent(self.id).and_then(|p| self.doc.data(p)),
            Some(NodeData::ShadowRoot { .. })
        )
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        let siblings = self.siblings();
        let position = self.position()?;
        siblings[..position]
            .iter()
            .rev()
            .find_map(|id| ArenaElement::wrap(self.doc, *id))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        let siblings = self.siblings();
        let position = self.position()?;
        siblings[position + 1..]
            .iter()
            .find_map(|id| ArenaElement::wrap(self.doc, *id))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.doc
            .children(self.id)
            .iter()
            .find_map(|id| ArenaElement::wrap(self.doc, *id))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, name: &CssLocalName) -> bool {
        self.data.tag == *name.0
    }

    fn has_namespace(&self, namespace: &Namespace) -> bool {
        &**namespace == HTML_NAMESPACE
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.data.tag == other.data.tag
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Namespace>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if matches!(*ns, NamespaceConstraint::Specific(url) if !url.is_empty()) {
            return false;
        }
        self.data
            .attributes()
            .iter()
            .any(|(name, value)| *name == *local_name.0 && operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        _pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        false
    }

    fn match_pseudo_element(
        &self,
        _pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        false
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        matches!(self.data.tag.as_str(), "a" | "area") && self.doc.attribute(self.id, "href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        self.data.tag == "slot"
    }

    fn has_id(&self, id: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .attribute(self.id, "id")
            .is_some_and(|value| case_sensitivity.eq(id.0.as_bytes(), value.as_bytes()))
    }

    fn has_class(&self, name: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .class_list(self.id)
            .iter()
            .any(|class| case_sensitivity.eq(name.0.as_bytes(), class.as_bytes()))
    }

    fn has_custom_state(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn imported_part(&self, _name: &CssLocalName) -> Option<CssLocalName> {
        None
    }

    fn is_part(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        !self.doc.children(self.id).iter().any(|child| match self.doc.data(*child) {
            Some(NodeData::Element(_)) => true,
            Some(NodeData::Text(text)) => !text.is_empty(),
            _ => false,
        })
    }

    fn is_root(&self) -> bool {
        matches!(
            self.doc.parent(self.id).and_then(|p| self.doc.data(p)),
            Some(NodeData::Document)
        )
    }

    fn add_element_unique_hashes(&self, _filter: &mut BloomFilter) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn page(markup: &str) -> Document {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, markup).unwrap();
        doc
    }

    fn count(doc: &Document, selector: &str) -> usize {
        CompiledSelector::parse(selector)
            .unwrap()
            .select(doc, doc.root())
            .len()
    }

    #[test]
    fn test_combinators() {
        let doc = page(
            "<div class=\"chat\"><pre id=\"a\"><code>x</code></pre></div>\
             <pre><span><code>y</code></span></pre><p>z</p><pre class=\"code-block\">w</pre>",
        );
        assert_eq!(count(&doc, "pre code"), 2);
        assert_eq!(count(&doc, "pre > code"), 1);
        assert_eq!(count(&doc, "div > pre"), 1);
        assert_eq!(count(&doc, "p + pre"), 1);
        assert_eq!(count(&doc, "div ~ pre"), 2);
        assert_eq!(count(&doc, "pre:first-child"), 1);
        assert_eq!(count(&doc, "pre:not(.code-block)"), 2);
    }

    #[test]
    fn test_attribute_and_id_selectors() {
        let doc = page("<pre id=\"a\" data-lang=\"html\">x</pre><pre data-lang=\"css\">y</pre>");
        assert_eq!(count(&doc, "[data-lang]"), 2);
        assert_eq!(count(&doc, "[data-lang=html]"), 1);
        assert_eq!(count(&doc, "[data-lang^=c]"), 1);
        assert_eq!(count(&doc, "pre#a"), 1);
        assert_eq!(count(&doc, "#missing"), 0);
    }

    #[test]
    fn test_invalid_selectors_are_errors() {
        for selector in ["pre >> code", "pre,", "[data-x]é", "é[", ">"] {
            assert!(
                matches!(
                    CompiledSelector::parse(selector),
                    Err(DomError::InvalidSelector { .. })
                ),
                "{} should be rejected",
                selector
            );
        }
    }

    #[test]
    fn test_non_ascii_names() {
        let doc = page("<p class=\"café\">x</p>");
        assert_eq!(count(&doc, ".café"), 1);
    }

    #[test]
    fn test_matching_stops_at_shadow_root() {
        let mut doc = page("<div class=\"host\"></div>");
        let host = doc.query_selector(doc.body(), ".host").unwrap().unwrap();
        let shadow = doc.attach_shadow(host).unwrap();
        let p = doc.create_element("p");
        doc.append_child(shadow, p).unwrap();

        let nested = CompiledSelector::parse(".host p").unwrap();
        assert!(!nested.matches(&doc, p));
        let plain = CompiledSelector::parse("p").unwrap();
        assert_eq!(plain.select(&doc, shadow), vec![p]);
    }
}

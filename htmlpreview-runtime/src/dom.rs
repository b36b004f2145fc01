//! Headless host document.
//!
//! An arena tree standing in for the page the previews are attached to.
//! Nodes are addressed by [`NodeId`] and never reused, so a stale id simply
//! stops resolving once the arena is dropped. Shadow roots hang off their
//! host element rather than its child list: light-tree traversal (selectors,
//! `text_content`, serialization) never crosses into them.

use std::fmt;

use scraper::{ElementRef, Html, Node as HtmlNode};

use crate::error::{DomError, DomResult};
use crate::selector::CompiledSelector;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are serialized verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the owning arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementData {
    pub tag: String,
    attributes: Vec<(String, String)>,
    styles: Vec<(String, String)>,
    shadow_root: Option<NodeId>,
}

impl ElementData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn styles(&self) -> &[(String, String)] {
        &self.styles
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    /// Root of an encapsulated subtree; `host` is the element it is attached to.
    ShadowRoot { host: NodeId },
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Child-list change on `target`, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    record_mutations: bool,
    mutations: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty `<html><head></head><body></body></html>` document.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            html: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            record_mutations: false,
            mutations: Vec::new(),
        };
        doc.html = doc.create_element("html");
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        doc.link(doc.root, doc.html);
        doc.link(doc.html, doc.head);
        doc.link(doc.html, doc.body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    // --- construction ---

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(ElementData::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    // --- lookups ---

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.nodes.get(id.0).ok_or(DomError::UnknownNode(id))
    }

    pub fn exists(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Id of the node at arena position `index`, if there is one.
    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        (index < self.nodes.len()).then_some(NodeId(index))
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id) {
            Some(NodeData::Element(el)) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> DomResult<&mut ElementData> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Ok(el),
            Some(_) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Inclusive light-tree containment.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// True when `node` reaches the document root, hopping from shadow roots
    /// to their hosts.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match (self.parent(current), self.data(current)) {
                (Some(parent), _) => current = parent,
                (None, Some(NodeData::ShadowRoot { host })) => current = *host,
                _ => return false,
            }
        }
    }

    /// Preorder light-tree descendants of `scope`, excluding `scope` itself.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    /// Nearest inclusive ancestor element with the given tag.
    pub fn closest(&self, node: NodeId, tag: &str) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.tag_name(id).is_some_and(|t| t.eq_ignore_ascii_case(tag)) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    // --- tree mutation ---

    /// Append `child` to `parent`, detaching it from any previous parent first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let parent_ok = matches!(
            self.node(parent)?.data,
            NodeData::Document | NodeData::Element(_) | NodeData::ShadowRoot { .. }
        );
        let child_ok = matches!(
            self.node(child)?.data,
            NodeData::Element(_) | NodeData::Text(_)
        );
        if !parent_ok || !child_ok || self.contains(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }

        self.remove(child);
        self.link(parent, child);
        self.record(parent, vec![child], Vec::new());
        Ok(())
    }

    /// Detach `node` from its parent. Returns false if it had none.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.parent(node) else {
            return false;
        };
        self.nodes[parent.0].children.retain(|c| *c != node);
        self.nodes[node.0].parent = None;
        self.record(parent, Vec::new(), vec![node]);
        true
    }

    fn clear_children(&mut self, node: NodeId) -> DomResult<()> {
        let removed = match self.nodes.get_mut(node.0) {
            Some(n) => std::mem::take(&mut n.children),
            None => return Err(DomError::UnknownNode(node)),
        };
        for child in &removed {
            self.nodes[child.0].parent = None;
        }
        if !removed.is_empty() {
            self.record(node, Vec::new(), removed);
        }
        Ok(())
    }

    // --- shadow roots ---

    pub fn attach_shadow(&mut self, host: NodeId) -> DomResult<NodeId> {
        if self.element_mut(host)?.shadow_root.is_some() {
            return Err(DomError::ShadowRootExists(host));
        }
        let root = self.push(NodeData::ShadowRoot { host });
        self.element_mut(host)?.shadow_root = Some(root);
        Ok(root)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.element(host).and_then(|el| el.shadow_root)
    }

    pub fn shadow_host(&self, root: NodeId) -> Option<NodeId> {
        match self.data(root) {
            Some(NodeData::ShadowRoot { host }) => Some(*host),
            _ => None,
        }
    }

    // --- attributes, classes, inline styles ---

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        let el = self.element_mut(id)?;
        match el.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => el.attributes.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> DomResult<bool> {
        let el = self.element_mut(id)?;
        let before = el.attributes.len();
        el.attributes.retain(|(k, _)| k != name);
        Ok(el.attributes.len() != before)
    }

    pub fn class_list(&self, id: NodeId) -> Vec<&str> {
        self.attribute(id, "class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.class_list(id).contains(&class)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) -> DomResult<()> {
        if self.has_class(id, class) {
            // still validates the id
            self.element_mut(id)?;
            return Ok(());
        }
        let mut classes: Vec<String> = self.class_list(id).into_iter().map(String::from).collect();
        classes.push(class.to_string());
        self.set_attribute(id, "class", &classes.join(" "))
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) -> DomResult<()> {
        let classes: Vec<String> = self
            .class_list(id)
            .into_iter()
            .filter(|c| *c != class)
            .map(String::from)
            .collect();
        self.set_attribute(id, "class", &classes.join(" "))
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.element(id)?
            .styles
            .iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) -> DomResult<()> {
        let el = self.element_mut(id)?;
        match el.styles.iter_mut().find(|(k, _)| k == property) {
            Some(slot) => slot.1 = value.to_string(),
            None => el.styles.push((property.to_string(), value.to_string())),
        }
        Ok(())
    }

    // --- text and markup ---

    /// Concatenated light-tree text below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(NodeData::Text(t)) = self.data(id) {
            out.push_str(t);
        }
        for d in self.descendants(id) {
            if let Some(NodeData::Text(t)) = self.data(d) {
                out.push_str(t);
            }
        }
        out
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> DomResult<()> {
        self.clear_children(id)?;
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node)?;
        }
        Ok(())
    }

    /// Replace the children of `id` with parsed `markup`.
    pub fn set_inner_html(&mut self, id: NodeId, markup: &str) -> DomResult<()> {
        self.node(id)?;
        self.clear_children(id)?;
        let fragment = Html::parse_fragment(markup);
        self.import_children(id, fragment.root_element())
    }

    fn import_children(&mut self, parent: NodeId, source: ElementRef<'_>) -> DomResult<()> {
        for child in source.children() {
            match child.value() {
                HtmlNode::Text(text) => {
                    let id = self.create_text(text);
                    self.append_child(parent, id)?;
                }
                HtmlNode::Element(el) => {
                    let id = self.create_element(el.name());
                    for (name, value) in el.attrs() {
                        if name == "style" {
                            self.apply_style_text(id, value)?;
                        }
                        self.set_attribute(id, name, value)?;
                    }
                    self.append_child(parent, id)?;
                    if let Some(element) = ElementRef::wrap(child) {
                        self.import_children(id, element)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_style_text(&mut self, id: NodeId, css: &str) -> DomResult<()> {
        for decl in css.split(';') {
            if let Some((prop, value)) = decl.split_once(':') {
                let prop = prop.trim();
                if !prop.is_empty() {
                    self.set_style(id, prop, value.trim())?;
                }
            }
        }
        Ok(())
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.serialize(*child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize(id, &mut out);
        out
    }

    fn serialize(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => {
                let raw = self
                    .parent(id)
                    .and_then(|p| self.tag_name(p))
                    .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t));
                if raw {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            Some(NodeData::Element(el)) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attributes {
                    if name == "style" && !el.styles.is_empty() {
                        continue;
                    }
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
                }
                if !el.styles.is_empty() {
                    let css: Vec<String> = el
                        .styles
                        .iter()
                        .map(|(k, v)| format!("{}: {};", k, v))
                        .collect();
                    out.push_str(&format!(" style=\"{}\"", escape_attribute(&css.join(" "))));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                for child in self.children(id) {
                    self.serialize(*child, out);
                }
                out.push_str(&format!("</{}>", el.tag));
            }
            Some(NodeData::Document) | Some(NodeData::ShadowRoot { .. }) => {
                for child in self.children(id) {
                    self.serialize(*child, out);
                }
            }
            None => {}
        }
    }

    // --- selectors ---

    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> DomResult<Vec<NodeId>> {
        Ok(CompiledSelector::parse(selector)?.select(self, scope))
    }

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> DomResult<Option<NodeId>> {
        Ok(self.query_selector_all(scope, selector)?.into_iter().next())
    }

    /// Whether `id` matches `selector`.
    pub fn matches(&self, id: NodeId, selector: &str) -> DomResult<bool> {
        Ok(CompiledSelector::parse(selector)?.matches(self, id))
    }

    // --- mutation log ---

    pub fn set_mutation_recording(&mut self, enabled: bool) {
        self.record_mutations = enabled;
        if !enabled {
            self.mutations.clear();
        }
    }

    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.mutations.is_empty()
    }

    fn record(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        if self.record_mutations {
            self.mutations.push(MutationRecord {
                target,
                added,
                removed,
            });
        }
    }
}

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

//! Document access for preview scripts.
//!
//! While a [`ScriptScope`](crate::script::ScriptScope) executes, the host
//! [`Document`] is lent to it and scripts reach it through a small `document`
//! shim. Every lookup resolves inside the preview's boundary only, plus the
//! elements the scope created itself; host nodes are never handed out.
//!
//! Node handles cross into JavaScript as arena indices. The shim in
//! [`DOM_PRELUDE`] wraps them in element objects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rquickjs::{Ctx, Function, Object};

use crate::dom::{Document, NodeData, NodeId};
use crate::selector::CompiledSelector;

pub(crate) const NATIVE_DOM: &str = "__preview_dom";

/// Handle scripts pass to mean "the boundary itself".
const BOUNDARY_HANDLE: i32 = -1;

pub(crate) const DOM_PRELUDE: &str = r#"
(function (global) {
  var native = global.__preview_dom;
  delete global.__preview_dom;
  var BOUNDARY = -1;
  var known = {};

  function wrap(handle) {
    if (handle === undefined || handle === null || handle < 0) {
      return null;
    }
    if (!known[handle]) {
      known[handle] = new PreviewElement(handle);
    }
    return known[handle];
  }
  function orNull(value) {
    return value === undefined || value === null ? null : value;
  }
  function kebab(name) {
    return name.replace(/[A-Z]/g, function (c) { return '-' + c.toLowerCase(); });
  }
  function select(scope, selector, all) {
    var handles = native.query(scope, String(selector));
    if (handles === undefined || handles === null) {
      throw new SyntaxError("'" + selector + "' is not a valid selector");
    }
    if (all) {
      return handles.map(wrap);
    }
    return handles.length ? wrap(handles[0]) : null;
  }
  function reflect(attribute) {
    return {
      get: function () { return orNull(native.getAttribute(this.__handle, attribute)) || ''; },
      set: function (value) { native.setAttribute(this.__handle, attribute, String(value)); }
    };
  }

  function PreviewElement(handle) {
    Object.defineProperty(this, '__handle', { value: handle });
    this.style = new Proxy({}, {
      get: function (_, property) {
        if (typeof property !== 'string') {
          return undefined;
        }
        return orNull(native.getStyle(handle, kebab(property))) || '';
      },
      set: function (_, property, value) {
        native.setStyle(handle, kebab(String(property)), String(value));
        return true;
      }
    });
  }

  Object.defineProperties(PreviewElement.prototype, {
    tagName: { get: function () { return orNull(native.tagName(this.__handle)); } },
    id: reflect('id'),
    className: reflect('class'),
    textContent: {
      get: function () { return orNull(native.getText(this.__handle)); },
      set: function (value) { native.setText(this.__handle, value == null ? '' : String(value)); }
    },
    innerHTML: {
      get: function () { return orNull(native.getHtml(this.__handle)) || ''; },
      set: function (value) { native.setHtml(this.__handle, value == null ? '' : String(value)); }
    },
    parentElement: { get: function () { return wrap(native.parent(this.__handle)); } },
    children: { get: function () { return native.children(this.__handle).map(wrap); } }
  });

  PreviewElement.prototype.getAttribute = function (name) {
    return orNull(native.getAttribute(this.__handle, String(name)));
  };
  PreviewElement.prototype.hasAttribute = function (name) {
    return this.getAttribute(name) !== null;
  };
  PreviewElement.prototype.setAttribute = function (name, value) {
    native.setAttribute(this.__handle, String(name), String(value));
  };
  PreviewElement.prototype.removeAttribute = function (name) {
    native.removeAttribute(this.__handle, String(name));
  };
  PreviewElement.prototype.querySelector = function (selector) {
    return select(this.__handle, selector, false);
  };
  PreviewElement.prototype.querySelectorAll = function (selector) {
    return select(this.__handle, selector, true);
  };
  PreviewElement.prototype.appendChild = function (child) {
    if (!(child instanceof PreviewElement) || !native.append(this.__handle, child.__handle)) {
      throw new TypeError('appendChild: the node cannot be inserted here');
    }
    return child;
  };
  PreviewElement.prototype.remove = function () {
    native.remove(this.__handle);
  };
  // Preview scripts do not receive events.
  PreviewElement.prototype.addEventListener = function () {};
  PreviewElement.prototype.removeEventListener = function () {};

  global.document = {
    getElementById: function (id) { return wrap(native.byId(String(id))); },
    querySelector: function (selector) { return select(BOUNDARY, selector, false); },
    querySelectorAll: function (selector) { return select(BOUNDARY, selector, true); },
    createElement: function (tag) {
      var handle = native.create(String(tag));
      if (handle === undefined || handle === null) {
        throw new SyntaxError("'" + tag + "' is not a valid tag name");
      }
      return wrap(handle);
    },
    addEventListener: function () {},
    removeEventListener: function () {}
  };
})(globalThis);
"#;

#[derive(Debug, Default)]
struct DomState {
    /// The host document and the boundary scripts are confined to, while lent.
    lent: Option<(Document, NodeId)>,
    created: HashSet<NodeId>,
}

impl DomState {
    fn doc(&self) -> Option<&Document> {
        self.lent.as_ref().map(|(doc, _)| doc)
    }

    fn doc_mut(&mut self) -> Option<&mut Document> {
        self.lent.as_mut().map(|(doc, _)| doc)
    }

    /// The node behind `handle` if this scope may touch it.
    fn resolve(&self, handle: i32) -> Option<NodeId> {
        let (doc, boundary) = self.lent.as_ref()?;
        if handle == BOUNDARY_HANDLE {
            return Some(*boundary);
        }
        let id = doc.node_at(usize::try_from(handle).ok()?)?;
        (doc.contains(*boundary, id) || self.created.contains(&id)).then_some(id)
    }

    /// Like [`resolve`](Self::resolve), but never the boundary itself.
    fn resolve_element(&self, handle: i32) -> Option<NodeId> {
        let id = self.resolve(handle)?;
        self.doc()?.element(id).map(|_| id)
    }

    fn query(&self, scope: i32, selector: &str) -> Option<Vec<i32>> {
        let compiled = CompiledSelector::parse(selector).ok()?;
        let Some(scope) = self.resolve(scope) else {
            return Some(Vec::new());
        };
        let doc = self.doc()?;
        Some(compiled.select(doc, scope).into_iter().map(to_handle).collect())
    }

    fn by_id(&self, wanted: &str) -> Option<i32> {
        let (doc, boundary) = self.lent.as_ref()?;
        doc.descendants(*boundary)
            .into_iter()
            .find(|id| doc.attribute(*id, "id") == Some(wanted))
            .map(to_handle)
    }

    fn tag_name(&self, handle: i32) -> Option<String> {
        let id = self.resolve_element(handle)?;
        self.doc()?.tag_name(id).map(|tag| tag.to_ascii_uppercase())
    }

    fn text(&self, handle: i32) -> Option<String> {
        let id = self.resolve_element(handle)?;
        Some(self.doc()?.text_content(id))
    }

    fn set_text(&mut self, handle: i32, text: &str) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.set_text_content(id, text).is_ok())
    }

    fn html(&self, handle: i32) -> Option<String> {
        let id = self.resolve_element(handle)?;
        Some(self.doc()?.inner_html(id))
    }

    fn set_html(&mut self, handle: i32, markup: &str) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.set_inner_html(id, markup).is_ok())
    }

    fn attribute(&self, handle: i32, name: &str) -> Option<String> {
        let id = self.resolve_element(handle)?;
        self.doc()?.attribute(id, name).map(String::from)
    }

    fn set_attribute(&mut self, handle: i32, name: &str, value: &str) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.set_attribute(id, name, value).is_ok())
    }

    fn remove_attribute(&mut self, handle: i32, name: &str) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.remove_attribute(id, name).unwrap_or(false))
    }

    fn style(&self, handle: i32, property: &str) -> Option<String> {
        let id = self.resolve_element(handle)?;
        self.doc()?.style(id, property).map(String::from)
    }

    fn set_style(&mut self, handle: i32, property: &str, value: &str) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.set_style(id, property, value).is_ok())
    }

    fn create(&mut self, tag: &str) -> Option<i32> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        let id = self.doc_mut()?.create_element(tag);
        self.created.insert(id);
        Some(to_handle(id))
    }

    fn append(&mut self, parent: i32, child: i32) -> bool {
        let (Some(parent), Some(child)) = (self.resolve(parent), self.resolve_element(child)) else {
            return false;
        };
        self.doc_mut()
            .is_some_and(|doc| doc.append_child(parent, child).is_ok())
    }

    fn remove(&mut self, handle: i32) -> bool {
        let Some(id) = self.resolve_element(handle) else {
            return false;
        };
        self.doc_mut().is_some_and(|doc| doc.remove(id))
    }

    fn parent(&self, handle: i32) -> Option<i32> {
        let id = self.resolve_element(handle)?;
        let parent = self.doc()?.parent(id)?;
        self.resolve_element(to_handle(parent)).map(to_handle)
    }

    fn children(&self, handle: i32) -> Vec<i32> {
        let (Some(id), Some(doc)) = (self.resolve(handle), self.doc()) else {
            return Vec::new();
        };
        doc.children(id)
            .iter()
            .filter(|child| matches!(doc.data(**child), Some(NodeData::Element(_))))
            .map(|child| to_handle(*child))
            .collect()
    }
}

fn to_handle(id: NodeId) -> i32 {
    i32::try_from(id.index()).unwrap_or(i32::MIN)
}

/// Shared between a scope and the native functions installed in its context.
#[derive(Debug, Clone, Default)]
pub(crate) struct DocumentBridge {
    state: Arc<Mutex<DomState>>,
}

impl DocumentBridge {
    fn lock(&self) -> MutexGuard<'_, DomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lend(&self, doc: Document, boundary: NodeId) {
        self.lock().lent = Some((doc, boundary));
    }

    pub(crate) fn reclaim(&self) -> Option<Document> {
        self.lock().lent.take().map(|(doc, _)| doc)
    }

    /// Expose the native half of the shim as `__preview_dom`; [`DOM_PRELUDE`]
    /// picks it up and removes it from the global object.
    pub(crate) fn install(&self, ctx: &Ctx<'_>) -> rquickjs::Result<()> {
        let dom = Object::new(ctx.clone())?;

        let b = self.clone();
        dom.set(
            "query",
            Function::new(ctx.clone(), move |scope: i32, selector: String| {
                b.lock().query(scope, &selector)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "byId",
            Function::new(ctx.clone(), move |id: String| b.lock().by_id(&id))?,
        )?;
        let b = self.clone();
        dom.set(
            "tagName",
            Function::new(ctx.clone(), move |node: i32| b.lock().tag_name(node))?,
        )?;
        let b = self.clone();
        dom.set(
            "getText",
            Function::new(ctx.clone(), move |node: i32| b.lock().text(node))?,
        )?;
        let b = self.clone();
        dom.set(
            "setText",
            Function::new(ctx.clone(), move |node: i32, text: String| {
                b.lock().set_text(node, &text)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "getHtml",
            Function::new(ctx.clone(), move |node: i32| b.lock().html(node))?,
        )?;
        let b = self.clone();
        dom.set(
            "setHtml",
            Function::new(ctx.clone(), move |node: i32, markup: String| {
                b.lock().set_html(node, &markup)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "getAttribute",
            Function::new(ctx.clone(), move |node: i32, name: String| {
                b.lock().attribute(node, &name)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "setAttribute",
            Function::new(ctx.clone(), move |node: i32, name: String, value: String| {
                b.lock().set_attribute(node, &name, &value)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "removeAttribute",
            Function::new(ctx.clone(), move |node: i32, name: String| {
                b.lock().remove_attribute(node, &name)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "getStyle",
            Function::new(ctx.clone(), move |node: i32, property: String| {
                b.lock().style(node, &property)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "setStyle",
            Function::new(ctx.clone(), move |node: i32, property: String, value: String| {
                b.lock().set_style(node, &property, &value)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "create",
            Function::new(ctx.clone(), move |tag: String| b.lock().create(&tag))?,
        )?;
        let b = self.clone();
        dom.set(
            "append",
            Function::new(ctx.clone(), move |parent: i32, child: i32| {
                b.lock().append(parent, child)
            })?,
        )?;
        let b = self.clone();
        dom.set(
            "remove",
            Function::new(ctx.clone(), move |node: i32| b.lock().remove(node))?,
        )?;
        let b = self.clone();
        dom.set(
            "parent",
            Function::new(ctx.clone(), move |node: i32| b.lock().parent(node))?,
        )?;
        let b = self.clone();
        dom.set(
            "children",
            Function::new(ctx.clone(), move |node: i32| b.lock().children(node))?,
        )?;

        ctx.globals().set(NATIVE_DOM, dom)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lent(markup: &str) -> (DomState, NodeId) {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, "<p id=\"host\">host</p><div class=\"boundary\"></div>")
            .unwrap();
        let host = doc.query_selector(body, ".boundary").unwrap().unwrap();
        let shadow = doc.attach_shadow(host).unwrap();
        let inner = doc.create_element("div");
        doc.set_inner_html(inner, markup).unwrap();
        doc.append_child(shadow, inner).unwrap();
        let state = DomState {
            lent: Some((doc, shadow)),
            created: HashSet::new(),
        };
        (state, shadow)
    }

    #[test]
    fn test_lookups_stay_inside_the_boundary() {
        let (state, _) = lent("<p id=\"inner\">x</p>");
        assert_eq!(state.by_id("host"), None);
        assert!(state.by_id("inner").is_some());
        assert_eq!(state.query(BOUNDARY_HANDLE, "p").map(|v| v.len()), Some(1));
        assert_eq!(state.query(BOUNDARY_HANDLE, "["), None);

        let doc = state.doc().unwrap();
        let host_p = doc.query_selector(doc.body(), "#host").unwrap().unwrap();
        assert_eq!(state.text(to_handle(host_p)), None);
        assert_eq!(state.query(to_handle(host_p), "*"), Some(Vec::new()));
    }

    #[test]
    fn test_created_elements_are_reachable() {
        let (mut state, _) = lent("<div id=\"target\"></div>");
        let span = state.create("span").unwrap();
        assert!(state.set_text(span, "made"));
        let target = state.by_id("target").unwrap();
        assert!(state.append(target, span));
        assert_eq!(state.text(target).as_deref(), Some("made"));
        assert_eq!(state.parent(span), Some(target));
        assert_eq!(state.create("bad tag"), None);
    }

    #[test]
    fn test_host_nodes_cannot_be_moved_in() {
        let (mut state, _) = lent("<div id=\"target\"></div>");
        let doc = state.doc().unwrap();
        let host_p = to_handle(doc.query_selector(doc.body(), "#host").unwrap().unwrap());
        let target = state.by_id("target").unwrap();
        assert!(!state.append(target, host_p));
        assert!(!state.set_attribute(host_p, "class", "owned"));
        assert!(!state.remove(host_p));
    }

    #[test]
    fn test_nothing_resolves_while_not_lent() {
        let state = DomState::default();
        assert_eq!(state.resolve(BOUNDARY_HANDLE), None);
        assert_eq!(state.by_id("x"), None);
        assert!(state.children(BOUNDARY_HANDLE).is_empty());
    }
}

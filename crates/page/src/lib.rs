//! In-memory UI tree: elements, selector queries, listeners and bubbling
//! event dispatch. Controllers see it through [`UiTree`].

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use serde_json::Value;
use shared::{
    domain::NodeId,
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{bubbles, Connection, Event, EventHandler, Hook},
};
use tracing::debug;

pub mod selector;

pub use selector::SelectorList;

const DOCUMENT_TAG: &str = "#document";

/// Tree capability consumed by controllers and the controller registry.
pub trait UiTree {
    fn root(&self) -> NodeId;

    /// True when `node` is attached, through its ancestors, to the root.
    fn is_connected(&self, node: NodeId) -> bool;

    /// Elements under `root` (or the whole document) matching `selector`, in
    /// document order. `root` itself is never part of the result.
    fn query(&self, selector: &str, root: Option<NodeId>) -> FrameworkResult<Vec<NodeId>>;

    /// Tests `node` against `selector`, optionally walking its ancestors, and
    /// returns the first match. The walk stops before `root`.
    fn query_match(
        &self,
        node: NodeId,
        selector: &str,
        root: Option<NodeId>,
        walk_ancestors: bool,
    ) -> FrameworkResult<Option<NodeId>>;

    fn listen(&self, node: NodeId, event: &str, handler: EventHandler)
        -> FrameworkResult<Connection>;
}

/// Element description used when building a tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.extend(class.split_whitespace().map(str::to_string));
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) tag: String,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    pub(crate) parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn from_element(element: Element) -> Self {
        Self {
            tag: element.tag,
            id: element.id,
            classes: element.classes,
            attrs: element.attrs,
            text: element.text,
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn is_element(&self) -> bool {
        self.tag != DOCUMENT_TAG
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" if !self.classes.is_empty() => Some(self.classes.join(" ")),
            _ => self.attrs.get(name).cloned(),
        }
    }
}

pub(crate) struct Tree {
    nodes: HashMap<NodeId, NodeData>,
    listeners: HashMap<(NodeId, String), Hook>,
    root: NodeId,
    next_id: u64,
}

impl Tree {
    pub(crate) fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id)
    }

    fn require(&self, operation: &str, id: NodeId) -> FrameworkResult<&NodeData> {
        self.nodes.get(&id).ok_or_else(|| unknown_node(operation, id))
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .node(root)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn is_descendant(&self, node: NodeId, root: NodeId) -> bool {
        let mut cursor = self.node(node).and_then(|n| n.parent);
        while let Some(id) = cursor {
            if id == root {
                return true;
            }
            cursor = self.node(id).and_then(|n| n.parent);
        }
        false
    }
}

fn unknown_node(operation: &str, id: NodeId) -> FrameworkError {
    FrameworkError::configuration(
        ErrorCode::UnknownNode,
        operation,
        format!("{id} does not belong to this document"),
    )
}

/// Shared handle to a document tree. Removed elements stay addressable but
/// are no longer connected.
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, NodeData::from_element(Element::new(DOCUMENT_TAG)));
        Self {
            tree: Rc::new(RefCell::new(Tree {
                nodes,
                listeners: HashMap::new(),
                root,
                next_id: 1,
            })),
        }
    }

    pub fn root(&self) -> NodeId {
        self.tree.borrow().root
    }

    pub fn append(&self, parent: NodeId, element: Element) -> FrameworkResult<NodeId> {
        let mut tree = self.tree.borrow_mut();
        tree.require("Document::append", parent)?;

        let id = NodeId(tree.next_id);
        tree.next_id += 1;
        let mut data = NodeData::from_element(element);
        data.parent = Some(parent);
        tree.nodes.insert(id, data);
        if let Some(parent) = tree.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        Ok(id)
    }

    /// Detaches `node` (and its subtree) from its parent.
    pub fn remove(&self, node: NodeId) -> FrameworkResult<()> {
        let mut tree = self.tree.borrow_mut();
        if node == tree.root {
            return Err(FrameworkError::configuration(
                ErrorCode::WrongArgumentType,
                "Document::remove",
                "the document root cannot be removed",
            ));
        }
        let parent = tree.require("Document::remove", node)?.parent;
        if let Some(parent) = parent.and_then(|p| tree.nodes.get_mut(&p)) {
            parent.children.retain(|child| *child != node);
        }
        if let Some(data) = tree.nodes.get_mut(&node) {
            data.parent = None;
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().node(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        self.tree.borrow().node(node).map(|n| n.tag.clone())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree.borrow().node(node).and_then(|n| n.attribute(name))
    }

    pub fn set_attr(&self, node: NodeId, name: &str, value: &str) -> FrameworkResult<()> {
        let mut tree = self.tree.borrow_mut();
        let data = tree
            .nodes
            .get_mut(&node)
            .ok_or_else(|| unknown_node("Document::set_attr", node))?;
        match name {
            "id" => data.id = Some(value.to_string()),
            "class" => data.classes = value.split_whitespace().map(str::to_string).collect(),
            _ => {
                data.attrs.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.tree
            .borrow()
            .node(node)
            .is_some_and(|n| n.classes.iter().any(|c| c == class))
    }

    pub fn text(&self, node: NodeId) -> String {
        self.tree
            .borrow()
            .node(node)
            .map(|n| n.text.clone())
            .unwrap_or_default()
    }

    pub fn set_text(&self, node: NodeId, text: &str) -> FrameworkResult<()> {
        let mut tree = self.tree.borrow_mut();
        let data = tree
            .nodes
            .get_mut(&node)
            .ok_or_else(|| unknown_node("Document::set_text", node))?;
        data.text = text.to_string();
        Ok(())
    }

    pub fn query_first(&self, selector: &str, root: Option<NodeId>) -> FrameworkResult<Option<NodeId>> {
        Ok(self.query(selector, root)?.into_iter().next())
    }

    pub fn matches(&self, node: NodeId, selector: &str) -> FrameworkResult<bool> {
        let list = selector::parse(selector)?;
        Ok(list.matches(&self.tree.borrow(), node))
    }

    /// Dispatches `event` at `target`. Click, mouse, key and move events then
    /// bubble through every ancestor.
    pub fn fire(&self, target: NodeId, event: &str, detail: Value) -> FrameworkResult<()> {
        let path = {
            let tree = self.tree.borrow();
            tree.require("Document::fire", target)?;
            let mut path = vec![target];
            if bubbles(event) {
                let mut cursor = tree.node(target).and_then(|n| n.parent);
                while let Some(id) = cursor {
                    path.push(id);
                    cursor = tree.node(id).and_then(|n| n.parent);
                }
            }
            path
        };

        let event = Event::new(event).with_target(target).with_detail(detail);
        debug!(event = %event.name, %target, "firing");
        for node in path {
            let hook = self
                .tree
                .borrow()
                .listeners
                .get(&(node, event.name.clone()))
                .cloned();
            if let Some(hook) = hook {
                hook.emit(&event)?;
            }
        }
        Ok(())
    }

    pub fn listener_count(&self, node: NodeId, event: &str) -> usize {
        self.tree
            .borrow()
            .listeners
            .get(&(node, event.to_string()))
            .map(Hook::len)
            .unwrap_or(0)
    }
}

impl UiTree for Document {
    fn root(&self) -> NodeId {
        Document::root(self)
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let tree = self.tree.borrow();
        node == tree.root || (tree.nodes.contains_key(&node) && tree.is_descendant(node, tree.root))
    }

    fn query(&self, selector: &str, root: Option<NodeId>) -> FrameworkResult<Vec<NodeId>> {
        let list = selector::parse(selector)?;
        let tree = self.tree.borrow();
        let root = root.unwrap_or(tree.root);
        tree.require("Document::query", root)?;
        Ok(tree
            .descendants(root)
            .into_iter()
            .filter(|node| list.matches(&tree, *node))
            .collect())
    }

    fn query_match(
        &self,
        node: NodeId,
        selector: &str,
        root: Option<NodeId>,
        walk_ancestors: bool,
    ) -> FrameworkResult<Option<NodeId>> {
        if root == Some(node) {
            return Ok(None);
        }
        let basic = selector::is_basic(selector);
        let candidates = if basic {
            Vec::new()
        } else {
            self.query(selector, root)?
        };

        let tree = self.tree.borrow();
        let mut cursor = Some(node);
        while let Some(current) = cursor.filter(|id| Some(*id) != root) {
            let Some(data) = tree.node(current) else {
                break;
            };
            let hit = if basic {
                selector::matches_basic(selector, data)
            } else {
                candidates.contains(&current)
            };
            if hit {
                return Ok(Some(current));
            }
            if !walk_ancestors {
                break;
            }
            cursor = data.parent;
        }
        Ok(None)
    }

    fn listen(
        &self,
        node: NodeId,
        event: &str,
        handler: EventHandler,
    ) -> FrameworkResult<Connection> {
        let hook = {
            let mut tree = self.tree.borrow_mut();
            tree.require("Document::listen", node)?;
            tree.listeners
                .entry((node, event.to_string()))
                .or_default()
                .clone()
        };
        Ok(hook.connect(handler))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

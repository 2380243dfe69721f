//! Host document abstraction and an in-memory implementation.
//!
//! The binding only needs a handful of tree operations.  `NodeTree` is an
//! arena-backed tree with the same insertion rules as a browser document
//! (inserting a node into its own subtree is a hierarchy error), used by the
//! headless daemon and by tests.

use std::collections::BTreeMap;
use std::fmt;

use embedplay_proto::protocol::PresentationMode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("hierarchy request error: node would become its own ancestor")]
    HierarchyRequest,
    #[error("unknown node {0}")]
    UnknownNode(String),
}

/// Inline style declarations applied to the player container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStyle {
    pub declarations: Vec<(&'static str, &'static str)>,
}

impl HostStyle {
    pub fn for_mode(mode: PresentationMode) -> Self {
        let declarations = if mode.shows_video() {
            vec![
                ("position", "relative"),
                ("left", "auto"),
                ("top", "auto"),
                ("width", "100%"),
                ("height", "100%"),
                ("overflow", "visible"),
                ("pointer-events", "auto"),
            ]
        } else {
            // Audio only: keep the player alive but out of sight.
            vec![
                ("position", "absolute"),
                ("left", "-9999px"),
                ("top", "0"),
                ("width", "1px"),
                ("height", "1px"),
                ("overflow", "hidden"),
                ("pointer-events", "none"),
            ]
        };
        Self { declarations }
    }
}

pub trait HostDocument {
    type Node: Clone + PartialEq + fmt::Debug;

    /// True when `node` is connected to the document.
    fn is_attached(&self, node: &Self::Node) -> bool;
    fn find_by_id(&self, id: &str) -> Option<Self::Node>;
    /// True for the element the external player renders in place of its
    /// container (it takes over the container's id).
    fn is_player_output(&self, node: &Self::Node) -> bool;
    /// Create a fresh container with `id`, attached to the document body.
    fn create_container(&mut self, id: &str) -> Result<Self::Node, DomError>;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    /// True when `node` is `ancestor` or lies inside it.
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool;
    /// Move `child` (and its subtree) under `parent`.
    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), DomError>;
    fn apply_style(&mut self, node: &Self::Node, style: &HostStyle) -> Result<(), DomError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct NodeData {
    tag: String,
    id: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    style: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                tag: "body".to_string(),
                id: None,
                parent: None,
                children: Vec::new(),
                style: BTreeMap::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str, id: Option<&str>) -> NodeId {
        let node = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            tag: tag.to_string(),
            id: id.map(str::to_string),
            parent: None,
            children: Vec::new(),
            style: BTreeMap::new(),
        });
        node
    }

    /// Create an element and append it under `parent`.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        tag: &str,
        id: Option<&str>,
    ) -> Result<NodeId, DomError> {
        let node = self.create_element(tag, id);
        self.append(parent, node)?;
        Ok(node)
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.data(parent)?;
        self.data(child)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest);
        }
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    /// Remove `node` from its parent; the subtree stays intact.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes.get(node.0).and_then(|n| n.parent) {
            self.nodes[parent.0].children.retain(|c| *c != node);
            self.nodes[node.0].parent = None;
        }
    }

    pub fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|n| n.tag.as_str())
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<&str> {
        self.nodes
            .get(node.0)
            .and_then(|n| n.style.get(property))
            .map(String::as_str)
    }

    fn data(&self, node: NodeId) -> Result<&NodeData, DomError> {
        self.nodes
            .get(node.0)
            .ok_or_else(|| DomError::UnknownNode(node.to_string()))
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }
}

impl HostDocument for NodeTree {
    type Node = NodeId;

    fn is_attached(&self, node: &NodeId) -> bool {
        self.is_inclusive_ancestor(self.root, *node)
    }

    fn find_by_id(&self, id: &str) -> Option<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .find(|n| self.nodes[n.0].id.as_deref() == Some(id) && self.is_attached(n))
    }

    fn is_player_output(&self, node: &NodeId) -> bool {
        self.tag(*node) == Some("iframe")
    }

    fn create_container(&mut self, id: &str) -> Result<NodeId, DomError> {
        let root = self.root;
        self.create_child(root, "div", Some(id))
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.parent_of(*node)
    }

    fn contains(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        self.is_inclusive_ancestor(*ancestor, *node)
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), DomError> {
        self.append(*parent, *child)
    }

    fn apply_style(&mut self, node: &NodeId, style: &HostStyle) -> Result<(), DomError> {
        self.data(*node)?;
        let data = &mut self.nodes[node.0];
        for (property, value) in &style.declarations {
            data.style.insert(property.to_string(), value.to_string());
        }
        Ok(())
    }
}

//! Arena-based DOM shared by every document the pipeline touches.
//!
//! OPF, NCX, NAV and content documents all load into the same [`Document`]
//! tree. Nodes live in a contiguous vector and link to each other through
//! [`NodeId`] indices, so mutations (`insert_before`, `replace_with`,
//! `detach`) are pointer swaps and detached nodes simply stop being reachable
//! from the root.
//!
//! Two front-ends build the tree: a strict quick-xml reader ([`xml`]) and a
//! lenient html5ever sink ([`tree_sink`]). [`serialize`] writes the tree back.

mod serialize;
mod tree_sink;
mod xml;

pub use serialize::escape_xml;
pub use xml::MarkupError;

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value for no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_some(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }
}

/// Node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    /// Document root.
    Document,
    /// Element with its qualified name (`dc:title`, `svg`, `p`) and ordered attributes.
    Element { name: String, attrs: Vec<Attribute> },
    Text(String),
    /// Entity reference the reader could not resolve (`&foo;`), kept verbatim.
    EntityRef(String),
    Comment(String),
    CData(String),
    /// Everything between `<!DOCTYPE ` and `>`.
    Doctype(String),
    /// Everything between `<?` and `?>`, including the XML declaration.
    ProcessingInstruction(String),
}

/// Attribute with its qualified name (`xlink:href`, `epub:type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: NodeId,
    pub first_child: NodeId,
    pub last_child: NodeId,
    pub prev_sibling: NodeId,
    pub next_sibling: NodeId,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
        }
    }
}

/// How the tree is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Generic XML: every empty element self-closes.
    Xml,
    /// XHTML: only HTML void elements self-close.
    Xhtml,
}

/// Arena-based document tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    flavor: Flavor,
}

impl Document {
    /// Create an empty document holding only the root node.
    pub fn new(flavor: Flavor) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId::NONE,
            flavor,
        };
        doc.root = doc.alloc(Node::new(NodeData::Document));
        doc
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// The document root (not the document element).
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// The outermost element (`html`, `package`, `ncx`).
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root).find(|&id| self.is_element(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get_mut(id.0 as usize)
    }

    // ------------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------------

    pub fn create_element(&mut self, name: impl Into<String>, attrs: Vec<Attribute>) -> NodeId {
        self.alloc(Node::new(NodeData::Element {
            name: name.into(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(Node::new(NodeData::Text(text.into())))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(Node::new(NodeData::Comment(text.into())))
    }

    pub(crate) fn create_node(&mut self, data: NodeData) -> NodeId {
        self.alloc(Node::new(data))
    }

    // ------------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------------

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);

        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(NodeId::NONE);

        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = parent;
            child_node.prev_sibling = last_child;
        }

        if let Some(last_node) = self.get_mut(last_child) {
            last_node.next_sibling = child;
        }

        if let Some(parent_node) = self.get_mut(parent) {
            if parent_node.first_child.is_none() {
                parent_node.first_child = child;
            }
            parent_node.last_child = child;
        }
    }

    /// Append text to the last child if it is a text node, otherwise add a new one.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(NodeId::NONE);

        if let Some(last) = self.get_mut(last_child)
            && let NodeData::Text(ref mut existing) = last.data
        {
            existing.push_str(text);
            return;
        }

        let text_node = self.create_text(text);
        self.append(parent, text_node);
    }

    /// Insert `new_node` immediately before `sibling`, detaching it first.
    pub fn insert_before(&mut self, sibling: NodeId, new_node: NodeId) {
        if sibling == new_node {
            return;
        }
        self.detach(new_node);

        let (parent, prev) = match self.get(sibling) {
            Some(n) => (n.parent, n.prev_sibling),
            None => return,
        };

        if let Some(new) = self.get_mut(new_node) {
            new.parent = parent;
            new.prev_sibling = prev;
            new.next_sibling = sibling;
        }

        if let Some(sib) = self.get_mut(sibling) {
            sib.prev_sibling = new_node;
        }

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = new_node;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.first_child = new_node;
        }
    }

    /// Unlink a node from its parent. Its own subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = match self.get(id) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return,
        };

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = next;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.first_child = next;
        }

        if next.is_some() {
            if let Some(n) = self.get_mut(next) {
                n.prev_sibling = prev;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.last_child = prev;
        }

        if let Some(node) = self.get_mut(id) {
            node.parent = NodeId::NONE;
            node.prev_sibling = NodeId::NONE;
            node.next_sibling = NodeId::NONE;
        }
    }

    /// Put `new_node` where `old` was and detach `old`.
    pub fn replace_with(&mut self, old: NodeId, new_node: NodeId) {
        if old == new_node {
            return;
        }
        let attached = self.get(old).is_some_and(|n| n.parent.is_some());
        if attached {
            self.insert_before(old, new_node);
        }
        self.detach(old);
    }

    /// Detach every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        for child in self.child_vec(id) {
            self.detach(child);
        }
    }

    /// Deep-copy a subtree of `other` into this arena. The copy is unattached.
    pub fn import_subtree(&mut self, other: &Document, id: NodeId) -> NodeId {
        let data = match other.get(id) {
            Some(node) => node.data.clone(),
            None => return NodeId::NONE,
        };
        let copy = self.alloc(Node::new(data));
        for child in other.children(id) {
            let child_copy = self.import_subtree(other, child);
            self.append(copy, child_copy);
        }
        copy
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    pub fn children(&self, parent: NodeId) -> ChildrenIter<'_> {
        let first = self
            .get(parent)
            .map(|n| n.first_child)
            .unwrap_or(NodeId::NONE);
        ChildrenIter {
            doc: self,
            current: first,
        }
    }

    /// Snapshot of the children, safe to hold across mutations.
    pub fn child_vec(&self, parent: NodeId) -> Vec<NodeId> {
        self.children(parent).collect()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).map(|n| n.parent).filter(|p| p.is_some())
    }

    /// All descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.child_vec(id).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.child_vec(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Descendant elements of `id` whose local name is `tag`, in document order.
    pub fn find_all(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.is_named(n, tag))
            .collect()
    }

    /// First descendant element of `id` whose local name is `tag`.
    pub fn find_first(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|&n| self.is_named(n, tag))
    }

    /// Whether the node is still reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(node) = self.get(current) {
            if current == self.root {
                return true;
            }
            current = node.parent;
        }
        false
    }

    // ------------------------------------------------------------------------
    // Element accessors
    // ------------------------------------------------------------------------

    /// Qualified element name.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Element name with any namespace prefix removed (`dc:title` -> `title`).
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id).map(local_part)
    }

    /// Whether the node is an element with the given local name.
    pub fn is_named(&self, id: NodeId, tag: &str) -> bool {
        self.local_name(id)
            .is_some_and(|n| n.eq_ignore_ascii_case(tag))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Element { .. }))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Text(_)))
    }

    /// Content of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        static EMPTY: &[Attribute] = &[];
        self.get(id)
            .and_then(|n| match &n.data {
                NodeData::Element { attrs, .. } => Some(attrs.as_slice()),
                _ => None,
            })
            .unwrap_or(EMPTY)
    }

    /// Attribute value by exact qualified name.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let Some(node) = self.get_mut(id)
            && let NodeData::Element { attrs, .. } = &mut node.data
        {
            let value = value.into();
            match attrs.iter_mut().find(|a| a.name == name) {
                Some(existing) => existing.value = value,
                None => attrs.push(Attribute::new(name, value)),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let node = self.get_mut(id)?;
        if let NodeData::Element { attrs, .. } = &mut node.data {
            let pos = attrs.iter().position(|a| a.name == name)?;
            return Some(attrs.remove(pos).value);
        }
        None
    }

    /// Class tokens of an element.
    pub fn classes(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.attr(id, "class")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    /// Class-set membership (not exact string match on the attribute).
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).any(|c| c == class)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(text) = self.text(id) {
            out.push_str(text);
        }
        for node in self.descendants(id) {
            match self.get(node).map(|n| &n.data) {
                Some(NodeData::Text(s)) | Some(NodeData::CData(s)) => out.push_str(s),
                Some(NodeData::EntityRef(name)) => {
                    out.push('&');
                    out.push_str(name);
                    out.push(';');
                }
                _ => {}
            }
        }
        out
    }

    /// First child element with the given local name.
    pub fn child_named(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.children(id).find(|&c| self.is_named(c, tag))
    }

    /// The `body` element of an HTML document.
    pub fn body(&self) -> Option<NodeId> {
        self.find_first(self.root, "body")
    }

    /// The `head` element of an HTML document.
    pub fn head(&self) -> Option<NodeId> {
        self.find_first(self.root, "head")
    }
}

/// Strip a namespace prefix from a qualified name.
pub fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Iterator over children of a node.
pub struct ChildrenIter<'a> {
    doc: &'a Document,
    current: NodeId,
}

impl Iterator for ChildrenIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_none() {
            return None;
        }
        let id = self.current;
        self.current = self
            .doc
            .get(id)
            .map(|n| n.next_sibling)
            .unwrap_or(NodeId::NONE);
        Some(id)
    }
}

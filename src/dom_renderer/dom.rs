use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

/// DOMノードID生成用カウンター
static DOM_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// 値を持つ（`value` プロパティがある）要素
const VALUE_BEARING_TAGS: &[&str] = &["input", "textarea", "select"];

/// 終了タグを持たない要素
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub type Listener = Rc<dyn Fn(&Event)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    Comment,
    Fragment,
}

/// ディスパッチされたイベント
pub struct Event {
    kind: String,
    target: Node,
    current_target: Node,
}

impl Event {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn target(&self) -> &Node {
        &self.target
    }

    /// リスナーが登録されているノード（バブリング中は target の祖先）
    pub fn current_target(&self) -> &Node {
        &self.current_target
    }
}

/// DOMノードへのハンドル
///
/// クローンは同じノードを指す。比較は同一性（ポインタ）で行う。
#[derive(Clone)]
pub struct Node(Rc<NodeInner>);

struct NodeInner {
    id: usize,
    data: NodeData,
    parent: RefCell<Weak<NodeInner>>,
    children: RefCell<Vec<Node>>,
}

enum NodeData {
    Fragment,
    Element(ElementData),
    Text(RefCell<String>),
    Comment(String),
}

struct ElementData {
    tag: String,
    attributes: RefCell<Vec<(String, String)>>,
    /// `value` プロパティ。None の間は `value` 属性を返す
    value: RefCell<Option<String>>,
    listeners: RefCell<Vec<(String, Listener)>>,
}

impl Node {
    fn with_data(data: NodeData) -> Self {
        Node(Rc::new(NodeInner {
            id: DOM_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            data,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        }))
    }

    pub fn fragment() -> Self {
        Self::with_data(NodeData::Fragment)
    }

    pub fn element(tag: &str) -> Self {
        Self::with_data(NodeData::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attributes: RefCell::new(Vec::new()),
            value: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
        }))
    }

    pub fn text(content: &str) -> Self {
        Self::with_data(NodeData::Text(RefCell::new(content.to_string())))
    }

    pub fn comment(content: &str) -> Self {
        Self::with_data(NodeData::Comment(content.to_string()))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn node_type(&self) -> NodeType {
        match &self.0.data {
            NodeData::Fragment => NodeType::Fragment,
            NodeData::Element(_) => NodeType::Element,
            NodeData::Text(_) => NodeType::Text,
            NodeData::Comment(_) => NodeType::Comment,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.0.data, NodeData::Element(_))
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.0.data {
            NodeData::Element(el) => Some(&el.tag),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ========================================
    // ツリー操作
    // ========================================

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.borrow().upgrade().map(Node)
    }

    pub fn children(&self) -> Vec<Node> {
        self.0.children.borrow().clone()
    }

    pub fn first_child(&self) -> Option<Node> {
        self.0.children.borrow().first().cloned()
    }

    pub fn next_sibling(&self) -> Option<Node> {
        let parent = self.parent()?;
        let siblings = parent.0.children.borrow();
        let pos = siblings.iter().position(|n| n.ptr_eq(self))?;
        siblings.get(pos + 1).cloned()
    }

    /// 子ノードを末尾に追加する。フラグメントの場合はその子ノードを移動する
    pub fn append_child(&self, child: &Node) {
        if child.node_type() == NodeType::Fragment {
            for grandchild in child.children() {
                self.append_child(&grandchild);
            }
            return;
        }

        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());
    }

    /// 親ノードから取り外す
    pub fn detach(&self) {
        let Some(parent) = self.parent() else {
            return;
        };
        parent.0.children.borrow_mut().retain(|n| !n.ptr_eq(self));
        *self.0.parent.borrow_mut() = Weak::new();
    }

    /// 子ノードを全て取り外す（`innerHTML = ""` 相当）
    pub fn clear_children(&self) {
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in &children {
            *child.0.parent.borrow_mut() = Weak::new();
        }
    }

    /// 文書順で次のノードを返す。`root` の外には出ない
    pub fn next_in_document_order(&self, root: &Node) -> Option<Node> {
        if let Some(child) = self.first_child() {
            return Some(child);
        }
        self.next_skipping_children(root)
    }

    /// 子孫を飛ばして文書順で次のノードを返す。`root` の外には出ない
    pub fn next_skipping_children(&self, root: &Node) -> Option<Node> {
        let mut current = self.clone();
        loop {
            if current.ptr_eq(root) {
                return None;
            }
            if let Some(sibling) = current.next_sibling() {
                return Some(sibling);
            }
            current = current.parent()?;
        }
    }

    /// 自身を除く子孫ノードを文書順で返す
    pub fn descendants(&self) -> Vec<Node> {
        let mut out = Vec::new();
        let mut current = self.next_in_document_order(self);
        while let Some(node) = current {
            current = node.next_in_document_order(self);
            out.push(node);
        }
        out
    }

    // ========================================
    // 属性
    // ========================================

    /// 属性リストのスナップショットを返す
    pub fn attributes(&self) -> Vec<(String, String)> {
        match &self.0.data {
            NodeData::Element(el) => el.attributes.borrow().clone(),
            _ => Vec::new(),
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        let NodeData::Element(el) = &self.0.data else {
            return None;
        };
        el.attributes
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        let NodeData::Element(el) = &self.0.data else {
            return;
        };
        let mut attributes = el.attributes.borrow_mut();
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        if let NodeData::Element(el) = &self.0.data {
            el.attributes.borrow_mut().retain(|(n, _)| n != name);
        }
    }

    // ========================================
    // テキストと値
    // ========================================

    /// `textContent` 相当
    pub fn text_content(&self) -> String {
        match &self.0.data {
            NodeData::Text(text) => text.borrow().clone(),
            NodeData::Comment(text) => text.clone(),
            NodeData::Element(_) | NodeData::Fragment => self
                .descendants()
                .iter()
                .filter_map(|n| match &n.0.data {
                    NodeData::Text(text) => Some(text.borrow().clone()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// テキストノードは内容を置き換え、要素は子ノードを単一のテキストノードに置き換える
    pub fn set_text_content(&self, content: &str) {
        match &self.0.data {
            NodeData::Text(text) => *text.borrow_mut() = content.to_string(),
            NodeData::Comment(_) => {}
            NodeData::Element(_) | NodeData::Fragment => {
                self.clear_children();
                if !content.is_empty() {
                    self.append_child(&Node::text(content));
                }
            }
        }
    }

    pub fn is_value_bearing(&self) -> bool {
        self.tag_name()
            .is_some_and(|tag| VALUE_BEARING_TAGS.contains(&tag))
    }

    /// `value` プロパティ
    pub fn value(&self) -> String {
        let NodeData::Element(el) = &self.0.data else {
            return String::new();
        };
        if let Some(value) = el.value.borrow().as_ref() {
            return value.clone();
        }
        self.get_attribute("value").unwrap_or_default()
    }

    pub fn set_value(&self, value: &str) {
        if let NodeData::Element(el) = &self.0.data {
            *el.value.borrow_mut() = Some(value.to_string());
        }
    }

    // ========================================
    // イベント
    // ========================================

    pub fn add_event_listener(&self, kind: &str, listener: impl Fn(&Event) + 'static) {
        if let NodeData::Element(el) = &self.0.data {
            el.listeners
                .borrow_mut()
                .push((kind.to_string(), Rc::new(listener)));
        }
    }

    pub fn listener_count(&self, kind: &str) -> usize {
        match &self.0.data {
            NodeData::Element(el) => el.listeners.borrow().iter().filter(|(k, _)| k == kind).count(),
            _ => 0,
        }
    }

    /// イベントを発火し、祖先へバブリングさせる。呼び出したリスナー数を返す
    pub fn dispatch_event(&self, kind: &str) -> usize {
        let mut invoked = 0;
        let mut current = Some(self.clone());

        while let Some(node) = current {
            // リスナー内でのツリー変更に備えてスナップショットを取る
            let listeners: Vec<Listener> = match &node.0.data {
                NodeData::Element(el) => el
                    .listeners
                    .borrow()
                    .iter()
                    .filter(|(k, _)| k == kind)
                    .map(|(_, l)| Rc::clone(l))
                    .collect(),
                _ => Vec::new(),
            };

            if !listeners.is_empty() {
                let event = Event {
                    kind: kind.to_string(),
                    target: self.clone(),
                    current_target: node.clone(),
                };
                for listener in listeners {
                    listener(&event);
                    invoked += 1;
                }
            }

            current = node.parent();
        }

        invoked
    }

    /// ユーザー入力をシミュレートする（値を設定して `input` を発火）
    pub fn set_input_value(&self, value: &str) {
        self.set_value(value);
        self.dispatch_event("input");
    }

    pub fn click(&self) {
        self.dispatch_event("click");
    }

    // ========================================
    // セレクタ
    // ========================================

    /// `#id`、`.class`、タグ名の単純セレクタで最初に一致した子孫を返す
    pub fn query_selector(&self, selector: &str) -> Option<Node> {
        let selector = selector.trim();
        self.descendants().into_iter().find(|n| n.matches(selector))
    }

    pub fn query_selector_all(&self, selector: &str) -> Vec<Node> {
        let selector = selector.trim();
        self.descendants()
            .into_iter()
            .filter(|n| n.matches(selector))
            .collect()
    }

    fn matches(&self, selector: &str) -> bool {
        let Some(tag) = self.tag_name() else {
            return false;
        };

        if let Some(id) = selector.strip_prefix('#') {
            self.get_attribute("id").as_deref() == Some(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            self.get_attribute("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
        } else {
            tag.eq_ignore_ascii_case(selector)
        }
    }

    // 以下はシリアライズ用の内部アクセサ

    pub(crate) fn text_data(&self) -> Option<String> {
        match &self.0.data {
            NodeData::Text(text) => Some(text.borrow().clone()),
            _ => None,
        }
    }

    pub(crate) fn comment_data(&self) -> Option<&str> {
        match &self.0.data {
            NodeData::Comment(text) => Some(text),
            _ => None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.data {
            NodeData::Fragment => f.debug_struct("Fragment").field("id", &self.0.id).finish(),
            NodeData::Element(el) => f
                .debug_struct("Element")
                .field("id", &self.0.id)
                .field("tag", &el.tag)
                .field("attributes", &el.attributes.borrow())
                .finish(),
            NodeData::Text(text) => f
                .debug_struct("Text")
                .field("id", &self.0.id)
                .field("content", &text.borrow())
                .finish(),
            NodeData::Comment(text) => f
                .debug_struct("Comment")
                .field("id", &self.0.id)
                .field("content", text)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sample_tree() -> (Node, Node, Node, Node) {
        let root = Node::fragment();
        let div = Node::element("div");
        let span = Node::element("span");
        let text = Node::text("hello");
        span.append_child(&text);
        div.append_child(&span);
        root.append_child(&div);
        (root, div, span, text)
    }

    #[test]
    fn test_document_order() {
        let (root, div, span, text) = sample_tree();
        let tail = Node::text("tail");
        root.append_child(&tail);

        let order = root.descendants();
        assert_eq!(order, vec![div.clone(), span.clone(), text, tail.clone()]);

        assert_eq!(div.next_skipping_children(&root), Some(tail.clone()));
        assert_eq!(span.next_skipping_children(&root), Some(tail.clone()));
        assert_eq!(tail.next_skipping_children(&root), None);
    }

    #[test]
    fn test_append_fragment_moves_children() {
        let (fragment, div, _, _) = sample_tree();
        let container = Node::element("section");
        container.append_child(&fragment);

        assert!(fragment.children().is_empty());
        assert_eq!(container.children(), vec![div.clone()]);
        assert_eq!(div.parent(), Some(container));
    }

    #[test]
    fn test_set_text_content_replaces_children() {
        let (_, div, span, _) = sample_tree();
        div.set_text_content("replaced");
        assert_eq!(div.text_content(), "replaced");
        assert!(span.parent().is_none());
    }

    #[test]
    fn test_value_property_shadows_attribute() {
        let input = Node::element("input");
        input.set_attribute("value", "initial");
        assert_eq!(input.value(), "initial");
        input.set_value("typed");
        assert_eq!(input.value(), "typed");
        assert_eq!(input.get_attribute("value").as_deref(), Some("initial"));
    }

    #[test]
    fn test_event_bubbles_to_ancestors() {
        let (_, div, span, _) = sample_tree();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        span.add_event_listener("click", move |e| {
            assert_eq!(e.kind(), "click");
            h.set(h.get() + 1);
        });
        let h = Rc::clone(&hits);
        let target = span.clone();
        div.add_event_listener("click", move |e| {
            assert!(e.target().ptr_eq(&target));
            h.set(h.get() + 10);
        });

        assert_eq!(span.dispatch_event("click"), 2);
        assert_eq!(hits.get(), 11);
        assert_eq!(span.dispatch_event("input"), 0);
    }

    #[test]
    fn test_query_selector() {
        let root = Node::fragment();
        let a = Node::element("button");
        a.set_attribute("id", "inc");
        a.set_attribute("class", "btn primary");
        let b = Node::element("button");
        b.set_attribute("id", "dec");
        root.append_child(&a);
        root.append_child(&b);

        assert_eq!(root.query_selector("#dec"), Some(b.clone()));
        assert_eq!(root.query_selector(".primary"), Some(a.clone()));
        assert_eq!(root.query_selector_all("button").len(), 2);
        assert!(root.query_selector("#missing").is_none());
    }
}

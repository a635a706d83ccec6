use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::protocol::{CallbackDescriptor, SavePropDescriptor};

/// Layout axis of a [`NodeKind::Container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Column,
    Row,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Column => "column",
            Direction::Row => "row",
        }
    }
}

/// The closed set of node kinds, each with its own typed properties.
///
/// Properties only become a generic map when a tree is rendered into a
/// [`Snapshot`]. Kinds outside this set use [`NodeKind::Custom`].
#[derive(Debug, Clone)]
pub enum NodeKind {
    Container {
        direction: Direction,
        gap: Option<u32>,
    },
    Text {
        variant: Option<String>,
    },
    Button {
        label: String,
        disabled: bool,
        variant: Option<String>,
        on_click: Option<CallbackDescriptor>,
    },
    Input {
        value: String,
        placeholder: Option<String>,
        on_change: Option<CallbackDescriptor>,
        save: Option<SavePropDescriptor>,
    },
    /// Shows `fallback` on the client until real children are supplied.
    Placeholder {
        fallback: Box<Node>,
    },
    Custom {
        type_tag: String,
        props: Map<String, Value>,
        fallback: Option<Box<Node>>,
    },
}

impl NodeKind {
    pub fn type_tag(&self) -> &str {
        match self {
            NodeKind::Container { .. } => "Container",
            NodeKind::Text { .. } => "Text",
            NodeKind::Button { .. } => "Button",
            NodeKind::Input { .. } => "Input",
            NodeKind::Placeholder { .. } => "Placeholder",
            NodeKind::Custom { type_tag, .. } => type_tag,
        }
    }

    /// Secondary child used by the client only while the primary children are empty.
    pub fn fallback(&self) -> Option<&Node> {
        match self {
            NodeKind::Placeholder { fallback } => Some(fallback),
            NodeKind::Custom { fallback, .. } => fallback.as_deref(),
            _ => None,
        }
    }

    fn render_props(&self) -> Map<String, Value> {
        let mut props = Map::new();
        match self {
            NodeKind::Container { direction, gap } => {
                props.insert("direction".into(), Value::from(direction.as_str()));
                if let Some(gap) = gap {
                    props.insert("gap".into(), Value::from(*gap));
                }
            }
            NodeKind::Text { variant } => {
                insert_opt(&mut props, "variant", variant.as_deref().map(Value::from));
            }
            NodeKind::Button {
                label,
                disabled,
                variant,
                on_click,
            } => {
                props.insert("label".into(), Value::from(label.as_str()));
                props.insert("disabled".into(), Value::from(*disabled));
                insert_opt(&mut props, "variant", variant.as_deref().map(Value::from));
                insert_opt(&mut props, "onClick", on_click.as_ref().map(|d| d.to_value()));
            }
            NodeKind::Input {
                value,
                placeholder,
                on_change,
                save,
            } => {
                props.insert("value".into(), Value::from(value.as_str()));
                insert_opt(
                    &mut props,
                    "placeholder",
                    placeholder.as_deref().map(Value::from),
                );
                insert_opt(&mut props, "onChange", on_change.as_ref().map(|d| d.to_value()));
                insert_opt(&mut props, "saveProp", save.as_ref().map(|d| d.to_value()));
            }
            NodeKind::Placeholder { fallback } => {
                props.insert("fallback".into(), fallback.render().into_value());
            }
            NodeKind::Custom {
                props: custom,
                fallback,
                ..
            } => {
                props.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
                if let Some(fallback) = fallback {
                    props.insert("fallback".into(), fallback.render().into_value());
                }
            }
        }
        props
    }
}

fn insert_opt(props: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        props.insert(key.to_string(), value);
    }
}

/// A child slot: either a nested node or literal text.
#[derive(Debug, Clone)]
pub enum Child {
    Node(Node),
    Text(String),
}

impl Child {
    fn render(&self) -> SnapshotChild {
        match self {
            Child::Node(node) => SnapshotChild::Node(node.render()),
            Child::Text(text) => SnapshotChild::Text(text.clone()),
        }
    }
}

impl From<Node> for Child {
    fn from(node: Node) -> Self {
        Child::Node(node)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(text.to_string())
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Child::Text(text)
    }
}

macro_rules! child_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Child {
                fn from(value: $ty) -> Self {
                    Child::Text(value.to_string())
                }
            }
        )*
    };
}

child_from_display!(i32, i64, u32, u64, usize, f64, bool, char);

/// One described unit of UI.
#[derive(Debug, Clone)]
pub struct Node {
    id: String,
    kind: NodeKind,
    children: Vec<Child>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        let id = generate_node_id(kind.type_tag());
        Self {
            id,
            kind,
            children: Vec::new(),
        }
    }

    pub fn container() -> Self {
        Self::new(NodeKind::Container {
            direction: Direction::Column,
            gap: None,
        })
    }

    pub fn row() -> Self {
        Self::new(NodeKind::Container {
            direction: Direction::Row,
            gap: None,
        })
    }

    pub fn text(content: impl Into<Child>) -> Self {
        Self::new(NodeKind::Text { variant: None }).child(content)
    }

    pub fn button(label: impl Into<String>) -> Self {
        Self::new(NodeKind::Button {
            label: label.into(),
            disabled: false,
            variant: None,
            on_click: None,
        })
    }

    pub fn input(value: impl Into<String>) -> Self {
        Self::new(NodeKind::Input {
            value: value.into(),
            placeholder: None,
            on_change: None,
            save: None,
        })
    }

    pub fn placeholder(fallback: Node) -> Self {
        Self::new(NodeKind::Placeholder {
            fallback: Box::new(fallback),
        })
    }

    pub fn custom(type_tag: impl Into<String>) -> Self {
        Self::new(NodeKind::Custom {
            type_tag: type_tag.into(),
            props: Map::new(),
            fallback: None,
        })
    }

    /// Replaces the generated identity with an addressable one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn child(mut self, child: impl Into<Child>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, C>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Child>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    /// Sets a free-form property. Only [`NodeKind::Custom`] carries free-form
    /// properties; typed kinds ignore the call.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let NodeKind::Custom { props, .. } = &mut self.kind {
            props.insert(key.into(), value.into());
        }
        self
    }

    pub fn fallback(mut self, node: Node) -> Self {
        match &mut self.kind {
            NodeKind::Placeholder { fallback } => *fallback = Box::new(node),
            NodeKind::Custom { fallback, .. } => *fallback = Some(Box::new(node)),
            _ => {}
        }
        self
    }

    pub fn gap(mut self, value: u32) -> Self {
        if let NodeKind::Container { gap, .. } = &mut self.kind {
            *gap = Some(value);
        }
        self
    }

    pub fn variant(mut self, value: impl Into<String>) -> Self {
        match &mut self.kind {
            NodeKind::Text { variant } | NodeKind::Button { variant, .. } => {
                *variant = Some(value.into())
            }
            NodeKind::Custom { props, .. } => {
                props.insert("variant".into(), Value::from(value.into()));
            }
            _ => {}
        }
        self
    }

    pub fn disabled(mut self, value: bool) -> Self {
        match &mut self.kind {
            NodeKind::Button { disabled, .. } => *disabled = value,
            NodeKind::Custom { props, .. } => {
                props.insert("disabled".into(), Value::from(value));
            }
            _ => {}
        }
        self
    }

    pub fn placeholder_text(mut self, value: impl Into<String>) -> Self {
        if let NodeKind::Input { placeholder, .. } = &mut self.kind {
            *placeholder = Some(value.into());
        }
        self
    }

    pub fn on_click(mut self, descriptor: CallbackDescriptor) -> Self {
        match &mut self.kind {
            NodeKind::Button { on_click, .. } => *on_click = Some(descriptor),
            NodeKind::Custom { props, .. } => {
                props.insert("onClick".into(), descriptor.to_value());
            }
            _ => {}
        }
        self
    }

    pub fn on_change(mut self, descriptor: CallbackDescriptor) -> Self {
        match &mut self.kind {
            NodeKind::Input { on_change, .. } => *on_change = Some(descriptor),
            NodeKind::Custom { props, .. } => {
                props.insert("onChange".into(), descriptor.to_value());
            }
            _ => {}
        }
        self
    }

    pub fn save(mut self, descriptor: SavePropDescriptor) -> Self {
        match &mut self.kind {
            NodeKind::Input { save, .. } => *save = Some(descriptor),
            NodeKind::Custom { props, .. } => {
                props.insert("saveProp".into(), descriptor.to_value());
            }
            _ => {}
        }
        self
    }

    pub fn identity(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn type_tag(&self) -> &str {
        self.kind.type_tag()
    }

    pub fn child_slots(&self) -> &[Child] {
        &self.children
    }

    pub fn fallback_child(&self) -> Option<&Node> {
        self.kind.fallback()
    }

    /// Renders the tree into an immutable snapshot. Never invokes handlers.
    pub fn render(&self) -> Snapshot {
        Snapshot {
            type_tag: self.kind.type_tag().to_string(),
            id: self.id.clone(),
            props: self.kind.render_props(),
            children: self.children.iter().map(Child::render).collect(),
        }
    }
}

fn generate_node_id(type_tag: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{}-{}", type_tag.to_ascii_lowercase(), &token[..12])
}

/// Serialized form of a rendered node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub id: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<SnapshotChild>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotChild {
    Node(Snapshot),
    Text(String),
}

impl Snapshot {
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether a node with `id` appears anywhere in the snapshot, fallbacks included.
    pub fn contains(&self, id: &str) -> bool {
        if self.id == id {
            return true;
        }
        let in_children = self.children.iter().any(|child| match child {
            SnapshotChild::Node(node) => node.contains(id),
            SnapshotChild::Text(_) => false,
        });
        in_children || self.props.get("fallback").is_some_and(|v| value_contains(v, id))
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                SnapshotChild::Text(text) => Some(text.as_str()),
                SnapshotChild::Node(_) => None,
            })
            .collect()
    }
}

fn value_contains(value: &Value, id: &str) -> bool {
    match Snapshot::deserialize(value) {
        Ok(snapshot) => snapshot.contains(id),
        Err(_) => false,
    }
}

use std::time::SystemTime;

/// Required features this decoder understands.
pub const SUPPORTED_FEATURES: [&str; 3] = ["OsmSchema-V0.6", "DenseNodes", "HistoricalInformation"];

// --------------------------------------------------------------------------
// FileHeader

/// Decoded `OSMHeader` blob. There is exactly one per stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub writing_program: String,
    pub source: String,
    pub replication_sequence_number: i64,
    pub replication_base_url: String,
    pub replication_timestamp: Option<SystemTime>,
    pub bounding_box: Option<BoundingBox>,
}

impl FileHeader {
    /// Required features a consumer of this file must understand but this decoder does not.
    pub fn unsupported_features(&self) -> Vec<&str> {
        self.required_features
            .iter()
            .map(String::as_str)
            .filter(|feature| !SUPPORTED_FEATURES.contains(feature))
            .collect()
    }
}

/// Bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

// --------------------------------------------------------------------------
// Tags and Info

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Tags in wire order.
pub type Tags = Vec<Tag>;

/// Editing metadata attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub version: i32,
    pub visible: bool,
    pub user: String,
    pub user_id: i32,
    pub changeset: i64,
    pub timestamp: SystemTime,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            version: 0,
            visible: true,
            user: String::new(),
            user_id: 0,
            changeset: 0,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }
}

// --------------------------------------------------------------------------
// Entities

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    /// Degrees.
    pub latitude: f64,
    /// Degrees.
    pub longitude: f64,
    pub tags: Tags,
    pub info: Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub node_ids: Vec<i64>,
    pub tags: Tags,
    pub info: Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub member_type: MemberType,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
    pub info: Info,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn id(&self) -> i64 {
        match self {
            Entity::Node(node) => node.id,
            Entity::Way(way) => way.id,
            Entity::Relation(relation) => relation.id,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        match self {
            Entity::Node(node) => &node.tags,
            Entity::Way(way) => &way.tags,
            Entity::Relation(relation) => &relation.tags,
        }
    }

    pub fn info(&self) -> &Info {
        match self {
            Entity::Node(node) => &node.info,
            Entity::Way(way) => &way.info,
            Entity::Relation(relation) => &relation.info,
        }
    }
}

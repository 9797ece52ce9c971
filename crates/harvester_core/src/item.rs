use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// The four kinds of item the upstream system exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Object,
    Relationship,
    RelationshipType,
    Group,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Object,
        ItemKind::Relationship,
        ItemKind::RelationshipType,
        ItemKind::Group,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ItemKind::Object => "object",
            ItemKind::Relationship => "relationship",
            ItemKind::RelationshipType => "relationship-type",
            ItemKind::Group => "group",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ItemKind::Object => "objects",
            ItemKind::Relationship => "relationships",
            ItemKind::RelationshipType => "relationship-types",
            ItemKind::Group => "groups",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Object sub-kinds known to the feed API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectCategory {
    Activity,
    Equipment,
    Grant,
    OrgStructure,
    Project,
    Publication,
    User,
    TeachingActivity,
    Impact,
}

impl ObjectCategory {
    pub const ALL: [ObjectCategory; 9] = [
        ObjectCategory::Activity,
        ObjectCategory::Equipment,
        ObjectCategory::Grant,
        ObjectCategory::OrgStructure,
        ObjectCategory::Project,
        ObjectCategory::Publication,
        ObjectCategory::User,
        ObjectCategory::TeachingActivity,
        ObjectCategory::Impact,
    ];

    pub fn singular(self) -> &'static str {
        match self {
            ObjectCategory::Activity => "activity",
            ObjectCategory::Equipment => "equipment",
            ObjectCategory::Grant => "grant",
            ObjectCategory::OrgStructure => "org-structure",
            ObjectCategory::Project => "project",
            ObjectCategory::Publication => "publication",
            ObjectCategory::User => "user",
            ObjectCategory::TeachingActivity => "teaching-activity",
            ObjectCategory::Impact => "impact",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ObjectCategory::Activity => "activities",
            ObjectCategory::Equipment => "equipment",
            ObjectCategory::Grant => "grants",
            ObjectCategory::OrgStructure => "org-structures",
            ObjectCategory::Project => "projects",
            ObjectCategory::Publication => "publications",
            ObjectCategory::User => "users",
            ObjectCategory::TeachingActivity => "teaching-activities",
            ObjectCategory::Impact => "impact-records",
        }
    }

    /// Looks a category up by either its singular or plural feed name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.singular() == name || c.plural() == name)
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Immutable key for one upstream item.
///
/// Identity is the pair (descriptor, id), where the descriptor is the object
/// category for objects and the kind name for everything else.
#[derive(Debug, Clone, Copy)]
pub struct ItemId {
    kind: ItemKind,
    category: Option<ObjectCategory>,
    id: u64,
}

impl ItemId {
    pub fn object(category: ObjectCategory, id: u64) -> Self {
        Self {
            kind: ItemKind::Object,
            category: Some(category),
            id,
        }
    }

    pub fn relationship(id: u64) -> Self {
        Self::plain(ItemKind::Relationship, id)
    }

    pub fn relationship_type(id: u64) -> Self {
        Self::plain(ItemKind::RelationshipType, id)
    }

    pub fn group(id: u64) -> Self {
        Self::plain(ItemKind::Group, id)
    }

    fn plain(kind: ItemKind, id: u64) -> Self {
        Self {
            kind,
            category: None,
            id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn category(&self) -> Option<ObjectCategory> {
        self.category
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &'static str {
        match self.category {
            Some(category) => category.singular(),
            None => self.kind.name(),
        }
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor() == other.descriptor() && self.id == other.id
    }
}

impl Eq for ItemId {}

impl Hash for ItemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.descriptor().hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.descriptor()
            .cmp(other.descriptor())
            .then(self.id.cmp(&other.id))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.descriptor(), self.id)
    }
}

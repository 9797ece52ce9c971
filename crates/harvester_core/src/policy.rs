use std::collections::BTreeSet;

use serde::Deserialize;

use crate::{ItemId, ItemKind, ObjectCategory};

/// Which modified objects make a cached relationship worth pulling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum RepullScope {
    None,
    /// Any modified object other than a user; their changes can flip link visibility.
    #[default]
    NonUserObjects,
    AllModifiedObjects,
}

impl RepullScope {
    fn covers(self, object: &ItemId) -> bool {
        match self {
            RepullScope::None => false,
            RepullScope::NonUserObjects => object.category() != Some(ObjectCategory::User),
            RepullScope::AllModifiedObjects => true,
        }
    }
}

/// Relationship types whose translation embeds the linked objects, so a
/// change to either object means translating the relationship again.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub enum ReprocessTypes {
    #[default]
    None,
    All,
    Named(BTreeSet<String>),
}

impl ReprocessTypes {
    fn covers(&self, type_name: Option<&str>) -> bool {
        match (self, type_name) {
            (ReprocessTypes::None, _) => false,
            (ReprocessTypes::All, _) => true,
            (ReprocessTypes::Named(names), Some(name)) => names.contains(name),
            (ReprocessTypes::Named(_), None) => false,
        }
    }
}

/// What a cached relationship links, as read back from the raw cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipLink {
    pub id: ItemId,
    pub type_name: Option<String>,
    pub objects: Vec<ItemId>,
}

/// Cached relationships to fetch again and to translate again, in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipPlan {
    pub repull: Vec<u64>,
    pub reprocess: Vec<ItemId>,
}

impl RelationshipPlan {
    pub fn is_empty(&self) -> bool {
        self.repull.is_empty() && self.reprocess.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepullPolicy {
    pub scope: RepullScope,
    pub reprocess_types: ReprocessTypes,
}

impl RepullPolicy {
    pub fn new(scope: RepullScope, reprocess_types: ReprocessTypes) -> Self {
        Self {
            scope,
            reprocess_types,
        }
    }

    /// Sorts cached relationships touching a modified object into re-pulls and
    /// re-translations.
    ///
    /// `updated` holds every item written during this run; relationships in it
    /// are already fresh and are left alone. A relationship chosen for re-pull
    /// is not also listed for reprocessing.
    pub fn plan<'a, I>(&self, updated: &BTreeSet<ItemId>, cached: I) -> RelationshipPlan
    where
        I: IntoIterator<Item = &'a RelationshipLink>,
    {
        let mut plan = RelationshipPlan::default();
        for link in cached {
            if link.id.kind() != ItemKind::Relationship || updated.contains(&link.id) {
                continue;
            }
            let mut repull = false;
            let mut reprocess = false;
            for object in link.objects.iter().filter(|object| updated.contains(object)) {
                if self.scope.covers(object) {
                    repull = true;
                    break;
                }
                if self.reprocess_types.covers(link.type_name.as_deref()) {
                    reprocess = true;
                }
            }
            if repull {
                plan.repull.push(link.id.id());
            } else if reprocess {
                plan.reprocess.push(link.id);
            }
        }
        plan.repull.sort_unstable();
        plan.repull.dedup();
        plan.reprocess.sort();
        plan.reprocess.dedup();
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link(id: u64, type_name: &str, objects: &[ItemId]) -> RelationshipLink {
        RelationshipLink {
            id: ItemId::relationship(id),
            type_name: Some(type_name.to_string()),
            objects: objects.to_vec(),
        }
    }

    fn user(id: u64) -> ItemId {
        ItemId::object(ObjectCategory::User, id)
    }

    fn publication(id: u64) -> ItemId {
        ItemId::object(ObjectCategory::Publication, id)
    }

    fn cached() -> Vec<RelationshipLink> {
        vec![
            link(30, "publication-user-authorship", &[publication(9), user(2)]),
            link(10, "publication-user-authorship", &[publication(8), user(2)]),
            link(20, "grant-user-pi", &[ItemId::object(ObjectCategory::Grant, 4), user(5)]),
            link(40, "publication-user-authorship", &[publication(9), user(6)]),
        ]
    }

    fn updated() -> BTreeSet<ItemId> {
        [publication(9), user(2), ItemId::relationship(40)]
            .into_iter()
            .collect()
    }

    #[test]
    fn non_user_objects_repull_their_links() {
        let plan = RepullPolicy::default().plan(&updated(), &cached());
        assert_eq!(plan.repull, vec![30]);
        assert!(plan.reprocess.is_empty());
    }

    #[test]
    fn all_modified_objects_include_users() {
        let policy = RepullPolicy::new(RepullScope::AllModifiedObjects, ReprocessTypes::None);
        assert_eq!(policy.plan(&updated(), &cached()).repull, vec![10, 30]);
    }

    #[test]
    fn user_changes_reprocess_named_types() {
        let names = ["publication-user-authorship".to_string()].into_iter().collect();
        let policy = RepullPolicy::new(RepullScope::NonUserObjects, ReprocessTypes::Named(names));
        let plan = policy.plan(&updated(), &cached());
        assert_eq!(plan.repull, vec![30]);
        assert_eq!(plan.reprocess, vec![ItemId::relationship(10)]);
    }

    #[test]
    fn no_repull_can_still_reprocess_everything() {
        let policy = RepullPolicy::new(RepullScope::None, ReprocessTypes::All);
        let plan = policy.plan(&updated(), &cached());
        assert!(plan.repull.is_empty());
        assert_eq!(
            plan.reprocess,
            vec![ItemId::relationship(10), ItemId::relationship(30)]
        );
    }

    #[test]
    fn nothing_modified_means_nothing_to_do() {
        let policy = RepullPolicy::new(RepullScope::AllModifiedObjects, ReprocessTypes::All);
        assert!(policy.plan(&BTreeSet::new(), &cached()).is_empty());
    }
}

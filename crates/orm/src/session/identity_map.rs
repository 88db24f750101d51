//! Identity map
//!
//! One in-memory instance per `(entity, id)`. New entities are members
//! without a key until their insert assigns one.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::entity::AnyEntity;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity: String,
    pub id: i64,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: i64) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    by_key: HashMap<EntityKey, AnyEntity>,
    attached: Vec<AnyEntity>,
    members: HashSet<usize>,
}

impl IdentityMap {
    pub fn get(&self, entity: &str, id: i64) -> Option<AnyEntity> {
        self.by_key.get(&EntityKey::new(entity, id)).cloned()
    }

    pub fn contains(&self, entity: &AnyEntity) -> bool {
        self.members.contains(&entity.key())
    }

    pub fn attach(&mut self, entity: AnyEntity, key: Option<EntityKey>) {
        if self.members.insert(entity.key()) {
            self.attached.push(entity.clone());
        }
        if let Some(key) = key {
            self.by_key.insert(key, entity);
        }
    }

    pub fn register(&mut self, key: EntityKey, entity: AnyEntity) {
        self.by_key.insert(key, entity);
    }

    pub fn unregister(&mut self, key: &EntityKey) {
        self.by_key.remove(key);
    }

    pub fn remove(&mut self, entity: &AnyEntity) -> bool {
        if !self.members.remove(&entity.key()) {
            return false;
        }
        self.attached.retain(|e| !e.ptr_eq(entity));
        self.by_key.retain(|_, e| !e.ptr_eq(entity));
        true
    }

    /// Members in attach order
    pub fn entities(&self) -> Vec<AnyEntity> {
        self.attached.clone()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn drain(&mut self) -> Vec<AnyEntity> {
        self.by_key.clear();
        self.members.clear();
        std::mem::take(&mut self.attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Person;

    #[test]
    fn test_attach_and_lookup() {
        let mut map = IdentityMap::default();
        let person = AnyEntity::new(Person::named("Max", 30));
        map.attach(person.clone(), None);
        map.attach(person.clone(), None);
        assert_eq!(map.len(), 1);
        assert!(map.get("Person", 1).is_none());

        map.register(EntityKey::new("Person", 1), person.clone());
        assert!(map.get("Person", 1).unwrap().ptr_eq(&person));

        assert!(map.remove(&person));
        assert!(!map.contains(&person));
        assert!(map.get("Person", 1).is_none());
        assert!(!map.remove(&person));
    }
}

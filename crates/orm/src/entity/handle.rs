//! Shared entity handles
//!
//! Entities are shared between the session's identity map and the caller, so
//! they live behind `Arc<RwLock<_>>`. Identity is pointer identity: two
//! handles refer to the same entity iff they share the allocation.
//!
//! Never hold a guard across an `.await`, and never lock the same entity twice
//! on one thread.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Entity;
use crate::error::{OrmError, OrmResult};

/// Typed handle to an entity
pub struct EntityRef<T: Entity> {
    inner: Arc<RwLock<T>>,
}

impl<T: Entity> EntityRef<T> {
    pub fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> i64 {
        self.read().base().id()
    }

    pub fn ptr_eq(&self, other: &EntityRef<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn to_any(&self) -> AnyEntity {
        let entity: Arc<RwLock<dyn Entity>> = self.inner.clone();
        let typed: Arc<dyn Any + Send + Sync> = self.inner.clone();
        AnyEntity { entity, typed }
    }
}

impl<T: Entity> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for EntityRef<T> {
    // Associations form cycles, so only the key is printed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        match self.inner.try_read() {
            Ok(entity) => write!(f, "{}#{}", short_name, entity.base().id()),
            Err(_) => write!(f, "{}#<locked>", short_name),
        }
    }
}

/// Type-erased handle used inside the session
#[derive(Clone)]
pub struct AnyEntity {
    entity: Arc<RwLock<dyn Entity>>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl AnyEntity {
    pub fn new<T: Entity>(entity: T) -> Self {
        EntityRef::new(entity).to_any()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, dyn Entity> {
        self.entity.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, dyn Entity> {
        self.entity.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> i64 {
        self.read().base().id()
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.typed.is::<RwLock<T>>()
    }

    /// Recover the typed handle
    pub fn downcast<T: Entity>(&self) -> OrmResult<EntityRef<T>> {
        self.typed
            .clone()
            .downcast::<RwLock<T>>()
            .map(|inner| EntityRef { inner })
            .map_err(|_| {
                OrmError::invalid_state(format!(
                    "entity is not a {}",
                    std::any::type_name::<T>()
                ))
            })
    }

    pub fn ptr_eq(&self, other: &AnyEntity) -> bool {
        self.key() == other.key()
    }

    /// Address of the shared allocation, stable for the entity's lifetime
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.typed) as *const () as usize
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity.try_read() {
            Ok(entity) => write!(f, "AnyEntity#{}", entity.base().id()),
            Err(_) => write!(f, "AnyEntity#<locked>"),
        }
    }
}

impl<T: Entity> From<EntityRef<T>> for AnyEntity {
    fn from(entity: EntityRef<T>) -> Self {
        entity.to_any()
    }
}

/// Erase a typed collection, for [`Entity::collection`] implementations
pub fn erase_all<T: Entity>(items: &[EntityRef<T>]) -> Vec<AnyEntity> {
    items.iter().map(EntityRef::to_any).collect()
}

/// Recover a typed collection, for [`Entity::set_collection`] implementations
pub fn downcast_all<T: Entity>(items: &[AnyEntity]) -> OrmResult<Vec<EntityRef<T>>> {
    items.iter().map(AnyEntity::downcast).collect()
}

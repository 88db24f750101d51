//! Entities
//!
//! Domain types embed an [`EntityBase`] and implement [`Entity`] so the
//! session can read and assign mapped fields by name. Setters report every
//! change to the base's [`ChangeTracker`]:
//!
//! ```ignore
//! pub fn set_name(&mut self, name: impl Into<String>) {
//!     self.base.set_field("Name", &mut self.name, name.into());
//! }
//! ```

pub mod handle;
pub mod tracker;

use std::any::Any;
use std::collections::BTreeMap;

use uuid::Uuid;

pub use handle::{downcast_all, erase_all, AnyEntity, EntityRef};
pub use tracker::ChangeTracker;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, FieldMetadata, DELETED_FIELD, ID_FIELD, VERSION_FIELD};

/// A mapped domain object
pub trait Entity: Any + Send + Sync {
    fn base(&self) -> &EntityBase;

    fn base_mut(&mut self) -> &mut EntityBase;

    fn as_any(&self) -> &dyn Any;

    /// Current value of a scalar field, `None` if the field is unknown
    fn value(&self, field: &str) -> Option<DatabaseValue>;

    /// Assign a scalar field
    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()>;

    /// Target of a reference field
    fn reference(&self, _field: &str) -> Option<AnyEntity> {
        None
    }

    fn set_reference(&mut self, field: &str, _target: Option<AnyEntity>) -> OrmResult<()> {
        Err(unknown_field(type_label(self), field))
    }

    /// Items of a collection field, `None` if the field is unknown
    fn collection(&self, _field: &str) -> Option<Vec<AnyEntity>> {
        None
    }

    fn set_collection(&mut self, field: &str, _items: Vec<AnyEntity>) -> OrmResult<()> {
        Err(unknown_field(type_label(self), field))
    }
}

/// Static side of an entity: construction and metadata registration
pub trait EntityType: Entity + Default {
    fn metadata() -> OrmResult<EntityMetadata>;
}

fn type_label<E: Entity + ?Sized>(_entity: &E) -> &'static str {
    std::any::type_name::<E>()
}

/// Error for a field name an entity does not map
pub fn unknown_field(entity: &str, field: &str) -> OrmError {
    OrmError::invalid_state(format!("{} has no mapped field '{}'", entity, field))
}

/// Engine managed state embedded in every entity
#[derive(Debug, Clone, Default)]
pub struct EntityBase {
    id: i64,
    deleted: bool,
    version: i64,
    evicted: bool,
    session: Option<Uuid>,
    tracker: ChangeTracker,
}

impl EntityBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    /// Session the entity is attached to
    pub fn session(&self) -> Option<Uuid> {
        self.session
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    /// New entities are always dirty
    pub fn is_dirty(&self) -> bool {
        self.id == 0 || self.tracker.is_dirty()
    }

    /// Assign a scalar field and record the change
    pub fn set_field<V>(&mut self, field: &str, slot: &mut V, value: V)
    where
        V: Clone + Into<DatabaseValue>,
    {
        let old = std::mem::replace(slot, value);
        self.tracker.record_change(field, old.into(), slot.clone().into());
    }

    /// Assign an association field and record the change
    pub fn set_association<V>(&mut self, field: &str, slot: &mut V, value: V) {
        *slot = value;
        self.tracker.touch(field);
    }

    pub(crate) fn mark_deleted(&mut self) {
        let was = self.deleted;
        self.deleted = true;
        self.tracker
            .record_change(DELETED_FIELD, was.into(), DatabaseValue::Bool(true));
    }

    pub(crate) fn assign_key(&mut self, id: i64, version: i64, deleted: bool) {
        self.id = id;
        self.version = version;
        self.deleted = deleted;
    }

    pub(crate) fn restore_key(&mut self, id: i64, version: i64) {
        self.id = id;
        self.version = version;
    }

    pub(crate) fn attach(&mut self, session: Uuid) {
        self.session = Some(session);
    }

    pub(crate) fn detach(&mut self) {
        self.session = None;
    }

    pub(crate) fn evict(&mut self) {
        self.session = None;
        self.evicted = true;
    }
}

/// Run `f` with change tracking switched off, restoring the previous state
pub fn with_tracking_disabled<E, R>(entity: &mut E, f: impl FnOnce(&mut E) -> R) -> R
where
    E: Entity + ?Sized,
{
    let enabled = entity.base().tracker().is_enabled();
    entity.base_mut().tracker_mut().set_enabled(false);
    let result = f(entity);
    entity.base_mut().tracker_mut().set_enabled(enabled);
    result
}

/// Read any mapped column, base fields included
pub fn field_value(entity: &dyn Entity, metadata: &EntityMetadata, field: &FieldMetadata) -> OrmResult<DatabaseValue> {
    let base = entity.base();
    match field.name.as_str() {
        ID_FIELD => Ok(DatabaseValue::Int64(base.id())),
        DELETED_FIELD => Ok(DatabaseValue::Bool(base.is_deleted())),
        VERSION_FIELD => Ok(DatabaseValue::Int64(base.version())),
        name => entity
            .value(name)
            .ok_or_else(|| unknown_field(metadata.name(), name)),
    }
}

/// Committed values of all scalar columns, used as the tracking baseline
pub fn snapshot(entity: &dyn Entity, metadata: &EntityMetadata) -> OrmResult<BTreeMap<String, DatabaseValue>> {
    let mut baseline = BTreeMap::new();
    for field in metadata.columns().filter(|f| !f.is_reference()) {
        baseline.insert(field.name.clone(), field_value(entity, metadata, field)?);
    }
    Ok(baseline)
}

/// Check mandatory fields and string lengths
pub fn validate(entity: &dyn Entity, metadata: &EntityMetadata) -> OrmResult<()> {
    let failed = |field: &FieldMetadata, reason: String| OrmError::Validation {
        entity: metadata.name().to_string(),
        field: field.name.clone(),
        reason,
    };

    for field in metadata.user_fields().filter(|f| f.is_column()) {
        if field.is_reference() {
            if field.mandatory && entity.reference(&field.name).is_none() {
                return Err(failed(field, "is mandatory".to_string()));
            }
            continue;
        }

        let value = entity
            .value(&field.name)
            .ok_or_else(|| unknown_field(metadata.name(), &field.name))?;
        match (&value, field.max_length) {
            (DatabaseValue::Null, _) if field.mandatory => {
                return Err(failed(field, "is mandatory".to_string()));
            }
            (DatabaseValue::String(text), Some(max)) if text.chars().count() > max as usize => {
                return Err(failed(
                    field,
                    format!("is longer than {} characters", max),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Address, Person};
    use crate::EntityType;

    #[test]
    fn test_setters_track_changes() {
        let mut person = Person::named("Max", 30);
        assert!(person.base().tracker().is_field_dirty("Name"));

        let metadata = Person::metadata().unwrap();
        let baseline = snapshot(&person, &metadata).unwrap();
        person.base_mut().tracker_mut().reset(baseline);
        assert!(!person.base().tracker().is_dirty());

        person.set_age(31);
        assert_eq!(person.base().tracker().dirty_fields(), vec!["Age".to_string()]);
    }

    #[test]
    fn test_tracking_disabled_scope() {
        let mut person = Person::default();
        with_tracking_disabled(&mut person, |p| p.set_name("Max"));
        assert!(!person.base().tracker().is_dirty());
        assert!(person.base().tracker().is_enabled());
        // New entities are dirty regardless
        assert!(person.base().is_dirty());
    }

    #[test]
    fn test_validate_mandatory_and_length() {
        let metadata = Person::metadata().unwrap();
        let mut person = Person::default();
        let err = validate(&person, &metadata).unwrap_err();
        assert!(matches!(err, OrmError::Validation { ref field, .. } if field == "Name"));

        person.set_name("x".repeat(60));
        assert!(matches!(
            validate(&person, &metadata),
            Err(OrmError::Validation { .. })
        ));

        person.set_name("Max");
        assert!(validate(&person, &metadata).is_ok());
    }

    #[test]
    fn test_mandatory_reference() {
        let metadata = Address::metadata().unwrap();
        let mut address = Address::new("Main Street 1");
        assert!(validate(&address, &metadata).is_err());

        address.set_person(Some(EntityRef::new(Person::named("Max", 30))));
        assert!(validate(&address, &metadata).is_ok());
    }

    #[test]
    fn test_field_value_reads_base_fields() {
        let metadata = Person::metadata().unwrap();
        let person = Person::named("Max", 30);
        let version = metadata.field(VERSION_FIELD).unwrap();
        assert_eq!(field_value(&person, &metadata, version).unwrap(), DatabaseValue::Int64(0));
        let name = metadata.field("Name").unwrap();
        assert_eq!(field_value(&person, &metadata, name).unwrap(), "Max".into());
    }
}

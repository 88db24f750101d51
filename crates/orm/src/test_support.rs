//! Fixtures shared by the unit tests: a few mapped entities and a scripted
//! connection that records every call.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backends::{Connection, DatabaseRow, DatabaseValue, Query, ValueRow};
use crate::entity::{
    downcast_all, erase_all, unknown_field, AnyEntity, Entity, EntityBase, EntityRef, EntityType,
};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{Cascade, EntityMetadata, FieldMetadata, FieldType, MetadataResolver};
use crate::transactions::IsolationLevel;

#[derive(Debug, Default)]
pub struct Person {
    base: EntityBase,
    name: String,
    age: i32,
    middle_name: Option<String>,
    addresses: Vec<EntityRef<Address>>,
}

impl Person {
    pub fn named(name: &str, age: i32) -> Self {
        let mut person = Person::default();
        person.set_name(name);
        person.set_age(age);
        person
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.base.set_field("Name", &mut self.name, name.into());
    }

    pub fn age(&self) -> i32 {
        self.age
    }

    pub fn set_age(&mut self, age: i32) {
        self.base.set_field("Age", &mut self.age, age);
    }

    pub fn middle_name(&self) -> Option<&str> {
        self.middle_name.as_deref()
    }

    pub fn set_middle_name(&mut self, middle_name: Option<String>) {
        self.base.set_field("MiddleName", &mut self.middle_name, middle_name);
    }

    pub fn addresses(&self) -> &[EntityRef<Address>] {
        &self.addresses
    }

    pub fn add_address(&mut self, address: EntityRef<Address>) {
        self.addresses.push(address);
    }
}

impl Entity for Person {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "Name" => Some(self.name.clone().into()),
            "Age" => Some(self.age.into()),
            "MiddleName" => Some(self.middle_name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Name" => self.set_name(value.into_typed::<String>()?),
            "Age" => self.set_age(value.into_typed()?),
            "MiddleName" => self.set_middle_name(value.into_typed()?),
            _ => return Err(unknown_field("Person", field)),
        }
        Ok(())
    }

    fn collection(&self, field: &str) -> Option<Vec<AnyEntity>> {
        match field {
            "Addresses" => Some(erase_all(&self.addresses)),
            _ => None,
        }
    }

    fn set_collection(&mut self, field: &str, items: Vec<AnyEntity>) -> OrmResult<()> {
        match field {
            "Addresses" => {
                self.addresses = downcast_all(&items)?;
                Ok(())
            }
            _ => Err(unknown_field("Person", field)),
        }
    }
}

impl EntityType for Person {
    fn metadata() -> OrmResult<EntityMetadata> {
        EntityMetadata::builder("Person")
            .field(FieldMetadata::new("Name", FieldType::String).mandatory().max_length(50))
            .field(FieldMetadata::new("Age", FieldType::Integer))
            .field(FieldMetadata::new("MiddleName", FieldType::String))
            .field(
                FieldMetadata::collection("Addresses", "Address", "Person")
                    .cascade(Cascade::SaveDelete)
                    .eager(),
            )
            .build()
    }
}

#[derive(Debug, Default)]
pub struct Address {
    base: EntityBase,
    street: String,
    person: Option<EntityRef<Person>>,
}

impl Address {
    pub fn new(street: &str) -> Self {
        let mut address = Address::default();
        address.set_street(street);
        address
    }

    pub fn street(&self) -> &str {
        &self.street
    }

    pub fn set_street(&mut self, street: impl Into<String>) {
        self.base.set_field("Street", &mut self.street, street.into());
    }

    pub fn person(&self) -> Option<&EntityRef<Person>> {
        self.person.as_ref()
    }

    pub fn set_person(&mut self, person: Option<EntityRef<Person>>) {
        self.base.set_association("Person", &mut self.person, person);
    }
}

impl Entity for Address {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "Street" => Some(self.street.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Street" => self.set_street(value.into_typed::<String>()?),
            _ => return Err(unknown_field("Address", field)),
        }
        Ok(())
    }

    fn reference(&self, field: &str) -> Option<AnyEntity> {
        match field {
            "Person" => self.person.as_ref().map(EntityRef::to_any),
            _ => None,
        }
    }

    fn set_reference(&mut self, field: &str, target: Option<AnyEntity>) -> OrmResult<()> {
        match field {
            "Person" => {
                let person = target.map(|t| t.downcast::<Person>()).transpose()?;
                self.set_person(person);
                Ok(())
            }
            _ => Err(unknown_field("Address", field)),
        }
    }
}

impl EntityType for Address {
    fn metadata() -> OrmResult<EntityMetadata> {
        EntityMetadata::builder("Address")
            .field(FieldMetadata::new("Street", FieldType::String).mandatory())
            .field(
                FieldMetadata::reference("Person", "Person")
                    .mandatory()
                    .reference_field("Addresses"),
            )
            .build()
    }
}

/// Artist with a mandatory agent that is saved along but never deleted along
#[derive(Debug, Default)]
pub struct Artist {
    base: EntityBase,
    name: String,
    agent: Option<EntityRef<Person>>,
}

impl Artist {
    pub fn new(name: &str, agent: Option<EntityRef<Person>>) -> Self {
        let mut artist = Artist::default();
        artist.set_name(name);
        artist.set_agent(agent);
        artist
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.base.set_field("Name", &mut self.name, name.into());
    }

    pub fn agent(&self) -> Option<&EntityRef<Person>> {
        self.agent.as_ref()
    }

    pub fn set_agent(&mut self, agent: Option<EntityRef<Person>>) {
        self.base.set_association("Agent", &mut self.agent, agent);
    }
}

impl Entity for Artist {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "Name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Name" => self.set_name(value.into_typed::<String>()?),
            _ => return Err(unknown_field("Artist", field)),
        }
        Ok(())
    }

    fn reference(&self, field: &str) -> Option<AnyEntity> {
        match field {
            "Agent" => self.agent.as_ref().map(EntityRef::to_any),
            _ => None,
        }
    }

    fn set_reference(&mut self, field: &str, target: Option<AnyEntity>) -> OrmResult<()> {
        match field {
            "Agent" => {
                let agent = target.map(|t| t.downcast::<Person>()).transpose()?;
                self.set_agent(agent);
                Ok(())
            }
            _ => Err(unknown_field("Artist", field)),
        }
    }
}

impl EntityType for Artist {
    fn metadata() -> OrmResult<EntityMetadata> {
        EntityMetadata::builder("Artist")
            .field(FieldMetadata::new("Name", FieldType::String).mandatory())
            .field(
                FieldMetadata::reference("Agent", "Person")
                    .mandatory()
                    .cascade(Cascade::Save),
            )
            .build()
    }
}

pub fn resolver() -> Arc<MetadataResolver> {
    Arc::new(
        MetadataResolver::builder()
            .register::<Person>()
            .register::<Address>()
            .register::<Artist>()
            .build()
            .expect("fixture metadata is valid"),
    )
}

pub fn person_row(id: i64, version: i64, name: &str, age: i32) -> ValueRow {
    ValueRow::new()
        .with("Id", id)
        .with("Deleted", false)
        .with("Version", version)
        .with("Name", name)
        .with("Age", age)
        .with("MiddleName", DatabaseValue::Null)
}

pub fn address_row(id: i64, street: &str, person: i64) -> ValueRow {
    ValueRow::new()
        .with("Id", id)
        .with("Deleted", false)
        .with("Version", 1i64)
        .with("Street", street)
        .with("Person", person)
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Transaction calls and statement texts, in order
    pub log: Vec<String>,
    pub queries: Vec<Query>,
    pub readers: VecDeque<Vec<ValueRow>>,
    pub scalars: VecDeque<DatabaseValue>,
    pub affected: VecDeque<u64>,
    pub fail_on: Option<String>,
    pub next_id: i64,
    pub open: bool,
}

/// Connection double; clones share their state
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue the rows returned by the next reader call
    pub fn push_rows(&self, rows: Vec<ValueRow>) {
        self.state().readers.push_back(rows);
    }

    pub fn push_scalar(&self, value: DatabaseValue) {
        self.state().scalars.push_back(value);
    }

    /// Queue the affected row count of the next non-query call
    pub fn push_affected(&self, affected: u64) {
        self.state().affected.push_back(affected);
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(&self, pattern: &str) {
        self.state().fail_on = Some(pattern.to_string());
    }

    /// Append a marker, used by listeners to show their position
    pub fn note(&self, entry: &str) {
        self.state().log.push(entry.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.state().queries.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.log.clear();
        state.queries.clear();
    }

    fn record(&self, query: &Query) -> OrmResult<()> {
        let mut state = self.state();
        state.log.push(query.command.clone());
        state.queries.push(query.clone());
        match &state.fail_on {
            Some(pattern) if query.command.contains(pattern.as_str()) => {
                Err(OrmError::connection(format!("statement rejected: {}", query.command)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn open(&mut self) -> OrmResult<()> {
        self.state().open = true;
        Ok(())
    }

    async fn close(&mut self) -> OrmResult<()> {
        self.state().open = false;
        self.note("CLOSE");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    async fn begin_transaction(&mut self, _isolation_level: IsolationLevel) -> OrmResult<()> {
        self.note("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> OrmResult<()> {
        self.note("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> OrmResult<()> {
        self.note("ROLLBACK");
        Ok(())
    }

    async fn save(&mut self, savepoint: &str) -> OrmResult<()> {
        self.note(&format!("SAVEPOINT {}", savepoint));
        Ok(())
    }

    async fn rollback_to(&mut self, savepoint: &str) -> OrmResult<()> {
        self.note(&format!("ROLLBACK TO {}", savepoint));
        Ok(())
    }

    async fn release(&mut self, savepoint: &str) -> OrmResult<()> {
        self.note(&format!("RELEASE {}", savepoint));
        Ok(())
    }

    async fn execute_non_query(&mut self, query: &Query) -> OrmResult<u64> {
        self.record(query)?;
        Ok(self.state().affected.pop_front().unwrap_or(1))
    }

    async fn execute_scalar(&mut self, query: &Query) -> OrmResult<DatabaseValue> {
        self.record(query)?;
        Ok(self.state().scalars.pop_front().unwrap_or(DatabaseValue::Null))
    }

    async fn execute_reader(&mut self, query: &Query) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.record(query)?;
        let rows = self.state().readers.pop_front().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| Box::new(row) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn execute_insert(&mut self, query: &Query) -> OrmResult<i64> {
        self.record(query)?;
        let mut state = self.state();
        state.next_id += 1;
        Ok(state.next_id)
    }
}

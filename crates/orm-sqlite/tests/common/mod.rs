#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use kestrel_orm::{
    downcast_all, erase_all, unknown_field, AnyEntity, Cascade, Connection, DatabaseValue, Entity,
    EntityBase, EntityMetadata, EntityRef, EntityType, FieldMetadata, FieldType, MetadataResolver,
    OrmResult, SessionFactory,
};
use kestrel_sqlite::{SqliteConnection, SqliteConnectionFactory, SqliteTable};

#[derive(Debug, Default)]
pub struct Person {
    base: EntityBase,
    name: String,
    age: i32,
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
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Name" => self.set_name(value.into_typed::<String>()?),
            "Age" => self.set_age(value.into_typed()?),
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
    valid_from: Option<DateTime<Utc>>,
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

    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        self.valid_from
    }

    pub fn set_valid_from(&mut self, valid_from: Option<DateTime<Utc>>) {
        self.base.set_field("ValidFrom", &mut self.valid_from, valid_from);
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
            "ValidFrom" => Some(self.valid_from.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Street" => self.set_street(value.into_typed::<String>()?),
            "ValidFrom" => self.set_valid_from(value.into_typed()?),
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
            .field(FieldMetadata::new("ValidFrom", FieldType::Timestamp))
            .field(
                FieldMetadata::reference("Person", "Person")
                    .mandatory()
                    .reference_field("Addresses"),
            )
            .build()
    }
}

/// Points at a person without any cascade or inverse collection
#[derive(Debug, Default)]
pub struct Contract {
    base: EntityBase,
    title: String,
    person: Option<EntityRef<Person>>,
}

impl Contract {
    pub fn new(title: &str, person: EntityRef<Person>) -> Self {
        let mut contract = Contract::default();
        contract.base.set_field("Title", &mut contract.title, title.to_string());
        contract
            .base
            .set_association("Person", &mut contract.person, Some(person));
        contract
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Entity for Contract {
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
            "Title" => Some(self.title.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "Title" => {
                let title = value.into_typed::<String>()?;
                self.base.set_field("Title", &mut self.title, title);
                Ok(())
            }
            _ => Err(unknown_field("Contract", field)),
        }
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
                self.base.set_association("Person", &mut self.person, person);
                Ok(())
            }
            _ => Err(unknown_field("Contract", field)),
        }
    }
}

impl EntityType for Contract {
    fn metadata() -> OrmResult<EntityMetadata> {
        EntityMetadata::builder("Contract")
            .field(FieldMetadata::new("Title", FieldType::String).mandatory())
            .field(FieldMetadata::reference("Person", "Person").mandatory())
            .build()
    }
}

pub fn resolver() -> Arc<MetadataResolver> {
    Arc::new(
        MetadataResolver::builder()
            .register::<Person>()
            .register::<Address>()
            .register::<Contract>()
            .build()
            .expect("test metadata is valid"),
    )
}

/// A database file with every table created
pub struct TestDatabase {
    pub dir: TempDir,
    pub resolver: Arc<MetadataResolver>,
}

impl TestDatabase {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let resolver = resolver();
        let db = TestDatabase { dir, resolver };

        let mut connection = db.connection();
        connection.open().await.expect("open database");
        for table in SqliteTable::all(&db.resolver).expect("table schemas") {
            table.recreate(&mut connection).await.expect("create table");
        }
        connection.close().await.expect("close database");
        db
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.dir.path().join("people.db")
    }

    pub fn connection(&self) -> SqliteConnection {
        SqliteConnection::from_path(self.path())
    }

    pub fn factory(&self) -> SessionFactory {
        SessionFactory::new(
            Arc::new(SqliteConnectionFactory::from_path(self.path())),
            self.resolver.clone(),
        )
    }
}

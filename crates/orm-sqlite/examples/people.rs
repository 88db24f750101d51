//! People and their addresses, stored in SQLite
//!
//! Run with `cargo run -p kestrel-sqlite --example people [database file]`.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kestrel_orm::{
    downcast_all, erase_all, unknown_field, AnyEntity, Cascade, Connection, DatabaseValue, Entity,
    EntityBase, EntityListener, EntityMetadata, EntityRef, EntityType, FieldMetadata, FieldType,
    MetadataResolver, OrmError, OrmResult, SessionFactory,
};
use kestrel_sqlite::{SqliteConnection, SqliteConnectionFactory, SqliteTable};

#[derive(Debug, Default)]
struct Person {
    base: EntityBase,
    first_name: String,
    name: String,
    age: i32,
    addresses: Vec<EntityRef<Address>>,
}

impl Person {
    fn new(first_name: &str, name: &str, age: i32) -> Self {
        let mut person = Person::default();
        person.base.set_field("FirstName", &mut person.first_name, first_name.to_string());
        person.base.set_field("Name", &mut person.name, name.to_string());
        person.base.set_field("Age", &mut person.age, age);
        person
    }

    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.name)
    }

    fn is_legal_age(&self) -> bool {
        self.age >= 18
    }

    fn valid_addresses(&self) -> Vec<EntityRef<Address>> {
        let now = Utc::now();
        self.addresses
            .iter()
            .filter(|a| a.read().valid_from.map_or(true, |from| from <= now))
            .cloned()
            .collect()
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
            "FirstName" => Some(self.first_name.clone().into()),
            "Name" => Some(self.name.clone().into()),
            "Age" => Some(self.age.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "FirstName" => {
                let first_name = value.into_typed()?;
                self.base.set_field("FirstName", &mut self.first_name, first_name);
            }
            "Name" => {
                let name = value.into_typed()?;
                self.base.set_field("Name", &mut self.name, name);
            }
            "Age" => {
                let age = value.into_typed()?;
                self.base.set_field("Age", &mut self.age, age);
            }
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
            .field(FieldMetadata::new("FirstName", FieldType::String).mandatory().max_length(50))
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
struct Address {
    base: EntityBase,
    valid_from: Option<DateTime<Utc>>,
    zip: String,
    town: String,
    street: String,
    kind: String,
    person: Option<EntityRef<Person>>,
}

impl Address {
    fn new(street: &str, zip: &str, town: &str, kind: &str) -> Self {
        let mut address = Address::default();
        address.base.set_field("ValidFrom", &mut address.valid_from, Some(Utc::now()));
        address.base.set_field("Zip", &mut address.zip, zip.to_string());
        address.base.set_field("Town", &mut address.town, town.to_string());
        address.base.set_field("Street", &mut address.street, street.to_string());
        address.base.set_field("Type", &mut address.kind, kind.to_string());
        address
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
            "ValidFrom" => Some(self.valid_from.into()),
            "Zip" => Some(self.zip.clone().into()),
            "Town" => Some(self.town.clone().into()),
            "Street" => Some(self.street.clone().into()),
            "Type" => Some(self.kind.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "ValidFrom" => {
                let valid_from = value.into_typed()?;
                self.base.set_field("ValidFrom", &mut self.valid_from, valid_from);
            }
            "Zip" => {
                let zip = value.into_typed()?;
                self.base.set_field("Zip", &mut self.zip, zip);
            }
            "Town" => {
                let town = value.into_typed()?;
                self.base.set_field("Town", &mut self.town, town);
            }
            "Street" => {
                let street = value.into_typed()?;
                self.base.set_field("Street", &mut self.street, street);
            }
            "Type" => {
                let kind = value.into_typed()?;
                self.base.set_field("Type", &mut self.kind, kind);
            }
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
                self.base.set_association("Person", &mut self.person, person);
                Ok(())
            }
            _ => Err(unknown_field("Address", field)),
        }
    }
}

impl EntityType for Address {
    fn metadata() -> OrmResult<EntityMetadata> {
        EntityMetadata::builder("Address")
            .field(FieldMetadata::new("ValidFrom", FieldType::Timestamp))
            .field(FieldMetadata::new("Zip", FieldType::String).max_length(10))
            .field(FieldMetadata::new("Town", FieldType::String).mandatory())
            .field(FieldMetadata::new("Street", FieldType::String).mandatory())
            .field(FieldMetadata::new("Type", FieldType::String))
            .field(
                FieldMetadata::reference("Person", "Person")
                    .mandatory()
                    .reference_field("Addresses"),
            )
            .build()
    }
}

struct PersonListener;

impl EntityListener for PersonListener {
    fn before_insert(&self, entity: &mut dyn Entity, metadata: &EntityMetadata) -> OrmResult<()> {
        match entity.as_any().downcast_ref::<Person>() {
            Some(person) if person.age < 0 => Err(OrmError::Validation {
                entity: metadata.name().to_string(),
                field: "Age".to_string(),
                reason: "must not be negative".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// A person keeps at least one address
struct AddressListener;

impl EntityListener for AddressListener {
    fn before_delete(&self, entity: &mut dyn Entity, metadata: &EntityMetadata) -> OrmResult<()> {
        let Some(address) = entity.as_any().downcast_ref::<Address>() else {
            return Ok(());
        };
        let Some(person) = &address.person else {
            return Ok(());
        };
        let person = person.read();
        if person.base().is_deleted() || person.addresses.len() > 1 {
            return Ok(());
        }
        Err(OrmError::Validation {
            entity: metadata.name().to_string(),
            field: "Person".to_string(),
            reason: format!("{} would be left without an address", person.full_name()),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("kestrel=debug"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "people.db".to_string());
    let resolver = Arc::new(
        MetadataResolver::builder()
            .register::<Person>()
            .register::<Address>()
            .build()?,
    );

    // Fresh tables; children are dropped before the tables they reference
    let tables = SqliteTable::all(&resolver)?;
    let mut connection = SqliteConnection::from_path(&path);
    connection.open().await?;
    for table in tables.iter().rev() {
        table.drop(&mut connection).await?;
    }
    for table in &tables {
        table.create(&mut connection).await?;
    }
    connection.close().await?;

    let mut factory = SessionFactory::new(
        Arc::new(SqliteConnectionFactory::from_path(&path)),
        resolver.clone(),
    );
    factory.add_entity_listener("Person", Arc::new(PersonListener));
    factory.add_entity_listener("Address", Arc::new(AddressListener));

    let person = EntityRef::new(Person::new("Max", "Mustermann", 21));
    let address = EntityRef::new(Address::new("Samplestreet 75a", "0815", "SampleTown", "Business"));
    address
        .write()
        .set_reference("Person", Some(person.to_any()))?;
    person.write().addresses.push(address);

    let mut session = factory.open_session().await?;
    {
        let mut scope = session.begin_transaction().await?;
        scope.save_or_update(&person)?;
        scope.commit().await?;
    }
    session.close().await?;

    // A new session, so nothing is served from the identity map
    let mut session = factory.open_session().await?;
    let loaded = session.get_required::<Person>(person.id()).await?;
    {
        let loaded = loaded.read();
        println!(
            "Person: {}, is of legal age: {}",
            loaded.full_name(),
            loaded.is_legal_age()
        );
        for address in loaded.valid_addresses() {
            let address = address.read();
            println!("{}, {} {}, type={}", address.street, address.zip, address.town, address.kind);
        }
    }

    // Removing the only address is vetoed by the listener when committing
    let only_address = loaded.read().addresses[0].clone();
    {
        let mut scope = session.begin_transaction().await?;
        match scope.delete(&only_address) {
            Ok(()) => {
                if let Err(err) = scope.commit().await {
                    println!("The address could not be deleted. {}", err);
                }
            }
            Err(err) => {
                println!("The address could not be deleted. {}", err);
                scope.rollback().await?;
            }
        }
    }

    session.close().await?;
    Ok(())
}

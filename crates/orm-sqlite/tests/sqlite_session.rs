mod common;

use chrono::{TimeZone, Utc};

use common::{Address, Contract, Person, TestDatabase};
use kestrel_orm::{DeleteMode, Entity, EntityRef, OrmError, Predicate, SessionConfig};

fn person_with_addresses(name: &str, age: i32, streets: &[&str]) -> EntityRef<Person> {
    let person = EntityRef::new(Person::named(name, age));
    for street in streets {
        let address = EntityRef::new(Address::new(street));
        address.write().set_person(Some(person.clone()));
        person.write().add_address(address);
    }
    person
}

#[tokio::test]
async fn test_round_trip() {
    let db = TestDatabase::new().await;
    let factory = db.factory();
    let valid_from = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();

    let person = person_with_addresses("Max", 21, &["Samplestreet 75a", "Station Road 2"]);
    person.read().addresses()[0]
        .write()
        .set_valid_from(Some(valid_from));

    let mut session = factory.open_session().await.unwrap();
    session.save_or_update(&person).unwrap();
    let summary = session.commit().await.unwrap();
    assert_eq!(summary.inserted(), 3);
    let id = person.id();
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    let loaded = session.get_required::<Person>(id).await.unwrap();
    {
        let loaded = loaded.read();
        assert_eq!(loaded.name(), "Max");
        assert_eq!(loaded.age(), 21);
        assert_eq!(loaded.base().version(), 1);
        assert!(!loaded.base().is_dirty());
        assert_eq!(loaded.addresses().len(), 2);
    }

    let first = loaded.read().addresses()[0].clone();
    assert_eq!(first.read().street(), "Samplestreet 75a");
    assert_eq!(first.read().valid_from(), Some(valid_from));
    assert!(first.read().person().unwrap().ptr_eq(&loaded));
    assert!(loaded.read().addresses()[1].read().valid_from().is_none());
}

#[tokio::test]
async fn test_queries_and_counts() {
    let db = TestDatabase::new().await;
    let factory = db.factory();

    let mut session = factory.open_session().await.unwrap();
    for (name, age) in [("Max", 21), ("Moritz", 17), ("Erika", 45)] {
        session
            .save_or_update(&person_with_addresses(name, age, &["Main Street 1"]))
            .unwrap();
    }
    session.commit().await.unwrap();
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    let adults = Predicate::<Person>::new(|x| x.field("Age").ge(18));
    let people = session.query(&adults).await.unwrap();
    let mut names: Vec<String> = people.iter().map(|p| p.read().name().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["Erika", "Max"]);
    assert_eq!(session.count(&adults).await.unwrap(), 2);

    let starting_with_m = Predicate::<Person>::new(|x| x.field("Name").like("M%"));
    assert_eq!(session.count(&starting_with_m).await.unwrap(), 2);

    // Dotted paths join the referenced table
    let addresses = session
        .query(&Predicate::<Address>::new(|x| {
            x.field("Person.Name").equals("Erika")
        }))
        .await
        .unwrap();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].read().person().unwrap().read().age(), 45);

    let undated = Predicate::<Address>::new(|x| x.field("ValidFrom").is_null());
    assert_eq!(session.count(&undated).await.unwrap(), 3);
}

#[tokio::test]
async fn test_stale_session_gets_a_conflict() {
    let db = TestDatabase::new().await;
    let factory = db.factory();

    let mut setup = factory.open_session().await.unwrap();
    let person = EntityRef::new(Person::named("Max", 21));
    setup.save_or_update(&person).unwrap();
    setup.commit().await.unwrap();
    let id = person.id();
    setup.close().await.unwrap();

    let mut first = factory.open_session().await.unwrap();
    let mut second = factory.open_session().await.unwrap();
    let mine = first.get_required::<Person>(id).await.unwrap();
    let theirs = second.get_required::<Person>(id).await.unwrap();

    mine.write().set_age(22);
    first.commit().await.unwrap();
    assert_eq!(mine.read().base().version(), 2);

    theirs.write().set_name("Moritz");
    let err = second.commit().await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(theirs.read().base().version(), 1);
    assert!(theirs.read().base().is_dirty());

    let mut check = factory.open_session().await.unwrap();
    let stored = check.get_required::<Person>(id).await.unwrap();
    assert_eq!(stored.read().name(), "Max");
    assert_eq!(stored.read().age(), 22);
    assert_eq!(stored.read().base().version(), 2);
}

#[tokio::test]
async fn test_soft_delete_cascades_to_addresses() {
    let db = TestDatabase::new().await;
    let factory = db.factory();

    let mut session = factory.open_session().await.unwrap();
    let person = person_with_addresses("Max", 21, &["Main Street 1", "Station Road 2"]);
    session.save_or_update(&person).unwrap();
    session.commit().await.unwrap();
    let id = person.id();

    session.delete(&person).unwrap();
    let summary = session.commit().await.unwrap();
    assert_eq!(summary.deleted(), 3);
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    assert!(session.get::<Person>(id).await.unwrap().is_none());
    let all = Predicate::<Address>::new(|x| x.field("Street").is_not_null());
    assert_eq!(session.count(&all).await.unwrap(), 0);

    // The rows are still there for sessions that do not filter them
    let unfiltered = db
        .factory()
        .with_config(SessionConfig::default().with_filter_deleted(false))
        .unwrap();
    let mut session = unfiltered.open_session().await.unwrap();
    let deleted = session.get_required::<Person>(id).await.unwrap();
    assert!(deleted.read().base().is_deleted());
    assert_eq!(deleted.read().base().version(), 2);
    assert_eq!(session.count(&all).await.unwrap(), 2);
}

#[tokio::test]
async fn test_mandatory_reference_blocks_delete_in_session() {
    let db = TestDatabase::new().await;
    let factory = db.factory();

    let mut session = factory.open_session().await.unwrap();
    let person = EntityRef::new(Person::named("Max", 21));
    let contract = EntityRef::new(Contract::new("Lease", person.clone()));
    session.save_or_update(&person).unwrap();
    session.save_or_update(&contract).unwrap();
    session.commit().await.unwrap();
    let contract_id = contract.id();
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    let contract = session.get_required::<Contract>(contract_id).await.unwrap();
    assert_eq!(contract.read().title(), "Lease");
    let holder = session.get_required::<Person>(person.id()).await.unwrap();

    let err = session.delete(&holder).unwrap_err();
    assert!(matches!(
        err,
        OrmError::ReferentialIntegrity { ref referenced_by, ref field, .. }
            if referenced_by == "Contract" && field == "Person"
    ));
    assert!(!holder.read().base().is_deleted());
}

#[tokio::test]
async fn test_failed_hard_delete_leaves_rows_intact() {
    let db = TestDatabase::new().await;
    let factory = db
        .factory()
        .with_config(SessionConfig::default().with_delete_mode(DeleteMode::Hard))
        .unwrap();

    let mut session = factory.open_session().await.unwrap();
    let person = person_with_addresses("Max", 21, &["Main Street 1"]);
    let contract = EntityRef::new(Contract::new("Lease", person.clone()));
    session.save_or_update(&person).unwrap();
    session.save_or_update(&contract).unwrap();
    session.commit().await.unwrap();
    let id = person.id();
    session.close().await.unwrap();

    // The contract is never loaded, so only the database sees the reference
    let mut session = factory.open_session().await.unwrap();
    let loaded = session.get_required::<Person>(id).await.unwrap();
    session.delete(&loaded).unwrap();
    let err = session.commit().await.unwrap_err();
    assert!(matches!(
        err,
        OrmError::CommitFailed { ref operation, ref entity, .. } if operation == "delete" && entity == "Person"
    ));
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    let stored = session.get_required::<Person>(id).await.unwrap();
    assert_eq!(stored.read().addresses().len(), 1);
    let contracts = Predicate::<Contract>::new(|x| x.field("Person").equals(id));
    assert_eq!(session.count(&contracts).await.unwrap(), 1);
}

#[tokio::test]
async fn test_savepoint_rollback_discards_rows() {
    let db = TestDatabase::new().await;
    let factory = db.factory();
    let kept = EntityRef::new(Person::named("Max", 21));
    let discarded = EntityRef::new(Person::named("Moritz", 17));

    let mut session = factory.open_session().await.unwrap();
    {
        let mut scope = session.begin_transaction().await.unwrap();
        scope.save_or_update(&kept).unwrap();

        let mut inner = scope.begin_transaction().await.unwrap();
        inner.save_or_update(&discarded).unwrap();
        kestrel_orm::Session::commit(&mut inner).await.unwrap();
        assert_ne!(discarded.id(), 0);
        inner.rollback().await.unwrap();
        assert_eq!(discarded.id(), 0);

        scope.evict(&discarded).unwrap();
        scope.commit().await.unwrap();
    }
    session.close().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    let everyone = Predicate::<Person>::new(|x| x.field("Age").ge(0));
    let people = session.query(&everyone).await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].read().name(), "Max");
}

#[tokio::test]
async fn test_dropped_scope_is_rolled_back() {
    let db = TestDatabase::new().await;
    let factory = db.factory();
    let person = EntityRef::new(Person::named("Max", 21));

    let mut session = factory.open_session().await.unwrap();
    {
        let mut scope = session.begin_transaction().await.unwrap();
        scope.save_or_update(&person).unwrap();
        kestrel_orm::Session::commit(&mut scope).await.unwrap();
    }
    session.close().await.unwrap();
    assert_eq!(person.id(), 0);

    let mut session = factory.open_session().await.unwrap();
    let everyone = Predicate::<Person>::new(|x| x.field("Age").ge(0));
    assert_eq!(session.count(&everyone).await.unwrap(), 0);
}

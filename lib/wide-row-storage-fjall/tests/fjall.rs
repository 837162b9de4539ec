use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use wide_row_storage::{
    ColumnAddress, Delete, ExecutionContext, ObjectRef, PersistenceHandler, Persistent, Put,
    StorageError, StoreConfig, StoreManager, Value,
};
use wide_row_storage_fjall::{Datastore, FjallDatastore, TableHandle, TableSchema};

#[derive(Persistent, Debug, Clone, Default, PartialEq)]
#[persistent(table = "accounts")]
struct Account {
    #[primary_key(sequence)]
    id: i64,
    #[column(name = "profile:owner")]
    owner: String,
    balance: f64,
    frozen: bool,
    memo: Option<String>,
}

/// Accounts have no relations, so nothing here is ever called.
struct NoRelations;

#[async_trait]
impl ExecutionContext for NoRelations {
    async fn persist_or_fetch(&self, object: &ObjectRef) -> Result<Value, StorageError> {
        Err(StorageError::UnsupportedType(object.type_name.clone()))
    }

    async fn materialize(&self, _key: &Value, target_type: &str) -> Result<ObjectRef, StorageError> {
        Err(StorageError::UnsupportedType(target_type.to_string()))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StorageError> {
        Err(StorageError::UnsupportedType(object.type_name.clone()))
    }
}

fn schema(table: &str, families: &[&str]) -> TableSchema {
    TableSchema {
        table: table.to_string(),
        families: families.iter().map(|f| f.to_string()).collect(),
    }
}

fn config() -> StoreConfig {
    StoreConfig::new()
        .eviction_interval(Duration::ZERO)
        .auto_create_schema(true)
}

#[tokio::test]
async fn tables_must_exist_before_opening() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();

    assert!(datastore.open_table("people").await.is_err());
    datastore
        .create_schema(&schema("people", &["people", "details"]))
        .await
        .unwrap();
    assert!(datastore.has_table("people"));
    assert_eq!(
        datastore.families("people").unwrap(),
        ["details", "people"]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>()
    );
    assert!(datastore.open_table("people").await.is_ok());
}

#[tokio::test]
async fn invalid_table_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();

    let err = datastore
        .create_schema(&schema("no spaces", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Usage(_)));
}

#[tokio::test]
async fn rows_are_isolated_and_deletable() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();
    datastore
        .create_schema(&schema("people", &["people"]))
        .await
        .unwrap();
    let table = datastore.open_table("people").await.unwrap();
    let name = ColumnAddress::new("people", "name");
    let age = ColumnAddress::new("people", "age");

    table
        .put(
            Put::new(b"ab".to_vec())
                .add(name.clone(), b"short".to_vec())
                .add(age.clone(), 30i32.to_be_bytes().to_vec()),
        )
        .await
        .unwrap();
    table
        .put(Put::new(b"abc".to_vec()).add(name.clone(), b"long".to_vec()))
        .await
        .unwrap();

    let short = table.get(b"ab").await.unwrap();
    assert_eq!(short.cells.len(), 2);
    assert_eq!(short.value(&name), Some(&b"short"[..]));

    table
        .delete(Delete::columns(
            b"ab".to_vec(),
            [age.clone()].into_iter().collect(),
        ))
        .await
        .unwrap();
    assert_eq!(table.get(b"ab").await.unwrap().cells.len(), 1);

    table.delete(Delete::row(b"ab".to_vec())).await.unwrap();
    assert!(!table.exists(b"ab").await.unwrap());
    assert!(table.exists(b"abc").await.unwrap());
    assert!(table.get(b"ab").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_families_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();
    datastore
        .create_schema(&schema("people", &["people"]))
        .await
        .unwrap();
    let table = datastore.open_table("people").await.unwrap();

    let err = table
        .put(Put::new(b"a".to_vec()).add(ColumnAddress::new("nope", "x"), b"1".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Datastore { .. }));
    assert!(!table.exists(b"a").await.unwrap());
}

#[tokio::test]
async fn counters_increment_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();
    datastore
        .create_schema(&schema("seq", &["seq"]))
        .await
        .unwrap();
    let table = datastore.open_table("seq").await.unwrap();
    let column = ColumnAddress::new("seq", "__sequence__");

    assert_eq!(
        table
            .increment_column_value(b"__sequence__", &column, 1)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        table
            .increment_column_value(b"__sequence__", &column, 10)
            .await
            .unwrap(),
        11
    );
}

#[tokio::test]
async fn objects_survive_reopening_the_keyspace() {
    let dir = tempfile::tempdir().unwrap();

    let mut account = Account {
        owner: "alice".into(),
        balance: 12.5,
        frozen: true,
        memo: None,
        ..Default::default()
    };
    {
        let store = StoreManager::open(FjallDatastore::open(dir.path()).unwrap(), config()).unwrap();
        let handler = PersistenceHandler::new(store.clone());
        assert!(handler.assign_identity(&mut account).await.unwrap());
        assert_eq!(account.id, 1);
        handler.insert_object(&NoRelations, &account).await.unwrap();
        store.datastore().persist().unwrap();
        store.close().await.unwrap();
    }

    let store = StoreManager::open(FjallDatastore::open(dir.path()).unwrap(), config()).unwrap();
    let handler = PersistenceHandler::new(store.clone());
    let mut loaded = Account {
        id: 1,
        ..Default::default()
    };
    handler
        .fetch_object(&NoRelations, &mut loaded, &[1, 2, 3, 4])
        .await
        .unwrap();
    assert_eq!(loaded, account);

    // The sequence continues from the stored counter.
    let mut next = Account::default();
    handler.assign_identity(&mut next).await.unwrap();
    assert_eq!(next.id, 2);
    store.close().await.unwrap();
}

#[tokio::test]
async fn scan_groups_cells_by_row() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();
    datastore
        .create_schema(&schema("people", &["people", "details"]))
        .await
        .unwrap();
    let table = datastore.open_table("people").await.unwrap();
    let name = ColumnAddress::new("details", "name");
    let age = ColumnAddress::new("people", "age");

    assert!(table.scan().await.unwrap().is_empty());
    table
        .put(
            Put::new(b"ab".to_vec())
                .add(name.clone(), b"short".to_vec())
                .add(age.clone(), 30i32.to_be_bytes().to_vec()),
        )
        .await
        .unwrap();
    table
        .put(Put::new(b"abc".to_vec()).add(name.clone(), b"long".to_vec()))
        .await
        .unwrap();

    let rows = table.scan().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row, b"ab".to_vec());
    assert_eq!(rows[0].cells.len(), 2);
    assert_eq!(rows[0].value(&age), Some(&30i32.to_be_bytes()[..]));
    assert_eq!(rows[1].row, b"abc".to_vec());
    assert_eq!(rows[1].value(&name), Some(&b"long"[..]));
}

#[tokio::test]
async fn overlong_family_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = FjallDatastore::open(dir.path()).unwrap();
    let long = "f".repeat(usize::from(u16::MAX) + 1);

    let err = datastore
        .create_schema(&schema("people", &["people", long.as_str()]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Usage(_)));

    datastore
        .create_schema(&schema("people", &["people"]))
        .await
        .unwrap();
    let table = datastore.open_table("people").await.unwrap();
    let column = ColumnAddress::new(long.as_str(), "x");
    assert!(
        table
            .put(Put::new(b"a".to_vec()).add(column.clone(), b"1".to_vec()))
            .await
            .is_err()
    );
    assert!(
        table
            .delete(Delete::columns(b"a".to_vec(), [column].into_iter().collect()))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn extent_reads_every_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreManager::open(FjallDatastore::open(dir.path()).unwrap(), config()).unwrap();
    let handler = PersistenceHandler::new(store.clone());

    let mut inserted = Vec::new();
    for (owner, balance) in [("alice", 12.5), ("bob", 3.0), ("carol", 0.25)] {
        let mut account = Account {
            owner: owner.into(),
            balance,
            ..Default::default()
        };
        handler.assign_identity(&mut account).await.unwrap();
        handler.insert_object(&NoRelations, &account).await.unwrap();
        inserted.push(account);
    }

    // The sequence counter shares the table but is not an account.
    let accounts = handler.fetch_extent::<Account>(&NoRelations).await.unwrap();
    assert_eq!(accounts, inserted);
    store.close().await.unwrap();
}

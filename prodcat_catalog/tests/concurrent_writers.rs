//! Many writers against one store, with no coordination beyond the store's conditional updates.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use prodcat_catalog::layout::ProductTable;
use prodcat_catalog::store::mem::MemRecordStore;
use prodcat_catalog::store::{Labels, RecordBody};
use prodcat_catalog::{
    CatalogLocation, CatalogUpdater, Mapping, Migrator, ProductCatalog, RecordStore, RetryPolicy,
    UpdateRequest, Value,
};

const WRITERS: usize = 16;

fn retry() -> RetryPolicy {
    RetryPolicy::new(
        NonZeroUsize::new(100).unwrap(),
        Duration::from_millis(5),
    )
}

fn updater(store: &Arc<MemRecordStore>) -> CatalogUpdater {
    CatalogUpdater::new(Arc::clone(store) as _, CatalogLocation::default(), retry())
}

fn entry(key: String, value: i64) -> Mapping {
    Mapping::from([(key, Value::Integer(value))])
}

async fn catalog(store: &MemRecordStore) -> ProductCatalog {
    ProductCatalog::load(store, &CatalogLocation::default(), false)
        .await
        .unwrap()
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn disjoint_keys_of_one_version() {
    let store = Arc::new(MemRecordStore::new());

    let writers = (0..WRITERS).map(|i| {
        let updater = updater(&store);
        tokio::spawn(async move {
            let request = UpdateRequest::write("sat", "2.4.0", entry(format!("writer_{i}"), i as i64));
            updater.apply(&request).await
        })
    });
    for result in join_all(writers).await {
        result.unwrap().unwrap();
    }

    let catalog = catalog(&store).await;
    let data = catalog.get("sat", "2.4.0").unwrap().data();
    assert_eq!(data.len(), WRITERS);
    for i in 0..WRITERS {
        assert_eq!(
            data.get(&format!("writer_{i}")),
            Some(&Value::Integer(i as i64))
        );
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn versions_of_many_products() {
    let store = Arc::new(MemRecordStore::new());

    let writers = (0..WRITERS).map(|i| {
        let updater = updater(&store);
        tokio::spawn(async move {
            let product = format!("product-{}", i % 4);
            let version = format!("1.{i}.0");
            updater
                .apply(&UpdateRequest::write(product, version, entry("chart".to_string(), i as i64)))
                .await
        })
    });
    for result in join_all(writers).await {
        result.unwrap().unwrap();
    }

    let catalog = catalog(&store).await;
    for i in 0..WRITERS {
        let product = format!("product-{}", i % 4);
        let found = catalog.get(&product, &format!("1.{i}.0")).unwrap();
        assert_eq!(found.data().get("chart"), Some(&Value::Integer(i as i64)));
    }

    // the index lists exactly what the detail records hold
    let index = store.snapshot("product-catalog", "services").unwrap();
    let index = ProductTable::decode("product-catalog", &index.body.data).unwrap();
    assert_eq!(index.products().count(), 4);
    for (product, versions) in index.products() {
        assert_eq!(versions.len(), WRITERS / 4, "{product}");
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn deletes_alongside_writes() {
    let store = Arc::new(MemRecordStore::new());
    for i in 0..WRITERS {
        updater(&store)
            .apply(&UpdateRequest::write("cos", format!("{i}.0"), entry("n".to_string(), 0)))
            .await
            .unwrap();
    }

    // even versions are removed while odd versions are updated
    let tasks = (0..WRITERS).map(|i| {
        let updater = updater(&store);
        tokio::spawn(async move {
            let request = if i % 2 == 0 {
                UpdateRequest::delete("cos", format!("{i}.0"))
            } else {
                UpdateRequest::write("cos", format!("{i}.0"), entry("n".to_string(), 1))
            };
            updater.apply(&request).await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let catalog = catalog(&store).await;
    let mut versions: Vec<_> = catalog.versions("cos").map(|p| p.version().to_string()).collect();
    versions.sort();
    let mut expected: Vec<_> = (0..WRITERS)
        .filter(|i| i % 2 == 1)
        .map(|i| format!("{i}.0"))
        .collect();
    expected.sort();
    assert_eq!(versions, expected);
    for version in catalog.versions("cos") {
        assert_eq!(version.data().get("n"), Some(&Value::Integer(1)));
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn migration_alongside_installers() {
    let store = Arc::new(MemRecordStore::new());
    store
        .create(
            "cray-product-catalog",
            "services",
            RecordBody {
                data: [
                    ("sat".to_string(), "2.3.0: {chart: legacy}".to_string()),
                    ("cos".to_string(), "1.0.0: {chart: legacy}".to_string()),
                ]
                .into_iter()
                .collect(),
                labels: Labels::new(),
            },
        )
        .await
        .unwrap();

    let migration = {
        let migrator = Migrator::new(Arc::clone(&store) as _, "product-catalog", retry());
        tokio::spawn(async move { migrator.migrate("cray-product-catalog", "services").await })
    };
    let installers = (0..WRITERS).map(|i| {
        let updater = updater(&store);
        tokio::spawn(async move {
            updater
                .apply(&UpdateRequest::write("sat", format!("2.4.{i}"), entry("chart".to_string(), i as i64)))
                .await
        })
    });
    for result in join_all(installers).await {
        result.unwrap().unwrap();
    }
    migration.await.unwrap().unwrap();

    let catalog = catalog(&store).await;
    assert_eq!(
        catalog.get("sat", "2.3.0").unwrap().data().get("chart"),
        Some(&Value::from("legacy"))
    );
    assert!(catalog.get("cos", "1.0.0").is_some());
    for i in 0..WRITERS {
        assert!(catalog.get("sat", &format!("2.4.{i}")).is_some(), "2.4.{i}");
    }
}

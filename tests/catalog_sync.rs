use chrono::Utc;
use modeldepot::catalog::{load_catalog, ArtifactLayout, CatalogSource, CatalogStore};
use modeldepot::error::{CatalogLoadError, DepotError};
use modeldepot::model::InstallState;
use modeldepot::store::{JsonSnapshot, MemoryPackageStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_catalog(path: &Path, models: &str) {
    std::fs::write(path, format!(r#"{{"version": 1, "models": [{models}]}}"#)).unwrap();
}

const GEMMA: &str = r#"{
    "id": "gemma-2b",
    "display_name": "Gemma 2B",
    "version": "1",
    "provider": "MEDIA_PIPE",
    "delivery": "LOCAL_ARCHIVE",
    "size_bytes": 4096,
    "capabilities": ["chat"],
    "manifest_url": "https://catalog.example.com/manifests/gemma-2b"
}"#;

const PHI: &str = r#"{
    "id": "phi-mini",
    "display_name": "Phi Mini",
    "version": "main",
    "provider": "ONNX_RUNTIME",
    "delivery": "LOCAL_ARCHIVE",
    "size_bytes": 2048,
    "manifest_url": "hf://microsoft/phi-mini?artifact=model.onnx"
}"#;

fn open_store(dir: &Path) -> CatalogStore {
    let packages =
        MemoryPackageStore::open(JsonSnapshot::new(dir.join("state/packages.json"))).unwrap();
    CatalogStore::new(Arc::new(packages), ArtifactLayout::new(dir.join("models")))
}

#[tokio::test]
async fn test_sync_survives_restart_and_keeps_local_state() {
    let temp_dir = TempDir::new().unwrap();
    let catalog_file = temp_dir.path().join("catalog.json");
    let client = reqwest::Client::new();

    write_catalog(&catalog_file, &format!("{GEMMA}, {PHI}"));
    let store = open_store(temp_dir.path());
    let packages = load_catalog(&CatalogSource::Bundled(catalog_file.clone()), &client)
        .await
        .unwrap();
    let summary = store.replace_catalog(packages).await.unwrap();
    assert_eq!(summary.inserted, 2);

    store
        .update_install_state("gemma-2b", InstallState::Installed, Utc::now())
        .await
        .unwrap();
    drop(store);

    // A later listing renames gemma and no longer mentions phi
    write_catalog(
        &catalog_file,
        &GEMMA.replace("Gemma 2B", "Gemma 2B Instruct"),
    );
    let store = open_store(temp_dir.path());
    assert_eq!(store.list().len(), 2);

    let packages = load_catalog(&CatalogSource::Bundled(catalog_file), &client)
        .await
        .unwrap();
    let summary = store.replace_catalog(packages).await.unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.merged, 1);
    assert_eq!(summary.retained, 1);

    let gemma = store.get("gemma-2b").unwrap();
    assert_eq!(gemma.display_name, "Gemma 2B Instruct");
    assert_eq!(gemma.install_state, InstallState::Installed);
    assert!(store.get("phi-mini").is_some());
}

#[tokio::test]
async fn test_missing_and_malformed_catalogs() {
    let temp_dir = TempDir::new().unwrap();
    let client = reqwest::Client::new();

    let missing = load_catalog(
        &CatalogSource::Bundled(temp_dir.path().join("absent.json")),
        &client,
    )
    .await
    .unwrap_err();
    assert!(matches!(missing, CatalogLoadError::Missing(_)));

    let path = temp_dir.path().join("catalog.json");
    write_catalog(&path, &GEMMA.replace("\"gemma-2b\"", "\"  \""));
    let blank = load_catalog(&CatalogSource::Bundled(path.clone()), &client)
        .await
        .unwrap_err();
    assert!(matches!(blank, CatalogLoadError::MissingIdentifier { index: 0 }));
    assert!(!DepotError::from(blank).can_retry());

    write_catalog(&path, &PHI.replace("ONNX_RUNTIME", "QUANTUM"));
    let malformed = load_catalog(&CatalogSource::Bundled(path), &client)
        .await
        .unwrap_err();
    assert!(matches!(malformed, CatalogLoadError::Malformed(_)));
}

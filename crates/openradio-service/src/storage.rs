//! JSON-file persistence for favorites, user-added ("local") stations and the
//! latest played station.
//!
//! Each store keeps its records in memory and rewrites its file after every
//! change.  Files are read synchronously once at startup; writes go through
//! `tokio::fs` so they never block the core loop.

use std::path::{Path, PathBuf};

use openradio_proto::station::Station;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

const FAVORITES_FILE: &str = "favorites.json";
const LOCALS_FILE: &str = "locals.json";
const LATEST_FILE: &str = "latest_station.json";

const STORE_VERSION: u32 = 1;

/// Ids handed out to local stations start here, above the catalogue range.
pub const LOCAL_ID_BASE: u32 = 3_000_000_000;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    stations: Vec<Station>,
}

/// Keyed collection of stations persisted to one file.
pub struct StationStore {
    path: PathBuf,
    stations: RwLock<Vec<Station>>,
}

impl StationStore {
    pub fn open(path: PathBuf) -> Self {
        let stations = load_file::<StoreFile>(&path)
            .map(|f| f.stations)
            .unwrap_or_default();
        debug!("storage: {} stations in {:?}", stations.len(), path);
        Self {
            path,
            stations: RwLock::new(stations),
        }
    }

    /// Insert `station`, overwriting any record with the same id.
    pub async fn add(&self, station: Station) -> Result<()> {
        let mut stations = self.stations.write().await;
        let mut updated = stations.clone();
        match updated.iter_mut().find(|s| s.id == station.id) {
            Some(existing) => *existing = station,
            None => updated.push(station),
        }
        self.save(&updated).await?;
        *stations = updated;
        Ok(())
    }

    pub async fn remove(&self, media_id: &str) -> Result<Option<Station>> {
        let mut stations = self.stations.write().await;
        let Some(pos) = stations.iter().position(|s| s.media_id() == media_id) else {
            return Ok(None);
        };
        let mut updated = stations.clone();
        let removed = updated.remove(pos);
        self.save(&updated).await?;
        *stations = updated;
        Ok(Some(removed))
    }

    pub async fn get(&self, media_id: &str) -> Option<Station> {
        self.stations
            .read()
            .await
            .iter()
            .find(|s| s.media_id() == media_id)
            .cloned()
    }

    pub async fn contains(&self, media_id: &str) -> bool {
        self.stations
            .read()
            .await
            .iter()
            .any(|s| s.media_id() == media_id)
    }

    pub async fn is_empty(&self) -> bool {
        self.stations.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Station> {
        self.stations.read().await.clone()
    }

    /// Replace the whole collection.
    pub async fn replace_all(&self, replacement: Vec<Station>) -> Result<()> {
        let mut stations = self.stations.write().await;
        self.save(&replacement).await?;
        *stations = replacement;
        Ok(())
    }

    /// Write `stations` to disk.  Callers commit to memory only once this succeeds.
    async fn save(&self, stations: &[Station]) -> Result<()> {
        let file = StoreFile {
            version: STORE_VERSION,
            stations: stations.to_vec(),
        };
        write_file(&self.path, &file).await
    }
}

/// Slot holding at most one station: the one played last.
pub struct LatestStation {
    path: PathBuf,
    slot: RwLock<Option<Station>>,
}

impl LatestStation {
    pub fn open(path: PathBuf) -> Self {
        let slot = load_file::<Station>(&path);
        Self {
            path,
            slot: RwLock::new(slot),
        }
    }

    pub async fn get(&self) -> Option<Station> {
        self.slot.read().await.clone()
    }

    pub async fn set(&self, station: Station) -> Result<()> {
        let mut slot = self.slot.write().await;
        write_file(&self.path, &station).await?;
        *slot = Some(station);
        Ok(())
    }
}

/// All persisted user state.
pub struct Storage {
    pub favorites: StationStore,
    pub locals: StationStore,
    pub latest: LatestStation,
}

impl Storage {
    pub fn open(dir: &Path) -> Self {
        Self {
            favorites: StationStore::open(dir.join(FAVORITES_FILE)),
            locals: StationStore::open(dir.join(LOCALS_FILE)),
            latest: LatestStation::open(dir.join(LATEST_FILE)),
        }
    }

    /// Id for a new local station.
    pub async fn next_local_id(&self) -> u32 {
        self.locals
            .stations
            .read()
            .await
            .iter()
            .map(|s| s.id)
            .filter(|id| *id >= LOCAL_ID_BASE)
            .max()
            .map_or(LOCAL_ID_BASE, |id| id.saturating_add(1))
    }
}

fn load_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("storage: cannot read {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("storage: ignoring corrupt {:?}: {}", path, e);
            None
        }
    }
}

async fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| ServiceError::Storage(format!("cannot write {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: u32) -> Station {
        Station {
            id,
            name: format!("Station {id}"),
            ..Station::default()
        }
    }

    #[tokio::test]
    async fn test_add_is_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StationStore::open(dir.path().join("s.json"));
        store.add(station(1)).await.unwrap();
        let mut renamed = station(1);
        renamed.name = "Renamed".into();
        store.add(renamed).await.unwrap();

        let all = store.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        {
            let store = StationStore::open(path.clone());
            store.add(station(1)).await.unwrap();
            store.add(station(2)).await.unwrap();
            assert_eq!(store.remove("1").await.unwrap().map(|s| s.id), Some(1));
        }
        let store = StationStore::open(path);
        assert!(store.contains("2").await);
        assert!(!store.contains("1").await);
    }

    #[tokio::test]
    async fn test_corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = StationStore::open(path);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let store = StationStore::open(path.clone());
        store.add(station(1)).await.unwrap();

        // A directory in place of the file makes every write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.add(station(2)).await.is_err());
        assert!(store.remove("1").await.is_err());
        assert!(store.replace_all(Vec::new()).await.is_err());

        let ids: Vec<u32> = store.all().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_latest_slot_holds_one_station() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        assert!(storage.latest.get().await.is_none());
        storage.latest.set(station(1)).await.unwrap();
        storage.latest.set(station(2)).await.unwrap();

        let reopened = Storage::open(dir.path());
        assert_eq!(reopened.latest.get().await.map(|s| s.id), Some(2));
    }

    #[tokio::test]
    async fn test_local_ids_increase() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let first = storage.next_local_id().await;
        assert_eq!(first, LOCAL_ID_BASE);
        storage
            .locals
            .add(Station::local(first, "Mine", "http://mine", "", "", ""))
            .await
            .unwrap();
        assert_eq!(storage.next_local_id().await, LOCAL_ID_BASE + 1);
    }
}

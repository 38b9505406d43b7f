//! Browse node handlers.
//!
//! Every node kind has one registered `MediaItemCommand`.  For each browse
//! request the core builds a `CommandContext` and spawns the future the
//! command returns; the command fetches on the worker pool, updates the shared
//! catalogue and hands its entries to the `ResultSink` exactly once.

mod catalogue;
mod root;
mod stored;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use openradio_proto::media_id::NodeKind;
use openradio_proto::protocol::MediaEntry;
use openradio_proto::station::Station;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::ServiceEvent;
use crate::error::Result;
use crate::metadata::{self, empty_category_entry, station_entry};
use crate::provider::StationSource;
use crate::queue::SharedCatalogue;
use crate::storage::Storage;
use crate::worker::WorkerPool;

pub trait MediaItemCommand: Send + Sync {
    fn execute(&self, ctx: CommandContext) -> BoxFuture<'static, ()>;
}

/// One-shot delivery of a node's children.
///
/// A sink dropped without delivering still completes the request, with the
/// empty-category placeholder, so the requester always gets exactly one reply.
pub struct ResultSink {
    parent_id: String,
    tx: Option<oneshot::Sender<Vec<MediaEntry>>>,
}

impl ResultSink {
    pub fn new(parent_id: impl Into<String>, tx: oneshot::Sender<Vec<MediaEntry>>) -> Self {
        Self {
            parent_id: parent_id.into(),
            tx: Some(tx),
        }
    }

    /// Deliver `entries`.  Later calls are ignored.
    pub fn send(&mut self, entries: Vec<MediaEntry>) {
        let Some(tx) = self.tx.take() else {
            warn!("browse: duplicate result for {} dropped", self.parent_id);
            return;
        };
        debug!("browse: {} -> {} entries", self.parent_id, entries.len());
        if tx.send(entries).is_err() {
            debug!("browse: requester of {} went away", self.parent_id);
        }
    }

    pub fn is_sent(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!("browse: {} finished without a result", self.parent_id);
            let _ = tx.send(vec![empty_category_entry(&self.parent_id)]);
        }
    }
}

/// Everything a command may touch while populating a node.
pub struct CommandContext {
    /// Full node id as requested.
    pub parent_id: String,
    /// Parameter part of the node id (category id, country code, query).
    pub param: String,
    /// Listener's country, empty when unknown.
    pub country_code: String,
    pub car_mode: bool,
    /// Recovering after a restart: reuse the cached collection if there is one.
    pub restore: bool,
    /// The same node was browsed last time.
    pub same_catalogue: bool,
    pub car_recent_limit: u32,
    pub catalogue: SharedCatalogue,
    pub source: Arc<dyn StationSource>,
    pub storage: Arc<Storage>,
    pub workers: WorkerPool,
    pub events: mpsc::Sender<ServiceEvent>,
    pub result: ResultSink,
}

impl CommandContext {
    /// Run `job` against the station source on the worker pool.  Failures
    /// are logged and reported as `None`.
    async fn fetch<T, F>(&self, what: &str, job: F) -> Option<T>
    where
        F: FnOnce(&dyn StationSource) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let source = Arc::clone(&self.source);
        match self.workers.run(move || job(source.as_ref())).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("browse: {} for {} failed: {}", what, self.parent_id, e);
                None
            }
            Err(e) => {
                warn!("browse: {} for {} not run: {}", what, self.parent_id, e);
                None
            }
        }
    }

    /// Stations cached from the previous load, when restoring.
    async fn cached_stations(&self) -> Option<Vec<Station>> {
        if !self.restore {
            return None;
        }
        let cached = self.catalogue.lock().await.stations().to_vec();
        if cached.is_empty() {
            None
        } else {
            debug!("browse: {} restored from cache", self.parent_id);
            Some(cached)
        }
    }

    async fn notice(&self, message: &str) {
        let _ = self
            .events
            .send(ServiceEvent::Notice(message.to_string()))
            .await;
    }

    /// Placeholder entry plus a "no data" notice.
    async fn deliver_empty(&mut self) {
        self.catalogue.lock().await.replace_stations(Vec::new());
        self.result.send(vec![empty_category_entry(&self.parent_id)]);
        self.notice(metadata::NO_DATA).await;
    }

    /// Make `stations` the active collection and deliver them as playable
    /// entries, ordered by sort id when `sorted`.
    async fn deliver_stations(&mut self, mut stations: Vec<Station>, sorted: bool) {
        if stations.is_empty() {
            self.deliver_empty().await;
            return;
        }
        if sorted {
            stations.sort_by_key(|s| metadata::sort_rank(s.sort_id));
        }
        let favorites: HashSet<u32> = self
            .storage
            .favorites
            .all()
            .await
            .iter()
            .map(|s| s.id)
            .collect();
        let entries = stations
            .iter()
            .map(|s| station_entry(s, favorites.contains(&s.id)))
            .collect();
        self.catalogue.lock().await.replace_stations(stations);
        self.result.send(entries);
    }
}

/// Node kind → command.
pub struct CommandRegistry {
    commands: HashMap<NodeKind, Box<dyn MediaItemCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut commands: HashMap<NodeKind, Box<dyn MediaItemCommand>> = HashMap::new();
        commands.insert(NodeKind::Root, Box::new(root::Root));
        commands.insert(NodeKind::AllCategories, Box::new(catalogue::AllCategories));
        commands.insert(
            NodeKind::StationsInCategory,
            Box::new(catalogue::StationsInCategory),
        );
        commands.insert(NodeKind::CountriesList, Box::new(catalogue::CountriesList));
        commands.insert(NodeKind::CountryStations, Box::new(catalogue::CountryStations));
        commands.insert(NodeKind::Favorites, Box::new(stored::Favorites));
        commands.insert(NodeKind::Locals, Box::new(stored::Locals));
        commands.insert(NodeKind::Search, Box::new(catalogue::Search));
        commands.insert(NodeKind::Popular, Box::new(catalogue::Popular::default()));
        commands.insert(NodeKind::RecentlyAdded, Box::new(catalogue::RecentlyAdded));
        Self { commands }
    }

    pub fn get(&self, kind: NodeKind) -> Option<&dyn MediaItemCommand> {
        self.commands.get(&kind).map(|c| c.as_ref())
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! The station collection of the active browse context and the play queue
//! built from it.
//!
//! Both live behind one lock (`SharedCatalogue`): browse handlers replace the
//! stations, the core rebuilds the queue from them and moves the index.

use std::sync::Arc;

use openradio_proto::protocol::QueueItem;
use openradio_proto::station::Station;
use tokio::sync::Mutex;

pub type SharedCatalogue = Arc<Mutex<Catalogue>>;

#[derive(Debug, Default)]
pub struct Catalogue {
    stations: Vec<Station>,
    queue: Vec<QueueItem>,
    /// Stations behind `queue`, index for index.  Kept apart from `stations`
    /// so browsing elsewhere does not invalidate the queue.
    queue_stations: Vec<Station>,
    next_queue_id: u64,
}

impl Catalogue {
    pub fn shared() -> SharedCatalogue {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Replace the collection wholesale with a freshly loaded list.
    pub fn replace_stations(&mut self, stations: Vec<Station>) {
        self.stations = stations;
    }

    /// Append `station` unless a station with the same id is present.
    pub fn add_station(&mut self, station: Station) {
        if !self.stations.iter().any(|s| s.id == station.id) {
            self.stations.push(station);
        }
    }

    pub fn remove_station(&mut self, media_id: &str) -> Option<Station> {
        let pos = self.stations.iter().position(|s| s.media_id() == media_id)?;
        Some(self.stations.remove(pos))
    }

    pub fn station(&self, media_id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.media_id() == media_id)
    }

    pub fn station_mut(&mut self, media_id: &str) -> Option<&mut Station> {
        self.stations.iter_mut().find(|s| s.media_id() == media_id)
    }

    /// Rebuild the queue 1:1 from the current station collection.  Every
    /// rebuild hands out fresh queue ids.
    pub fn rebuild_queue(&mut self) -> &[QueueItem] {
        let mut next_id = self.next_queue_id;
        self.queue = self
            .stations
            .iter()
            .map(|station| {
                let item = QueueItem {
                    queue_id: next_id,
                    media_id: station.media_id(),
                    title: station.name.clone(),
                    subtitle: station.country.clone(),
                    icon_url: station.artwork_url().map(str::to_string),
                };
                next_id += 1;
                item
            })
            .collect();
        self.queue_stations = self.stations.clone();
        self.next_queue_id = next_id;
        &self.queue
    }

    pub fn queue(&self) -> &[QueueItem] {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_item(&self, index: Option<usize>) -> Option<&QueueItem> {
        self.queue.get(index?)
    }

    pub fn index_of_media_id(&self, media_id: &str) -> Option<usize> {
        self.queue.iter().position(|item| item.media_id == media_id)
    }

    pub fn index_of_queue_id(&self, queue_id: u64) -> Option<usize> {
        self.queue.iter().position(|item| item.queue_id == queue_id)
    }

    /// Station behind the queue entry at `index`.
    pub fn station_at(&self, index: Option<usize>) -> Option<&Station> {
        self.queue_stations.get(index?)
    }

    pub fn station_at_mut(&mut self, index: Option<usize>) -> Option<&mut Station> {
        self.queue_stations.get_mut(index?)
    }
}

pub fn is_index_playable(index: Option<usize>, queue_len: usize) -> bool {
    matches!(index, Some(i) if i < queue_len)
}

/// Index after skipping forward: wraps to the first entry past the end.
pub fn next_index(current: Option<usize>, queue_len: usize) -> usize {
    let next = current.map_or(0, |i| i + 1);
    if next >= queue_len {
        0
    } else {
        next
    }
}

/// Index after skipping back: stops at the first entry.
pub fn previous_index(current: Option<usize>) -> usize {
    current.map_or(0, |i| i.saturating_sub(1))
}

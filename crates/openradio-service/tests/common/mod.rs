#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use openradio_proto::config::Config;
use openradio_proto::protocol::{Command, SessionState};
use openradio_proto::station::{Category, Country, MediaStream, Station};
use openradio_service::backup::DirectoryTarget;
use openradio_service::core::{CoreParts, ServiceCore, ServiceEvent};
use openradio_service::engine::{EngineEvent, EngineFactory, EngineListener, PlaybackEngine};
use openradio_service::error::Result;
use openradio_service::focus::ExclusiveFocus;
use openradio_service::handle::{PlaybackControllable, ServiceHandle};
use openradio_service::provider::StationSource;
use openradio_service::session::SessionUpdate;
use openradio_service::storage::Storage;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ── fake engine ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EngineLog {
    pub calls: Vec<String>,
    pub listeners: Vec<EngineListener>,
    pub playing: bool,
}

pub type SharedLog = Arc<Mutex<EngineLog>>;

struct FakeEngine {
    log: SharedLog,
}

impl FakeEngine {
    fn record(&self, call: String, playing: Option<bool>) {
        let mut log = self.log.lock().unwrap();
        log.calls.push(call);
        if let Some(playing) = playing {
            log.playing = playing;
        }
    }
}

impl PlaybackEngine for FakeEngine {
    fn prepare(&mut self, url: &str) {
        self.record(format!("prepare {url}"), Some(false));
    }

    fn play(&mut self) {
        self.record("play".into(), Some(true));
    }

    fn pause(&mut self) {
        self.record("pause".into(), Some(false));
    }

    fn stop(&mut self) {
        self.record("stop".into(), Some(false));
    }

    fn reset(&mut self) {
        self.record("reset".into(), Some(false));
    }

    fn release(&mut self) {
        self.record("release".into(), Some(false));
    }

    fn set_volume(&mut self, volume: f32) {
        self.record(format!("volume {volume:.2}"), None);
    }

    fn is_playing(&self) -> bool {
        self.log.lock().unwrap().playing
    }
}

pub struct FakeEngineFactory {
    log: SharedLog,
}

impl EngineFactory for FakeEngineFactory {
    fn create(&mut self, listener: EngineListener) -> Box<dyn PlaybackEngine> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("create".into());
        log.listeners.push(listener);
        Box::new(FakeEngine {
            log: Arc::clone(&self.log),
        })
    }
}

// ── fake catalogue ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    pub popular: Vec<Station>,
    pub recent: Vec<Station>,
    pub search: Vec<Station>,
    pub categories: Vec<Category>,
    pub countries: Vec<Country>,
    /// Full records returned by `station()`.
    pub details: HashMap<u32, Station>,
    /// When set, `station()` waits for a message before answering.
    pub gate: Option<Mutex<std_mpsc::Receiver<()>>>,
    pub popular_pages: Mutex<Vec<u32>>,
    pub search_queries: Mutex<Vec<String>>,
}

impl StationSource for FakeSource {
    fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.categories.clone())
    }

    fn stations_in_category(&self, _category_id: u32) -> Result<Vec<Station>> {
        Ok(self.popular.clone())
    }

    fn countries(&self) -> Result<Vec<Country>> {
        Ok(self.countries.clone())
    }

    fn country_stations(&self, _country_code: &str) -> Result<Vec<Station>> {
        Ok(self.popular.clone())
    }

    fn popular(&self, page: u32) -> Result<Vec<Station>> {
        self.popular_pages.lock().unwrap().push(page);
        Ok(self.popular.clone())
    }

    fn recently_added(&self, limit: Option<u32>) -> Result<Vec<Station>> {
        let mut stations = self.recent.clone();
        if let Some(limit) = limit {
            stations.truncate(limit as usize);
        }
        Ok(stations)
    }

    fn search(&self, query: &str) -> Result<Vec<Station>> {
        self.search_queries.lock().unwrap().push(query.to_string());
        Ok(self.search.clone())
    }

    fn station(&self, id: u32) -> Result<Option<Station>> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        Ok(self.details.get(&id).cloned())
    }
}

pub fn station(id: u32, name: &str) -> Station {
    Station {
        id,
        name: name.to_string(),
        country: "DE".to_string(),
        media_stream: MediaStream::with_variant(128, format!("http://radio.test/{id}")),
        ..Station::default()
    }
}

/// Catalogue record whose stream is only known after `station()`.
pub fn bare_station(id: u32, name: &str) -> Station {
    Station {
        id,
        name: name.to_string(),
        ..Station::default()
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub handle: ServiceHandle,
    pub updates: broadcast::Receiver<SessionUpdate>,
    pub engine: SharedLog,
    pub source: Arc<FakeSource>,
    pub storage: Arc<Storage>,
    pub dir: TempDir,
    task: JoinHandle<anyhow::Result<()>>,
}

#[derive(Default)]
pub struct Setup {
    pub source: FakeSource,
    pub favorites: Vec<Station>,
    pub latest: Option<Station>,
}

impl Harness {
    pub async fn start(setup: Setup) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()));
        for station in setup.favorites {
            storage.favorites.add(station).await.unwrap();
        }
        if let Some(latest) = setup.latest {
            storage.latest.set(latest).await.unwrap();
        }

        let mut config = Config::default();
        config.service.state_dir = dir.path().to_path_buf();
        config.service.workers = 2;
        config.location.country_code = "DE".to_string();
        config.backup.dir = dir.path().join("backup");

        let engine = SharedLog::default();
        let source = Arc::new(setup.source);
        let parts = CoreParts {
            storage: Arc::clone(&storage),
            source: Arc::clone(&source) as Arc<dyn StationSource>,
            engines: Box::new(FakeEngineFactory {
                log: Arc::clone(&engine),
            }),
            focus: Box::new(ExclusiveFocus::default()),
            backup_target: Arc::new(DirectoryTarget::new(config.backup.dir.clone())),
        };

        let (event_tx, event_rx) = mpsc::channel::<ServiceEvent>(64);
        let (updates_tx, updates) = broadcast::channel(256);
        let core = ServiceCore::new(config, parts, event_tx, updates_tx);
        let handle = core.handle();
        let task = tokio::spawn(core.run(event_rx));

        Self {
            handle,
            updates,
            engine,
            source,
            storage,
            dir,
            task,
        }
    }

    /// Wait until every event sent so far has been handled.
    pub async fn settle(&mut self) {
        self.handle
            .send_command(Command::RequestLocation)
            .await
            .unwrap();
        self.next_update(|u| matches!(u, SessionUpdate::Location(_)))
            .await;
    }

    /// Next update matching `pred`, skipping the rest.
    pub async fn next_update(&mut self, pred: impl Fn(&SessionUpdate) -> bool) -> SessionUpdate {
        let wait = async {
            loop {
                match self.updates.recv().await {
                    Ok(update) if pred(&update) => return update,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("core stopped"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("no matching update")
    }

    /// Poll the session until `pred` holds.
    pub async fn wait_for(&self, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        let wait = async {
            loop {
                let state = self.handle.state().await;
                if pred(&state) {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("state never matched")
    }

    /// Poll the engine log until `pred` holds.
    pub async fn wait_for_engine(&self, pred: impl Fn(&EngineLog) -> bool) {
        let wait = async {
            loop {
                if pred(&self.engine.lock().unwrap()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("engine never matched")
    }

    pub fn engine_calls(&self) -> Vec<String> {
        self.engine.lock().unwrap().calls.clone()
    }

    /// Report `event` from the most recently created engine.
    pub async fn emit(&self, event: EngineEvent) {
        let listener = self
            .engine
            .lock()
            .unwrap()
            .listeners
            .last()
            .cloned()
            .expect("no engine created");
        assert!(listener.emit(event).await);
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

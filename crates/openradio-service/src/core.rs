//! ServiceCore: single-owner event loop for the playback session.
//!
//! Every input (client commands, browse requests, engine callbacks, worker
//! results, timers, platform signals) arrives as a `ServiceEvent` on one
//! channel.  The core owns the playback state machine, the engine and the
//! focus manager exclusively; the station collection and play queue sit
//! behind the one shared catalogue lock so browse commands can fill them.
//!
//! Work that may block (network fetches, playlist downloads, store writes)
//! runs on spawned tasks or the worker pool and reports back as events.
//! Results of asynchronous work carry the selection generation they were
//! started under and are dropped if the user has selected something else
//! since.

use std::sync::Arc;

use openradio_proto::config::Config;
use openradio_proto::media_id::{self, NodeKind};
use openradio_proto::protocol::{
    Command, CustomAction, FavoriteIcon, FocusChange, MediaEntry, PlaybackAction,
    PlaybackSnapshot, PlaybackState, FAVORITE_ACTION,
};
use openradio_proto::station::Station;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupContext, BackupTarget, Pipeline};
use crate::commands::{CommandContext, CommandRegistry, ResultSink};
use crate::engine::{EngineError, EngineEvent, EngineFactory, EngineListener, EngineState, PlaybackEngine};
use crate::focus::{volume_for, AudioFocus, AudioFocusManager};
use crate::handle::ServiceHandle;
use crate::metadata::{self, empty_category_entry};
use crate::provider::StationSource;
use crate::queue::{is_index_playable, next_index, previous_index, Catalogue, SharedCatalogue};
use crate::recovery::PlaylistFetcher;
use crate::session::{SessionStore, SessionUpdate};
use crate::storage::Storage;
use crate::worker::WorkerPool;

// ── ServiceEvent ──────────────────────────────────────────────────────────────

/// All inputs into the ServiceCore loop.
#[derive(Debug)]
pub enum ServiceEvent {
    /// A command from a client or the host platform.
    ClientCommand(Command),
    /// Browse request answered directly to the requester.
    LoadChildren {
        parent_id: String,
        reply: oneshot::Sender<Vec<MediaEntry>>,
    },
    /// Callback from a playback engine.
    Engine { engine_id: u64, event: EngineEvent },
    /// Lazily fetched station details.
    StationResolved {
        generation: u64,
        station: Option<Station>,
    },
    /// Stream URLs found behind an unplayable URL.
    PlaylistExtracted { generation: u64, urls: Vec<String> },
    SearchCompleted {
        generation: u64,
        stations: Vec<Station>,
    },
    /// Favorites store changed.
    FavoritesChanged,
    /// User-facing message from a command or worker.
    Notice(String),
    /// Root browse wants the latest station back on air.
    PlayLatest {
        media_id: String,
        play_when_ready: bool,
    },
    DelayedStop { token: u64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Default,
    /// Output is about to become noisy (headphones unplugged, BT dropped).
    Noisy,
}

/// Collaborators the core is built with.
pub struct CoreParts {
    pub storage: Arc<Storage>,
    pub source: Arc<dyn StationSource>,
    pub engines: Box<dyn EngineFactory>,
    pub focus: Box<dyn AudioFocusManager>,
    pub backup_target: Arc<dyn BackupTarget>,
}

// ── ServiceCore ───────────────────────────────────────────────────────────────

pub struct ServiceCore {
    config: Config,
    session: Arc<SessionStore>,
    updates: broadcast::Sender<SessionUpdate>,
    event_tx: mpsc::Sender<ServiceEvent>,
    catalogue: SharedCatalogue,
    storage: Arc<Storage>,
    source: Arc<dyn StationSource>,
    workers: WorkerPool,
    commands: CommandRegistry,
    playlist_fetcher: Arc<PlaylistFetcher>,
    backup_target: Arc<dyn BackupTarget>,
    engines: Box<dyn EngineFactory>,
    focus_manager: Box<dyn AudioFocusManager>,
    /// Live engine.  `None` until the first play and after every stop.
    engine: Option<Box<dyn PlaybackEngine>>,
    /// Id of `engine`; events tagged with any other id are stale.
    engine_id: u64,
    next_engine_id: u64,

    state: PlaybackState,
    error: Option<String>,
    pause_reason: PauseReason,
    audio_focus: AudioFocus,
    /// Start (or resume) playback as soon as focus allows.
    play_on_focus_gain: bool,
    /// Start once prepared; false only for the car-mode latest station.
    play_when_ready: bool,
    service_started: bool,
    current_index: Option<usize>,
    queue_title: String,
    /// ICY title of the current stream, empty when none.
    stream_title: String,
    last_played_url: Option<String>,
    last_known_station: Option<Station>,
    current_is_favorite: bool,
    /// Bumped whenever the selection changes or playback stops.
    generation: u64,
    delayed_stop: Option<AbortHandle>,
    delayed_stop_token: u64,
    wifi_lock_held: bool,
    online: bool,
    position_ms: u64,
    buffered_position_ms: u64,

    car_mode: bool,
    restore: bool,
    current_parent_id: Option<String>,
    country_code: String,
    master_volume: u8,
}

impl ServiceCore {
    pub fn new(
        config: Config,
        parts: CoreParts,
        event_tx: mpsc::Sender<ServiceEvent>,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        let playlist_fetcher = Arc::new(PlaylistFetcher::new(config.network.playlist_timeout_secs));
        let workers = WorkerPool::new(config.service.workers);
        let country_code = config.location.country_code.clone();
        let master_volume = config.service.master_volume;

        Self {
            config,
            session: Arc::new(SessionStore::new()),
            updates,
            event_tx,
            catalogue: Catalogue::shared(),
            storage: parts.storage,
            source: parts.source,
            workers,
            commands: CommandRegistry::new(),
            playlist_fetcher,
            backup_target: parts.backup_target,
            engines: parts.engines,
            focus_manager: parts.focus,
            engine: None,
            engine_id: 0,
            next_engine_id: 1,
            state: PlaybackState::None,
            error: None,
            pause_reason: PauseReason::Default,
            audio_focus: AudioFocus::NoFocusNoDuck,
            play_on_focus_gain: false,
            play_when_ready: true,
            service_started: false,
            current_index: None,
            queue_title: String::new(),
            stream_title: String::new(),
            last_played_url: None,
            last_known_station: None,
            current_is_favorite: false,
            generation: 0,
            delayed_stop: None,
            delayed_stop_token: 0,
            wifi_lock_held: false,
            online: true,
            position_ms: 0,
            buffered_position_ms: 0,
            car_mode: false,
            restore: false,
            current_parent_id: None,
            country_code,
            master_volume,
        }
    }

    pub fn session(&self) -> Arc<SessionStore> {
        Arc::clone(&self.session)
    }

    /// Client-side handle onto this core.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle::new(
            self.event_tx.clone(),
            self.updates.clone(),
            Arc::clone(&self.session),
        )
    }

    /// Run the event loop until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ServiceEvent>) -> anyhow::Result<()> {
        info!("ServiceCore: starting event loop");
        self.update_playback_state(None).await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("ServiceCore: event channel closed, shutting down");
                    break;
                }
                Some(ServiceEvent::Shutdown) => {
                    info!("ServiceCore: shutdown requested");
                    break;
                }
                Some(event) => self.handle_event(event).await,
            }
        }

        self.cleanup();
        Ok(())
    }

    async fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::ClientCommand(cmd) => {
                info!("ServiceCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            ServiceEvent::LoadChildren { parent_id, reply } => {
                self.load_children(parent_id, reply);
            }
            ServiceEvent::Engine { engine_id, event } => {
                if engine_id != self.engine_id || self.engine.is_none() {
                    debug!("ServiceCore: dropping event of released engine {}", engine_id);
                    return;
                }
                self.handle_engine_event(event).await;
            }
            ServiceEvent::StationResolved {
                generation,
                station,
            } => {
                if self.is_stale(generation, "station") {
                    return;
                }
                self.on_station_resolved(station).await;
            }
            ServiceEvent::PlaylistExtracted { generation, urls } => {
                if self.is_stale(generation, "playlist") {
                    return;
                }
                self.on_playlist_urls_extracted(urls).await;
            }
            ServiceEvent::SearchCompleted {
                generation,
                stations,
            } => {
                if self.is_stale(generation, "search") {
                    return;
                }
                self.on_search_completed(stations).await;
            }
            ServiceEvent::FavoritesChanged => {
                self.refresh_favorite().await;
                self.update_playback_state(None).await;
                self.publish(SessionUpdate::ChildrenChanged {
                    parent_id: media_id::FAVORITES.to_string(),
                });
            }
            ServiceEvent::Notice(message) => {
                info!("ServiceCore: notice: {}", message);
                self.publish(SessionUpdate::Notice(message));
            }
            ServiceEvent::PlayLatest {
                media_id,
                play_when_ready,
            } => {
                if matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
                    debug!("ServiceCore: already on air, latest station not restarted");
                    return;
                }
                self.handle_play_from_media_id(&media_id, play_when_ready)
                    .await;
            }
            ServiceEvent::DelayedStop { token } => {
                if token == self.delayed_stop_token {
                    self.on_delayed_stop();
                }
            }
            ServiceEvent::Shutdown => {}
        }
    }

    fn is_stale(&self, generation: u64, what: &str) -> bool {
        if generation != self.generation {
            debug!(
                "ServiceCore: stale {} result (generation {} != {})",
                what, generation, self.generation
            );
            return true;
        }
        false
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => {
                self.play_when_ready = true;
                self.on_play().await;
            }
            Command::PlayFromMediaId { media_id } => {
                self.handle_play_from_media_id(&media_id, true).await;
            }
            Command::PlayFromSearch { query } => {
                self.play_when_ready = true;
                self.perform_search(query).await;
            }
            Command::Pause => self.handle_pause_request(PauseReason::Default).await,
            Command::Stop => self.handle_stop_request(None).await,
            Command::SkipToNext => {
                self.play_when_ready = true;
                self.skip_to_next().await;
            }
            Command::SkipToPrevious => {
                self.play_when_ready = true;
                self.skip_to_previous().await;
            }
            Command::SkipToQueueItem { queue_id } => {
                self.play_when_ready = true;
                self.skip_to_queue_item(queue_id).await;
            }
            Command::CustomAction { action } => {
                if action == FAVORITE_ACTION {
                    self.toggle_current_favorite().await;
                } else {
                    warn!("ServiceCore: unsupported custom action {}", action);
                }
            }
            Command::GetRoot { car_mode, restore } => {
                info!("ServiceCore: root requested (car {}, restore {})", car_mode, restore);
                self.car_mode = car_mode;
                self.restore = restore;
                self.current_parent_id = None;
            }
            Command::LoadChildren { parent_id } => {
                let (reply, rx) = oneshot::channel();
                self.load_children(parent_id.clone(), reply);
                let updates = self.updates.clone();
                tokio::spawn(async move {
                    if let Ok(entries) = rx.await {
                        let _ = updates.send(SessionUpdate::Children { parent_id, entries });
                    }
                });
            }
            Command::RequestLocation => {
                self.publish(SessionUpdate::Location(self.country_code.clone()));
            }
            Command::UpdateFavorite {
                media_id,
                is_favorite,
            } => self.update_favorite(media_id, is_favorite).await,
            Command::AddLocal {
                name,
                url,
                image_url,
                genre,
                country,
                add_to_favorites,
            } => {
                let draft = Station::local(0, name, url, image_url, genre, country);
                self.save_local(None, draft, add_to_favorites);
            }
            Command::EditLocal {
                media_id,
                name,
                url,
                image_url,
                genre,
                country,
                add_to_favorites,
            } => {
                let draft = Station::local(0, name, url, image_url, genre, country);
                self.save_local(Some(media_id), draft, add_to_favorites);
            }
            Command::RemoveLocal { media_id } => self.remove_local(media_id),
            Command::UpdateSortIds {
                media_ids,
                sort_ids,
                category_id,
            } => self.update_sort_ids(media_ids, sort_ids, category_id),
            Command::ToggleLastPlayed => self.toggle_last_played().await,
            Command::StopService => {
                self.handle_stop_request(None).await;
                self.publish(SessionUpdate::Idle);
            }
            Command::Backup => self.run_backup(Pipeline::backup()),
            Command::Restore => self.run_backup(Pipeline::restore()),
            Command::AudioFocus { change } => self.on_audio_focus_change(change).await,
            Command::Connectivity { online } => self.on_connectivity_changed(online).await,
            Command::AudioBecomingNoisy => {
                if self.state == PlaybackState::Playing {
                    info!("ServiceCore: output becoming noisy, pausing");
                    self.handle_pause_request(PauseReason::Noisy).await;
                }
            }
            Command::SameDeviceConnected => self.on_same_device_connected().await,
            Command::MasterVolume { percent } => {
                self.master_volume = percent.min(100);
                self.set_player_volume();
            }
            Command::GetState => self.publish(SessionUpdate::StateUpdated),
        }
    }

    // ── browsing ──────────────────────────────────────────────────────────────

    fn load_children(&mut self, parent_id: String, reply: oneshot::Sender<Vec<MediaEntry>>) {
        let Some((kind, param)) = media_id::split(&parent_id) else {
            warn!("ServiceCore: {} is not a browsable node", parent_id);
            let _ = reply.send(vec![empty_category_entry(&parent_id)]);
            return;
        };
        let Some(command) = self.commands.get(kind) else {
            warn!("ServiceCore: no command for {:?}", kind);
            let _ = reply.send(vec![empty_category_entry(&parent_id)]);
            return;
        };

        let same_catalogue = self.current_parent_id.as_deref() == Some(parent_id.as_str());
        debug!(
            "ServiceCore: load children of {} (same catalogue {})",
            parent_id, same_catalogue
        );
        let ctx = CommandContext {
            param: param.to_string(),
            parent_id: parent_id.clone(),
            country_code: self.country_code.clone(),
            car_mode: self.car_mode,
            restore: self.restore,
            same_catalogue,
            car_recent_limit: self.config.catalogue.car_recent_limit,
            catalogue: Arc::clone(&self.catalogue),
            source: Arc::clone(&self.source),
            storage: Arc::clone(&self.storage),
            workers: self.workers.clone(),
            events: self.event_tx.clone(),
            result: ResultSink::new(parent_id.clone(), reply),
        };
        tokio::spawn(command.execute(ctx));

        // Restore only applies to the first load after reconnecting
        self.restore = false;
        self.current_parent_id = Some(parent_id);
    }

    // ── play requests ─────────────────────────────────────────────────────────

    async fn on_play(&mut self) {
        if !self.check_connectivity() {
            return;
        }
        let queue_len = self.catalogue.lock().await.queue_len();
        if queue_len == 0 {
            debug!("ServiceCore: play with empty queue ignored");
            return;
        }
        if !is_index_playable(self.current_index, queue_len) {
            self.current_index = Some(0);
        }
        self.handle_play_request().await;
    }

    async fn handle_play_from_media_id(&mut self, media_id: &str, play_when_ready: bool) {
        if !self.check_connectivity() {
            return;
        }
        self.play_when_ready = play_when_ready;

        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Stopped;
        }

        if media_id == media_id::NO_DATA {
            self.update_playback_state(Some(metadata::NO_DATA)).await;
            return;
        }

        let (index, queue_len) = {
            let mut catalogue = self.catalogue.lock().await;
            catalogue.rebuild_queue();
            (catalogue.index_of_media_id(media_id), catalogue.queue_len())
        };
        self.queue_title = metadata::QUEUE_TITLE.to_string();

        let on_air = matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering);
        if on_air && self.current_media_id().await.as_deref() == Some(media_id) {
            warn!("ServiceCore: skip play request, {} already on air", media_id);
            self.current_index = index;
            self.update_playback_state(None).await;
            return;
        }

        self.current_index = index;
        if index.is_none() {
            warn!("ServiceCore: skip play request, {} not in queue", media_id);
            self.update_playback_state(None).await;
            return;
        }
        if queue_len == 0 {
            return;
        }

        self.handle_play_request().await;
    }

    /// Start, resume or restart playback of the current queue index.
    async fn handle_play_request(&mut self) {
        debug!(
            "ServiceCore: play request, state {:?}, started {}",
            self.state, self.service_started
        );
        self.stream_title.clear();
        if !self.check_connectivity() {
            return;
        }

        self.cancel_delayed_stop();
        if !self.service_started {
            info!("ServiceCore: starting service");
            self.service_started = true;
        }

        self.play_on_focus_gain = true;
        self.try_to_get_audio_focus();

        if self.state == PlaybackState::Paused {
            self.configure_player_state().await;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let station = self
            .catalogue
            .lock()
            .await
            .station_at(self.current_index)
            .cloned();
        let Some(station) = station else {
            warn!(
                "ServiceCore: no station at index {:?}, play request abandoned",
                self.current_index
            );
            return;
        };

        if station.stream_url().is_some() {
            self.prepare_player(station).await;
            return;
        }

        // Stream not known yet: fetch the station details first
        debug!("ServiceCore: resolving stream of station {}", station.id);
        let source = Arc::clone(&self.source);
        let workers = self.workers.clone();
        let tx = self.event_tx.clone();
        let id = station.id;
        tokio::spawn(async move {
            let station = match workers.run(move || source.station(id)).await {
                Ok(Ok(station)) => station,
                Ok(Err(e)) => {
                    warn!("ServiceCore: cannot resolve station {}: {}", id, e);
                    None
                }
                Err(e) => {
                    warn!("ServiceCore: station {} not resolved: {}", id, e);
                    None
                }
            };
            let _ = tx
                .send(ServiceEvent::StationResolved {
                    generation,
                    station,
                })
                .await;
        });
    }

    async fn on_station_resolved(&mut self, station: Option<Station>) {
        let Some(resolved) = station else {
            warn!(
                "ServiceCore: ignoring play request, station at {:?} not found",
                self.current_index
            );
            return;
        };
        let station = {
            let mut catalogue = self.catalogue.lock().await;
            match catalogue.station_at_mut(self.current_index) {
                Some(current) if current.id == resolved.id => {
                    current.media_stream = resolved.media_stream.clone();
                    current.clone()
                }
                _ => resolved,
            }
        };
        self.prepare_player(station).await;
    }

    async fn prepare_player(&mut self, station: Station) {
        let Some(url) = station.stream_url().map(str::to_string) else {
            warn!("ServiceCore: station {} has no stream", station.id);
            self.handle_stop_request(Some(metadata::NO_DATA)).await;
            return;
        };
        info!("ServiceCore: preparing {} ({})", station.name, url);

        self.last_played_url = Some(url.clone());
        self.last_known_station = Some(station);
        self.refresh_favorite().await;
        self.state = PlaybackState::Stopped;
        self.pause_reason = PauseReason::Default;
        self.position_ms = 0;
        self.buffered_position_ms = 0;

        self.relax_resources(false);
        self.create_engine_if_needed();

        self.state = PlaybackState::Buffering;
        if let Some(engine) = self.engine.as_mut() {
            engine.prepare(&url);
        }
        self.set_wifi_lock(true);

        self.update_playback_state(None).await;
    }

    async fn perform_search(&mut self, query: String) {
        info!("ServiceCore: search for '{}'", query);
        let query = query.trim().to_string();
        if query.is_empty() {
            self.handle_stop_request(Some(metadata::NO_SEARCH_RESULTS))
                .await;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let source = Arc::clone(&self.source);
        let workers = self.workers.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let stations = match workers.run(move || source.search(&query)).await {
                Ok(Ok(stations)) => stations,
                Ok(Err(e)) => {
                    warn!("ServiceCore: search failed: {}", e);
                    Vec::new()
                }
                Err(e) => {
                    warn!("ServiceCore: search not run: {}", e);
                    Vec::new()
                }
            };
            let _ = tx
                .send(ServiceEvent::SearchCompleted {
                    generation,
                    stations,
                })
                .await;
        });
    }

    async fn on_search_completed(&mut self, stations: Vec<Station>) {
        if stations.is_empty() {
            self.handle_stop_request(Some(metadata::NO_SEARCH_RESULTS))
                .await;
            return;
        }
        info!("ServiceCore: found {} stations", stations.len());
        {
            let mut catalogue = self.catalogue.lock().await;
            catalogue.replace_stations(stations);
            catalogue.rebuild_queue();
        }
        self.queue_title = metadata::QUEUE_TITLE.to_string();
        self.current_index = Some(0);
        self.state = PlaybackState::Stopped;
        self.handle_play_request().await;
    }

    // ── skipping ──────────────────────────────────────────────────────────────

    async fn skip_to_next(&mut self) {
        let queue_len = self.catalogue.lock().await.queue_len();
        let next = next_index(self.current_index, queue_len);
        self.skip_to(next, queue_len).await;
    }

    async fn skip_to_previous(&mut self) {
        let queue_len = self.catalogue.lock().await.queue_len();
        let previous = previous_index(self.current_index);
        self.skip_to(previous, queue_len).await;
    }

    async fn skip_to(&mut self, index: usize, queue_len: usize) {
        if !is_index_playable(Some(index), queue_len) {
            error!(
                "ServiceCore: cannot skip to {} in queue of {}",
                index, queue_len
            );
            self.current_index = None;
            self.handle_stop_request(Some(metadata::CAN_NOT_SKIP)).await;
            return;
        }
        info!("ServiceCore: skip to {}", index);
        self.current_index = Some(index);
        self.state = PlaybackState::Stopped;
        self.handle_play_request().await;
    }

    async fn skip_to_queue_item(&mut self, queue_id: u64) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Stopped;
        }
        let index = {
            let catalogue = self.catalogue.lock().await;
            if catalogue.queue_len() == 0 {
                return;
            }
            catalogue.index_of_queue_id(queue_id)
        };
        self.current_index = index;
        if index.is_none() {
            warn!("ServiceCore: queue item {} not found", queue_id);
            self.update_playback_state(None).await;
            return;
        }
        self.handle_play_request().await;
    }

    // ── pause / stop ──────────────────────────────────────────────────────────

    async fn handle_pause_request(&mut self, reason: PauseReason) {
        debug!("ServiceCore: pause request, state {:?}", self.state);
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            self.pause_reason = reason;
            if let Some(engine) = self.engine.as_mut() {
                if engine.is_playing() {
                    engine.pause();
                }
            }
            // Keep the engine while paused, give up everything else
            self.relax_resources(false);
            self.give_up_audio_focus();
        }
        self.update_playback_state(None).await;
    }

    async fn handle_stop_request(&mut self, with_error: Option<&str>) {
        debug!(
            "ServiceCore: stop request, state {:?}, error {:?}",
            self.state, with_error
        );
        self.state = PlaybackState::Stopped;
        self.pause_reason = PauseReason::Default;
        self.generation += 1;

        self.relax_resources(true);
        self.cancel_delayed_stop();
        self.give_up_audio_focus();
        self.update_playback_state(with_error).await;

        self.service_started = false;
    }

    /// Let go of resources.  The engine itself is only released when asked;
    /// a paused session keeps it to resume quickly.
    fn relax_resources(&mut self, release_engine: bool) {
        debug!("ServiceCore: relax resources (release engine {})", release_engine);
        self.schedule_delayed_stop();
        if release_engine {
            if let Some(mut engine) = self.engine.take() {
                engine.release();
            }
        }
        self.set_wifi_lock(false);
    }

    fn create_engine_if_needed(&mut self) {
        match self.engine.as_mut() {
            Some(engine) => {
                debug!("ServiceCore: reset engine {}", self.engine_id);
                engine.reset();
            }
            None => {
                self.engine_id = self.next_engine_id;
                self.next_engine_id += 1;
                debug!("ServiceCore: create engine {}", self.engine_id);
                let listener = EngineListener::new(self.engine_id, self.event_tx.clone());
                self.engine = Some(self.engines.create(listener));
            }
        }
    }

    fn set_wifi_lock(&mut self, held: bool) {
        if self.wifi_lock_held != held {
            debug!("ServiceCore: wifi lock {}", if held { "acquired" } else { "released" });
            self.wifi_lock_held = held;
        }
    }

    // ── delayed stop ──────────────────────────────────────────────────────────

    fn schedule_delayed_stop(&mut self) {
        self.cancel_delayed_stop();
        self.delayed_stop_token += 1;
        let token = self.delayed_stop_token;
        let delay = tokio::time::Duration::from_secs(self.config.service.auto_stop_secs);
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ServiceEvent::DelayedStop { token }).await;
        });
        self.delayed_stop = Some(task.abort_handle());
    }

    fn cancel_delayed_stop(&mut self) {
        if let Some(task) = self.delayed_stop.take() {
            task.abort();
        }
        // Invalidate a timer that already fired but is still queued
        self.delayed_stop_token += 1;
    }

    fn on_delayed_stop(&mut self) {
        self.delayed_stop = None;
        let engine_playing = self.engine.as_ref().is_some_and(|e| e.is_playing());
        if engine_playing || self.play_on_focus_gain {
            debug!("ServiceCore: ignoring delayed stop, player in use");
            return;
        }
        info!("ServiceCore: stopping service after idle delay");
        self.service_started = false;
        self.publish(SessionUpdate::Idle);
    }

    // ── engine callbacks ──────────────────────────────────────────────────────

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Prepared => self.on_prepared().await,
            EngineEvent::StateChanged(EngineState::Buffering) => {
                debug!("ServiceCore: engine buffering");
                self.state = PlaybackState::Buffering;
                self.update_playback_state(None).await;
            }
            EngineEvent::StateChanged(EngineState::Ready) => {
                if self.state == PlaybackState::Buffering {
                    self.state = PlaybackState::Playing;
                    self.update_playback_state(None).await;
                }
            }
            EngineEvent::Error(EngineError::UnrecognizedFormat(message)) => {
                warn!("ServiceCore: unrecognized stream format: {}", message);
                self.handle_unrecognized_format().await;
            }
            EngineEvent::Error(EngineError::Other(message)) => {
                error!("ServiceCore: engine error: {}", message);
                self.handle_stop_request(Some(metadata::MEDIA_PLAYER_ERROR))
                    .await;
            }
            EngineEvent::Progress {
                position_ms,
                buffered_position_ms,
            } => {
                self.position_ms = position_ms;
                self.buffered_position_ms = buffered_position_ms;
            }
            EngineEvent::StreamTitle(title) => {
                self.update_metadata(title.unwrap_or_default()).await;
            }
        }
    }

    async fn on_prepared(&mut self) {
        info!("ServiceCore: prepared (play when ready {})", self.play_when_ready);
        if !self.play_when_ready {
            self.handle_stop_request(None).await;
            self.play_when_ready = true;
            return;
        }

        if let Some(station) = self.last_known_station.clone() {
            let storage = Arc::clone(&self.storage);
            tokio::spawn(async move {
                if let Err(e) = storage.latest.set(station).await {
                    warn!("ServiceCore: cannot save latest station: {}", e);
                }
            });
        }

        self.configure_player_state().await;
    }

    /// Reconcile the engine with the current focus: pause without focus,
    /// duck or restore the volume otherwise, and start if a start is pending.
    async fn configure_player_state(&mut self) {
        debug!("ServiceCore: configure player, focus {:?}", self.audio_focus);
        if self.audio_focus == AudioFocus::NoFocusNoDuck {
            if self.state == PlaybackState::Playing {
                self.handle_pause_request(PauseReason::Default).await;
                return;
            }
        } else if self.engine.is_some() {
            self.set_player_volume();
            if self.play_on_focus_gain {
                if let Some(engine) = self.engine.as_mut() {
                    if !engine.is_playing() {
                        engine.play();
                    }
                }
                self.play_on_focus_gain = false;
                self.state = PlaybackState::Playing;
            }
        }
        self.update_playback_state(None).await;
    }

    fn set_player_volume(&mut self) {
        let volume = volume_for(
            self.audio_focus,
            self.master_volume,
            self.config.service.duck_volume,
        );
        if let Some(engine) = self.engine.as_mut() {
            engine.set_volume(volume);
        }
    }

    async fn handle_unrecognized_format(&mut self) {
        self.handle_stop_request(None).await;
        let Some(url) = self.last_played_url.clone() else {
            self.handle_stop_request(Some(metadata::MEDIA_PLAYER_ERROR))
                .await;
            return;
        };

        info!("ServiceCore: looking for streams in playlist at {}", url);
        let generation = self.generation;
        let fetcher = Arc::clone(&self.playlist_fetcher);
        let workers = self.workers.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let urls = match workers.run(move || fetcher.extract_urls(&url)).await {
                Ok(Ok(urls)) => urls,
                Ok(Err(e)) => {
                    warn!("ServiceCore: no urls from playlist: {}", e);
                    Vec::new()
                }
                Err(e) => {
                    warn!("ServiceCore: playlist fetch not run: {}", e);
                    Vec::new()
                }
            };
            let _ = tx
                .send(ServiceEvent::PlaylistExtracted { generation, urls })
                .await;
        });
    }

    async fn on_playlist_urls_extracted(&mut self, urls: Vec<String>) {
        let Some(first) = urls.into_iter().next() else {
            self.handle_stop_request(Some(metadata::MEDIA_PLAYER_ERROR))
                .await;
            return;
        };
        let replaced = {
            let mut catalogue = self.catalogue.lock().await;
            match catalogue.station_at_mut(self.current_index) {
                Some(station) => {
                    station.media_stream.clear();
                    station.media_stream.set_variant(0, first.clone());
                    true
                }
                None => false,
            }
        };
        if !replaced {
            self.handle_stop_request(Some(metadata::MEDIA_PLAYER_ERROR))
                .await;
            return;
        }
        info!("ServiceCore: retrying with {}", first);
        self.handle_play_request().await;
    }

    // ── focus and platform signals ────────────────────────────────────────────

    fn try_to_get_audio_focus(&mut self) {
        if self.audio_focus == AudioFocus::Focused {
            return;
        }
        if self.focus_manager.request() {
            info!("ServiceCore: audio focus gained");
            self.audio_focus = AudioFocus::Focused;
        }
    }

    fn give_up_audio_focus(&mut self) {
        if self.audio_focus != AudioFocus::Focused {
            return;
        }
        self.focus_manager.abandon();
        self.audio_focus = AudioFocus::NoFocusNoDuck;
    }

    async fn on_audio_focus_change(&mut self, change: FocusChange) {
        debug!("ServiceCore: focus change {:?}", change);
        self.audio_focus = AudioFocus::after(change);
        if self.audio_focus == AudioFocus::NoFocusNoDuck && self.state == PlaybackState::Playing
        {
            // Resume once focus comes back
            self.play_on_focus_gain = true;
        }
        self.configure_player_state().await;
    }

    async fn on_connectivity_changed(&mut self, online: bool) {
        let regained = online && !self.online;
        self.online = online;
        info!("ServiceCore: connectivity {}", if online { "up" } else { "down" });
        if regained
            && self.service_started
            && !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
            && is_index_playable(self.current_index, self.catalogue.lock().await.queue_len())
        {
            self.state = PlaybackState::Stopped;
            self.handle_play_request().await;
        }
    }

    async fn on_same_device_connected(&mut self) {
        let auto_play = self.config.service.bluetooth_auto_play;
        debug!(
            "ServiceCore: same device connected, auto play {}, state {:?}, reason {:?}",
            auto_play, self.state, self.pause_reason
        );
        if auto_play
            && self.state == PlaybackState::Paused
            && self.pause_reason == PauseReason::Noisy
        {
            self.handle_play_request().await;
        }
    }

    fn check_connectivity(&self) -> bool {
        if self.online {
            return true;
        }
        warn!("ServiceCore: no connectivity, request dropped");
        self.publish(SessionUpdate::Error(metadata::NO_CONNECTIVITY.to_string()));
        false
    }

    // ── favorites, locals and other store commands ────────────────────────────

    async fn current_station(&self) -> Option<Station> {
        let catalogue = self.catalogue.lock().await;
        catalogue
            .station_at(self.current_index)
            .cloned()
            .or_else(|| self.last_known_station.clone())
    }

    async fn current_media_id(&self) -> Option<String> {
        let catalogue = self.catalogue.lock().await;
        catalogue
            .queue_item(self.current_index)
            .map(|item| item.media_id.clone())
    }

    async fn refresh_favorite(&mut self) {
        self.current_is_favorite = match self.current_station().await {
            Some(station) => self.storage.favorites.contains(&station.media_id()).await,
            None => false,
        };
    }

    async fn toggle_current_favorite(&mut self) {
        let Some(station) = self.current_station().await else {
            warn!("ServiceCore: no current station to toggle favorite");
            self.update_playback_state(None).await;
            return;
        };
        let storage = Arc::clone(&self.storage);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let media_id = station.media_id();
            let result = if storage.favorites.contains(&media_id).await {
                info!("ServiceCore: removing {} from favorites", media_id);
                storage.favorites.remove(&media_id).await.map(|_| ())
            } else {
                info!("ServiceCore: adding {} to favorites", media_id);
                storage.favorites.add(station).await
            };
            if let Err(e) = result {
                error!("ServiceCore: favorites not updated: {}", e);
            }
            let _ = tx.send(ServiceEvent::FavoritesChanged).await;
        });
    }

    /// Look a station up wherever it may be known.
    async fn find_station(&self, media_id: &str) -> Option<Station> {
        {
            let catalogue = self.catalogue.lock().await;
            if let Some(station) = catalogue.station(media_id) {
                return Some(station.clone());
            }
            let queued = catalogue
                .index_of_media_id(media_id)
                .and_then(|i| catalogue.station_at(Some(i)));
            if let Some(station) = queued {
                return Some(station.clone());
            }
        }
        if let Some(station) = self.storage.favorites.get(media_id).await {
            return Some(station);
        }
        if let Some(station) = self.storage.locals.get(media_id).await {
            return Some(station);
        }
        self.storage
            .latest
            .get()
            .await
            .filter(|s| s.media_id() == media_id)
    }

    async fn update_favorite(&mut self, media_id: String, is_favorite: bool) {
        let station = self.find_station(&media_id).await;
        let storage = Arc::clone(&self.storage);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = if is_favorite {
                match station {
                    Some(station) => storage.favorites.add(station).await,
                    None => {
                        warn!("ServiceCore: station {} unknown, not a favorite", media_id);
                        return;
                    }
                }
            } else {
                storage.favorites.remove(&media_id).await.map(|_| ())
            };
            if let Err(e) = result {
                error!("ServiceCore: favorites not updated: {}", e);
            }
            let _ = tx.send(ServiceEvent::FavoritesChanged).await;
        });
    }

    /// Add (`media_id` = None) or edit a local station.
    fn save_local(&mut self, media_id: Option<String>, draft: Station, add_to_favorites: bool) {
        if draft.name.trim().is_empty() || draft.stream_url().is_none() {
            warn!("ServiceCore: local station needs a name and a stream url");
            self.publish(SessionUpdate::Error(
                "Station name and URL are required".to_string(),
            ));
            return;
        }
        let storage = Arc::clone(&self.storage);
        let catalogue = Arc::clone(&self.catalogue);
        let updates = self.updates.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut station = draft;
            match &media_id {
                Some(media_id) => {
                    let Some(existing) = storage.locals.get(media_id).await else {
                        warn!("ServiceCore: local station {} not found", media_id);
                        return;
                    };
                    station.id = existing.id;
                    station.sort_id = existing.sort_id;
                }
                None => station.id = storage.next_local_id().await,
            }

            if let Err(e) = storage.locals.add(station.clone()).await {
                error!("ServiceCore: local station not saved: {}", e);
                let _ = updates.send(SessionUpdate::Error(e.to_string()));
                return;
            }
            let favorites_result = if add_to_favorites {
                storage.favorites.add(station.clone()).await
            } else {
                storage.favorites.remove(&station.media_id()).await.map(|_| ())
            };
            if let Err(e) = favorites_result {
                error!("ServiceCore: favorites not updated: {}", e);
            }
            if let Some(cached) = catalogue.lock().await.station_mut(&station.media_id()) {
                *cached = station.clone();
            }
            info!("ServiceCore: saved local station {} ({})", station.name, station.id);

            let _ = updates.send(SessionUpdate::ChildrenChanged {
                parent_id: media_id::LOCALS.to_string(),
            });
            let _ = tx.send(ServiceEvent::FavoritesChanged).await;
        });
    }

    fn remove_local(&mut self, media_id: String) {
        let storage = Arc::clone(&self.storage);
        let catalogue = Arc::clone(&self.catalogue);
        let updates = self.updates.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match storage.locals.remove(&media_id).await {
                Ok(Some(_)) => info!("ServiceCore: removed local station {}", media_id),
                Ok(None) => {
                    warn!("ServiceCore: local station {} not found", media_id);
                    return;
                }
                Err(e) => {
                    error!("ServiceCore: local station not removed: {}", e);
                    return;
                }
            }
            if let Err(e) = storage.favorites.remove(&media_id).await {
                error!("ServiceCore: favorites not updated: {}", e);
            }
            catalogue.lock().await.remove_station(&media_id);
            let _ = updates.send(SessionUpdate::ChildrenChanged {
                parent_id: media_id::LOCALS.to_string(),
            });
            let _ = tx.send(ServiceEvent::FavoritesChanged).await;
        });
    }

    fn update_sort_ids(&mut self, media_ids: Vec<String>, sort_ids: Vec<i32>, category_id: String) {
        if media_ids.len() != sort_ids.len() {
            warn!(
                "ServiceCore: {} media ids but {} sort ids",
                media_ids.len(),
                sort_ids.len()
            );
            return;
        }
        let in_favorites = match media_id::split(&category_id) {
            Some((NodeKind::Favorites, _)) => true,
            Some((NodeKind::Locals, _)) => false,
            _ => {
                warn!("ServiceCore: sort ids not supported for {}", category_id);
                return;
            }
        };
        let storage = Arc::clone(&self.storage);
        let catalogue = Arc::clone(&self.catalogue);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let store = if in_favorites {
                &storage.favorites
            } else {
                &storage.locals
            };
            let mut stations = store.all().await;
            for (media_id, sort_id) in media_ids.iter().zip(&sort_ids) {
                if let Some(station) = stations.iter_mut().find(|s| &s.media_id() == media_id) {
                    station.sort_id = *sort_id;
                }
                if let Some(cached) = catalogue.lock().await.station_mut(media_id) {
                    cached.sort_id = *sort_id;
                }
            }
            if let Err(e) = store.replace_all(stations).await {
                error!("ServiceCore: sort ids not saved: {}", e);
                return;
            }
            debug!("ServiceCore: {} sort ids updated in {}", media_ids.len(), category_id);
            let _ = updates.send(SessionUpdate::ChildrenChanged {
                parent_id: category_id,
            });
        });
    }

    async fn toggle_last_played(&mut self) {
        match self.state {
            PlaybackState::Playing => self.handle_pause_request(PauseReason::Default).await,
            PlaybackState::Paused => self.handle_play_request().await,
            PlaybackState::Buffering => debug!("ServiceCore: toggle ignored while buffering"),
            _ => {
                let Some(latest) = self.storage.latest.get().await else {
                    debug!("ServiceCore: nothing played yet");
                    return;
                };
                let media_id = latest.media_id();
                self.catalogue.lock().await.add_station(latest);
                self.handle_play_from_media_id(&media_id, true).await;
            }
        }
    }

    fn run_backup(&mut self, pipeline: Pipeline) {
        let mut ctx = BackupContext::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.backup_target),
            self.workers.clone(),
        );
        let updates = self.updates.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match pipeline.run(&mut ctx).await {
                Ok(()) => {
                    let _ = updates.send(SessionUpdate::Notice("Done".to_string()));
                    for parent_id in [media_id::ROOT, media_id::FAVORITES, media_id::LOCALS] {
                        let _ = updates.send(SessionUpdate::ChildrenChanged {
                            parent_id: parent_id.to_string(),
                        });
                    }
                    let _ = tx.send(ServiceEvent::FavoritesChanged).await;
                }
                Err(e) => {
                    error!("ServiceCore: {}", e);
                    let _ = updates.send(SessionUpdate::Error(e.to_string()));
                }
            }
        });
    }

    // ── session output ────────────────────────────────────────────────────────

    fn available_actions(&self, queue_len: usize) -> Vec<PlaybackAction> {
        let mut actions = vec![
            PlaybackAction::Play,
            PlaybackAction::PlayFromMediaId,
            PlaybackAction::PlayFromSearch,
        ];
        if queue_len == 0 {
            return actions;
        }
        if self.state == PlaybackState::Playing {
            actions.push(PlaybackAction::Pause);
        }
        if self.current_index.is_some_and(|i| i > 0) {
            actions.push(PlaybackAction::SkipToPrevious);
        }
        if self.current_index.map_or(true, |i| i + 1 < queue_len) {
            actions.push(PlaybackAction::SkipToNext);
        }
        actions
    }

    /// Rebuild the playback snapshot and now-playing metadata and publish
    /// them.  An error message moves the state to `Error`.
    async fn update_playback_state(&mut self, error: Option<&str>) {
        match error {
            Some(message) => {
                error!("ServiceCore: playback error: {}", message);
                self.state = PlaybackState::Error;
                self.error = Some(message.to_string());
            }
            None if self.state != PlaybackState::Error => self.error = None,
            None => {}
        }
        debug!("ServiceCore: playback state {:?}", self.state);

        let catalogue = Arc::clone(&self.catalogue);
        let catalogue = catalogue.lock().await;
        let queue_len = catalogue.queue_len();
        let station = catalogue
            .station_at(self.current_index)
            .or(self.last_known_station.as_ref());

        let title = if self.state == PlaybackState::Buffering {
            metadata::BUFFERING_TITLE
        } else {
            self.stream_title.as_str()
        };
        let now_playing = station.map(|s| metadata::now_playing(s, title));
        let custom_action = station.map(|_| CustomAction {
            action: FAVORITE_ACTION.to_string(),
            name: metadata::FAVORITE_ACTION_NAME.to_string(),
            icon: if self.current_is_favorite {
                FavoriteIcon::StarOn
            } else {
                FavoriteIcon::StarOff
            },
        });

        let playback = PlaybackSnapshot {
            state: self.state,
            error: self.error.clone(),
            position_ms: self.position_ms,
            buffered_position_ms: self.buffered_position_ms,
            actions: self.available_actions(queue_len),
            custom_action,
            active_queue_item_id: catalogue.queue_item(self.current_index).map(|q| q.queue_id),
        };
        let queue = catalogue.queue().to_vec();
        drop(catalogue);

        let queue_title = self.queue_title.clone();
        let current_index = self.current_index;
        let wifi_lock_held = self.wifi_lock_held;
        self.session
            .update(|s| {
                s.notification_visible = playback.state.shows_notification();
                s.playback = playback;
                s.now_playing = now_playing;
                s.queue_title = queue_title;
                s.queue = queue;
                s.current_index = current_index;
                s.wifi_lock_held = wifi_lock_held;
            })
            .await;
        self.publish(SessionUpdate::StateUpdated);
    }

    /// New stream title.  Republishes now-playing metadata for the current
    /// queue item; an unplayable index turns into an error.
    async fn update_metadata(&mut self, stream_title: String) {
        if stream_title != metadata::BUFFERING_TITLE {
            self.stream_title = stream_title;
        }
        let queue_len = self.catalogue.lock().await.queue_len();
        if !is_index_playable(self.current_index, queue_len) {
            error!(
                "ServiceCore: no metadata for index {:?} in queue of {}",
                self.current_index, queue_len
            );
            self.update_playback_state(Some(metadata::NO_METADATA)).await;
            return;
        }
        if self.current_station().await.is_none() {
            warn!("ServiceCore: cannot update metadata, station unknown");
            return;
        }
        debug!("ServiceCore: stream title '{}'", self.stream_title);
        self.update_playback_state(None).await;
    }

    fn cleanup(&mut self) {
        info!("ServiceCore: cleaning up");
        self.cancel_delayed_stop();
        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
        self.give_up_audio_focus();
        self.workers.close();
    }
}

//! `PlaybackEngine` backed by an mpv child process driven over JSON IPC.
//!
//! ```text
//!   MpvEngine ──EngineRequest──▶ engine task ──▶ MpvHandle ──▶ writer task ──▶ socket
//!                                    ▲                                          │
//!                                    └──── unsolicited events ◀── reader task ◀─┘
//!                                    │
//!                                    └──▶ EngineListener (EngineEvent)
//! ```
//!
//! Replies carry the `request_id` of their command and are routed to a
//! oneshot; everything else is an event or property change and goes to the
//! engine task, which translates it into `EngineEvent`s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use openradio_proto::platform;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use super::{EngineError, EngineEvent, EngineFactory, EngineListener, EngineState, PlaybackEngine};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const OBS_CORE_IDLE: u64 = 1;
const OBS_PAUSE: u64 = 2;
const OBS_ICY_TITLE: u64 = 3;
const OBS_TIME_POS: u64 = 4;
const OBS_CACHE_TIME: u64 = 5;

/// mpv's `file_error` text for input no demuxer accepts.
const UNRECOGNIZED_FORMAT: &str = "unrecognized file format";

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct IpcRequest {
    req_id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Cloneable handle to the IPC writer task.
#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<IpcRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IpcRequest {
                req_id,
                line,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    async fn observe_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_CACHE_TIME, "demuxer-cache-time"),
        ];
        for (id, name) in props {
            if let Err(e) = self.send(json!(["observe_property", id, name])).await {
                warn!("mpv: observe_property {} failed: {}", name, e);
            }
        }
    }
}

/// Owns the mpv process.
#[derive(Default)]
struct MpvDriver {
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill().await;
        }
    }

    async fn start(&mut self, volume: f32, events: mpsc::Sender<Value>) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(platform::mpv_socket_name()).await;

        let binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {:?}", binary);
        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(format!("--volume={}", volume_percent(volume)))
            .arg(platform::mpv_socket_arg())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        let handle = connect_ipc(events).await?;
        handle.observe_properties().await;
        Ok(handle)
    }
}

fn volume_percent(volume: f32) -> i64 {
    (volume * 100.0).clamp(0.0, 100.0).round() as i64
}

#[cfg(unix)]
async fn connect_ipc(events: mpsc::Sender<Value>) -> anyhow::Result<MpvHandle> {
    let path = std::path::PathBuf::from(platform::mpv_socket_name());
    for _ in 0..50 {
        if path.exists() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    if !path.exists() {
        anyhow::bail!("mpv IPC socket did not appear");
    }
    let stream = tokio::net::UnixStream::connect(&path).await?;
    info!("mpv: connected to IPC socket");
    let (read_half, write_half) = stream.into_split();
    Ok(start_io(read_half, write_half, events))
}

#[cfg(windows)]
async fn connect_ipc(events: mpsc::Sender<Value>) -> anyhow::Result<MpvHandle> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe_path = format!(r"\\.\pipe\{}", platform::mpv_socket_name());
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe");
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(start_io(read_half, write_half, events));
        }
    }
    anyhow::bail!("mpv named pipe did not appear")
}

fn start_io<R, W>(read_half: R, write_half: W, events: mpsc::Sender<Value>) -> MpvHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::channel::<IpcRequest>(64);
    tokio::spawn(writer_task(write_half, rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, events));
    MpvHandle { tx }
}

async fn fail_pending(pending: &PendingReplies, reason: &str) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingReplies, events: mpsc::Sender<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
                    if events.send(val).await.is_err() {
                        break;
                    }
                    continue;
                };
                let Some(tx) = pending.lock().await.remove(&req_id) else {
                    debug!("mpv reader: response for unknown req={}", req_id);
                    continue;
                };
                let result = match val["error"].as_str() {
                    Some("success") => Ok(val),
                    other => Err(anyhow::anyhow!(
                        "mpv error: {}",
                        other.unwrap_or("unknown error")
                    )),
                };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<IpcRequest>, pending: PendingReplies)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[derive(Debug)]
enum EngineRequest {
    Prepare(String),
    Play,
    Pause,
    Stop,
    SetVolume(f32),
}

/// Engine task state: the mpv connection plus what mpv last reported.
struct EngineTask {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    listener: EngineListener,
    mpv_tx: mpsc::Sender<Value>,
    volume: f32,
    preparing: bool,
    loaded: bool,
    paused: bool,
    position_ms: u64,
    cached_ms: u64,
}

impl EngineTask {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<EngineRequest>,
        mut mpv_rx: mpsc::Receiver<Value>,
    ) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req).await,
                    None => break,
                },
                Some(raw) = mpv_rx.recv() => {
                    if !self.handle_mpv_event(raw).await {
                        break;
                    }
                }
            }
        }
        debug!("mpv engine {}: released", self.listener.engine_id());
        self.driver.kill().await;
    }

    async fn connected(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if self.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: process died, restarting");
        }
        let handle = self.driver.start(self.volume, self.mpv_tx.clone()).await?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn handle_request(&mut self, req: EngineRequest) {
        debug!("mpv engine: {:?}", req);
        let result = match req {
            EngineRequest::Prepare(url) => self.load(&url).await,
            EngineRequest::Play => self.set_pause(false).await,
            EngineRequest::Pause => self.set_pause(true).await,
            EngineRequest::Stop => {
                self.preparing = false;
                self.loaded = false;
                match &self.handle {
                    Some(h) => h.send(json!(["stop"])).await.map(|_| ()),
                    None => Ok(()),
                }
            }
            EngineRequest::SetVolume(volume) => {
                self.volume = volume;
                match &self.handle {
                    Some(h) => h.set_property("volume", json!(volume_percent(volume))).await,
                    None => Ok(()),
                }
            }
        };
        if let Err(e) = result {
            warn!("mpv engine: {}", e);
            self.listener
                .emit(EngineEvent::Error(EngineError::Other(e.to_string())))
                .await;
        }
    }

    async fn load(&mut self, url: &str) -> anyhow::Result<()> {
        let handle = self.connected().await?;
        // Load paused; the core starts playback once it has focus
        handle.set_property("pause", json!(true)).await?;
        self.paused = true;
        self.preparing = true;
        self.loaded = false;
        handle.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
        self.paused = paused;
        match &self.handle {
            Some(h) => h.set_property("pause", json!(paused)).await,
            None => Ok(()),
        }
    }

    /// Translate one mpv event.  Returns false once the core is gone.
    async fn handle_mpv_event(&mut self, raw: Value) -> bool {
        let event = match raw.get("event").and_then(Value::as_str) {
            Some(event) => event,
            None => return true,
        };

        let translated = match event {
            "property-change" => {
                let id = raw.get("id").and_then(Value::as_u64).unwrap_or(0);
                self.property_change(id, raw.get("data").unwrap_or(&Value::Null))
            }
            "file-loaded" => {
                self.loaded = true;
                if std::mem::take(&mut self.preparing) {
                    Some(EngineEvent::Prepared)
                } else {
                    None
                }
            }
            "end-file" => self.end_file(&raw),
            _ => None,
        };

        match translated {
            Some(event) => self.listener.emit(event).await,
            None => true,
        }
    }

    fn property_change(&mut self, id: u64, data: &Value) -> Option<EngineEvent> {
        match id {
            OBS_CORE_IDLE => {
                let idle = data.as_bool()?;
                if !self.loaded || self.paused {
                    return None;
                }
                let state = if idle {
                    EngineState::Buffering
                } else {
                    EngineState::Ready
                };
                Some(EngineEvent::StateChanged(state))
            }
            OBS_PAUSE => {
                self.paused = data.as_bool().unwrap_or(false);
                None
            }
            OBS_ICY_TITLE => {
                let title = data
                    .as_str()
                    .filter(|t| !t.trim().trim_matches('-').trim().is_empty())
                    .map(str::to_string);
                Some(EngineEvent::StreamTitle(title))
            }
            OBS_TIME_POS => {
                self.position_ms = seconds_to_ms(data);
                Some(self.progress())
            }
            OBS_CACHE_TIME => {
                self.cached_ms = seconds_to_ms(data);
                Some(self.progress())
            }
            _ => None,
        }
    }

    fn progress(&self) -> EngineEvent {
        EngineEvent::Progress {
            position_ms: self.position_ms,
            buffered_position_ms: self.cached_ms.max(self.position_ms),
        }
    }

    fn end_file(&mut self, raw: &Value) -> Option<EngineEvent> {
        let reason = raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
        info!("mpv: end-file reason={}", reason);
        let was_active = self.loaded || self.preparing;
        self.loaded = false;
        self.preparing = false;
        self.position_ms = 0;
        self.cached_ms = 0;

        match reason {
            "error" => {
                let message = raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("playback error")
                    .to_string();
                let error = if message.contains(UNRECOGNIZED_FORMAT) {
                    EngineError::UnrecognizedFormat(message)
                } else {
                    EngineError::Other(message)
                };
                Some(EngineEvent::Error(error))
            }
            "eof" if was_active => Some(EngineEvent::Error(EngineError::Other(
                "stream ended".to_string(),
            ))),
            _ => None,
        }
    }
}

fn seconds_to_ms(data: &Value) -> u64 {
    data.as_f64()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map_or(0, |secs| (secs * 1000.0) as u64)
}

/// Synchronous front of the engine task.
pub struct MpvEngine {
    tx: mpsc::UnboundedSender<EngineRequest>,
    playing: bool,
}

impl MpvEngine {
    fn request(&self, req: EngineRequest) {
        if self.tx.send(req).is_err() {
            warn!("mpv engine task is gone");
        }
    }
}

impl PlaybackEngine for MpvEngine {
    fn prepare(&mut self, url: &str) {
        self.playing = false;
        self.request(EngineRequest::Prepare(url.to_string()));
    }

    fn play(&mut self) {
        self.playing = true;
        self.request(EngineRequest::Play);
    }

    fn pause(&mut self) {
        self.playing = false;
        self.request(EngineRequest::Pause);
    }

    fn stop(&mut self) {
        self.playing = false;
        self.request(EngineRequest::Stop);
    }

    fn reset(&mut self) {
        self.stop();
    }

    fn release(&mut self) {
        self.playing = false;
        // Closing the channel ends the task, which kills mpv
        let (closed, _) = mpsc::unbounded_channel();
        self.tx = closed;
    }

    fn set_volume(&mut self, volume: f32) {
        self.request(EngineRequest::SetVolume(volume.clamp(0.0, 1.0)));
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Spawns one mpv-backed engine task per created engine.
#[derive(Default)]
pub struct MpvEngineFactory;

impl EngineFactory for MpvEngineFactory {
    fn create(&mut self, listener: EngineListener) -> Box<dyn PlaybackEngine> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (mpv_tx, mpv_rx) = mpsc::channel(64);
        info!("mpv engine {}: created", listener.engine_id());
        let task = EngineTask {
            driver: MpvDriver::default(),
            handle: None,
            listener,
            mpv_tx,
            volume: 1.0,
            preparing: false,
            loaded: false,
            paused: true,
            position_ms: 0,
            cached_ms: 0,
        };
        tokio::spawn(task.run(rx, mpv_rx));
        Box::new(MpvEngine { tx, playing: false })
    }
}

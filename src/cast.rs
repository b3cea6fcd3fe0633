//! Chromecast discovery and transport control.
//!
//! Discovery runs over mDNS. A live device session speaks the Cast v2
//! protocol through a client that is not thread-safe, so each connection is
//! owned by a dedicated session thread consuming a command channel — the same
//! single-owner shape as the storage gateway. The manager's mutex guards only
//! its own fields and is always released before a remote call.

use std::collections::HashMap;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use rust_cast::channels::media::{Media, PlayerState, ResumeState, StreamType};
use rust_cast::channels::receiver::{CastDeviceApp, Volume};
use rust_cast::CastDevice as CastConnection;
use serde::Serialize;
use tokio::sync::oneshot;

const CAST_SERVICE: &str = "_googlecast._tcp.local.";
const DEFAULT_DESTINATION: &str = "receiver-0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Device types that are always audio-only endpoints.
const AUDIO_DEVICE_TYPES: &[&str] = &[
    "Google Home",
    "Google Home Mini",
    "Google Nest Mini",
    "Google Nest Audio",
    "Google Home Max",
    "Chromecast Audio",
    "Google Cast Group",
    "Lenovo Smart Clock",
    "JBL Link",
];

/// A discovered device, keyed by its advertised UUID.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub uuid: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub device_type: String,
    pub is_audio: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CastStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_title: Option<String>,
    /// IDLE, BUFFERING, PLAYING, or PAUSED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_state: Option<String>,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("not connected to any device")]
    NotConnected,
    #[error("base URL not set - cannot construct media URL")]
    NoBaseUrl,
    #[error("connection timed out after 10 seconds")]
    ConnectTimeout,
    #[error("load timed out after 10 seconds")]
    LoadTimeout,
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("{0}")]
    Protocol(String),
    #[error("cast task failed: {0}")]
    Task(String),
}

/// Name-based heuristic for speaker-class devices; the model strings vary
/// across firmware generations.
pub fn is_audio_device(device_type: &str) -> bool {
    if AUDIO_DEVICE_TYPES.contains(&device_type) {
        return true;
    }
    let lower = device_type.to_lowercase();
    ["speaker", "audio", "home mini", "nest mini", "nest audio", "cast group"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[derive(Debug, Clone, Default)]
struct PlaybackStatus {
    player_state: String,
    current_time: f64,
    duration: f64,
    media_url: String,
    volume: f64,
    muted: bool,
}

enum SessionCmd {
    Load {
        url: String,
        content_type: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Pause(oneshot::Sender<Result<(), String>>),
    Resume(oneshot::Sender<Result<(), String>>),
    Stop(oneshot::Sender<Result<(), String>>),
    Seek(f64, oneshot::Sender<Result<(), String>>),
    SetVolume(f64, oneshot::Sender<Result<(), String>>),
    SetMuted(bool, oneshot::Sender<Result<(), String>>),
    Status(oneshot::Sender<Result<PlaybackStatus, String>>),
    Disconnect,
}

struct Session {
    device: Device,
    tx: std_mpsc::Sender<SessionCmd>,
    media_url: Option<String>,
    media_title: Option<String>,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    base_url: String,
    session: Option<Session>,
}

pub struct CastManager {
    inner: Mutex<Inner>,
}

impl CastManager {
    pub fn new(base_url: impl Into<String>) -> Self {
        CastManager {
            inner: Mutex::new(Inner {
                base_url: base_url.into(),
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cast state lock poisoned")
    }

    /// Media URLs handed to devices are absolute, so the externally reachable
    /// base is captured from incoming requests.
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.lock().base_url = base_url.into();
    }

    /// Search the network, replacing the cached device map with what answers
    /// within `timeout`.
    pub async fn discover(self: Arc<Self>, timeout: Duration) -> Result<Vec<Device>, CastError> {
        let found = tokio::task::spawn_blocking(move || discover_blocking(timeout))
            .await
            .map_err(|e| CastError::Task(e.to_string()))??;

        let mut inner = self.lock();
        inner.devices.clear();
        for device in &found {
            inner.devices.insert(device.uuid.clone(), device.clone());
        }
        Ok(found)
    }

    /// Cached results of the last discovery.
    pub fn devices(&self) -> Vec<Device> {
        let inner = self.lock();
        let mut devices: Vec<Device> = inner.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    /// Open a session to a previously discovered device, dropping any current
    /// session first (best-effort, without waiting on it).
    pub async fn connect(self: Arc<Self>, uuid: &str) -> Result<Device, CastError> {
        let device = self
            .lock()
            .devices
            .get(uuid)
            .cloned()
            .ok_or_else(|| CastError::DeviceNotFound(uuid.to_owned()))?;

        if let Some(old) = self.lock().session.take() {
            let _ = old.tx.send(SessionCmd::Disconnect);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let host = device.host.clone();
        let port = device.port;
        std::thread::Builder::new()
            .name("q2-cast-session".into())
            .spawn(move || session_thread(host, port, ready_tx, cmd_rx))
            .map_err(|e| CastError::Task(e.to_string()))?;

        match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("connected to cast device {} ({})", device.name, device.host);
                self.lock().session = Some(Session {
                    device: device.clone(),
                    tx: cmd_tx,
                    media_url: None,
                    media_title: None,
                });
                Ok(device)
            }
            Ok(Ok(Err(msg))) => Err(CastError::Protocol(msg)),
            Ok(Err(_)) => Err(CastError::Protocol("session thread exited".into())),
            Err(_) => Err(CastError::ConnectTimeout),
        }
    }

    pub fn disconnect(&self) {
        if let Some(session) = self.lock().session.take() {
            let _ = session.tx.send(SessionCmd::Disconnect);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn connected_device(&self) -> Option<Device> {
        self.lock().session.as_ref().map(|s| s.device.clone())
    }

    /// Load a local file on the device. The media URL is built from the
    /// captured base URL and the serving endpoint for the content family;
    /// it is returned so the caller can show it.
    pub async fn play_media(
        self: Arc<Self>,
        file_path: &str,
        content_type: &str,
        title: &str,
    ) -> Result<String, CastError> {
        let (tx, base_url, device_name) = {
            let inner = self.lock();
            let session = inner.session.as_ref().ok_or(CastError::NotConnected)?;
            if inner.base_url.is_empty() {
                return Err(CastError::NoBaseUrl);
            }
            (session.tx.clone(), inner.base_url.clone(), session.device.name.clone())
        };

        let encoded = urlencoding::encode(file_path);
        let media_url = if content_type.starts_with("video") {
            format!("{base_url}/api/video?path={encoded}")
        } else if content_type.starts_with("image") {
            format!("{base_url}/api/image?path={encoded}")
        } else {
            format!("{base_url}/api/stream?path={encoded}")
        };
        tracing::info!("casting to {device_name}: {media_url} ({content_type})");

        let (reply, rx) = oneshot::channel();
        tx.send(SessionCmd::Load {
            url: media_url.clone(),
            content_type: content_type.to_owned(),
            reply,
        })
        .map_err(|_| CastError::NotConnected)?;

        match tokio::time::timeout(LOAD_TIMEOUT, rx).await {
            Ok(Ok(Ok(()))) => {
                let mut inner = self.lock();
                if let Some(session) = inner.session.as_mut() {
                    session.media_url = Some(media_url.clone());
                    session.media_title = Some(title.to_owned());
                }
                Ok(media_url)
            }
            Ok(Ok(Err(msg))) => Err(CastError::Protocol(msg)),
            Ok(Err(_)) => Err(CastError::NotConnected),
            Err(_) => Err(CastError::LoadTimeout),
        }
    }

    pub async fn pause(&self) -> Result<(), CastError> {
        self.transport(SessionCmd::Pause).await
    }

    pub async fn resume(&self) -> Result<(), CastError> {
        self.transport(SessionCmd::Resume).await
    }

    pub async fn stop(&self) -> Result<(), CastError> {
        self.transport(SessionCmd::Stop).await
    }

    pub async fn seek(&self, position: f64) -> Result<(), CastError> {
        self.transport(move |reply| SessionCmd::Seek(position, reply)).await
    }

    pub async fn set_volume(&self, level: f64) -> Result<(), CastError> {
        self.transport(move |reply| SessionCmd::SetVolume(level, reply)).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), CastError> {
        self.transport(move |reply| SessionCmd::SetMuted(muted, reply)).await
    }

    async fn transport<F>(&self, make: F) -> Result<(), CastError>
    where
        F: FnOnce(oneshot::Sender<Result<(), String>>) -> SessionCmd,
    {
        let tx = {
            let inner = self.lock();
            inner
                .session
                .as_ref()
                .ok_or(CastError::NotConnected)?
                .tx
                .clone()
        };
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply)).map_err(|_| CastError::NotConnected)?;
        rx.await
            .map_err(|_| CastError::NotConnected)?
            .map_err(CastError::Protocol)
    }

    /// Snapshot of the playback state, forcing a device-side refresh. A dead
    /// session thread is treated as a disconnect.
    pub async fn status(&self) -> CastStatus {
        let session_info = {
            let inner = self.lock();
            inner.session.as_ref().map(|s| {
                (
                    s.tx.clone(),
                    s.device.name.clone(),
                    s.media_url.clone(),
                    s.media_title.clone(),
                )
            })
        };
        let Some((tx, device_name, media_url, media_title)) = session_info else {
            return CastStatus::default();
        };

        let (reply, rx) = oneshot::channel();
        if tx.send(SessionCmd::Status(reply)).is_err() {
            self.lock().session = None;
            return CastStatus::default();
        }

        let mut status = CastStatus {
            connected: true,
            device_name: Some(device_name),
            media_url,
            media_title,
            ..CastStatus::default()
        };

        match rx.await {
            Ok(Ok(playback)) => {
                if !playback.player_state.is_empty() {
                    status.player_state = Some(playback.player_state);
                }
                if !playback.media_url.is_empty() {
                    status.media_url = Some(playback.media_url);
                }
                status.current_time = playback.current_time;
                status.duration = playback.duration;
                status.volume = playback.volume;
                status.muted = playback.muted;
            }
            Ok(Err(e)) => tracing::warn!("cast status update failed: {e}"),
            Err(_) => {
                self.lock().session = None;
                return CastStatus::default();
            }
        }
        status
    }
}

fn discover_blocking(timeout: Duration) -> Result<Vec<Device>, CastError> {
    let daemon = ServiceDaemon::new().map_err(|e| CastError::Discovery(e.to_string()))?;
    let events = daemon
        .browse(CAST_SERVICE)
        .map_err(|e| CastError::Discovery(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    let mut devices: Vec<Device> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let Some(uuid) = info.get_property_val_str("id").map(str::to_owned) else {
                    continue;
                };
                if devices.iter().any(|d| d.uuid == uuid) {
                    continue;
                }
                let Some(address) = info.get_addresses().iter().next().copied() else {
                    continue;
                };
                let name = info
                    .get_property_val_str("fn")
                    .unwrap_or(info.get_fullname())
                    .to_owned();
                let device_type = info
                    .get_property_val_str("md")
                    .unwrap_or_default()
                    .to_owned();
                devices.push(Device {
                    is_audio: is_audio_device(&device_type),
                    uuid,
                    name,
                    host: address.to_string(),
                    port: info.get_port(),
                    device_type,
                });
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.shutdown();
    Ok(devices)
}

/// State of the launched media receiver app within one session.
struct AppSession {
    transport_id: String,
    session_id: String,
    media_session_id: Option<i32>,
}

fn session_thread(
    host: String,
    port: u16,
    ready: oneshot::Sender<Result<(), String>>,
    rx: std_mpsc::Receiver<SessionCmd>,
) {
    let device = match CastConnection::connect_without_host_verification(host, port) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = device
        .connection
        .connect(DEFAULT_DESTINATION)
        .and_then(|_| device.heartbeat.ping())
    {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    if ready.send(Ok(())).is_err() {
        // Caller gave up (timeout); tear the connection down.
        return;
    }

    let mut app: Option<AppSession> = None;
    loop {
        match rx.recv_timeout(HEARTBEAT_INTERVAL) {
            Ok(SessionCmd::Disconnect) => return,
            Ok(cmd) => handle_cmd(&device, &mut app, cmd),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if device.heartbeat.ping().is_err() {
                    tracing::warn!("cast heartbeat failed, closing session");
                    return;
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn handle_cmd(device: &CastConnection, app: &mut Option<AppSession>, cmd: SessionCmd) {
    match cmd {
        SessionCmd::Load { url, content_type, reply } => {
            let _ = reply.send(do_load(device, app, url, content_type));
        }
        SessionCmd::Pause(reply) => {
            let _ = reply.send(with_media_session(device, app, |transport, id| {
                device.media.pause(transport, id).map(|_| ()).map_err(err_str)
            }));
        }
        SessionCmd::Resume(reply) => {
            let _ = reply.send(with_media_session(device, app, |transport, id| {
                device.media.play(transport, id).map(|_| ()).map_err(err_str)
            }));
        }
        SessionCmd::Stop(reply) => {
            let _ = reply.send(with_media_session(device, app, |transport, id| {
                device.media.stop(transport, id).map(|_| ()).map_err(err_str)
            }));
        }
        SessionCmd::Seek(position, reply) => {
            let _ = reply.send(with_media_session(device, app, |transport, id| {
                device
                    .media
                    .seek(transport, id, Some(position as f32), Option::<ResumeState>::None)
                    .map(|_| ())
                    .map_err(err_str)
            }));
        }
        SessionCmd::SetVolume(level, reply) => {
            let volume = Volume { level: Some(level as f32), muted: None };
            let _ = reply.send(device.receiver.set_volume(volume).map(|_| ()).map_err(err_str));
        }
        SessionCmd::SetMuted(muted, reply) => {
            let volume = Volume { level: None, muted: Some(muted) };
            let _ = reply.send(device.receiver.set_volume(volume).map(|_| ()).map_err(err_str));
        }
        SessionCmd::Status(reply) => {
            let _ = reply.send(do_status(device, app));
        }
        SessionCmd::Disconnect => {}
    }
}

fn err_str<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

/// Launch the default media receiver on first use and remember its ids.
fn ensure_app<'a>(
    device: &CastConnection,
    app: &'a mut Option<AppSession>,
) -> Result<&'a mut AppSession, String> {
    if app.is_none() {
        let launched = device
            .receiver
            .launch_app(&CastDeviceApp::DefaultMediaReceiver)
            .map_err(err_str)?;
        device
            .connection
            .connect(launched.transport_id.as_str())
            .map_err(err_str)?;
        *app = Some(AppSession {
            transport_id: launched.transport_id.to_string(),
            session_id: launched.session_id.to_string(),
            media_session_id: None,
        });
    }
    app.as_mut().ok_or_else(|| "no app session".to_owned())
}

fn do_load(
    device: &CastConnection,
    app: &mut Option<AppSession>,
    url: String,
    content_type: String,
) -> Result<(), String> {
    let session = ensure_app(device, app)?;
    let media = Media {
        content_id: url,
        stream_type: StreamType::Buffered,
        content_type,
        metadata: None,
        duration: None,
    };
    let status = device
        .media
        .load(session.transport_id.as_str(), session.session_id.as_str(), &media)
        .map_err(err_str)?;
    if let Some(entry) = status.entries.first() {
        session.media_session_id = Some(entry.media_session_id);
    }
    Ok(())
}

fn with_media_session<F>(
    device: &CastConnection,
    app: &mut Option<AppSession>,
    f: F,
) -> Result<(), String>
where
    F: FnOnce(&str, i32) -> Result<(), String>,
{
    let session = app.as_mut().ok_or("no media loaded")?;
    let transport = session.transport_id.clone();
    let id = match session.media_session_id {
        Some(id) => id,
        None => {
            let status = device.media.get_status(transport.as_str(), None).map_err(err_str)?;
            let id = status
                .entries
                .first()
                .map(|e| e.media_session_id)
                .ok_or("no media loaded")?;
            session.media_session_id = Some(id);
            id
        }
    };
    f(&transport, id)
}

fn do_status(
    device: &CastConnection,
    app: &mut Option<AppSession>,
) -> Result<PlaybackStatus, String> {
    let mut out = PlaybackStatus {
        player_state: "IDLE".to_owned(),
        ..PlaybackStatus::default()
    };

    let receiver_status = device.receiver.get_status().map_err(err_str)?;
    out.volume = f64::from(receiver_status.volume.level.unwrap_or(0.0));
    out.muted = receiver_status.volume.muted.unwrap_or(false);

    if let Some(session) = app.as_mut() {
        let status = device
            .media
            .get_status(session.transport_id.as_str(), None)
            .map_err(err_str)?;
        if let Some(entry) = status.entries.first() {
            session.media_session_id = Some(entry.media_session_id);
            out.player_state = player_state_str(&entry.player_state).to_owned();
            out.current_time = entry.current_time.map(f64::from).unwrap_or(0.0);
            if let Some(media) = &entry.media {
                out.media_url = media.content_id.clone();
                out.duration = media.duration.map(f64::from).unwrap_or(0.0);
            }
        }
    }

    Ok(out)
}

fn player_state_str(state: &PlayerState) -> &'static str {
    #[allow(unreachable_patterns)]
    match state {
        PlayerState::Idle => "IDLE",
        PlayerState::Buffering => "BUFFERING",
        PlayerState::Playing => "PLAYING",
        PlayerState::Paused => "PAUSED",
        _ => "IDLE",
    }
}

use std::sync::Arc;

use crate::cast::CastManager;
use crate::config::Layout;
use crate::db::Db;
use crate::ffmpeg::Manager;
use crate::playlist::PlaylistStore;
use crate::refresh::RefreshQueue;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub layout: Layout,
    pub ffmpeg: Arc<Manager>,
    pub refresh: Arc<RefreshQueue>,
    pub cast: Arc<CastManager>,
    pub playlists: PlaylistStore,
}

//! Metadata-refresh orchestrator.
//!
//! At most one refresh job runs process-wide. Additional requests queue FIFO;
//! the running job publishes per-file progress and honors cancellation at
//! every file boundary. When a job exits — normally or cancelled — the worker
//! pops the next queued root and keeps going in the same task.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::Layout;
use crate::db::Db;
use crate::ffmpeg::Manager;
use crate::media::{audio, exif, hash, mime, thumbnail};
use crate::scanner;

#[derive(Default)]
struct RefreshState {
    active: bool,
    path: String,
    current_file: String,
    files_total: usize,
    files_done: usize,
    queue: Vec<String>,
    cancel: Option<CancellationToken>,
}

/// Externally visible snapshot of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub scanning: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub current_file: String,
    pub files_total: usize,
    pub files_done: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queue: Vec<String>,
    pub queue_length: usize,
}

/// Result of asking the orchestrator to refresh a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A worker was launched for this root.
    Started,
    /// This root is the one currently being refreshed.
    AlreadyRefreshing,
    /// This root was already waiting at the given 1-based position.
    AlreadyQueued(usize),
    /// Appended to the queue at the given 1-based position.
    Queued(usize),
}

impl StartOutcome {
    /// Queue position reported to callers; 0 means "processing now".
    pub fn position(&self) -> usize {
        match self {
            StartOutcome::Started | StartOutcome::AlreadyRefreshing => 0,
            StartOutcome::AlreadyQueued(p) | StartOutcome::Queued(p) => *p,
        }
    }

    pub fn message(&self) -> String {
        match self {
            StartOutcome::Started => "Metadata refresh started".to_owned(),
            StartOutcome::AlreadyRefreshing => "Already refreshing this folder".to_owned(),
            StartOutcome::AlreadyQueued(_) => "Folder already in queue".to_owned(),
            StartOutcome::Queued(p) => format!("Added to queue (position #{p})"),
        }
    }
}

pub struct RefreshQueue {
    state: Mutex<RefreshState>,
    db: Arc<Db>,
    layout: Layout,
    ffmpeg: Arc<Manager>,
}

impl RefreshQueue {
    pub fn new(db: Arc<Db>, layout: Layout, ffmpeg: Arc<Manager>) -> Self {
        RefreshQueue {
            state: Mutex::new(RefreshState::default()),
            db,
            layout,
            ffmpeg,
        }
    }

    /// Request a refresh of `root` (a cleaned path already checked against the
    /// registered roots). Idempotent for a root that is running or queued.
    pub fn start(self: Arc<Self>, root: String) -> StartOutcome {
        let outcome = {
            let mut state = self.lock();
            decide(&mut state, &root)
        };
        if outcome == StartOutcome::Started {
            tokio::task::spawn_blocking(move || self.worker_loop(root));
        }
        outcome
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.lock();
        StatusSnapshot {
            scanning: state.active,
            path: state.path.clone(),
            current_file: state.current_file.clone(),
            files_total: state.files_total,
            files_done: state.files_done,
            queue: state.queue.clone(),
            queue_length: state.queue.len(),
        }
    }

    /// Cancel the running job, if any. Committed rows stay; queued roots are
    /// untouched and will be processed next.
    pub fn cancel(&self) -> bool {
        let state = self.lock();
        match &state.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the first queued occurrence of `root`. False when absent.
    pub fn remove_from_queue(&self, root: &str) -> bool {
        let mut state = self.lock();
        match state.queue.iter().position(|q| q == root) {
            Some(i) => {
                state.queue.remove(i);
                true
            }
            None => false,
        }
    }

    /// Move a queued root to the head. No-op when already first; false when
    /// absent.
    pub fn prioritize(&self, root: &str) -> bool {
        let mut state = self.lock();
        match state.queue.iter().position(|q| q == root) {
            Some(0) => true,
            Some(i) => {
                let item = state.queue.remove(i);
                state.queue.insert(0, item);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().expect("refresh state lock poisoned")
    }

    /// The single worker. Runs one root, then chains into the next queued one
    /// in the same task until the queue drains.
    fn worker_loop(&self, mut root: String) {
        loop {
            self.run_one(&root);

            let mut state = self.lock();
            state.cancel = None;
            if state.queue.is_empty() {
                state.active = false;
                state.current_file.clear();
                return;
            }
            root = state.queue.remove(0);
        }
    }

    fn run_one(&self, root: &str) {
        let token = CancellationToken::new();
        {
            let mut state = self.lock();
            state.active = true;
            state.path = root.to_owned();
            state.current_file.clear();
            state.files_total = 0;
            state.files_done = 0;
            state.cancel = Some(token.clone());
        }
        tracing::info!("metadata refresh started for {root}");

        // Persistent bookkeeping for out-of-process tools; best-effort.
        let _ = scanner::queue_scan_blocking(&self.db, root);
        let _ = scanner::mark_scan_started_blocking(&self.db, root);

        // Count pass: size the progress bar before doing any real work.
        let mut total = 0usize;
        for entry in WalkDir::new(root) {
            if token.is_cancelled() {
                tracing::info!("metadata refresh cancelled for {root}");
                return;
            }
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file() && mime::is_media_path(entry.path()) {
                total += 1;
            }
        }
        if token.is_cancelled() {
            tracing::info!("metadata refresh cancelled for {root}");
            return;
        }
        self.lock().files_total = total;

        // Extract pass.
        for entry in WalkDir::new(root) {
            if token.is_cancelled() {
                tracing::info!("metadata refresh cancelled for {root}");
                return;
            }
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(kind) = mime::kind_of_path(path) else { continue };

            self.lock().current_file = path.to_string_lossy().into_owned();

            // Per-file failures are swallowed: a refresh is best-effort
            // ingestion and one bad file must not stop the pass.
            self.process_file(path, kind, &token);

            self.lock().files_done += 1;
        }

        let _ = scanner::mark_scan_completed_blocking(&self.db, root);
        tracing::info!("metadata refresh finished for {root} ({total} files)");
    }

    fn process_file(&self, path: &Path, kind: mime::MediaKind, token: &CancellationToken) {
        let Ok(meta) = std::fs::metadata(path) else { return };
        let Ok(modified) = meta.modified() else { return };
        let mtime = scanner::format_mtime(modified);

        let folder_id = match scanner::find_parent_folder_blocking(
            &self.db,
            &path.to_string_lossy(),
        ) {
            Ok(Some((_, id))) => id,
            _ => return,
        };

        let Ok((file_id, inserted)) =
            scanner::upsert_file_blocking(&self.db, folder_id, path, meta.len() as i64, &mtime)
        else {
            return;
        };

        if inserted {
            if let Ok(content_hash) = hash::hash_file(path) {
                let _ = scanner::update_file_hash_blocking(&self.db, file_id, &content_hash);
            }
        }

        match kind {
            mime::MediaKind::Audio => {
                let tags = audio::extract(path);
                let _ = audio::save_blocking(&self.db, file_id, &tags);
            }
            mime::MediaKind::Image => {
                let exif_data = exif::extract(path);
                let _ = exif::save_blocking(&self.db, file_id, &exif_data);
                self.generate_thumbnails(path, file_id, token);
            }
            mime::MediaKind::Video => {
                self.generate_thumbnails(path, file_id, token);
            }
        }
    }

    fn generate_thumbnails(&self, path: &Path, file_id: i64, token: &CancellationToken) {
        match thumbnail::generate_both_blocking(path, self.layout.base(), &self.ffmpeg, token) {
            Ok((small, large)) => {
                let _ = scanner::update_file_thumbnails_blocking(
                    &self.db,
                    file_id,
                    &small.to_string_lossy(),
                    &large.to_string_lossy(),
                );
            }
            Err(e) => {
                tracing::debug!("thumbnail generation failed for {}: {e}", path.display());
            }
        }
    }
}

/// Pure queueing decision, separated from worker spawning so the transition
/// table is directly testable.
fn decide(state: &mut RefreshState, root: &str) -> StartOutcome {
    if state.active && state.path == root {
        return StartOutcome::AlreadyRefreshing;
    }
    if let Some(i) = state.queue.iter().position(|q| q == root) {
        return StartOutcome::AlreadyQueued(i + 1);
    }
    if state.active {
        state.queue.push(root.to_owned());
        return StartOutcome::Queued(state.queue.len());
    }
    state.active = true;
    state.path = root.to_owned();
    state.current_file.clear();
    state.files_total = 0;
    state.files_done = 0;
    StartOutcome::Started
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_start_takes_position_zero() {
        let mut state = RefreshState::default();
        let outcome = decide(&mut state, "/r1");
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(outcome.position(), 0);
        assert!(state.active);
        assert_eq!(state.path, "/r1");
    }

    #[test]
    fn busy_start_queues_in_fifo_order() {
        let mut state = RefreshState::default();
        decide(&mut state, "/r1");
        assert_eq!(decide(&mut state, "/r2"), StartOutcome::Queued(1));
        assert_eq!(decide(&mut state, "/r3"), StartOutcome::Queued(2));
        assert_eq!(state.queue, vec!["/r2", "/r3"]);
    }

    #[test]
    fn enqueue_is_idempotent_for_active_and_queued_roots() {
        let mut state = RefreshState::default();
        decide(&mut state, "/r1");
        decide(&mut state, "/r2");
        assert_eq!(decide(&mut state, "/r1"), StartOutcome::AlreadyRefreshing);
        assert_eq!(decide(&mut state, "/r2"), StartOutcome::AlreadyQueued(1));
        assert_eq!(state.queue.len(), 1);
    }
}

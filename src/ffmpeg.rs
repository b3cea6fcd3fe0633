//! Gateway to the external ffmpeg/ffprobe binaries.
//!
//! Binary resolution is cached behind a reader-preferring lock with a
//! double-check on the write path. On Windows the binaries are downloaded
//! once into the data directory's `bin/` folder; elsewhere their absence is
//! a user-actionable error.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use serde::Deserialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Essentials build: small, carries everything the thumbnailer and the
/// audio transcode path need.
const WINDOWS_FFMPEG_URL: &str =
    "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";

/// Audio codecs most MP4 consumers decode without re-encoding.
const COMPATIBLE_AUDIO_CODECS: &[&str] = &["aac", "mp3", "opus", "flac"];

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffmpeg not found: install it (e.g. apt install ffmpeg) or place the binaries in {0}")]
    NotFound(PathBuf),
    #[error("ffmpeg download failed: {0}")]
    Download(String),
    #[error("{tool} failed: {detail}")]
    CommandFailed { tool: &'static str, detail: String },
    #[error("failed to parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("ffmpeg task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
struct Binaries {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

pub struct Manager {
    bin_dir: PathBuf,
    resolved: RwLock<Option<Binaries>>,
}

impl Manager {
    pub fn new<P: Into<PathBuf>>(bin_dir: P) -> Self {
        Manager {
            bin_dir: bin_dir.into(),
            resolved: RwLock::new(None),
        }
    }

    /// True when the binaries can be resolved (or fetched) right now.
    pub fn is_available(&self) -> bool {
        self.binaries().is_ok()
    }

    fn binaries(&self) -> Result<Binaries, FfmpegError> {
        if let Some(b) = self.resolved.read().expect("ffmpeg lock poisoned").clone() {
            return Ok(b);
        }

        let mut guard = self.resolved.write().expect("ffmpeg lock poisoned");
        // Another caller may have resolved while we waited for the lock.
        if let Some(b) = guard.clone() {
            return Ok(b);
        }
        let b = self.locate_or_download()?;
        *guard = Some(b.clone());
        Ok(b)
    }

    async fn binaries_async(self: Arc<Self>) -> Result<Binaries, FfmpegError> {
        tokio::task::spawn_blocking(move || self.binaries())
            .await
            .map_err(|e| FfmpegError::Task(e.to_string()))?
    }

    fn locate_or_download(&self) -> Result<Binaries, FfmpegError> {
        let suffix = std::env::consts::EXE_SUFFIX;
        let ffmpeg_name = format!("ffmpeg{suffix}");
        let ffprobe_name = format!("ffprobe{suffix}");

        // The configured bin dir wins over PATH so a downloaded copy sticks.
        let local = Binaries {
            ffmpeg: self.bin_dir.join(&ffmpeg_name),
            ffprobe: self.bin_dir.join(&ffprobe_name),
        };
        if local.ffmpeg.is_file() && local.ffprobe.is_file() {
            return Ok(local);
        }

        if let (Some(ffmpeg), Some(ffprobe)) =
            (find_in_path(&ffmpeg_name), find_in_path(&ffprobe_name))
        {
            return Ok(Binaries { ffmpeg, ffprobe });
        }

        if cfg!(target_os = "windows") {
            tracing::info!("ffmpeg not found, downloading into {}", self.bin_dir.display());
            self.download_windows()?;
            return Ok(local);
        }

        Err(FfmpegError::NotFound(self.bin_dir.clone()))
    }

    /// Fetch the Windows build once and extract the two executables.
    fn download_windows(&self) -> Result<(), FfmpegError> {
        std::fs::create_dir_all(&self.bin_dir)?;

        let response = reqwest::blocking::get(WINDOWS_FFMPEG_URL)
            .and_then(|r| r.error_for_status())
            .map_err(|e| FfmpegError::Download(e.to_string()))?;
        let body = response
            .bytes()
            .map_err(|e| FfmpegError::Download(e.to_string()))?;

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body))
            .map_err(|e| FfmpegError::Download(e.to_string()))?;

        let mut extracted = 0;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| FfmpegError::Download(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            // Zip entries always use forward slashes.
            let base = entry.name().rsplit('/').next().unwrap_or_default().to_owned();
            if base != "ffmpeg.exe" && base != "ffprobe.exe" {
                continue;
            }
            let dest = self.bin_dir.join(&base);
            let mut out = std::fs::File::create(&dest)?;
            std::io::copy(&mut entry, &mut out)?;
            tracing::info!("extracted {} to {}", base, dest.display());
            extracted += 1;
            if extracted == 2 {
                return Ok(());
            }
        }

        Err(FfmpegError::Download(format!(
            "archive did not contain both binaries (found {extracted} of 2)"
        )))
    }

    /// Run ffprobe and parse its JSON report.
    pub fn probe_blocking(&self, path: &Path) -> Result<ProbeResult, FfmpegError> {
        let bins = self.binaries()?;
        let output = std::process::Command::new(&bins.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()?;
        if !output.status.success() {
            return Err(FfmpegError::CommandFailed {
                tool: "ffprobe",
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    pub async fn probe(self: Arc<Self>, path: &Path) -> Result<ProbeResult, FfmpegError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || self.probe_blocking(&path))
            .await
            .map_err(|e| FfmpegError::Task(e.to_string()))?
    }

    /// Spawn a piped transcode: video stream copied, audio re-encoded to AAC,
    /// fragmented MP4 on stdout. Dropping the returned stream kills the
    /// subprocess if it is still running.
    pub async fn transcode_audio(
        self: Arc<Self>,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<TranscodeStream, FfmpegError> {
        if token.is_cancelled() {
            return Err(FfmpegError::Cancelled);
        }
        let bins = self.binaries_async().await?;

        let mut child = tokio::process::Command::new(&bins.ffmpeg)
            .arg("-i")
            .arg(path)
            .args([
                "-c:v", "copy",
                "-c:a", "aac",
                "-b:a", "192k",
                "-movflags", "frag_keyframe+empty_moov+faststart",
                "-f", "mp4",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| FfmpegError::CommandFailed {
            tool: "ffmpeg",
            detail: "no stdout pipe".into(),
        })?;

        Ok(TranscodeStream { _child: child, stdout })
    }

    /// Render a JPEG that fits within `size`×`size`, preserving aspect ratio
    /// and never upscaling. Quality is ffmpeg's qscale (2-5 is high quality).
    pub fn generate_thumbnail_blocking(
        &self,
        input: &Path,
        output: &Path,
        size: u32,
        quality: u32,
        token: &CancellationToken,
    ) -> Result<(), FfmpegError> {
        if token.is_cancelled() {
            return Err(FfmpegError::Cancelled);
        }
        let bins = self.binaries()?;
        let cmd_output = std::process::Command::new(&bins.ffmpeg)
            .arg("-i")
            .arg(input)
            .args(["-vf", &scale_filter(size), "-qscale:v", &quality.to_string(), "-y"])
            .arg(output)
            .output()?;
        if !cmd_output.status.success() {
            return Err(FfmpegError::CommandFailed {
                tool: "ffmpeg",
                detail: String::from_utf8_lossy(&cmd_output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Extract a single frame at `timestamp_s` with the same scaling rules as
    /// [`Manager::generate_thumbnail_blocking`].
    pub fn extract_video_frame_blocking(
        &self,
        input: &Path,
        output: &Path,
        timestamp_s: f64,
        size: u32,
        quality: u32,
        token: &CancellationToken,
    ) -> Result<(), FfmpegError> {
        if token.is_cancelled() {
            return Err(FfmpegError::Cancelled);
        }
        let bins = self.binaries()?;
        let cmd_output = std::process::Command::new(&bins.ffmpeg)
            .args(["-ss", &format!("{timestamp_s:.2}")])
            .arg("-i")
            .arg(input)
            .args([
                "-vframes", "1",
                "-vf", &scale_filter(size),
                "-qscale:v", &quality.to_string(),
                "-y",
            ])
            .arg(output)
            .output()?;
        if !cmd_output.status.success() {
            return Err(FfmpegError::CommandFailed {
                tool: "ffmpeg",
                detail: String::from_utf8_lossy(&cmd_output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

fn scale_filter(size: u32) -> String {
    format!("scale='min({size},iw)':'min({size},ih)':force_original_aspect_ratio=decrease")
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Live transcode output. `kill_on_drop` on the child guarantees the
/// subprocess dies with the stream (e.g. when the HTTP client disconnects).
pub struct TranscodeStream {
    _child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
}

impl AsyncRead for TranscodeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
    #[serde(default)]
    pub format: FormatInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub codec_name: String,
    /// "video", "audio", or "subtitle".
    #[serde(default)]
    pub codec_type: String,
    #[serde(default)]
    pub channels: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub format_name: String,
    /// Seconds, as ffprobe prints it ("13.508000").
    #[serde(default)]
    pub duration: String,
}

impl ProbeResult {
    /// Codec of the first audio stream, if any.
    pub fn audio_codec(&self) -> Option<&str> {
        self.streams
            .iter()
            .find(|s| s.codec_type == "audio")
            .map(|s| s.codec_name.as_str())
    }

    /// True when the first audio stream's codec cannot be served as-is.
    /// No audio at all means nothing to transcode.
    pub fn needs_transcoding(&self) -> bool {
        match self.audio_codec() {
            None | Some("") => false,
            Some(codec) => {
                let codec = codec.to_lowercase();
                !COMPATIBLE_AUDIO_CODECS.contains(&codec.as_str())
            }
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.format.duration.trim().parse().ok()
    }
}

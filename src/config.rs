use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8090;
const DEFAULT_BASE_DIR: &str = ".q2";
const DB_FILE: &str = "q2.db";

/// Optional `q2.toml`, found in the working directory or the XDG config dir.
#[derive(Deserialize, Default, Debug)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub layout: Layout,
}

impl Config {
    /// CLI flags win over the config file, which wins over defaults.
    pub fn resolve(file: Option<FileConfig>, port: Option<u16>, base_dir: Option<PathBuf>) -> Self {
        let file = file.unwrap_or_default();
        Config {
            port: port.or(file.port).unwrap_or(DEFAULT_PORT),
            layout: Layout::new(
                base_dir
                    .or(file.base_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR)),
            ),
        }
    }
}

/// On-disk layout of the data directory: the SQL store, downloaded transcoder
/// binaries, the thumbnail cache, and the playlist folder all live under it.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Layout { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn db_path(&self) -> PathBuf {
        self.base.join(DB_FILE)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base.join("bin")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.base.join(crate::media::thumbnail::THUMBNAIL_DIR)
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.base.join("playlists")
    }
}

pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_owned());
    }
    let cwd_config = PathBuf::from("q2.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let xdg_config = config_dir.join("q2").join("config.toml");
        if xdg_config.exists() {
            return Some(xdg_config);
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}

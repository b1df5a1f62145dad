use crate::sources::SiteProfile;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root for everything the reader writes
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Folder scanned by the local pseudo-source (one sub-folder of CBZ files per title)
    #[serde(default)]
    pub local_library_dir: Option<PathBuf>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub browser: ChallengeConfig,

    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Site adapters, one `[[sites]]` table each
    #[serde(default)]
    pub sites: Vec<SiteProfile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of retry attempts for failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Timeout for the session probe request in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChallengeConfig {
    /// Start the browser hidden; it is revealed when a CAPTCHA needs a human
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// User agent presented by the browser and reused by impersonating clients
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Interval between two reads of the signal channel
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Deadline for an unattended challenge
    #[serde(default = "default_challenge_timeout")]
    pub timeout_secs: u64,

    /// Deadline once the surface has been revealed to the user
    #[serde(default = "default_interactive_timeout")]
    pub interactive_timeout_secs: u64,

    /// Time a proof-of-work lock may stay up before the page is reloaded
    #[serde(default = "default_pow_patience")]
    pub pow_patience_secs: u64,

    /// Reloads allowed for a stuck proof-of-work lock
    #[serde(default = "default_max_pow_retries")]
    pub max_pow_retries: u32,

    /// Time a self-clearing interstitial gets before it counts as a bot check
    #[serde(default = "default_interstitial_grace")]
    pub interstitial_grace_secs: u64,

    /// Inject navigator/webgl spoofing along with the watcher
    #[serde(default = "default_true")]
    pub stealth: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdaterConfig {
    /// Announce titles with new chapters during library-wide runs
    #[serde(default = "default_true")]
    pub notify_batch_items: bool,

    /// Non-library titles unread for this long are garbage-collected
    #[serde(default = "default_gc_days")]
    pub gc_after_days: i64,
}

fn default_true() -> bool { true }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 4 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_probe_timeout() -> u64 { 10 }
fn default_window_width() -> u32 { 1280 }
fn default_window_height() -> u32 { 800 }
fn default_user_agent() -> String { DEFAULT_USER_AGENT.to_string() }
fn default_poll_interval() -> u64 { 250 }
fn default_challenge_timeout() -> u64 { 60 }
fn default_interactive_timeout() -> u64 { 300 }
fn default_pow_patience() -> u64 { 15 }
fn default_max_pow_retries() -> u32 { 3 }
fn default_interstitial_grace() -> u64 { 10 }
fn default_gc_days() -> i64 { 7 }

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 4,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            enable_compression: true,
            probe_timeout_secs: 10,
        }
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 800,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval_ms: 250,
            timeout_secs: 60,
            interactive_timeout_secs: 300,
            pow_patience_secs: 15,
            max_pow_retries: 3,
            interstitial_grace_secs: 10,
            stealth: true,
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            notify_batch_items: true,
            gc_after_days: 7,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            local_library_dir: None,
            http: HttpConfig::default(),
            browser: ChallengeConfig::default(),
            updater: UpdaterConfig::default(),
            sites: Vec::new(),
        }
    }
}

impl Config {
    /// Read `config.toml` from the working directory, falling back to defaults
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        if path.exists() {
            match Self::load_from(path) {
                Ok(cfg) => return cfg,
                Err(e) => log::warn!("Ignoring unreadable config.toml: {}", e),
            }
        }
        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let cfg = toml::from_str::<Config>(&content)?;
        Ok(cfg)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("library.db")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Local pseudo-source folder, defaults to `<data_dir>/local`
    pub fn local_library_dir(&self) -> PathBuf {
        self.local_library_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("local"))
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl ChallengeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_secs)
    }

    pub fn pow_patience(&self) -> Duration {
        Duration::from_secs(self.pow_patience_secs)
    }

    pub fn interstitial_grace(&self) -> Duration {
        Duration::from_secs(self.interstitial_grace_secs)
    }
}

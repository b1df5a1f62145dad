use super::config::BrowserConfig;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// How long Chrome may sit idle between two challenges before the connection drops
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Owns one launched browser and its single tab
pub struct BrowserManager {
    // Chrome exits when this is dropped
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserManager {
    /// Launch a browser with the given configuration
    pub fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        // Owned strings must outlive the borrowed OsStr list handed to the builder
        let owned_args = config.launch_args();
        let args: Vec<&OsStr> = owned_args.iter().map(OsStr::new).collect();
        let launch_options = Self::build_launch_options(config, args)?;

        log::info!(
            "Launching {} browser",
            if config.headless { "headless" } else { "visible" }
        );
        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;
        tab.set_default_timeout(config.timeout());

        Ok(Self { _browser: browser, tab })
    }

    fn build_launch_options<'a>(
        config: &BrowserConfig,
        args: Vec<&'a OsStr>,
    ) -> Result<LaunchOptions<'a>, BrowserError> {
        LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_size.0, config.window_size.1)))
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(args)
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("Cookie extraction error: {0}")]
    CookieError(String),
}

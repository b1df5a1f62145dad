use super::config::BrowserConfig;
use super::manager::{BrowserError, BrowserManager};
use crate::session::StoredCookie;
use headless_chrome::protocol::cdp::Network::Cookie;
use headless_chrome::Tab;
use std::sync::Arc;

/// The single browser surface challenges are solved on.
///
/// Calls are blocking; the challenge bridge guarantees that only one
/// challenger uses the surface at a time.
pub trait ChallengeSurface: Send {
    /// Navigate to `url` and wait for the first document
    fn load(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Evaluate a script in the current document
    fn install_watcher(&mut self, script: &str) -> Result<(), BrowserError>;

    /// Read the channel the watcher writes its signal into (the document title)
    fn read_signal(&mut self) -> Result<String, BrowserError>;

    /// All cookies the engine currently holds for the loaded site
    fn harvest_cookies(&mut self) -> Result<Vec<StoredCookie>, BrowserError>;

    /// Make the surface visible so a human can answer a CAPTCHA
    fn reveal(&mut self) -> Result<(), BrowserError>;

    fn is_revealed(&self) -> bool;

    /// Leave the current site so the next challenger starts from a blank page
    fn vacate(&mut self) -> Result<(), BrowserError>;

    /// User agent the engine presents to sites
    fn user_agent(&self) -> String;
}

/// Challenge surface backed by Chrome through the DevTools protocol.
///
/// The browser is launched lazily. Revealing relaunches it non-headless and
/// reloads the current page.
pub struct ChromeSurface {
    config: BrowserConfig,
    start_headless: bool,
    manager: Option<BrowserManager>,
    current_url: Option<String>,
}

impl ChromeSurface {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            start_headless: config.headless,
            config,
            manager: None,
            current_url: None,
        }
    }

    fn tab(&mut self) -> Result<Arc<Tab>, BrowserError> {
        if self.manager.is_none() {
            self.manager = Some(BrowserManager::launch(&self.config)?);
        }
        match &self.manager {
            Some(manager) => Ok(manager.tab().clone()),
            None => Err(BrowserError::InitializationError("browser not running".into())),
        }
    }
}

fn to_stored_cookie(c: Cookie) -> StoredCookie {
    let expires = if c.session || c.expires <= 0.0 {
        None
    } else {
        Some(c.expires as i64)
    };
    StoredCookie {
        name: c.name,
        value: c.value,
        domain: c.domain,
        path: c.path,
        expires,
        secure: c.secure,
        http_only: c.http_only,
    }
}

impl ChallengeSurface for ChromeSurface {
    fn load(&mut self, url: &str) -> Result<(), BrowserError> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .map_err(|e| BrowserError::NavigationError(format!("Failed to navigate to {}: {}", url, e)))?;
        tab.wait_until_navigated()
            .map_err(|e| BrowserError::NavigationError(format!("Navigation timeout for {}: {}", url, e)))?;
        self.current_url = Some(url.to_string());
        Ok(())
    }

    fn install_watcher(&mut self, script: &str) -> Result<(), BrowserError> {
        let tab = self.tab()?;
        tab.evaluate(script, false)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    fn read_signal(&mut self) -> Result<String, BrowserError> {
        let tab = self.tab()?;
        tab.get_title()
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))
    }

    fn harvest_cookies(&mut self) -> Result<Vec<StoredCookie>, BrowserError> {
        let tab = self.tab()?;
        let cookies = tab
            .get_cookies()
            .map_err(|e| BrowserError::CookieError(e.to_string()))?;
        Ok(cookies.into_iter().map(to_stored_cookie).collect())
    }

    fn reveal(&mut self) -> Result<(), BrowserError> {
        if !self.config.headless {
            return Ok(());
        }
        log::info!("Challenge needs a human, showing the browser");
        self.config.headless = false;
        self.manager = None;
        if let Some(url) = self.current_url.clone() {
            self.load(&url)?;
        }
        Ok(())
    }

    fn is_revealed(&self) -> bool {
        !self.config.headless
    }

    fn vacate(&mut self) -> Result<(), BrowserError> {
        self.current_url = None;
        if self.start_headless && !self.config.headless {
            // Hide again: the next challenger starts headless
            self.config.headless = true;
            self.manager = None;
            return Ok(());
        }
        if let Some(manager) = &self.manager {
            manager
                .tab()
                .navigate_to("about:blank")
                .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
        }
        Ok(())
    }

    fn user_agent(&self) -> String {
        self.config.user_agent.clone()
    }
}

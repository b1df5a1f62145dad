use super::signal::{stealth_script, watcher_script, ChallengeSignal};
use crate::browser::{BrowserError, ChallengeSurface};
use crate::config::ChallengeConfig;
use crate::error::{ChallengeError, ChallengeFailure};
use crate::session::StoredCookie;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive unreadable polls after which the surface is considered gone
const MAX_SIGNAL_READ_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ChallengerSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub interactive_timeout: Duration,
    pub pow_patience: Duration,
    pub max_pow_retries: u32,
    pub interstitial_grace: Duration,
    pub stealth: bool,
}

impl From<&ChallengeConfig> for ChallengerSettings {
    fn from(cfg: &ChallengeConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            timeout: cfg.timeout(),
            interactive_timeout: cfg.interactive_timeout(),
            pow_patience: cfg.pow_patience(),
            max_pow_retries: cfg.max_pow_retries,
            interstitial_grace: cfg.interstitial_grace(),
            stealth: cfg.stealth,
        }
    }
}

/// One attempt at clearing a site's challenge on the shared surface
pub struct Challenger {
    pub url: String,
    pub source_id: String,
    pub done: bool,
    pub error: Option<ChallengeFailure>,
    pub pow_attempts: u32,
    abort: Arc<AtomicBool>,
}

impl Challenger {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>, abort: Arc<AtomicBool>) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            done: false,
            error: None,
            pow_attempts: 0,
            abort,
        }
    }

    /// Drive the surface until the page reports `ready`, then return its cookies.
    /// The surface is vacated afterwards whatever the outcome.
    pub fn run(
        &mut self,
        surface: &mut dyn ChallengeSurface,
        settings: &ChallengerSettings,
    ) -> Result<Vec<StoredCookie>, ChallengeError> {
        log::info!("Solving challenge for {} at {}", self.source_id, self.url);
        let result = self.drive(surface, settings);

        if let Err(e) = surface.vacate() {
            log::warn!("Could not vacate browser surface: {}", e);
        }
        self.done = true;

        match result {
            Ok(cookies) => {
                log::info!(
                    "Challenge for {} cleared, {} cookies harvested",
                    self.source_id,
                    cookies.len()
                );
                Ok(cookies)
            }
            Err(reason) => {
                log::warn!("Challenge for {} failed: {}", self.source_id, reason);
                self.error = Some(reason.clone());
                Err(ChallengeError::new(reason))
            }
        }
    }

    fn drive(
        &mut self,
        surface: &mut dyn ChallengeSurface,
        settings: &ChallengerSettings,
    ) -> Result<Vec<StoredCookie>, ChallengeFailure> {
        let mut script = watcher_script(
            settings.poll_interval.as_millis() as u64,
            settings.interstitial_grace.as_millis() as u64,
        );
        if settings.stealth {
            script = format!("{}\n{}", stealth_script(), script);
        }

        surface.load(&self.url).map_err(navigation)?;
        let mut loaded_at = Instant::now();
        let mut deadline = loaded_at + settings.timeout;
        let mut read_failures = 0;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                return Err(ChallengeFailure::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(ChallengeFailure::Timeout);
            }

            // Fails harmlessly while a navigation is in flight
            if let Err(e) = surface.install_watcher(&script) {
                log::debug!("Watcher not installed yet: {}", e);
            }

            let signal = match surface.read_signal() {
                Ok(title) => {
                    read_failures = 0;
                    ChallengeSignal::parse(&title)
                }
                Err(e) => {
                    read_failures += 1;
                    if read_failures >= MAX_SIGNAL_READ_FAILURES {
                        return Err(ChallengeFailure::Browser(e.to_string()));
                    }
                    None
                }
            };

            match signal {
                Some(ChallengeSignal::Ready) => {
                    return surface
                        .harvest_cookies()
                        .map_err(|e| ChallengeFailure::Browser(e.to_string()));
                }
                Some(ChallengeSignal::Error) => return Err(ChallengeFailure::Rejected),
                Some(ChallengeSignal::InProgress(kind)) if kind.needs_human() => {
                    if !surface.is_revealed() {
                        log::info!("{} on {}, waiting for the user", kind.token(), self.source_id);
                        surface.reveal().map_err(navigation)?;
                        loaded_at = Instant::now();
                        deadline = loaded_at + settings.interactive_timeout;
                    }
                }
                Some(ChallengeSignal::InProgress(_)) => {
                    if loaded_at.elapsed() >= settings.pow_patience {
                        if self.pow_attempts >= settings.max_pow_retries {
                            return Err(ChallengeFailure::RetryBoundExceeded {
                                attempts: self.pow_attempts,
                            });
                        }
                        self.pow_attempts += 1;
                        log::info!(
                            "Proof-of-work stuck for {}, reloading ({}/{})",
                            self.source_id,
                            self.pow_attempts,
                            settings.max_pow_retries
                        );
                        surface.load(&self.url).map_err(navigation)?;
                        loaded_at = Instant::now();
                    }
                }
                None => {}
            }

            std::thread::sleep(settings.poll_interval);
        }
    }
}

fn navigation(e: BrowserError) -> ChallengeFailure {
    match e {
        BrowserError::NavigationError(msg) => ChallengeFailure::Navigation(msg),
        other => ChallengeFailure::Browser(other.to_string()),
    }
}

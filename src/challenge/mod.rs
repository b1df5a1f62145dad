//! Session handoff between the embedded browser and source HTTP clients.
//!
//! [`ChallengeBridge`] hands every source a [`SourceClient`] seeded with the
//! source's stored session. When a site requires a challenge and the stored
//! session no longer passes the probe, a [`Challenger`] solves it on the
//! single shared browser surface. Challengers are admitted strictly one at a
//! time in submission order by the [`SurfaceGate`].

pub mod challenger;
pub mod gate;
pub mod signal;

pub use challenger::{Challenger, ChallengerSettings};
pub use gate::{GatePass, SurfaceGate};
pub use signal::{CaptchaKind, ChallengeSignal};

use crate::browser::{BrowserConfig, ChallengeSurface, ChromeSurface};
use crate::config::Config;
use crate::error::{ChallengeError, ChallengeFailure, SourceError};
use crate::http_client::{HttpClientConfig, SourceClient};
use crate::metrics::MetricsTracker;
use crate::models::HttpClientKind;
use crate::session::{Session, SessionStore};
use crate::sources::ContentSource;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Builds the browser surface the first time a challenge needs it
pub type SurfaceFactory = Arc<dyn Fn() -> Box<dyn ChallengeSurface> + Send + Sync>;

type SurfaceSlot = Arc<Mutex<Option<Box<dyn ChallengeSurface>>>>;

pub struct ChallengeBridge {
    sessions: Arc<SessionStore>,
    metrics: Arc<MetricsTracker>,
    http: HttpClientConfig,
    settings: ChallengerSettings,
    gate: SurfaceGate,
    surface: SurfaceSlot,
    factory: SurfaceFactory,
    active_abort: Mutex<Option<Arc<AtomicBool>>>,
}

impl ChallengeBridge {
    /// Bridge solving challenges in Chrome, configured from `config`
    pub fn new(config: &Config, sessions: Arc<SessionStore>, metrics: Arc<MetricsTracker>) -> Self {
        let browser = BrowserConfig::from(&config.browser);
        let factory: SurfaceFactory =
            Arc::new(move || -> Box<dyn ChallengeSurface> { Box::new(ChromeSurface::new(browser.clone())) });
        Self::with_surface_factory(
            ChallengerSettings::from(&config.browser),
            HttpClientConfig::from(&config.http),
            sessions,
            metrics,
            factory,
        )
    }

    pub fn with_surface_factory(
        settings: ChallengerSettings,
        http: HttpClientConfig,
        sessions: Arc<SessionStore>,
        metrics: Arc<MetricsTracker>,
        factory: SurfaceFactory,
    ) -> Self {
        Self {
            sessions,
            metrics,
            http,
            settings,
            gate: SurfaceGate::new(),
            surface: Arc::new(Mutex::new(None)),
            factory,
            active_abort: Mutex::new(None),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    fn build_client(&self, kind: HttpClientKind, session: Option<&Session>) -> Result<SourceClient, SourceError> {
        SourceClient::new(kind, session, self.http.clone()).map_err(SourceError::from)
    }

    /// HTTP client for `source`, solving its challenge first if the stored
    /// session is missing or no longer accepted
    pub async fn client_for(&self, source: &dyn ContentSource) -> Result<SourceClient, SourceError> {
        let kind = source.http_client_kind();
        let stored = self.sessions.get(source.id());

        let Some(requirement) = source.challenge() else {
            return self.build_client(kind, stored.as_ref());
        };

        if let Some(session) = stored.filter(|s| s.has_clearance(&requirement.clearance_cookie)) {
            let client = self.build_client(kind, Some(&session))?;
            if client.probe(&requirement.probe_url).await {
                log::debug!("Reusing stored session for {}", source.id());
                self.metrics.record_session_reuse(source.id());
                return Ok(client);
            }
            log::info!("Stored session for {} rejected by probe", source.id());
        }

        let session = self.solve(source, &requirement.probe_url).await?;
        self.build_client(kind, Some(&session))
    }

    /// Run `op` with a client for `source`. If the site still serves a
    /// challenge page, the session is dropped, the challenge solved again
    /// and `op` retried exactly once.
    pub async fn guarded<T, F, Fut>(&self, source: &dyn ContentSource, op: F) -> Result<T, SourceError>
    where
        F: Fn(SourceClient) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let client = self.client_for(source).await?;
        match op(client).await {
            Err(SourceError::ChallengeRequired) => {
                log::info!("{} answered with a challenge, solving it again", source.id());
                self.sessions.invalidate(source.id());
                let target = source
                    .challenge()
                    .map(|r| r.probe_url)
                    .unwrap_or_else(|| source.base_url().to_string());
                let session = self.solve(source, &target).await?;
                let client = self.build_client(source.http_client_kind(), Some(&session))?;
                match op(client).await {
                    Err(SourceError::ChallengeRequired) => Err(ChallengeError::new(ChallengeFailure::Rejected).into()),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Solve the challenge of `source` at `url` and store the resulting session.
    ///
    /// Waits for the surface behind any earlier request. On failure the
    /// previous session is left as it was.
    pub async fn solve(&self, source: &dyn ContentSource, url: &str) -> Result<Session, ChallengeError> {
        let source_id = source.id().to_string();
        let pass = self.gate.acquire(&source_id).await?;

        let abort = Arc::new(AtomicBool::new(false));
        *self.active_abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort.clone());
        self.metrics.record_challenge_started(&source_id);
        let started = Instant::now();

        let abort_mine = abort.clone();
        let mut challenger = Challenger::new(source_id.clone(), url, abort);
        let slot = self.surface.clone();
        let factory = self.factory.clone();
        let settings = self.settings.clone();
        let handle = tokio::task::spawn_blocking(move || {
            // The pass lives until the surface is vacated
            let _pass = pass;
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            let surface = guard.get_or_insert_with(|| factory());
            let result = challenger.run(&mut **surface, &settings);
            (result, surface.user_agent())
        });
        let joined = handle.await;
        {
            // The next challenger may already own the slot once the pass is handed over
            let mut active = self.active_abort.lock().unwrap_or_else(|e| e.into_inner());
            if active.as_ref().is_some_and(|flag| Arc::ptr_eq(flag, &abort_mine)) {
                *active = None;
            }
        }

        let (result, user_agent) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_challenge_result(&source_id, false);
                return Err(ChallengeError::new(ChallengeFailure::Browser(format!(
                    "challenger crashed: {}",
                    e
                ))));
            }
        };
        let cookies = match result {
            Ok(cookies) => cookies,
            Err(e) => {
                self.metrics.record_challenge_result(&source_id, false);
                return Err(e);
            }
        };

        let mut session = Session::new(&source_id, source.http_client_kind());
        session.user_agent = Some(user_agent);
        session.merge_cookies(cookies);
        if let Some(requirement) = source.challenge() {
            if !session.has_clearance(&requirement.clearance_cookie) {
                log::info!(
                    "{} issued no {} cookie, storing a placeholder clearance",
                    source_id,
                    requirement.clearance_cookie
                );
                session.placeholder_clearance = true;
            }
        }

        if let Err(e) = self.sessions.replace(session.clone()) {
            log::error!("Could not persist session for {}: {}", source_id, e);
        }
        self.metrics.record_challenge_result(&source_id, true);
        log::info!("Challenge for {} solved in {:.1?}", source_id, started.elapsed());
        Ok(session)
    }

    /// Abort the challenger currently driving the surface, if any
    pub fn abort_active(&self) -> bool {
        match &*self.active_abort.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                log::info!("Active challenge aborted");
                true
            }
            None => false,
        }
    }

    /// Fail every challenge still waiting for the surface on behalf of `source_id`
    pub fn cancel_pending(&self, source_id: &str) -> usize {
        let cancelled = self.gate.cancel_waiting(source_id);
        if cancelled > 0 {
            log::info!("Cancelled {} pending challenges for {}", cancelled, source_id);
        }
        cancelled
    }

    /// Source ids queued for the surface, oldest first
    pub fn pending(&self) -> Vec<String> {
        self.gate.waiting()
    }
}

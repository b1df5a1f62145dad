use async_trait::async_trait;
use rust_manga_reader::browser::{BrowserError, ChallengeSurface};
use rust_manga_reader::challenge::{ChallengeBridge, ChallengerSettings, SurfaceFactory};
use rust_manga_reader::error::{ChallengeFailure, SourceError};
use rust_manga_reader::http_client::{HttpClientConfig, SourceClient};
use rust_manga_reader::metrics::MetricsTracker;
use rust_manga_reader::models::{
    CatalogEntry, ChapterContent, HttpClientKind, PageDescriptor, PageImage, SearchFilters, SearchResult,
};
use rust_manga_reader::session::{Session, SessionStore, StoredCookie};
use rust_manga_reader::sources::{ChallengeRequirement, ContentSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const FAKE_UA: &str = "FakeBrowser/1.0";

/// Time between loading a URL on the surface and vacating it
#[derive(Debug, Clone)]
struct DriveWindow {
    url: String,
    loaded: Instant,
    vacated: Option<Instant>,
}

/// Surface whose behaviour depends on the loaded URL:
/// `hold` never clears, `slow` clears after a few polls, `reject` reports an
/// error and `nocookie` clears without issuing a clearance cookie.
struct FakeSurface {
    events: Arc<Mutex<Vec<String>>>,
    drives: Arc<Mutex<Vec<DriveWindow>>>,
    current: Option<String>,
    polls: u32,
}

impl ChallengeSurface for FakeSurface {
    fn load(&mut self, url: &str) -> Result<(), BrowserError> {
        self.events.lock().unwrap().push(format!("load {}", url));
        self.drives.lock().unwrap().push(DriveWindow {
            url: url.to_string(),
            loaded: Instant::now(),
            vacated: None,
        });
        self.current = Some(url.to_string());
        self.polls = 0;
        Ok(())
    }

    fn install_watcher(&mut self, _script: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    fn read_signal(&mut self) -> Result<String, BrowserError> {
        self.polls += 1;
        let url = self.current.clone().unwrap_or_default();
        let title = if url.contains("hold") {
            "Just a moment..."
        } else if url.contains("reject") {
            "error"
        } else if url.contains("slow") && self.polls < 60 {
            "Just a moment..."
        } else {
            "ready"
        };
        Ok(title.to_string())
    }

    fn harvest_cookies(&mut self) -> Result<Vec<StoredCookie>, BrowserError> {
        let url = self.current.clone().unwrap_or_default();
        if url.contains("nocookie") {
            return Ok(vec![StoredCookie {
                name: "visited".into(),
                value: "1".into(),
                domain: "127.0.0.1".into(),
                path: "/".into(),
                expires: None,
                secure: false,
                http_only: false,
            }]);
        }
        Ok(vec![clearance_cookie("solved")])
    }

    fn reveal(&mut self) -> Result<(), BrowserError> {
        Ok(())
    }

    fn is_revealed(&self) -> bool {
        false
    }

    fn vacate(&mut self) -> Result<(), BrowserError> {
        if let Some(window) = self.drives.lock().unwrap().last_mut() {
            window.vacated.get_or_insert_with(Instant::now);
        }
        self.events.lock().unwrap().push("vacate".to_string());
        self.current = None;
        Ok(())
    }

    fn user_agent(&self) -> String {
        FAKE_UA.to_string()
    }
}

fn clearance_cookie(value: &str) -> StoredCookie {
    StoredCookie {
        name: "cf_clearance".into(),
        value: value.into(),
        domain: "127.0.0.1".into(),
        path: "/".into(),
        expires: None,
        secure: false,
        http_only: false,
    }
}

/// Source answering with a challenge page `challenge_pages` times before
/// returning an entry named after the client's user agent
struct FakeSource {
    id: String,
    probe_url: Option<String>,
    challenge_pages: AtomicUsize,
}

impl FakeSource {
    fn new(id: &str, probe_url: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            probe_url,
            challenge_pages: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Fake"
    }

    fn base_url(&self) -> &str {
        "http://127.0.0.1:9/"
    }

    fn challenge(&self) -> Option<ChallengeRequirement> {
        self.probe_url.clone().map(ChallengeRequirement::cloudflare)
    }

    fn http_client_kind(&self) -> HttpClientKind {
        HttpClientKind::Impersonating
    }

    async fn fetch_catalog_entry(
        &self,
        client: &SourceClient,
        _slug: &str,
    ) -> Result<Option<CatalogEntry>, SourceError> {
        if self.challenge_pages.load(Ordering::SeqCst) > 0 {
            self.challenge_pages.fetch_sub(1, Ordering::SeqCst);
            return Err(SourceError::ChallengeRequired);
        }
        Ok(Some(CatalogEntry {
            name: client.user_agent().to_string(),
            ..Default::default()
        }))
    }

    async fn fetch_chapter_content(
        &self,
        _client: &SourceClient,
        _title_slug: &str,
        _chapter_slug: &str,
    ) -> Result<Option<ChapterContent>, SourceError> {
        Ok(None)
    }

    async fn fetch_page_image(
        &self,
        _client: &SourceClient,
        _page: &PageDescriptor,
    ) -> Result<Option<PageImage>, SourceError> {
        Ok(None)
    }

    async fn search(
        &self,
        _client: &SourceClient,
        _term: &str,
        _filters: &SearchFilters,
    ) -> Result<Option<Vec<SearchResult>>, SourceError> {
        Ok(None)
    }
}

struct Harness {
    bridge: Arc<ChallengeBridge>,
    events: Arc<Mutex<Vec<String>>>,
    drives: Arc<Mutex<Vec<DriveWindow>>>,
    surfaces_built: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let events = Arc::new(Mutex::new(Vec::new()));
    let drives = Arc::new(Mutex::new(Vec::new()));
    let surfaces_built = Arc::new(AtomicUsize::new(0));

    let factory: SurfaceFactory = {
        let events = events.clone();
        let drives = drives.clone();
        let surfaces_built = surfaces_built.clone();
        Arc::new(move || -> Box<dyn ChallengeSurface> {
            surfaces_built.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeSurface {
                events: events.clone(),
                drives: drives.clone(),
                current: None,
                polls: 0,
            })
        })
    };
    let settings = ChallengerSettings {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        interactive_timeout: Duration::from_secs(5),
        pow_patience: Duration::from_secs(5),
        max_pow_retries: 3,
        interstitial_grace: Duration::from_secs(10),
        stealth: false,
    };
    let http = HttpClientConfig {
        max_retries: 0,
        probe_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let bridge = ChallengeBridge::with_surface_factory(
        settings,
        http,
        Arc::new(SessionStore::in_memory()),
        Arc::new(MetricsTracker::new()),
        factory,
    );
    Harness {
        bridge: Arc::new(bridge),
        events,
        drives,
        surfaces_built,
    }
}

/// Probe endpoint: `/ok` answers 200, anything else 403
fn spawn_probe_server() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };
        let status = if request.url() == "/ok" { 200 } else { 403 };
        let _ = request.respond(tiny_http::Response::from_string("probe").with_status_code(status));
    });

    (base_url, shutdown_tx, handle)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn stored_session(source_id: &str) -> Session {
    let mut session = Session::new(source_id, HttpClientKind::Impersonating);
    session.user_agent = Some("StoredAgent/2.0".into());
    session.cookies.push(clearance_cookie("stored"));
    session
}

#[tokio::test]
async fn test_source_without_challenge_never_touches_browser() {
    let h = harness();
    let source = FakeSource::new("plain", None);

    let client = h.bridge.client_for(&source).await.expect("client");

    assert_eq!(client.kind(), HttpClientKind::Impersonating);
    assert_eq!(h.surfaces_built.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_accepted_session_is_reused() {
    let (base_url, shutdown, server) = spawn_probe_server();
    let h = harness();
    let source = FakeSource::new("guarded", Some(format!("{}/ok", base_url)));
    h.bridge.sessions().replace(stored_session("guarded")).expect("store session");

    let client = h.bridge.client_for(&source).await.expect("client");

    assert_eq!(client.user_agent(), "StoredAgent/2.0");
    assert_eq!(h.surfaces_built.load(Ordering::SeqCst), 0);
    assert!(h.events.lock().unwrap().is_empty());

    let _ = shutdown.send(());
    let _ = server.join();
}

#[tokio::test]
async fn test_rejected_probe_solves_again() {
    let (base_url, shutdown, server) = spawn_probe_server();
    let h = harness();
    let probe = format!("{}/blocked", base_url);
    let source = FakeSource::new("guarded", Some(probe.clone()));
    h.bridge.sessions().replace(stored_session("guarded")).expect("store session");

    let client = h.bridge.client_for(&source).await.expect("client");

    assert_eq!(client.user_agent(), FAKE_UA);
    assert_eq!(*h.events.lock().unwrap(), vec![format!("load {}", probe), "vacate".to_string()]);

    let session = h.bridge.sessions().get("guarded").expect("session");
    assert_eq!(session.user_agent.as_deref(), Some(FAKE_UA));
    assert!(session.cookies.iter().any(|c| c.value == "solved"));
    assert!(!session.cookies.iter().any(|c| c.value == "stored"));
    assert!(!session.placeholder_clearance);

    let _ = shutdown.send(());
    let _ = server.join();
}

#[tokio::test]
async fn test_missing_clearance_cookie_stores_placeholder() {
    let h = harness();
    let source = FakeSource::new("quiet", Some("http://127.0.0.1:9/nocookie".into()));

    let session = h.bridge.solve(&source, "http://127.0.0.1:9/nocookie").await.expect("solve");

    assert!(session.placeholder_clearance);
    assert!(session.has_clearance("cf_clearance"));
    assert_eq!(h.bridge.sessions().get("quiet"), Some(session));
}

#[tokio::test]
async fn test_rejected_challenge_keeps_previous_session() {
    let h = harness();
    let source = FakeSource::new("banned", Some("http://127.0.0.1:9/reject".into()));
    h.bridge.sessions().replace(stored_session("banned")).expect("store session");
    let before = h.bridge.sessions().get("banned");

    let err = h.bridge.solve(&source, "http://127.0.0.1:9/reject").await.unwrap_err();

    assert_eq!(err.reason, ChallengeFailure::Rejected);
    assert_eq!(h.bridge.sessions().get("banned"), before);
    assert_eq!(h.events.lock().unwrap().last().map(String::as_str), Some("vacate"));
}

#[tokio::test]
async fn test_challenges_take_turns_in_submission_order() {
    let h = harness();
    let mut workers = Vec::new();

    for id in ["a", "b", "c"] {
        let bridge = h.bridge.clone();
        let source = Arc::new(FakeSource::new(id, None));
        let url = format!("http://127.0.0.1:9/slow/{}", id);
        workers.push(tokio::spawn(async move { bridge.solve(source.as_ref(), &url).await }));

        match id {
            "a" => {
                let events = h.events.clone();
                wait_until("first load", move || !events.lock().unwrap().is_empty()).await;
            }
            "b" => {
                let bridge = h.bridge.clone();
                wait_until("b queued", move || bridge.pending() == vec!["b".to_string()]).await;
            }
            _ => {
                let bridge = h.bridge.clone();
                wait_until("c queued", move || bridge.pending().len() == 2).await;
            }
        }
    }

    for worker in workers {
        worker.await.expect("join").expect("solve");
    }

    assert_eq!(
        *h.events.lock().unwrap(),
        vec![
            "load http://127.0.0.1:9/slow/a".to_string(),
            "vacate".to_string(),
            "load http://127.0.0.1:9/slow/b".to_string(),
            "vacate".to_string(),
            "load http://127.0.0.1:9/slow/c".to_string(),
            "vacate".to_string(),
        ]
    );
    assert_eq!(h.surfaces_built.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_pending_and_abort_active() {
    let h = harness();

    let holder = {
        let bridge = h.bridge.clone();
        let source = Arc::new(FakeSource::new("a", None));
        tokio::spawn(async move { bridge.solve(source.as_ref(), "http://127.0.0.1:9/hold").await })
    };
    let events = h.events.clone();
    wait_until("holder loaded", move || !events.lock().unwrap().is_empty()).await;

    let waiter = {
        let bridge = h.bridge.clone();
        let source = Arc::new(FakeSource::new("b", None));
        tokio::spawn(async move { bridge.solve(source.as_ref(), "http://127.0.0.1:9/ready").await })
    };
    let bridge = h.bridge.clone();
    wait_until("waiter queued", move || !bridge.pending().is_empty()).await;

    assert_eq!(h.bridge.cancel_pending("b"), 1);
    let err = waiter.await.expect("join").unwrap_err();
    assert_eq!(err.reason, ChallengeFailure::Cancelled);

    assert!(h.bridge.abort_active());
    let err = holder.await.expect("join").unwrap_err();
    assert_eq!(err.reason, ChallengeFailure::Cancelled);

    assert_eq!(
        *h.events.lock().unwrap(),
        vec!["load http://127.0.0.1:9/hold".to_string(), "vacate".to_string()]
    );
    assert!(!h.bridge.abort_active());
}

#[tokio::test]
async fn test_guarded_retries_once_after_challenge_page() {
    let h = harness();
    let source = Arc::new(FakeSource::new("flaky", Some("http://127.0.0.1:9/ready".into())));
    source.challenge_pages.store(1, Ordering::SeqCst);

    let entry = h
        .bridge
        .guarded(source.as_ref(), |client| {
            let source = source.clone();
            async move { source.fetch_catalog_entry(&client, "title").await }
        })
        .await
        .expect("guarded")
        .expect("entry");

    assert_eq!(entry.name, FAKE_UA);
    let loads = h.events.lock().unwrap().iter().filter(|e| e.starts_with("load")).count();
    assert_eq!(loads, 2);
}

#[tokio::test]
async fn test_guarded_gives_up_after_second_challenge_page() {
    let h = harness();
    let source = Arc::new(FakeSource::new("stubborn", Some("http://127.0.0.1:9/ready".into())));
    source.challenge_pages.store(usize::MAX, Ordering::SeqCst);

    let err = h
        .bridge
        .guarded(source.as_ref(), |client| {
            let source = source.clone();
            async move { source.fetch_catalog_entry(&client, "title").await }
        })
        .await
        .unwrap_err();

    match err {
        SourceError::Challenge(e) => assert_eq!(e.reason, ChallengeFailure::Rejected),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_reaches_challenger_admitted_after_handoff() {
    for round in 0..10 {
        let h = harness();

        let first = {
            let bridge = h.bridge.clone();
            let source = Arc::new(FakeSource::new("a", None));
            tokio::spawn(async move { bridge.solve(source.as_ref(), "http://127.0.0.1:9/slow/a").await })
        };
        let events = h.events.clone();
        wait_until("first load", move || !events.lock().unwrap().is_empty()).await;

        let second = {
            let bridge = h.bridge.clone();
            let source = Arc::new(FakeSource::new("b", None));
            tokio::spawn(async move { bridge.solve(source.as_ref(), "http://127.0.0.1:9/hold/b").await })
        };
        let events = h.events.clone();
        wait_until("second load", move || {
            events.lock().unwrap().iter().any(|e| e == "load http://127.0.0.1:9/hold/b")
        })
        .await;

        first.await.expect("join").expect("first solve");
        assert!(h.bridge.abort_active(), "abort lost in round {}", round);
        let err = second.await.expect("join").unwrap_err();
        assert_eq!(err.reason, ChallengeFailure::Cancelled);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_guarded_calls_on_different_sources_never_share_the_surface() {
    let h = harness();
    let left = Arc::new(FakeSource::new("left", Some("http://127.0.0.1:9/slow/left".into())));
    let right = Arc::new(FakeSource::new("right", Some("http://127.0.0.1:9/slow/right".into())));

    let call = |source: Arc<FakeSource>| {
        let bridge = h.bridge.clone();
        tokio::spawn(async move {
            bridge
                .guarded(source.as_ref(), |client| {
                    let source = source.clone();
                    async move { source.fetch_catalog_entry(&client, "title").await }
                })
                .await
        })
    };
    let (a, b) = tokio::join!(call(left), call(right));
    assert_eq!(a.expect("join").expect("left").expect("entry").name, FAKE_UA);
    assert_eq!(b.expect("join").expect("right").expect("entry").name, FAKE_UA);

    let mut drives = h.drives.lock().unwrap().clone();
    assert_eq!(drives.len(), 2);
    drives.sort_by_key(|w| w.loaded);
    let first_end = drives[0].vacated.expect("first drive vacated");
    assert!(drives[1].vacated.is_some());
    assert!(
        first_end <= drives[1].loaded,
        "{} still on the surface when {} loaded",
        drives[0].url,
        drives[1].url
    );
    assert_ne!(drives[0].url, drives[1].url);
}

//! One scrape end to end: make the client debuggable, connect with retries,
//! then read email, installed applications and friends into a
//! [`ScrapeSnapshot`].
//!
//! The work runs on its own tokio task. The caller gets a [`ScrapeHandle`]
//! and receives the finished snapshot through a one-shot channel, so a
//! half-built snapshot is never observable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ScrapeConfig;
use crate::dom;
use crate::endpoint::{DebugEndpoint, DebugEndpointResolver};
use crate::error::ScrapeError;
use crate::inventory::{self, InventoryEntry};
use crate::protocol::{DevtoolsChannel, ProtocolClient};
use crate::retry::{RetryOrchestrator, SessionState};
use crate::social::{ContactEntry, SocialGraphScraper};
use crate::storage::{self, EMAIL_KEY, INSTALL_MANAGER_KEY};
use crate::supervisor::ProcessSupervisor;

const DOCUMENT_READY: &str = "document.readyState === 'complete'";

/// Everything one scrape produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSnapshot {
    pub inventory: Vec<InventoryEntry>,
    pub contacts: Vec<ContactEntry>,
    pub email: String,
}

/// Finds the client and the page to attach to.
#[async_trait]
pub trait DebugTarget: Send + Sync {
    /// Make sure the client accepts DevTools connections. Runs once per scrape.
    async fn prepare(&self) -> Result<DebugEndpoint, ScrapeError>;

    /// `endpoint` with the page to drive filled in. Runs on every connection
    /// attempt.
    async fn resolve(&self, endpoint: &DebugEndpoint) -> Result<DebugEndpoint, ScrapeError>;
}

/// Opens a command channel to a page.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn DevtoolsChannel>, ScrapeError>;
}

/// The Discord client running on this machine.
pub struct LocalDiscord {
    supervisor: ProcessSupervisor,
    resolver: DebugEndpointResolver,
}

impl LocalDiscord {
    pub fn new(supervisor: ProcessSupervisor, resolver: DebugEndpointResolver) -> Self {
        Self { supervisor, resolver }
    }

    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self::new(
            ProcessSupervisor::from_config(config),
            DebugEndpointResolver::new(config.endpoint_timeout, config.endpoint_poll),
        )
    }
}

#[async_trait]
impl DebugTarget for LocalDiscord {
    async fn prepare(&self) -> Result<DebugEndpoint, ScrapeError> {
        self.supervisor.ensure_debug_mode().await
    }

    async fn resolve(&self, endpoint: &DebugEndpoint) -> Result<DebugEndpoint, ScrapeError> {
        self.resolver.resolve_endpoint(endpoint).await
    }
}

/// Connects with [`ProtocolClient`].
pub struct WebSocketConnector {
    connect_timeout: std::time::Duration,
    command_timeout: std::time::Duration,
}

impl WebSocketConnector {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DevtoolsChannel>, ScrapeError> {
        let client = ProtocolClient::connect(url, self.connect_timeout)
            .await?
            .with_command_timeout(self.command_timeout);
        Ok(Box::new(client))
    }
}

/// Owns the scrape lifecycle for one host. Cheap to clone; clones share
/// state, including the single-flight flag.
#[derive(Clone)]
pub struct ScrapeSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ScrapeConfig,
    target: Arc<dyn DebugTarget>,
    connector: Arc<dyn Connector>,
    orchestrator: RetryOrchestrator,
    in_flight: AtomicBool,
    last_snapshot: Mutex<Option<Arc<ScrapeSnapshot>>>,
    /// Shared by overlapping `ensure_scraped` callers.
    first_snapshot: OnceCell<Arc<ScrapeSnapshot>>,
}

impl ScrapeSession {
    /// Session against the local Discord client.
    pub fn new(config: ScrapeConfig) -> Self {
        let target = Arc::new(LocalDiscord::from_config(&config));
        let connector = Arc::new(WebSocketConnector::from_config(&config));
        Self::with_parts(config, target, connector)
    }

    pub fn with_parts(config: ScrapeConfig, target: Arc<dyn DebugTarget>, connector: Arc<dyn Connector>) -> Self {
        let orchestrator = RetryOrchestrator::new(config.retry);
        Self {
            inner: Arc::new(SessionInner {
                config,
                target,
                connector,
                orchestrator,
                in_flight: AtomicBool::new(false),
                last_snapshot: Mutex::new(None),
                first_snapshot: OnceCell::new(),
            }),
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.orchestrator.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.orchestrator.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Last successful snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<ScrapeSnapshot>> {
        self.inner
            .last_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Start a scrape in the background. Only one may be outstanding per
    /// session; a second call fails with [`ScrapeError::ScrapeInProgress`].
    pub fn start(&self) -> Result<ScrapeHandle, ScrapeError> {
        let guard = InFlightGuard::acquire(self.inner.clone())?;
        let inner = self.inner.clone();
        let (sender, receiver) = oneshot::channel();

        let task = tokio::spawn(async move {
            let result = inner.scrape().await;
            if let Ok(snapshot) = &result {
                *inner
                    .last_snapshot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(snapshot.clone()));
            }
            drop(guard);
            if sender.send(result).is_err() {
                debug!("Scrape finished after its handle was dropped");
            }
        });

        Ok(ScrapeHandle {
            result: receiver,
            task,
            delivered: false,
        })
    }

    /// Scrape once, then keep serving the stored snapshot. Callers that
    /// arrive while that first scrape runs wait for it instead of starting
    /// their own; if it fails, the next caller in line tries again.
    pub async fn ensure_scraped(&self) -> Result<Arc<ScrapeSnapshot>, ScrapeError> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        self.inner
            .first_snapshot
            .get_or_try_init(|| async {
                match self.snapshot() {
                    Some(snapshot) => Ok::<_, ScrapeError>(snapshot),
                    None => {
                        let snapshot = self.start()?.wait().await?;
                        Ok(self.snapshot().unwrap_or_else(|| Arc::new(snapshot)))
                    }
                }
            })
            .await
            .cloned()
    }
}

impl SessionInner {
    #[instrument(skip(self), fields(port = self.config.debug_port))]
    async fn scrape(&self) -> Result<ScrapeSnapshot, ScrapeError> {
        let endpoint = match self.target.prepare().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "Client is not reachable for debugging");
                self.orchestrator.mark_failed();
                return Err(e);
            }
        };

        let endpoint = &endpoint;
        let target = self.target.as_ref();
        let connector = self.connector.as_ref();

        self.orchestrator
            .run(
                move |attempt| async move {
                    let url = target.resolve(endpoint).await?.page_url.ok_or_else(|| {
                        ScrapeError::MalformedResponse("debug target resolved without a page URL".into())
                    })?;
                    debug!(attempt, url = %url, "Connecting to page");
                    connector.connect(&url).await
                },
                |channel| self.extract(channel),
            )
            .await
    }

    async fn extract(&self, mut channel: Box<dyn DevtoolsChannel>) -> Result<ScrapeSnapshot, ScrapeError> {
        let channel = channel.as_mut();

        tokio::time::sleep(self.config.post_connect_settle).await;
        let ready = dom::wait_for(
            channel,
            DOCUMENT_READY,
            self.config.dom_wait_timeout,
            self.config.dom_poll_interval,
        )
        .await?;
        if !ready {
            warn!("Page did not report readyState 'complete', continuing anyway");
        }

        let email = storage::extract(channel, EMAIL_KEY)
            .await?
            .map(|raw| storage::decode_email(&raw))
            .ok_or_else(|| ScrapeError::MalformedResponse(format!("page storage has no '{EMAIL_KEY}'")))?;

        let inventory = match storage::extract(channel, INSTALL_MANAGER_KEY).await? {
            Some(state) => tokio::task::spawn_blocking(move || inventory::build(&state))
                .await
                .map_err(|e| ScrapeError::WorkerFailed(format!("inventory walk: {e}")))??,
            None => {
                info!("No install manager state, reporting no installed applications");
                Vec::new()
            }
        };

        let contacts = SocialGraphScraper::from_config(&self.config).scrape(channel).await?;

        info!(
            applications = inventory.len(),
            contacts = contacts.len(),
            "Scrape complete"
        );
        Ok(ScrapeSnapshot {
            inventory,
            contacts,
            email,
        })
    }
}

/// Holds the session's in-flight flag until dropped, including when the
/// worker task is aborted.
struct InFlightGuard {
    inner: Arc<SessionInner>,
}

impl InFlightGuard {
    fn acquire(inner: Arc<SessionInner>) -> Result<Self, ScrapeError> {
        inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ScrapeError::ScrapeInProgress)?;
        Ok(Self { inner })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

/// A running scrape. Dropping the handle does not cancel it; use
/// [`ScrapeHandle::abort`].
pub struct ScrapeHandle {
    result: oneshot::Receiver<Result<ScrapeSnapshot, ScrapeError>>,
    task: JoinHandle<()>,
    delivered: bool,
}

impl ScrapeHandle {
    pub async fn wait(self) -> Result<ScrapeSnapshot, ScrapeError> {
        let ScrapeHandle { result, task, .. } = self;
        match result.await {
            Ok(result) => result,
            Err(_) => Err(worker_failure(task.await)),
        }
    }

    /// The result if it is ready, without waiting. Yields it at most once.
    pub fn try_take(&mut self) -> Option<Result<ScrapeSnapshot, ScrapeError>> {
        if self.delivered {
            return None;
        }
        match self.result.try_recv() {
            Ok(result) => {
                self.delivered = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.delivered = true;
                Some(Err(ScrapeError::WorkerFailed(
                    "scrape task ended without a result".into(),
                )))
            }
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn worker_failure(joined: Result<(), tokio::task::JoinError>) -> ScrapeError {
    match joined {
        Err(e) if e.is_cancelled() => ScrapeError::WorkerFailed("scrape was aborted".into()),
        Err(e) => ScrapeError::WorkerFailed(format!("scrape task panicked: {e}")),
        Ok(()) => ScrapeError::WorkerFailed("scrape task ended without a result".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use crate::test_support::{remote_value, ScriptedChannel};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FakeTarget {
        prepared: AtomicU32,
    }

    impl FakeTarget {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prepared: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl DebugTarget for FakeTarget {
        async fn prepare(&self) -> Result<DebugEndpoint, ScrapeError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(DebugEndpoint::new(31337))
        }

        async fn resolve(&self, endpoint: &DebugEndpoint) -> Result<DebugEndpoint, ScrapeError> {
            let url = format!("ws://127.0.0.1:{}/devtools/page/MAIN", endpoint.port);
            Ok(endpoint.clone().with_page_url(url))
        }
    }

    struct MissingClient;

    #[async_trait]
    impl DebugTarget for MissingClient {
        async fn prepare(&self) -> Result<DebugEndpoint, ScrapeError> {
            Err(ScrapeError::ProcessNotFound("Discord".into()))
        }

        async fn resolve(&self, _: &DebugEndpoint) -> Result<DebugEndpoint, ScrapeError> {
            unreachable!("never prepared")
        }
    }

    type PageFactory = Box<dyn Fn() -> ScriptedChannel + Send + Sync>;

    struct FakeConnector {
        page: PageFactory,
        failures: AtomicU32,
        attempts: AtomicU32,
        gate: Option<Arc<Notify>>,
    }

    impl FakeConnector {
        fn new(page: PageFactory) -> Self {
            Self {
                page,
                failures: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
                gate: None,
            }
        }

        fn failing_first(self, failures: u32) -> Self {
            self.failures.store(failures, Ordering::SeqCst);
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn DevtoolsChannel>, ScrapeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ScrapeError::HandshakeFailed {
                    url: url.to_string(),
                    reason: "Connection refused".into(),
                });
            }
            Ok(Box::new((self.page)()))
        }
    }

    /// A logged-in Discord page with one friend, Alice#1234.
    fn discord_page(email: Option<&'static str>, install_state: Option<String>) -> PageFactory {
        Box::new(move || {
            let install_state = install_state.clone();
            ScriptedChannel::new(move |method, params| match method {
                "Runtime.evaluate" => {
                    let expression = params["expression"].as_str().unwrap_or_default();
                    if expression.contains(EMAIL_KEY) {
                        Ok(remote_value(
                            email.map(|e| Value::String(format!("\"{e}\""))).unwrap_or(Value::Null),
                        ))
                    } else if expression.contains(INSTALL_MANAGER_KEY) {
                        Ok(remote_value(
                            install_state.clone().map(Value::String).unwrap_or(Value::Null),
                        ))
                    } else {
                        Ok(json!({"result": {"type": "boolean", "value": true}}))
                    }
                }
                "DOM.getDocument" => Ok(json!({"root": {"nodeId": 1}})),
                "DOM.querySelectorAll" => Ok(json!({"nodeIds": [5]})),
                "DOM.querySelector" => {
                    let selector = params["selector"].as_str().unwrap_or_default();
                    let node = if selector.contains("username") { 51 } else { 52 };
                    Ok(json!({ "nodeId": node }))
                }
                "DOM.getOuterHTML" => match params["nodeId"].as_i64() {
                    Some(51) => Ok(json!({"outerHTML": r#"<span class="username-x">Alice</span>"#})),
                    _ => Ok(json!({"outerHTML": r#"<span class="discriminator-y">#1234</span>"#})),
                },
                other => panic!("unexpected command {other}"),
            })
        })
    }

    fn install_root_with_app(root: &Path) -> String {
        let app = root.join("123");
        std::fs::create_dir(&app).unwrap();
        std::fs::write(
            app.join(inventory::METADATA_FILE),
            r#"{"application_id": "123", "name": "Foo"}"#,
        )
        .unwrap();
        json!({"_state": {"installationPaths": [root.to_string_lossy()]}}).to_string()
    }

    fn quick_config() -> ScrapeConfig {
        ScrapeConfig {
            retry: BackoffPolicy::fixed(Duration::from_millis(1), 10),
            post_connect_settle: Duration::ZERO,
            post_navigation_settle: Duration::ZERO,
            dom_wait_timeout: Duration::from_millis(10),
            dom_poll_interval: Duration::from_millis(1),
            ..ScrapeConfig::default()
        }
    }

    fn session(target: Arc<dyn DebugTarget>, connector: FakeConnector) -> ScrapeSession {
        ScrapeSession::with_parts(quick_config(), target, Arc::new(connector))
    }

    #[tokio::test]
    async fn connector_receives_the_resolved_page_url() {
        struct RecordingConnector {
            inner: FakeConnector,
            urls: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl Connector for RecordingConnector {
            async fn connect(&self, url: &str) -> Result<Box<dyn DevtoolsChannel>, ScrapeError> {
                self.urls.lock().unwrap().push(url.to_string());
                self.inner.connect(url).await
            }
        }

        let connector = Arc::new(RecordingConnector {
            inner: FakeConnector::new(discord_page(Some("a@b.c"), None)),
            urls: Mutex::new(Vec::new()),
        });
        let session = ScrapeSession::with_parts(quick_config(), FakeTarget::new(), connector.clone());

        session.start().unwrap().wait().await.unwrap();
        assert_eq!(
            *connector.urls.lock().unwrap(),
            vec!["ws://127.0.0.1:31337/devtools/page/MAIN".to_string()]
        );
    }

    #[tokio::test]
    async fn scrape_produces_full_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let state = install_root_with_app(root.path());
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("alice@example.com"), Some(state))),
        );

        let snapshot = session.start().unwrap().wait().await.unwrap();
        assert_eq!(snapshot.email, "alice@example.com");
        assert_eq!(
            snapshot.inventory,
            vec![InventoryEntry {
                application_id: "123".into(),
                display_name: "Foo".into(),
            }]
        );
        assert_eq!(snapshot.contacts, vec![ContactEntry::new("Alice", "1234")]);
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.snapshot().as_deref(), Some(&snapshot));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn handshake_failures_are_retried_without_re_preparing() {
        let target = FakeTarget::new();
        let connector = Arc::new(
            FakeConnector::new(discord_page(Some("a@b.c"), None)).failing_first(3),
        );
        let session = ScrapeSession::with_parts(quick_config(), target.clone(), connector.clone());

        session.start().unwrap().wait().await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(target.prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_ask_for_reauthentication() {
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("a@b.c"), None)).failing_first(u32::MAX),
        );

        let err = session.start().unwrap().wait().await.unwrap_err();
        assert!(matches!(err, ScrapeError::MaxRetriesExceeded { attempts: 10, .. }));
        assert!(err.requires_reauthentication());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.snapshot().is_none());
    }

    #[tokio::test]
    async fn missing_email_is_malformed() {
        let session = session(FakeTarget::new(), FakeConnector::new(discord_page(None, None)));
        assert!(matches!(
            session.start().unwrap().wait().await,
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn missing_install_state_is_an_empty_inventory() {
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("a@b.c"), None)),
        );
        let snapshot = session.start().unwrap().wait().await.unwrap();
        assert!(snapshot.inventory.is_empty());
        assert_eq!(snapshot.contacts.len(), 1);
    }

    #[tokio::test]
    async fn missing_client_fails_before_connecting() {
        let connector = Arc::new(FakeConnector::new(discord_page(Some("a@b.c"), None)));
        let session = ScrapeSession::with_parts(quick_config(), Arc::new(MissingClient), connector.clone());

        let err = session.start().unwrap().wait().await.unwrap_err();
        assert!(matches!(err, ScrapeError::ProcessNotFound(_)));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn only_one_scrape_at_a_time() {
        let gate = Arc::new(Notify::new());
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("a@b.c"), None)).gated(gate.clone()),
        );

        let first = session.start().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.start(), Err(ScrapeError::ScrapeInProgress)));

        gate.notify_one();
        first.wait().await.unwrap();

        gate.notify_one();
        session.start().unwrap().wait().await.unwrap();
    }

    #[tokio::test]
    async fn try_take_never_sees_a_partial_snapshot() {
        let gate = Arc::new(Notify::new());
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("a@b.c"), None)).gated(gate.clone()),
        );

        let mut handle = session.start().unwrap();
        tokio::task::yield_now().await;
        assert!(handle.try_take().is_none());

        gate.notify_one();
        let taken = loop {
            if let Some(result) = handle.try_take() {
                break result.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        assert_eq!(taken.email, "a@b.c");
        assert_eq!(taken.contacts.len(), 1);
        assert!(handle.try_take().is_none());
    }

    #[tokio::test]
    async fn aborted_scrape_releases_the_session() {
        let gate = Arc::new(Notify::new());
        let session = session(
            FakeTarget::new(),
            FakeConnector::new(discord_page(Some("a@b.c"), None)).gated(gate.clone()),
        );

        let handle = session.start().unwrap();
        tokio::task::yield_now().await;
        handle.abort();
        assert!(matches!(handle.wait().await, Err(ScrapeError::WorkerFailed(_))));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn overlapping_ensure_scraped_calls_share_one_scrape() {
        let gate = Arc::new(Notify::new());
        let target = FakeTarget::new();
        let session = ScrapeSession::with_parts(
            quick_config(),
            target.clone(),
            Arc::new(FakeConnector::new(discord_page(Some("a@b.c"), None)).gated(gate.clone())),
        );

        let (first, second, ()) = tokio::join!(session.ensure_scraped(), session.ensure_scraped(), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(second.email, "a@b.c");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(target.prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_scraped_retries_after_a_failed_first_scrape() {
        let target = FakeTarget::new();
        let session = ScrapeSession::with_parts(
            ScrapeConfig {
                retry: BackoffPolicy::fixed(Duration::from_millis(1), 1),
                ..quick_config()
            },
            target.clone(),
            Arc::new(FakeConnector::new(discord_page(Some("a@b.c"), None)).failing_first(1)),
        );

        assert!(matches!(
            session.ensure_scraped().await,
            Err(ScrapeError::MaxRetriesExceeded { attempts: 1, .. })
        ));
        assert_eq!(session.ensure_scraped().await.unwrap().email, "a@b.c");
        assert_eq!(target.prepared.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ensure_scraped_scrapes_once() {
        let target = FakeTarget::new();
        let session = ScrapeSession::with_parts(
            quick_config(),
            target.clone(),
            Arc::new(FakeConnector::new(discord_page(Some("a@b.c"), None))),
        );

        let first = session.ensure_scraped().await.unwrap();
        let second = session.ensure_scraped().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(target.prepared.load(Ordering::SeqCst), 1);
    }
}

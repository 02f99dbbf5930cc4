//! Test session controller.
//!
//! One controller drives one test at a time through
//! `Idle -> Opening -> Open -> Closing -> Closed`. [`SessionController::run`]
//! is the scoped form: whatever the body does (returns an error, panics),
//! the visual session is closed and every pending comparison is joined before
//! the [`TestReport`] is produced.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checkpoint::CheckpointRecorder;
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::driver::PageDriver;
use crate::result::{MirarError, MirarResult};
use crate::visual_regression::{CheckpointResult, SessionVerdict, VisualBackend};

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session yet
    Idle,
    /// Navigating and opening the visual session
    Opening,
    /// Test body may run
    Open,
    /// Joining comparisons
    Closing,
    /// Session finished
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// What closing a session produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Test name the session was bound to
    pub test_name: String,
    /// Aggregate verdict
    pub verdict: SessionVerdict,
    /// Every checkpoint, in submission order
    pub checkpoints: Vec<CheckpointResult>,
}

/// Outcome of one [`SessionController::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Test name
    pub name: String,
    /// Body succeeded and the verdict is `Passed`
    pub passed: bool,
    /// Failure reason of the body, opening or closing
    pub error: Option<String>,
    /// Kind of `error`, e.g. `AssertionError`
    pub error_kind: Option<String>,
    /// Visual verdict; absent if the session never opened
    pub verdict: Option<SessionVerdict>,
    /// Checkpoint results in submission order
    pub checkpoints: Vec<CheckpointResult>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

impl TestReport {
    /// Whether the test passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    /// Serialize the report as pretty JSON
    pub fn to_json(&self) -> MirarResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn new(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            error: None,
            error_kind: None,
            verdict: None,
            checkpoints: Vec::new(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn with_error(mut self, error: &MirarError) -> Self {
        if self.error.is_none() {
            self.error = Some(error.to_string());
            self.error_kind = Some(error.kind().to_string());
        }
        self
    }
}

/// Opens, runs and closes test sessions against one page and one back-end
pub struct SessionController {
    driver: Arc<dyn PageDriver>,
    backend: Arc<dyn VisualBackend>,
    config: HarnessConfig,
    state: SessionState,
    context: Option<TestContext>,
    closed: Vec<String>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        backend: Arc<dyn VisualBackend>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            driver,
            backend,
            config,
            state: SessionState::Idle,
            context: None,
            closed: Vec::new(),
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Test names of every session that reached `Closed`, in order
    #[must_use]
    pub fn closed_sessions(&self) -> &[String] {
        &self.closed
    }

    /// Context of the open session
    #[must_use]
    pub const fn context(&self) -> Option<&TestContext> {
        self.context.as_ref()
    }

    /// Navigate to the configured URL and open a visual session.
    ///
    /// If either step fails the controller ends in `Closed`.
    pub async fn open(&mut self, test_name: &str) -> MirarResult<&TestContext> {
        if !matches!(self.state, SessionState::Idle | SessionState::Closed) {
            return Err(MirarError::SessionReuse {
                requested: test_name.to_string(),
                state: self.state.to_string(),
            });
        }
        self.state = SessionState::Opening;

        let opened = async {
            self.driver.navigate(&self.config.base_url).await?;
            self.backend.open_session(test_name).await
        }
        .await;
        if let Err(e) = opened {
            tracing::warn!(test = test_name, error = %e, "session failed to open");
            self.state = SessionState::Closed;
            self.closed.push(test_name.to_string());
            return Err(e);
        }

        tracing::info!(test = test_name, url = %self.config.base_url, "session opened");
        let recorder = CheckpointRecorder::new(test_name, Arc::clone(&self.backend));
        let context = TestContext::new(
            test_name,
            Arc::clone(&self.driver),
            self.config.clone(),
            recorder,
        );
        self.state = SessionState::Open;
        Ok(&*self.context.insert(context))
    }

    /// Join every pending comparison and close the visual session
    pub async fn close(&mut self) -> MirarResult<SessionSummary> {
        let state = self.state;
        match self.open_session() {
            Some(session) => session.close().await,
            None => Err(MirarError::NotOpen {
                state: state.to_string(),
            }),
        }
    }

    /// Run `body` inside a session and always close it.
    ///
    /// Dropping the returned future before it completes (a timeout around
    /// the test, say) still closes the session: the remaining comparisons
    /// and the back-end close finish on a background task and the controller
    /// is left `Closed`.
    ///
    /// ```ignore
    /// let report = controller
    ///     .run("clear", |ctx| Box::pin(async move {
    ///         ctx.get(".action-clear").await?.clear().await?;
    ///         Ok(())
    ///     }))
    ///     .await;
    /// ```
    pub async fn run<F>(&mut self, test_name: &str, body: F) -> TestReport
    where
        F: for<'c> FnOnce(&'c TestContext) -> BoxFuture<'c, MirarResult<()>>,
    {
        let start = Instant::now();
        if let Err(e) = self.open(test_name).await {
            return TestReport::new(test_name, start.elapsed()).with_error(&e);
        }
        let state = self.state;
        let Some(session) = self.open_session() else {
            let e = MirarError::NotOpen {
                state: state.to_string(),
            };
            return TestReport::new(test_name, start.elapsed()).with_error(&e);
        };

        let outcome = match session.context.as_ref() {
            Some(context) => run_body(context, body).await,
            None => Err(MirarError::NotOpen {
                state: SessionState::Closing.to_string(),
            }),
        };
        let closed = session.close().await;

        let mut report = TestReport::new(test_name, start.elapsed());
        if let Err(e) = &outcome {
            tracing::warn!(test = test_name, kind = e.kind(), error = %e, "test body failed");
            report = report.with_error(e);
        }
        match closed {
            Ok(summary) => {
                report.passed = outcome.is_ok() && summary.verdict.is_success();
                report.verdict = Some(summary.verdict);
                report.checkpoints = summary.checkpoints;
            }
            Err(e) => report = report.with_error(&e),
        }
        report
    }

    /// Move the open context into a guard that owns its closing
    fn open_session(&mut self) -> Option<OpenSession<'_>> {
        if self.state != SessionState::Open {
            return None;
        }
        let context = self.context.take()?;
        Some(OpenSession {
            test_name: context.test_name().to_string(),
            state: &mut self.state,
            closed: &mut self.closed,
            backend: Arc::clone(&self.backend),
            context: Some(context),
        })
    }
}

type CloseOutcome = (Vec<CheckpointResult>, MirarResult<SessionVerdict>);

/// An open session that is closed exactly once, even if it is dropped early
struct OpenSession<'a> {
    test_name: String,
    state: &'a mut SessionState,
    closed: &'a mut Vec<String>,
    backend: Arc<dyn VisualBackend>,
    context: Option<TestContext>,
}

impl OpenSession<'_> {
    async fn close(mut self) -> MirarResult<SessionSummary> {
        let Some(context) = self.context.take() else {
            return Err(MirarError::NotOpen {
                state: self.state.to_string(),
            });
        };
        *self.state = SessionState::Closing;
        // Spawned so that dropping this future mid-close does not cancel it
        let closing = tokio::spawn(finish(context, Arc::clone(&self.backend))).await;
        self.mark_closed();

        let (checkpoints, verdict) = closing.map_err(|e| MirarError::Aborted {
            message: format!("session close failed: {e}"),
        })?;
        let verdict = verdict?;
        tracing::info!(
            test = %self.test_name,
            %verdict,
            checkpoints = checkpoints.len(),
            "session closed"
        );
        Ok(SessionSummary {
            test_name: self.test_name.clone(),
            verdict,
            checkpoints,
        })
    }

    fn mark_closed(&mut self) {
        if *self.state != SessionState::Closed {
            *self.state = SessionState::Closed;
            self.closed.push(self.test_name.clone());
        }
    }
}

impl Drop for OpenSession<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            tracing::warn!(
                test = %self.test_name,
                "session dropped while open, closing in background"
            );
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(finish(context, Arc::clone(&self.backend)));
                }
                Err(_) => {
                    tracing::warn!(
                        test = %self.test_name,
                        "no runtime, pending comparisons lost"
                    );
                }
            }
        }
        self.mark_closed();
    }
}

/// Join the session's comparisons and close it on the back-end
async fn finish(context: TestContext, backend: Arc<dyn VisualBackend>) -> CloseOutcome {
    let test_name = context.test_name().to_string();
    let checkpoints = context.into_recorder().close().await;
    let verdict = backend.close_session(&test_name, &checkpoints).await;
    if let Err(e) = &verdict {
        tracing::warn!(test = %test_name, error = %e, "back-end failed to close session");
    }
    (checkpoints, verdict)
}

async fn run_body<F>(context: &TestContext, body: F) -> MirarResult<()>
where
    F: for<'c> FnOnce(&'c TestContext) -> BoxFuture<'c, MirarResult<()>>,
{
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| body(context))) {
        Ok(future) => future,
        Err(payload) => return Err(aborted(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(aborted(payload.as_ref())),
    }
}

fn aborted(payload: &(dyn std::any::Any + Send)) -> MirarError {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "test body panicked".to_string());
    MirarError::Aborted { message }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::assertion::Expectation;
    use crate::checkpoint::Checkpoint;
    use crate::config::VisualConfig;
    use crate::demo::actions_site;
    use crate::visual_regression::{BaselineStore, CheckpointOutcome, ComparisonRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Back-end that counts session calls and can refuse to open
    #[derive(Debug, Default)]
    struct CountingBackend {
        refuse_open: bool,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl VisualBackend for CountingBackend {
        async fn open_session(&self, _test_name: &str) -> MirarResult<()> {
            if self.refuse_open {
                return Err(MirarError::driver("visual service unavailable"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn compare(&self, _request: ComparisonRequest) -> MirarResult<CheckpointOutcome> {
            Ok(CheckpointOutcome::Passed)
        }

        async fn close_session(
            &self,
            _test_name: &str,
            results: &[CheckpointResult],
        ) -> MirarResult<SessionVerdict> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(SessionVerdict::from_results(results))
        }
    }

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default().with_action_timeout(100).with_visual(
            VisualConfig::default()
                .with_baseline_dir(dir.path().join("baselines").display().to_string())
                .with_diff_dir(dir.path().join("diffs").display().to_string()),
        )
    }

    fn controller(config: &HarnessConfig, backend: Arc<dyn VisualBackend>) -> SessionController {
        SessionController::new(Arc::new(actions_site(config)), backend, config.clone())
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_open_close_transitions() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend::default());
            let mut c = controller(&config(&dir), backend.clone());
            assert_eq!(c.state(), SessionState::Idle);

            c.open("t1").await.unwrap();
            assert_eq!(c.state(), SessionState::Open);
            assert_eq!(c.context().unwrap().test_name(), "t1");

            let summary = c.close().await.unwrap();
            assert_eq!(summary.verdict, SessionVerdict::Passed);
            assert_eq!(c.state(), SessionState::Closed);
            assert_eq!(c.closed_sessions(), ["t1".to_string()]);
            assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
            assert_eq!(backend.closed.load(Ordering::SeqCst), 1);

            c.open("t2").await.unwrap();
            assert_eq!(c.state(), SessionState::Open);
        }

        #[tokio::test]
        async fn test_reuse_while_open() {
            let dir = TempDir::new().unwrap();
            let mut c = controller(&config(&dir), Arc::new(CountingBackend::default()));
            c.open("t1").await.unwrap();
            let err = c.open("t2").await.unwrap_err();
            assert!(matches!(err, MirarError::SessionReuse { ref state, .. } if state == "open"));
            assert_eq!(c.state(), SessionState::Open);
        }

        #[tokio::test]
        async fn test_close_without_open() {
            let dir = TempDir::new().unwrap();
            let mut c = controller(&config(&dir), Arc::new(CountingBackend::default()));
            assert_eq!(c.close().await.unwrap_err().kind(), "NotOpenError");
            assert_eq!(c.state(), SessionState::Idle);
        }

        #[tokio::test]
        async fn test_failed_open_ends_closed() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend {
                refuse_open: true,
                ..CountingBackend::default()
            });
            let mut c = controller(&config(&dir), backend);
            assert!(c.open("t1").await.is_err());
            assert_eq!(c.state(), SessionState::Closed);
            assert!(c.context().is_none());
        }

        #[tokio::test]
        async fn test_bad_url_ends_closed() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let mut c = SessionController::new(
                Arc::new(actions_site(&cfg)),
                Arc::new(CountingBackend::default()),
                cfg.with_base_url("http://localhost:8080/missing"),
            );
            let err = c.open("t1").await.unwrap_err();
            assert_eq!(err.kind(), "NavigationError");
            assert_eq!(c.state(), SessionState::Closed);
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_body_error_still_closes() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend::default());
            let mut c = controller(&config(&dir), backend.clone());
            let report = c
                .run("failing", |ctx| {
                    Box::pin(async move {
                        ctx.get(".action-email")
                            .await?
                            .should(Expectation::have_value("nope"))
                            .await?;
                        Ok(())
                    })
                })
                .await;
            assert!(!report.passed());
            assert_eq!(report.error_kind.as_deref(), Some("AssertionError"));
            assert_eq!(report.verdict, Some(SessionVerdict::Passed));
            assert_eq!(c.state(), SessionState::Closed);
            assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_panic_becomes_aborted() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend::default());
            let mut c = controller(&config(&dir), backend.clone());
            let report = c
                .run("panicking", |ctx| {
                    Box::pin(async move {
                        if ctx.test_name() == "panicking" {
                            panic!("boom");
                        }
                        Ok(())
                    })
                })
                .await;
            assert!(!report.passed());
            assert_eq!(report.error_kind.as_deref(), Some("AbortedError"));
            assert_eq!(report.error.as_deref(), Some("test aborted: boom"));
            assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
            assert_eq!(c.state(), SessionState::Closed);
        }

        #[tokio::test]
        async fn test_duplicate_tag_fails_and_closes() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let store = Arc::new(BaselineStore::new(cfg.visual.clone()));
            let mut c = controller(&cfg, store.clone());
            let report = c
                .run("t1", |ctx| {
                    Box::pin(async move {
                        ctx.check_window(&Checkpoint::window("a")).await?;
                        ctx.check_window(&Checkpoint::window("a")).await?;
                        Ok(())
                    })
                })
                .await;
            assert_eq!(report.error_kind.as_deref(), Some("DuplicateTagError"));
            assert_eq!(report.checkpoints.len(), 1);
            assert_eq!(report.verdict, Some(SessionVerdict::New));
            assert_eq!(c.state(), SessionState::Closed);
            assert!(!store.is_open("t1"));
        }

        #[tokio::test]
        async fn test_new_then_passed() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let store: Arc<dyn VisualBackend> = Arc::new(BaselineStore::new(cfg.visual.clone()));
            for expected in [SessionVerdict::New, SessionVerdict::Passed] {
                let mut c = controller(&cfg, Arc::clone(&store));
                let report = c
                    .run("window", |ctx| {
                        Box::pin(async move { ctx.check_window(&Checkpoint::window("page")).await })
                    })
                    .await;
                assert_eq!(report.verdict, Some(expected));
                assert_eq!(report.passed(), expected == SessionVerdict::Passed);
            }
        }

        #[tokio::test]
        async fn test_report_json() {
            let dir = TempDir::new().unwrap();
            let mut c = controller(&config(&dir), Arc::new(CountingBackend::default()));
            let report = c.run("ok", |_ctx| Box::pin(async { Ok(()) })).await;
            assert!(report.passed());
            let json = report.to_json().unwrap();
            assert!(json.contains("\"verdict\": \"passed\""));
            let back: TestReport = serde_json::from_str(&json).unwrap();
            assert_eq!(back, report);
        }

        async fn settle(done: impl Fn() -> bool) {
            for _ in 0..200 {
                if done() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        #[tokio::test]
        async fn test_timed_out_run_still_closes() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend::default());
            let mut c = controller(&config(&dir), backend.clone());

            let timed_out = tokio::time::timeout(
                Duration::from_millis(50),
                c.run("slow", |_ctx| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    })
                }),
            )
            .await;
            assert!(timed_out.is_err());
            assert_eq!(c.state(), SessionState::Closed);
            assert!(c.context().is_none());
            assert_eq!(c.closed_sessions(), ["slow".to_string()]);

            settle(|| backend.closed.load(Ordering::SeqCst) == 1).await;
            assert_eq!(backend.closed.load(Ordering::SeqCst), 1);

            let next = c.run("next", |_ctx| Box::pin(async { Ok(()) })).await;
            assert!(next.passed(), "{next:?}");
            assert_eq!(c.closed_sessions(), ["slow".to_string(), "next".to_string()]);
            assert_eq!(backend.closed.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_timed_out_run_joins_its_comparisons() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let store = Arc::new(BaselineStore::new(cfg.visual.clone()));
            let mut c = controller(&cfg, store.clone());

            let timed_out = tokio::time::timeout(
                Duration::from_millis(200),
                c.run("captured", |ctx| {
                    Box::pin(async move {
                        ctx.check_window(&Checkpoint::window("page")).await?;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    })
                }),
            )
            .await;
            assert!(timed_out.is_err());
            assert_eq!(c.state(), SessionState::Closed);

            settle(|| !store.is_open("captured")).await;
            assert!(!store.is_open("captured"));

            // The baseline written in the background is matched on the rerun
            let rerun = c
                .run("captured", |ctx| {
                    Box::pin(async move { ctx.check_window(&Checkpoint::window("page")).await })
                })
                .await;
            assert_eq!(rerun.verdict, Some(SessionVerdict::Passed));
        }

        #[tokio::test]
        async fn test_failed_open_report() {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(CountingBackend {
                refuse_open: true,
                ..CountingBackend::default()
            });
            let mut c = controller(&config(&dir), backend);
            let report = c.run("t", |_ctx| Box::pin(async { Ok(()) })).await;
            assert!(!report.passed());
            assert_eq!(report.verdict, None);
            assert_eq!(report.error_kind.as_deref(), Some("DriverError"));
        }
    }
}

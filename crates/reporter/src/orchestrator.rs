//! Launch, suite and test orchestration
//!
//! [`Reporter`] turns host notifications into remote calls. It is owned by the
//! ordered task queue; [`ReporterHandle`] is what the host talks to. Each
//! notification becomes one queued task, so notifications are applied in the
//! order they were emitted even though every remote call is asynchronous.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use stepmirror_common::{
    Attachment, Error, FinishLaunchRq, ItemKind, ItemStatus, LaunchConfig, LaunchFinished,
    LaunchId, LogLevel, ReporterConfig, ReportingClient, Result, StartLaunchRq,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifacts::{CommandScreenCapture, FailureArtifactCollector, ScreenCapture};
use crate::events::{HostEvent, Step, Suite, Test, TestFailure};
use crate::queue::{self, TaskQueueTx};
use crate::reconciler::{self, stack_of};
use crate::remote::{swallow, NewItem, Remote};
use crate::rollup;
use crate::state::{CorrelationTable, LaunchEntry, StepEntry, SuiteEntry, TestEntry};

/// Reporter state, mutated only from queued tasks
pub struct Reporter {
    remote: Remote,
    launch: LaunchConfig,
    collector: FailureArtifactCollector,
    table: CorrelationTable,
    results: watch::Sender<Option<LaunchFinished>>,
    fatal: Option<Error>,
    finished: Option<LaunchFinished>,
}

impl Reporter {
    /// Create a reporter from validated configuration
    ///
    /// A `screenshot_command` in the configuration becomes the capture
    /// capability; [`Reporter::with_capture`] overrides it.
    pub fn new(client: Arc<dyn ReportingClient>, config: &ReporterConfig) -> Self {
        let capture = if config.screenshot_on_fail {
            config
                .screenshot_command
                .as_deref()
                .and_then(CommandScreenCapture::from_command)
                .map(|c| Arc::new(c) as Arc<dyn ScreenCapture>)
        } else {
            None
        };
        let (results, _) = watch::channel(None);

        Self {
            remote: Remote::new(client),
            launch: config.launch.clone(),
            collector: FailureArtifactCollector::new(capture),
            table: CorrelationTable::new(),
            results,
            fatal: None,
            finished: None,
        }
    }

    /// Use `capture` for failure screenshots
    pub fn with_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.collector = FailureArtifactCollector::new(Some(capture));
        self
    }

    /// Use a custom failure artifact collector
    pub fn with_collector(mut self, collector: FailureArtifactCollector) -> Self {
        self.collector = collector;
        self
    }

    /// Whether reporting can proceed
    fn active(&self, what: &str) -> bool {
        if self.table.launch().is_some() {
            return true;
        }
        if self.fatal.is_none() {
            debug!(what, "no launch started; ignoring notification");
        }
        false
    }

    // ========================================================================
    // Launch
    // ========================================================================

    async fn on_run_started(&mut self) -> Result<LaunchId> {
        if let Some(launch) = self.table.launch() {
            return Ok(launch.id);
        }

        if let Some(id) = self.launch.id {
            info!(launch = %id, "reporting into existing launch");
            self.table.set_launch(LaunchEntry {
                id,
                status: ItemStatus::Passed,
                external: true,
            });
            return Ok(id);
        }

        let rq = StartLaunchRq {
            uuid: LaunchId::new(),
            name: self.launch.name.clone(),
            description: self.launch.description.clone(),
            attributes: self.launch.attributes.clone(),
            mode: self.launch.mode,
            rerun: self.launch.rerun,
            rerun_of: self.launch.rerun_of.clone(),
            start_time: Utc::now(),
        };
        match self.remote.client().start_launch(&rq).await {
            Ok(()) => {
                info!(launch = %rq.uuid, name = %rq.name, "launch started");
                self.table.set_launch(LaunchEntry {
                    id: rq.uuid,
                    status: ItemStatus::Passed,
                    external: false,
                });
                Ok(rq.uuid)
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "failed to start launch");
                self.fatal = Some(Error::LaunchStart(message.clone()));
                Err(Error::LaunchStart(message))
            }
        }
    }

    async fn on_run_finished(&mut self) {
        if !self.active("run finished") {
            return;
        }
        let now = Utc::now();

        self.close_open_test(ItemStatus::interrupted(), now).await;
        for suite in self.table.drain_suites() {
            warn!(suite = %suite.title, "suite still open at end of run");
            let status = dangling_status(suite.status);
            self.remote
                .finish_item(&mut self.table, suite.id, Some(status), now)
                .await;
        }

        let Some(launch) = self.table.launch().cloned() else {
            return;
        };
        let open = self.table.open_items();
        if open > 0 {
            warn!(open, "items still open after run-end cleanup");
        }
        if launch.external {
            info!(launch = %launch.id, "launch is externally owned; leaving it open");
            return;
        }

        let rq = FinishLaunchRq {
            end_time: now,
            status: Some(launch.status.clone()),
        };
        match self.remote.client().finish_launch(&launch.id, &rq).await {
            Ok(finished) => {
                info!(
                    launch = %launch.id,
                    status = %launch.status,
                    link = finished.link.as_deref().unwrap_or("-"),
                    "launch finished"
                );
                self.finished = Some(finished.clone());
                self.results.send_replace(Some(finished));
            }
            Err(e) => swallow("finish launch", &launch.id.to_string(), e),
        }
    }

    // ========================================================================
    // Suites
    // ========================================================================

    async fn on_suite_started(&mut self, suite: Suite) {
        if !self.active("suite started") {
            return;
        }
        let parent = self.table.current_suite().map(|s| s.id);
        let item = NewItem::new(ItemKind::Suite, suite.title.clone(), parent)
            .with_attributes(suite.attributes());
        if let Some(id) = self.remote.start_item(&mut self.table, item).await {
            self.table.open_suite(SuiteEntry {
                title: suite.title,
                id,
                status: ItemStatus::Passed,
            });
        }
    }

    async fn on_suite_finished(&mut self, suite: Suite, at: Option<DateTime<Utc>>) {
        if !self.active("suite finished") {
            return;
        }
        let at = at.unwrap_or_else(Utc::now);
        self.close_open_test(ItemStatus::interrupted(), at).await;

        match self.table.close_suite(&suite.title) {
            Some(entry) => {
                self.remote
                    .finish_item(&mut self.table, entry.id, Some(entry.status), at)
                    .await;
            }
            None => debug!(suite = %suite.title, "finish for a suite that is not open"),
        }
    }

    // ========================================================================
    // Tests
    // ========================================================================

    async fn on_test_started(&mut self, test: Test) {
        if !self.active("test started") {
            return;
        }
        let now = Utc::now();
        self.close_open_test(ItemStatus::interrupted(), now).await;

        let title = test.display_title();
        let parent = self.table.current_suite().map(|s| s.id);
        let item = NewItem::new(ItemKind::Test, title.clone(), parent)
            .with_attributes(test.attributes())
            .with_retry(test.is_retry())
            .started_at(now);
        if let Some(id) = self.remote.start_item(&mut self.table, item).await {
            if test.is_retry() {
                debug!(test = %title, retry = test.retry_index, %id, "retry attempt started");
            }
            self.table.begin_test(TestEntry {
                title,
                id,
                retry_index: test.retry_index,
                status: None,
                failed_step: None,
            });
        }
    }

    async fn on_test_passed(&mut self, _test: Test) {
        if self.active("test passed") {
            rollup::test_passed(&mut self.table);
        }
    }

    async fn on_test_failed(&mut self, test: Test, failure: TestFailure) {
        if !self.active("test failed") {
            return;
        }
        rollup::test_failed(&mut self.table);

        let (failed_step, owner) = match self.table.test() {
            Some(entry) => (entry.failed_step, Some(entry.id)),
            None => {
                // Failure outside any test (e.g. a suite hook)
                debug!(test = %test.title, "failure reported with no open test");
                (None, self.table.current_suite().map(|s| s.id))
            }
        };
        self.collector
            .collect(&self.remote, &self.table, failed_step, owner, &failure)
            .await;
    }

    async fn on_test_finished(&mut self, test: Test, at: Option<DateTime<Utc>>) {
        if !self.active("test finished") {
            return;
        }
        if self.table.test().is_none() {
            debug!(test = %test.title, "finish for a test that is not open");
            return;
        }
        let at = at.unwrap_or_else(Utc::now);
        let status = self
            .table
            .test()
            .and_then(|t| t.status.clone())
            .or(test.status);
        if status.as_ref().is_some_and(ItemStatus::is_failed) {
            rollup::test_failed(&mut self.table);
        }
        self.close_open_test(ItemStatus::Passed, at).await;
    }

    /// Close the open step, meta-steps and test, innermost first
    ///
    /// `fallback` is the test status used when no pass/fail was reported.
    async fn close_open_test(&mut self, fallback: ItemStatus, at: DateTime<Utc>) {
        if self.table.test().is_none() {
            return;
        }
        if let Some(step) = self.table.end_step() {
            let status = step.status.unwrap_or_else(ItemStatus::interrupted);
            self.remote
                .finish_item(&mut self.table, step.id, Some(status), at)
                .await;
        }
        if fallback != ItemStatus::Passed {
            // Meta-steps with no observed outcome were cut short
            for meta in self.table.meta_steps_mut() {
                if meta.status.is_none() {
                    meta.status = Some(fallback.clone());
                }
            }
        }
        reconciler::reconcile(&self.remote, &mut self.table, Vec::new(), at).await;

        if let Some(test) = self.table.end_test() {
            let status = test.status.unwrap_or(fallback);
            self.remote
                .finish_item(&mut self.table, test.id, Some(status), at)
                .await;
        }
    }

    // ========================================================================
    // Steps
    // ========================================================================

    async fn on_step_started(&mut self, step: Step) {
        if !self.active("step started") {
            return;
        }
        if self.table.test().is_none() {
            debug!(step = %step.label(), "step outside of a test; not reported");
            return;
        }
        let at = step.started_at.unwrap_or_else(Utc::now);

        if let Some(previous) = self.table.end_step() {
            debug!(step = %previous.label, "previous step never finished");
            let status = previous.status.unwrap_or_else(ItemStatus::interrupted);
            self.remote
                .finish_item(&mut self.table, previous.id, Some(status), at)
                .await;
        }

        let Some(parent) =
            reconciler::reconcile(&self.remote, &mut self.table, stack_of(&step), at).await
        else {
            return;
        };

        let label = step.label();
        let item = NewItem::new(ItemKind::Step, label.clone(), Some(parent)).started_at(at);
        if let Some(id) = self.remote.start_item(&mut self.table, item).await {
            self.table.begin_step(StepEntry {
                id,
                label,
                status: None,
            });
        }
    }

    async fn on_step_passed(&mut self, _step: Step) {
        if self.active("step passed") {
            rollup::step_passed(&mut self.table);
        }
    }

    async fn on_step_failed(&mut self, _step: Step) {
        if self.active("step failed") {
            rollup::step_failed(&mut self.table);
        }
    }

    async fn on_step_finished(&mut self, step: Step, at: Option<DateTime<Utc>>) {
        if !self.active("step finished") {
            return;
        }
        let Some(entry) = self.table.end_step() else {
            debug!(step = %step.label(), "finish for a step that is not open");
            return;
        };
        let status = entry.status.or(step.status);
        self.remote
            .finish_item(&mut self.table, entry.id, status, at.unwrap_or_else(Utc::now))
            .await;
    }

    // ========================================================================
    // Ad hoc logging
    // ========================================================================

    async fn on_log(&mut self, level: LogLevel, message: String, file: Option<PathBuf>) {
        if !self.active("log") {
            return;
        }
        let attachment = match file {
            Some(path) => read_attachment(path).await,
            None => None,
        };
        let target = self.table.log_target();
        self.remote
            .send_log(&self.table, target, level, message, attachment)
            .await;
    }

    async fn on_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::RunStarted => {
                // Failure is recorded and surfaced from ReporterHandle::finish
                let _ = self.on_run_started().await;
            }
            HostEvent::SuiteStarted { suite } => self.on_suite_started(suite).await,
            HostEvent::TestStarted { test } => self.on_test_started(test).await,
            HostEvent::StepStarted { step } => self.on_step_started(step).await,
            HostEvent::StepPassed { step } => self.on_step_passed(step).await,
            HostEvent::StepFailed { step } => self.on_step_failed(step).await,
            HostEvent::StepFinished { step, at } => self.on_step_finished(step, at).await,
            HostEvent::TestPassed { test } => self.on_test_passed(test).await,
            HostEvent::TestFailed { test, failure } => self.on_test_failed(test, failure).await,
            HostEvent::TestFinished { test, at } => self.on_test_finished(test, at).await,
            HostEvent::SuiteFinished { suite, at } => self.on_suite_finished(suite, at).await,
            HostEvent::RunFinished => self.on_run_finished().await,
            HostEvent::Log {
                level,
                message,
                file,
            } => self.on_log(level, message, file).await,
        }
    }
}

/// Status for an item force-closed at the end of the run
fn dangling_status(status: ItemStatus) -> ItemStatus {
    if status.is_failed() {
        status
    } else {
        ItemStatus::interrupted()
    }
}

async fn read_attachment(path: PathBuf) -> Option<Attachment> {
    match tokio::fs::read(&path).await {
        Ok(content) => Some(Attachment {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string()),
            mime: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string(),
            content,
        }),
        Err(e) => {
            swallow("read attachment", &path.display().to_string(), e.into());
            None
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Host-facing side of a running reporter
pub struct ReporterHandle {
    queue: TaskQueueTx<Reporter>,
    worker: JoinHandle<Reporter>,
    results: watch::Receiver<Option<LaunchFinished>>,
}

impl ReporterHandle {
    /// Start the reporter's task queue
    pub fn spawn(reporter: Reporter) -> Self {
        let results = reporter.results.subscribe();
        let (queue, worker) = queue::spawn(reporter);
        Self {
            queue,
            worker,
            results,
        }
    }

    /// Start (or attach to) the launch and wait for the outcome
    ///
    /// An error here is fatal: the caller should stop the run.
    pub async fn run_started(&self) -> Result<LaunchId> {
        self.queue
            .call(|r: &mut Reporter| r.on_run_started().boxed())
            .await?
    }

    /// Id of the launch being reported into
    ///
    /// Waits for every notification queued before it.
    pub async fn launch_id(&self) -> Result<LaunchId> {
        self.queue
            .call(|r: &mut Reporter| {
                async move { r.table.launch_id().ok_or(Error::NoLaunch) }.boxed()
            })
            .await?
    }

    /// Queue a host notification
    pub fn notify(&self, event: HostEvent) -> Result<()> {
        self.queue
            .submit(move |r: &mut Reporter| r.on_event(event).boxed())
    }

    pub fn suite_started(&self, suite: Suite) -> Result<()> {
        self.notify(HostEvent::SuiteStarted { suite })
    }

    pub fn suite_finished(&self, suite: Suite) -> Result<()> {
        self.notify(HostEvent::SuiteFinished { suite, at: None })
    }

    pub fn test_started(&self, test: Test) -> Result<()> {
        self.notify(HostEvent::TestStarted { test })
    }

    pub fn test_passed(&self, test: Test) -> Result<()> {
        self.notify(HostEvent::TestPassed { test })
    }

    pub fn test_failed(&self, test: Test, failure: TestFailure) -> Result<()> {
        self.notify(HostEvent::TestFailed { test, failure })
    }

    pub fn test_finished(&self, test: Test) -> Result<()> {
        self.notify(HostEvent::TestFinished { test, at: None })
    }

    pub fn step_started(&self, step: Step) -> Result<()> {
        self.notify(HostEvent::StepStarted { step })
    }

    pub fn step_passed(&self, step: Step) -> Result<()> {
        self.notify(HostEvent::StepPassed { step })
    }

    pub fn step_failed(&self, step: Step) -> Result<()> {
        self.notify(HostEvent::StepFailed { step })
    }

    pub fn step_finished(&self, step: Step) -> Result<()> {
        self.notify(HostEvent::StepFinished { step, at: None })
    }

    /// Logger other collaborators can use to write to the open item
    pub fn logger(&self) -> CurrentItemLogger {
        CurrentItemLogger {
            queue: self.queue.clone(),
        }
    }

    /// Receives the launch summary once the launch is finished
    pub fn results(&self) -> watch::Receiver<Option<LaunchFinished>> {
        self.results.clone()
    }

    /// Finish the run: close everything, finish the launch, drain the queue
    pub async fn run_finished(self) -> Result<Option<LaunchFinished>> {
        self.notify(HostEvent::RunFinished)?;
        self.finish().await
    }

    /// Drain the queue and stop the worker
    ///
    /// Returns the launch-start failure if there was one.
    pub async fn finish(self) -> Result<Option<LaunchFinished>> {
        self.queue.close();
        let mut reporter = self.worker.await.map_err(|e| {
            error!(error = %e, "reporter worker stopped abnormally");
            Error::QueueClosed
        })?;
        match reporter.fatal.take() {
            Some(fatal) => Err(fatal),
            None => Ok(reporter.finished.take()),
        }
    }
}

/// Writes ad hoc log output against whatever item is currently open
#[derive(Clone)]
pub struct CurrentItemLogger {
    queue: TaskQueueTx<Reporter>,
}

impl CurrentItemLogger {
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        file: Option<PathBuf>,
    ) -> Result<()> {
        let message = message.into();
        self.queue
            .submit(move |r: &mut Reporter| r.on_log(level, message, file).boxed())
    }
}

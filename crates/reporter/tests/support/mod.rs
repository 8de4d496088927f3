//! Shared fixtures for reporter integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stepmirror_common::{
    Attachment, Attribute, Error, FinishItemRq, FinishLaunchRq, ItemId, ItemKind, ItemStatus,
    LaunchFinished, LaunchId, LogLevel, LogRq, ReporterConfig, ReportingClient, Result,
    StartItemRq, StartLaunchRq,
};
use stepmirror_reporter::{ReporterHandle, ScreenCapture, Step};

/// A call as seen by the reporting service
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartLaunch {
        id: LaunchId,
        name: String,
    },
    FinishLaunch {
        id: LaunchId,
        status: Option<ItemStatus>,
    },
    StartItem {
        id: ItemId,
        launch: LaunchId,
        parent: Option<ItemId>,
        kind: ItemKind,
        name: String,
        retry: bool,
        attributes: Vec<Attribute>,
    },
    FinishItem {
        id: ItemId,
        status: Option<ItemStatus>,
    },
    Log {
        item: Option<ItemId>,
        level: LogLevel,
        message: String,
        attachment: Option<(String, String)>,
    },
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    fail_launch_start: bool,
    fail_items: HashSet<String>,
    fail_finishes: HashSet<String>,
    fail_logs: bool,
    names: HashMap<ItemId, String>,
}

/// In-memory reporting service that records every call
#[derive(Default)]
pub struct RecordingClient {
    inner: Mutex<Inner>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the launch start
    pub fn failing_launch_start() -> Arc<Self> {
        let client = Self::default();
        client.inner.lock().fail_launch_start = true;
        Arc::new(client)
    }

    /// Reject starting any item with this name
    pub fn fail_item(&self, name: &str) {
        self.inner.lock().fail_items.insert(name.to_string());
    }

    /// Reject finishing any item with this name
    pub fn fail_finish(&self, name: &str) {
        self.inner.lock().fail_finishes.insert(name.to_string());
    }

    /// Reject every log entry
    pub fn fail_logs(&self) {
        self.inner.lock().fail_logs = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn logs(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Log { .. }))
            .collect()
    }

    /// Id of the first started item with this name
    pub fn item_id(&self, name: &str) -> Option<ItemId> {
        self.calls().into_iter().find_map(|c| match c {
            Call::StartItem { id, name: n, .. } if n == name => Some(id),
            _ => None,
        })
    }

    /// Calls rendered with names instead of ids
    pub fn trace(&self) -> Vec<String> {
        let mut names: HashMap<ItemId, String> = HashMap::new();
        let mut trace = Vec::new();
        for call in self.calls() {
            let line = match call {
                Call::StartLaunch { .. } => "start launch".to_string(),
                Call::FinishLaunch { status, .. } => {
                    format!("finish launch {}", status_text(&status))
                }
                Call::StartItem {
                    id,
                    parent,
                    kind,
                    name,
                    ..
                } => {
                    let line = match parent.and_then(|p| names.get(&p)) {
                        Some(parent) => format!("start {} {} < {}", kind, name, parent),
                        None => format!("start {} {}", kind, name),
                    };
                    names.insert(id, name);
                    line
                }
                Call::FinishItem { id, status } => {
                    let name = names.get(&id).cloned().unwrap_or_else(|| id.to_string());
                    format!("finish {} {}", name, status_text(&status))
                }
                Call::Log { item, message, .. } => {
                    let target = item
                        .and_then(|i| names.get(&i).cloned())
                        .unwrap_or_else(|| "launch".to_string());
                    format!("log {}: {}", target, message)
                }
            };
            trace.push(line);
        }
        trace
    }
}

fn status_text(status: &Option<ItemStatus>) -> &str {
    status.as_ref().map(|s| s.as_str()).unwrap_or("-")
}

fn rejected(operation: &str) -> Error {
    Error::Api {
        operation: operation.to_string(),
        status: 500,
        message: "unavailable".to_string(),
    }
}

#[async_trait]
impl ReportingClient for RecordingClient {
    async fn start_launch(&self, rq: &StartLaunchRq) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::StartLaunch {
            id: rq.uuid,
            name: rq.name.clone(),
        });
        if inner.fail_launch_start {
            return Err(rejected("start launch"));
        }
        Ok(())
    }

    async fn finish_launch(&self, id: &LaunchId, rq: &FinishLaunchRq) -> Result<LaunchFinished> {
        self.inner.lock().calls.push(Call::FinishLaunch {
            id: *id,
            status: rq.status.clone(),
        });
        Ok(LaunchFinished {
            id: id.to_string(),
            number: Some(1),
            link: Some(format!("http://rp.local/ui/#demo/launches/all/{}", id)),
        })
    }

    async fn start_item(&self, rq: &StartItemRq) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::StartItem {
            id: rq.uuid,
            launch: rq.launch_uuid,
            parent: rq.parent,
            kind: rq.kind,
            name: rq.name.clone(),
            retry: rq.retry,
            attributes: rq.attributes.clone(),
        });
        inner.names.insert(rq.uuid, rq.name.clone());
        if inner.fail_items.contains(&rq.name) {
            return Err(rejected("start item"));
        }
        Ok(())
    }

    async fn finish_item(&self, id: &ItemId, rq: &FinishItemRq) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::FinishItem {
            id: *id,
            status: rq.status.clone(),
        });
        let rejected_name = inner
            .names
            .get(id)
            .is_some_and(|name| inner.fail_finishes.contains(name));
        if rejected_name {
            return Err(rejected("finish item"));
        }
        Ok(())
    }

    async fn send_log(&self, rq: &LogRq, attachment: Option<&Attachment>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Log {
            item: rq.item_uuid,
            level: rq.level,
            message: rq.message.clone(),
            attachment: attachment.map(|a| (a.name.clone(), a.mime.clone())),
        });
        if inner.fail_logs {
            return Err(rejected("send log"));
        }
        Ok(())
    }
}

/// Capture that writes fixed bytes and counts invocations
#[derive(Default)]
pub struct FakeCapture {
    pub taken: AtomicUsize,
    pub broken: bool,
}

impl FakeCapture {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            taken: AtomicUsize::new(0),
            broken: true,
        })
    }

    pub fn taken(&self) -> usize {
        self.taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapture for FakeCapture {
    async fn save_screenshot(&self, path: &Path) -> Result<()> {
        self.taken.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(Error::Capture("no display".to_string()));
        }
        tokio::fs::write(path, b"\x89PNG").await?;
        Ok(())
    }
}

pub fn config() -> ReporterConfig {
    ReporterConfig {
        endpoint: "http://rp.local/api/v1".to_string(),
        token: "secret".to_string(),
        project: "demo".to_string(),
        screenshot_on_fail: false,
        ..Default::default()
    }
}

/// Start, pass and finish a step
pub fn pass_step(handle: &ReporterHandle, step: Step) {
    handle.step_started(step.clone()).unwrap();
    handle.step_passed(step.clone()).unwrap();
    handle.step_finished(step).unwrap();
}

/// Start, fail and finish a step
pub fn fail_step(handle: &ReporterHandle, step: Step) {
    handle.step_started(step.clone()).unwrap();
    handle.step_failed(step.clone()).unwrap();
    handle.step_finished(step).unwrap();
}

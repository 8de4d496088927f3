//! Guarded remote calls
//!
//! Wraps the [`ReportingClient`] so every call keeps the correlation table's
//! lifecycle in step and per-item failures are logged and dropped instead of
//! propagating into the run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use stepmirror_common::{
    Attachment, Attribute, Error, FinishItemRq, ItemId, ItemKind, ItemStatus, LogLevel, LogRq,
    ReportingClient, StartItemRq,
};
use tracing::debug;

use crate::state::CorrelationTable;

/// Item about to be started
#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: ItemKind,
    pub name: String,
    pub parent: Option<ItemId>,
    pub attributes: Vec<Attribute>,
    pub retry: bool,
    pub start_time: DateTime<Utc>,
}

impl NewItem {
    pub fn new(kind: ItemKind, name: impl Into<String>, parent: Option<ItemId>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent,
            attributes: Vec::new(),
            retry: false,
            start_time: Utc::now(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = at;
        self
    }
}

/// Reporting client plus the bookkeeping around it
#[derive(Clone)]
pub struct Remote {
    client: Arc<dyn ReportingClient>,
}

impl Remote {
    pub fn new(client: Arc<dyn ReportingClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &dyn ReportingClient {
        self.client.as_ref()
    }

    /// Start an item and return its id
    ///
    /// The id is assigned before the call goes out, so it is usable as a
    /// parent even if the call fails. `None` only when there is no launch.
    pub async fn start_item(&self, table: &mut CorrelationTable, item: NewItem) -> Option<ItemId> {
        let Some(launch) = table.launch_id() else {
            debug!(name = %item.name, "no launch; not starting item");
            return None;
        };

        let id = ItemId::new();
        table.record_start(id);
        debug!(%id, kind = %item.kind, name = %item.name, parent = ?item.parent, "start item");

        let rq = StartItemRq {
            uuid: id,
            launch_uuid: launch,
            parent: item.parent,
            name: item.name,
            kind: item.kind,
            start_time: item.start_time,
            description: None,
            attributes: item.attributes,
            retry: item.retry,
        };
        if let Err(e) = self.client.start_item(&rq).await {
            swallow("start item", &rq.name, e);
        }
        Some(id)
    }

    /// Finish an item unless it is unknown or already finished
    pub async fn finish_item(
        &self,
        table: &mut CorrelationTable,
        id: ItemId,
        status: Option<ItemStatus>,
        at: DateTime<Utc>,
    ) {
        let Some(launch) = table.launch_id() else {
            return;
        };
        if !table.record_finish(id) {
            return;
        }
        debug!(%id, status = ?status, "finish item");

        let rq = FinishItemRq {
            launch_uuid: launch,
            end_time: at,
            status,
        };
        if let Err(e) = self.client.finish_item(&id, &rq).await {
            swallow("finish item", &id.to_string(), e);
        }
    }

    /// Send a log entry to `item`, or to the launch when `item` is `None`
    pub async fn send_log(
        &self,
        table: &CorrelationTable,
        item: Option<ItemId>,
        level: LogLevel,
        message: String,
        attachment: Option<Attachment>,
    ) {
        let Some(launch) = table.launch_id() else {
            debug!("no launch; dropping log entry");
            return;
        };

        let rq = LogRq {
            launch_uuid: launch,
            item_uuid: item,
            time: Utc::now(),
            level,
            message,
            file: None,
        };
        if let Err(e) = self.client.send_log(&rq, attachment.as_ref()).await {
            let target = item.map(|i| i.to_string()).unwrap_or_else(|| launch.to_string());
            swallow("send log", &target, e);
        }
    }
}

/// Log a non-fatal reporting failure and carry on
pub fn swallow(operation: &str, target: &str, error: Error) {
    debug!(operation, target, %error, "reporting call failed; continuing");
}

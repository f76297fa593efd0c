//! Tagged worker events and event lifetime extension.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::warn;

use crate::fetch::FetchRequest;
use crate::interaction::{ClickOutcome, NotificationClick};
use crate::lifecycle::{ActivationReport, InstallOutcome};
use crate::messaging::{MessageEvent, MessageOutcome};
use crate::push::{Notification, PushMessage, PushReport};
use crate::sync::SyncReport;
use crate::worker::FetchReply;
use crate::Result;

/// Event delivered by the host platform.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchRequest),
    Push(PushMessage),
    NotificationClick(NotificationClick),
    NotificationClose(Notification),
    Message(MessageEvent),
    Sync(String),
}

/// Discriminant of [`WorkerEvent`], matching the host's event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    NotificationClose,
    Message,
    Sync,
}

impl EventKind {
    /// Host event type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::NotificationClose => "notificationclose",
            EventKind::Message => "message",
            EventKind::Sync => "sync",
        }
    }
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
            WorkerEvent::NotificationClose(_) => EventKind::NotificationClose,
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Sync(_) => EventKind::Sync,
        }
    }
}

/// Result of dispatching one event, one variant per event kind.
#[derive(Debug)]
pub enum EventResult {
    Install(Result<InstallOutcome>),
    Activate(Result<ActivationReport>),
    Fetch(FetchReply),
    Push(PushReport),
    NotificationClick(Result<ClickOutcome>),
    NotificationClose,
    Message(MessageOutcome),
    Sync(Result<SyncReport>),
}

/// Work that must finish before the host may terminate the worker.
///
/// Handlers await their own work; only tasks that deliberately outlive
/// the response (stale-while-revalidate refreshes) are parked here. The
/// host keeps the worker alive until [`Lifetime::settle`] returns.
/// Dropping a `Lifetime` aborts every task still parked in it.
#[must_use = "call `settle` or the parked tasks are aborted"]
#[derive(Debug, Default)]
pub struct Lifetime {
    tasks: JoinSet<()>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` and extend the event lifetime until it completes.
    pub fn wait_until<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tasks still outstanding.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every extension task. Returns how many finished cleanly.
    pub async fn settle(mut self) -> usize {
        let mut finished = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => finished += 1,
                Err(e) => warn!(error = %e, "Lifetime extension task failed"),
            }
        }
        finished
    }
}

//! Session actor: one control task that owns the [`Orchestrator`].
//!
//! UI commands arrive on an unbounded channel and are handled in order. The
//! pending scroll debounce is raced against incoming commands, so a newer
//! region simply replaces the deadline. A new `Open` or `Close` arriving while
//! a document is loading abandons that load.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::{Result, ViewerError};
use crate::fetch::DocumentSource;
use crate::orchestrator::{LoadState, Orchestrator};
use crate::protocol::SearchOptions;
use crate::types::{CellAddress, RenderContext, Viewport, VisualAttributes, WorksheetDescriptor};
use crate::viewport::MemoryState;

#[derive(Debug)]
enum Command {
    Open(String),
    SwitchSheet {
        position: usize,
        reply: oneshot::Sender<Result<bool>>,
    },
    VisibleRegion(Viewport),
    Search {
        query: String,
        options: SearchOptions,
        reply: oneshot::Sender<Vec<CellAddress>>,
    },
    ResolveCell {
        row: u32,
        col: u32,
        ctx: RenderContext,
        reply: oneshot::Sender<Option<VisualAttributes>>,
    },
    Worksheets(oneshot::Sender<Vec<WorksheetDescriptor>>),
    Retry,
    MemoryState(MemoryState),
    Close,
}

impl Command {
    /// Commands that abandon a load in progress.
    fn supersedes_load(&self) -> bool {
        matches!(self, Self::Open(_) | Self::Close)
    }
}

/// Cloneable front end to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LoadState>,
}

fn closed() -> ViewerError {
    ViewerError::WorkerUnavailable("session closed".to_string())
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| closed())
    }

    pub fn open(&self, document_id: impl Into<String>) -> Result<()> {
        self.send(Command::Open(document_id.into()))
    }

    pub fn scroll_to(&self, region: Viewport) -> Result<()> {
        self.send(Command::VisibleRegion(region))
    }

    pub fn retry(&self) -> Result<()> {
        self.send(Command::Retry)
    }

    pub fn set_memory_state(&self, memory: MemoryState) -> Result<()> {
        self.send(Command::MemoryState(memory))
    }

    pub fn close(&self) -> Result<()> {
        self.send(Command::Close)
    }

    pub async fn switch_sheet(&self, position: usize) -> Result<bool> {
        self.request(|reply| Command::SwitchSheet { position, reply })
            .await?
    }

    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<CellAddress>> {
        let query = query.to_string();
        self.request(|reply| Command::Search {
            query,
            options,
            reply,
        })
        .await
    }

    pub async fn resolve_cell(
        &self,
        row: u32,
        col: u32,
        ctx: RenderContext,
    ) -> Result<Option<VisualAttributes>> {
        self.request(|reply| Command::ResolveCell {
            row,
            col,
            ctx,
            reply,
        })
        .await
    }

    /// User-facing sheet list.
    pub async fn worksheets(&self) -> Result<Vec<WorksheetDescriptor>> {
        self.request(Command::Worksheets).await
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `pred`.
    pub async fn wait_for(&self, pred: impl FnMut(&LoadState) -> bool) -> Result<LoadState> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(pred).await.map_err(|_| closed())?;
        Ok(state.clone())
    }
}

/// Start the control task on the current tokio runtime.
pub fn spawn<S: DocumentSource>(orchestrator: Orchestrator<S>) -> (SessionHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        commands,
        state: orchestrator.subscribe(),
    };
    let task = tokio::spawn(run(orchestrator, rx));
    (handle, task)
}

async fn run<S: DocumentSource>(
    mut orchestrator: Orchestrator<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut deferred = VecDeque::new();
    loop {
        let command = match deferred.pop_front() {
            Some(command) => command,
            None => {
                let deadline = orchestrator.viewport_deadline();
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(command) => command,
                        None => Command::Close,
                    },
                    () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if let Err(err) = orchestrator.poll_viewport(Instant::now()).await {
                            tracing::debug!(error = %err, "Viewport load failed");
                        }
                        continue;
                    }
                }
            }
        };

        match command {
            Command::Open(document_id) => {
                let finished = {
                    let open = orchestrator.open(&document_id);
                    tokio::pin!(open);
                    loop {
                        tokio::select! {
                            result = &mut open => {
                                if let Err(err) = result {
                                    tracing::debug!(error = %err, document_id, "Open ended with error");
                                }
                                break true;
                            }
                            next = commands.recv() => {
                                let next = next.unwrap_or(Command::Close);
                                if next.supersedes_load() {
                                    deferred.push_front(next);
                                    break false;
                                }
                                deferred.push_back(next);
                            }
                        }
                    }
                };
                if !finished {
                    tracing::info!(document_id, "Load abandoned");
                    orchestrator.cancel_load();
                }
            }
            Command::SwitchSheet { position, reply } => {
                let _ = reply.send(orchestrator.switch_sheet(position).await);
            }
            Command::VisibleRegion(region) => {
                orchestrator.on_visible_region(region, Instant::now());
            }
            Command::Search {
                query,
                options,
                reply,
            } => {
                let _ = reply.send(orchestrator.search(&query, options).await);
            }
            Command::ResolveCell {
                row,
                col,
                ctx,
                reply,
            } => {
                let _ = reply.send(orchestrator.resolve_cell(row, col, &ctx));
            }
            Command::Worksheets(reply) => {
                let sheets = orchestrator.worksheets().into_iter().cloned().collect();
                let _ = reply.send(sheets);
            }
            Command::Retry => {
                if let Err(err) = orchestrator.retry().await {
                    tracing::debug!(error = %err, "Retry ended with error");
                }
            }
            Command::MemoryState(memory) => orchestrator.set_memory_state(memory),
            Command::Close => {
                orchestrator.teardown();
                tracing::debug!("Session closed");
                return;
            }
        }
    }
}

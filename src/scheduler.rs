//! Persistence scheduler.
//!
//! Mutations do not write the snapshot themselves; they send a persist
//! request here. The scheduler coalesces bursts of requests into a single
//! debounced snapshot write, runs at most one write at a time, and gives
//! `commit` a forced path whose completion means everything before it is on
//! disk.

use crate::error::{Result, StoreError};
use crate::store::StoreInner;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Outcome delivered to a waiting `commit` caller. Carries the failure as a
/// string because the underlying error chain is not `Clone`.
type FlushAck = std::result::Result<(), String>;

enum FlushRequest {
    /// A mutation happened; write a snapshot after the debounce window.
    Persist,
    /// Forced flush: write now, acknowledge once the covering write is done.
    Commit(Sender<FlushAck>),
    /// Final flush (if dirty) and thread exit.
    Shutdown,
}

/// Flusher state machine.
enum FlushState {
    /// Nothing to do; waiting for a request.
    Idle,
    /// Debounce timer armed; further persists coalesce into it.
    Scheduled { deadline: Instant },
    /// A snapshot write is (about to be) in flight.
    Writing,
}

/// Handle that feeds the flusher thread. Owned by the store; shutting it
/// down joins the thread after a final flush.
pub(crate) struct FlushScheduler {
    requests: Sender<FlushRequest>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawn the flusher thread for a store.
    pub(crate) fn spawn(inner: Arc<StoreInner>, debounce: Duration) -> Self {
        let (requests, receiver) = unbounded();
        let handle = std::thread::spawn(move || run(&inner, debounce, &receiver));
        Self {
            requests,
            handle: Some(handle),
        }
    }

    /// Request a debounced snapshot write.
    pub(crate) fn persist(&self) -> Result<()> {
        self.requests
            .send(FlushRequest::Persist)
            .map_err(|_| StoreError::Closed)
    }

    /// Force a snapshot write and block until every mutation issued before
    /// this call is durable.
    pub(crate) fn commit(&self) -> Result<()> {
        let (ack, done) = bounded(1);
        self.requests
            .send(FlushRequest::Commit(ack))
            .map_err(|_| StoreError::Closed)?;
        match done.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(StoreError::Flush(message)),
            Err(_) => Err(StoreError::Closed),
        }
    }

    /// Flush remaining state and join the flusher thread.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.requests.send(FlushRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(inner: &StoreInner, debounce: Duration, requests: &Receiver<FlushRequest>) {
    let mut state = FlushState::Idle;
    // Table version covered by the last successful snapshot. The store seeds
    // its version with the number of replayed log records, so a freshly
    // recovered table counts as dirty until the first write folds it in.
    let mut flushed_version = 0u64;
    let mut waiting: Vec<Sender<FlushAck>> = Vec::new();
    let mut shutdown = false;

    loop {
        state = match state {
            FlushState::Idle => match requests.recv() {
                Ok(FlushRequest::Persist) => FlushState::Scheduled {
                    deadline: Instant::now() + debounce,
                },
                Ok(FlushRequest::Commit(ack)) => {
                    waiting.push(ack);
                    FlushState::Writing
                }
                Ok(FlushRequest::Shutdown) | Err(_) => {
                    shutdown = true;
                    FlushState::Writing
                }
            },

            FlushState::Scheduled { deadline } => match requests.recv_deadline(deadline) {
                // Coalesced: the timer is not re-armed.
                Ok(FlushRequest::Persist) => FlushState::Scheduled { deadline },
                // A forced flush cancels the timer.
                Ok(FlushRequest::Commit(ack)) => {
                    waiting.push(ack);
                    FlushState::Writing
                }
                Ok(FlushRequest::Shutdown) => {
                    shutdown = true;
                    FlushState::Writing
                }
                // Timer fired (or all senders vanished).
                Err(_) => FlushState::Writing,
            },

            FlushState::Writing => {
                // Acknowledge only the callers whose requests this write
                // covers; commits arriving during the write wait for the
                // next one.
                let ready: Vec<_> = waiting.drain(..).collect();

                let outcome = if inner.version() == flushed_version {
                    // Nothing changed since the last snapshot.
                    Ok(())
                } else {
                    match inner.flush() {
                        Ok(version) => {
                            flushed_version = version;
                            Ok(())
                        }
                        Err(err) => {
                            warn!("snapshot write failed: {}", err);
                            Err(err.to_string())
                        }
                    }
                };
                for ack in ready {
                    let _ = ack.send(outcome.clone());
                }

                // Requests that arrived while writing repeat the write loop
                // instead of dropping back to idle.
                let mut pending = false;
                while let Ok(request) = requests.try_recv() {
                    match request {
                        FlushRequest::Persist => pending = true,
                        FlushRequest::Commit(ack) => {
                            waiting.push(ack);
                            pending = true;
                        }
                        FlushRequest::Shutdown => shutdown = true,
                    }
                }

                if pending {
                    FlushState::Writing
                } else if shutdown {
                    break;
                } else {
                    FlushState::Idle
                }
            }
        };
    }
}

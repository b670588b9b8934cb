// Agora Store - Single-writer coordination store
//
// All mutations funnel through one writer task that applies reducers
// serially: callers enqueue a request on a bounded channel and await the
// commit outcome on a oneshot reply. Readers share a snapshot behind an
// RwLock that the writer swaps at commit. User-authority requests travel
// on a separate unbounded channel the writer drains first, which is what
// lets an emergency halt overtake queued writes.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock, RwLockReadGuard};

use agora_core::{AgoraError, AgoraResult, EventRecord, USER_AUTHORITY};

use crate::audit_log::AuditLog;
use crate::persist::SnapshotFile;
use crate::reducer::{self, OverrideAction, Reducer, ReducerRequest};
use crate::state::StoreState;

/// Broadcast capacity for commit notices
const COMMIT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a committed (or idempotently replayed) reducer
#[derive(Debug, Clone)]
pub struct Committed {
    pub commit_sequence: u64,
    pub result: serde_json::Value,

    /// True when an idempotency key matched and nothing new was written
    pub replayed: bool,
}

/// Notification sent to the fabric and coordinator after each commit
#[derive(Debug, Clone)]
pub struct CommitNotice {
    pub commit_sequence: u64,

    /// Events emitted by the committed reducer
    pub events: Vec<EventRecord>,

    /// True when this commit engaged the emergency halt; the fabric
    /// flushes non-priority-5 queues on seeing it
    pub halt: bool,
}

struct WriterMsg {
    req: ReducerRequest,
    reply: oneshot::Sender<AgoraResult<Committed>>,
}

/// Handle to the coordination store; cheap to clone
#[derive(Clone)]
pub struct CoordinationStore {
    normal_tx: mpsc::Sender<WriterMsg>,
    urgent_tx: mpsc::UnboundedSender<WriterMsg>,
    state: Arc<RwLock<StoreState>>,
    commits: broadcast::Sender<CommitNotice>,
    audit: Arc<AuditLog>,
}

impl CoordinationStore {
    /// Open (or create) a store and spawn its writer task.
    pub async fn open(
        snapshot_path: impl Into<std::path::PathBuf>,
        audit_path: impl Into<std::path::PathBuf>,
        reducer_queue_depth: usize,
    ) -> AgoraResult<Self> {
        let snapshot = SnapshotFile::new(snapshot_path);
        let initial = snapshot.load().await?.unwrap_or_default();
        tracing::info!(
            commit_sequence = initial.commit_sequence,
            agents = initial.agents.len(),
            "coordination store opened"
        );

        let audit = Arc::new(AuditLog::open(audit_path.into())?);
        let state = Arc::new(RwLock::new(initial));
        let (normal_tx, normal_rx) = mpsc::channel(reducer_queue_depth);
        let (urgent_tx, urgent_rx) = mpsc::unbounded_channel();
        let (commits, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);

        let writer = Writer {
            state: state.clone(),
            snapshot,
            audit: audit.clone(),
            commits: commits.clone(),
        };
        tokio::spawn(writer.run(normal_rx, urgent_rx));

        Ok(Self {
            normal_tx,
            urgent_tx,
            state,
            commits,
            audit,
        })
    }

    /// Submit a reducer and await its commit.
    ///
    /// A full writer queue surfaces `Overloaded` immediately; clients are
    /// expected to retry with backoff.
    pub async fn submit(&self, req: ReducerRequest) -> AgoraResult<Committed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = WriterMsg {
            req,
            reply: reply_tx,
        };

        if msg.req.authority == USER_AUTHORITY {
            // User requests bypass the bounded queue so a halt can never
            // be wedged behind ordinary writes.
            self.urgent_tx
                .send(msg)
                .map_err(|_| AgoraError::internal("store writer stopped"))?;
        } else {
            self.normal_tx.try_send(msg).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    AgoraError::overloaded("reducer queue is full")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AgoraError::internal("store writer stopped")
                }
            })?;
        }

        reply_rx
            .await
            .map_err(|_| AgoraError::internal("store writer dropped the reply"))?
    }

    /// Read access to the current committed state
    pub async fn state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().await
    }

    /// Subscribe to commit notices (events as they are committed)
    pub fn subscribe_commits(&self) -> broadcast::Receiver<CommitNotice> {
        self.commits.subscribe()
    }

    /// The append-only audit log
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Whether the emergency halt is in force
    pub async fn is_halted(&self) -> bool {
        self.state.read().await.halted
    }
}

/// The single writer; owns reducer application and persistence
struct Writer {
    state: Arc<RwLock<StoreState>>,
    snapshot: SnapshotFile,
    audit: Arc<AuditLog>,
    commits: broadcast::Sender<CommitNotice>,
}

impl Writer {
    async fn run(
        self,
        mut normal_rx: mpsc::Receiver<WriterMsg>,
        mut urgent_rx: mpsc::UnboundedReceiver<WriterMsg>,
    ) {
        loop {
            tokio::select! {
                biased;
                msg = urgent_rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                msg = normal_rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }
        tracing::debug!("store writer stopped");
    }

    async fn handle(&self, msg: WriterMsg) {
        let outcome = self.commit(msg.req).await;
        // A dropped reply just means the caller gave up (deadline).
        let _ = msg.reply.send(outcome);
    }

    async fn commit(&self, req: ReducerRequest) -> AgoraResult<Committed> {
        // Reducers queued before a halt but committing after it are
        // rejected too; nothing below user authority commits while halted.
        let mut working = {
            let guard = self.state.read().await;
            if guard.halted && req.authority < USER_AUTHORITY {
                return Err(AgoraError::halted(format!(
                    "reducer '{}' rejected while the emergency halt is in force",
                    req.reducer.name()
                )));
            }
            guard.clone()
        };

        let halt = matches!(
            req.reducer,
            Reducer::UserOverride {
                action: OverrideAction::EmergencyHalt,
                ..
            }
        );

        let outcome = reducer::apply(&mut working, &req, chrono::Utc::now())?;

        if outcome.replayed {
            return Ok(Committed {
                commit_sequence: outcome.commit_sequence,
                result: outcome.result,
                replayed: true,
            });
        }

        // Durable before visible: the snapshot write happens before the
        // shared state swap.
        self.snapshot.save(&working).await?;
        {
            let mut guard = self.state.write().await;
            *guard = working;
        }

        for record in &outcome.audits {
            if let Err(e) = self.audit.append(record.clone()) {
                tracing::error!(error = %e, "failed to append audit record");
            }
        }

        let _ = self.commits.send(CommitNotice {
            commit_sequence: outcome.commit_sequence,
            events: outcome.events,
            halt,
        });

        Ok(Committed {
            commit_sequence: outcome.commit_sequence,
            result: outcome.result,
            replayed: false,
        })
    }
}

//! Sharded track fusion front.
//!
//! [`FusionHandle`] is a set of senders to shard tasks, so it is cheap to
//! clone. Each shard owns one [`Tracker`] and handles commands in order, so
//! all updates for an address are applied by a single writer. Dropping the
//! last handle closes the channels and the shard tasks exit.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::{ReceiverConfig, TrackingConfig};
use crate::message::DecodedMessage;
use crate::tracker::{AircraftSnapshot, Tracker};
use crate::types::Address;

/// Commands queued per shard before `submit` waits.
pub const SHARD_QUEUE_SIZE: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FusionError {
    #[error("fusion shard {0} has shut down")]
    ShardClosed(usize),
    #[error("fusion shard {0} dropped the reply")]
    NoReply(usize),
    #[error("shard count must be at least 1")]
    NoShards,
}

#[derive(Debug)]
enum Command {
    Update(Box<DecodedMessage>),
    Snapshot {
        now: f64,
        reply: oneshot::Sender<Vec<AircraftSnapshot>>,
    },
    RemoveInactive {
        now: f64,
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the running fusion shards.
#[derive(Clone, Debug)]
pub struct FusionHandle {
    shards: Vec<mpsc::Sender<Command>>,
}

impl FusionHandle {
    /// Spawn `shards` tracker tasks on the current tokio runtime.
    pub fn spawn(
        shards: usize,
        tracking: TrackingConfig,
        receiver: ReceiverConfig,
    ) -> Result<Self, FusionError> {
        if shards == 0 {
            return Err(FusionError::NoShards);
        }

        let senders = (0..shards)
            .map(|index| {
                let (sender, receiver_rx) = mpsc::channel(SHARD_QUEUE_SIZE);
                let shard = Shard {
                    index,
                    tracker: Tracker::new(tracking.clone(), receiver.clone()),
                    commands: receiver_rx,
                };
                tokio::spawn(shard.run());
                sender
            })
            .collect();

        info!(shards, "fusion shards started");
        Ok(FusionHandle { shards: senders })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `address`.
    pub fn shard_for(&self, address: &Address) -> usize {
        address.value() as usize % self.shards.len()
    }

    /// Queue a message for its address's shard.
    pub async fn submit(&self, msg: DecodedMessage) -> Result<(), FusionError> {
        let index = self.shard_for(&msg.address);
        self.shards[index]
            .send(Command::Update(Box::new(msg)))
            .await
            .map_err(|_| FusionError::ShardClosed(index))
    }

    /// Snapshots from every shard, sorted by address. Each shard answers after
    /// all messages queued before the request.
    pub async fn snapshot(&self, now: f64) -> Result<Vec<AircraftSnapshot>, FusionError> {
        let replies = self.ask_all(|reply| Command::Snapshot { now, reply }).await?;
        let mut out: Vec<_> = replies.into_iter().flatten().collect();
        out.sort_by(|a, b| a.hex.cmp(&b.hex));
        Ok(out)
    }

    /// Drop tracks not heard from within the expiry window. Returns the number
    /// removed across all shards.
    pub async fn remove_inactive(&self, now: f64) -> Result<usize, FusionError> {
        let removed = self
            .ask_all(|reply| Command::RemoveInactive { now, reply })
            .await?;
        Ok(removed.into_iter().sum())
    }

    /// Send a request to every shard, then collect the replies in shard order.
    async fn ask_all<T>(
        &self,
        request: impl Fn(oneshot::Sender<T>) -> Command,
    ) -> Result<Vec<T>, FusionError> {
        let mut pending = Vec::with_capacity(self.shards.len());
        for (index, shard) in self.shards.iter().enumerate() {
            let (reply, response) = oneshot::channel();
            shard
                .send(request(reply))
                .await
                .map_err(|_| FusionError::ShardClosed(index))?;
            pending.push((index, response));
        }

        let mut out = Vec::with_capacity(pending.len());
        for (index, response) in pending {
            out.push(response.await.map_err(|_| FusionError::NoReply(index))?);
        }
        Ok(out)
    }
}

struct Shard {
    index: usize,
    tracker: Tracker,
    commands: mpsc::Receiver<Command>,
}

impl Shard {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Update(msg) => {
                    self.tracker.update(&msg);
                }
                Command::Snapshot { now, reply } => {
                    // Requester may have gone away
                    let _ = reply.send(self.tracker.snapshot(now));
                }
                Command::RemoveInactive { now, reply } => {
                    let removed = self.tracker.remove_inactive(now);
                    if removed > 0 {
                        debug!(shard = self.index, removed, "removed inactive tracks");
                    }
                    let _ = reply.send(removed);
                }
            }
        }
        debug!(shard = self.index, tracks = self.tracker.len(), "fusion shard stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

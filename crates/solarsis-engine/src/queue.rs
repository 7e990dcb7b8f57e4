//! On-demand FIFO, periodic schedule and replay history.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::callbacks::Reply;
use crate::error::{EngineError, Result};

/// Completion side of a [`PendingResponse`](crate::engine::PendingResponse).
pub type Responder = oneshot::Sender<Reply>;

/// One schedulable exchange.
#[derive(Debug)]
pub struct QueueCommand {
    /// Canonical `family/command` path.
    pub name: String,
    /// Config block override used for framing and parsing.
    pub config: Option<String>,
    /// Frame bursts, written in order.
    pub chunks: Vec<Bytes>,
    pub created: Instant,
    pub last_sent: Instant,
    /// Post-receive callback name.
    pub callback: Option<String>,
    pub received: bool,
    pub attempts: u32,
    /// Repeat cap for periodic commands; 0 is unlimited.
    pub max_attempts: u32,
    /// Period; zero for on-demand commands.
    pub interval: Duration,
    pub responder: Option<Responder>,
}

impl QueueCommand {
    /// An on-demand command created at `now`.
    pub fn new(name: impl Into<String>, chunks: Vec<Bytes>, now: Instant) -> Self {
        Self {
            name: name.into(),
            config: None,
            chunks,
            created: now,
            last_sent: now,
            callback: None,
            received: false,
            attempts: 0,
            max_attempts: 0,
            interval: Duration::ZERO,
            responder: None,
        }
    }

    /// Copy without the responder.
    pub fn detached(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            chunks: self.chunks.clone(),
            created: self.created,
            last_sent: self.last_sent,
            callback: self.callback.clone(),
            received: self.received,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            interval: self.interval,
            responder: None,
        }
    }

    /// Whether a periodic command has used up its repeat cap.
    pub fn exhausted(&self) -> bool {
        self.max_attempts > 0 && self.attempts >= self.max_attempts
    }

    fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.interval
    }

    fn due_at(&self) -> Option<Instant> {
        self.last_sent.checked_add(self.interval)
    }

    fn stamp(&mut self, now: Instant) {
        self.last_sent = now;
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Bounded on-demand FIFO plus the periodic schedule.
#[derive(Debug)]
pub struct CommandQueue {
    on_demand: VecDeque<QueueCommand>,
    periodic: Vec<QueueCommand>,
    history: HashMap<String, QueueCommand>,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue holding at most `capacity` on-demand commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            on_demand: VecDeque::new(),
            periodic: Vec::new(),
            history: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an on-demand command.
    pub fn push(&mut self, command: QueueCommand) -> Result<()> {
        if self.on_demand.len() >= self.capacity {
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.on_demand.push_back(command);
        Ok(())
    }

    /// Add a periodic command.
    pub fn push_periodic(&mut self, command: QueueCommand) {
        self.periodic.push(command);
    }

    /// Take the next command to transmit and stamp it as sent at `now`.
    ///
    /// On-demand commands always win. Otherwise the periodic entry that fell
    /// due earliest is served, ties going to declaration order; due entries
    /// that reached their repeat cap are dropped on the way. Periodic entries
    /// stay scheduled and a detached copy is returned.
    pub fn next_ready(&mut self, now: Instant) -> Option<QueueCommand> {
        if let Some(mut command) = self.on_demand.pop_front() {
            command.stamp(now);
            self.history.insert(command.name.clone(), command.detached());
            return Some(command);
        }

        self.periodic.retain(|entry| {
            if entry.due(now) && entry.exhausted() {
                tracing::info!(
                    command = %entry.name,
                    attempts = entry.attempts,
                    "periodic command reached its repeat cap"
                );
                return false;
            }
            true
        });

        let entry = self
            .periodic
            .iter_mut()
            .filter(|entry| entry.due(now))
            .min_by_key(|entry| entry.due_at())?;
        entry.stamp(now);
        Some(entry.detached())
    }

    /// Copy of the last dispatched on-demand command named `name`, reset for
    /// another send.
    pub fn resurrect(&self, name: &str) -> Option<QueueCommand> {
        self.history.get(name).map(|command| {
            let mut command = command.detached();
            command.received = false;
            command.attempts = 0;
            command
        })
    }

    /// Drop every queued on-demand command; returns how many were dropped.
    pub fn clear_on_demand(&mut self) -> usize {
        let dropped = self.on_demand.len();
        self.on_demand.clear();
        dropped
    }

    pub fn on_demand_len(&self) -> usize {
        self.on_demand.len()
    }

    pub fn periodic_len(&self) -> usize {
        self.periodic.len()
    }

    /// Total scheduled commands, on-demand and periodic.
    pub fn len(&self) -> usize {
        self.on_demand.len() + self.periodic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Names of the periodic entries, in schedule order.
    pub fn periodic_names(&self) -> Vec<&str> {
        self.periodic.iter().map(|c| c.name.as_str()).collect()
    }
}

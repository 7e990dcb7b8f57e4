//! The transaction state machine.
//!
//! [`Engine`] is sans-IO: the driver asks it what to do with [`Engine::poll`],
//! performs the I/O and reports back. All queue, cache and in-flight state
//! lives here so that a tick and an arriving reply are always serialized by
//! the single lock the driver wraps around it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use solarsis_schema::{parse_response, Params, ProtocolSchema};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cache::ResultCache;
use crate::callbacks::{Callbacks, FollowUps, Reply};
use crate::error::{EngineError, Result};
use crate::metrics::{metric_line, MetricsSink, TracingSink};
use crate::queue::{CommandQueue, QueueCommand, Responder};
use crate::session::{IntervalCommand, SessionConfig};

/// A request to send a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    /// Quick-command name or `family/command` path.
    pub target: String,
    pub params: Option<Params>,
    /// Config block override.
    pub config: Option<String>,
    /// Post-receive callback; wins over every default.
    pub callback: Option<String>,
}

impl Submission {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }
}

/// Deferred reply of a submitted command.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Reply>,
}

impl PendingResponse {
    pub(crate) fn channel() -> (Responder, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the reply.
    ///
    /// Resolves to [`EngineError::Abandoned`] if the command times out or is
    /// purged by a link restart.
    pub async fn wait(self) -> Result<Reply> {
        self.rx.await.map_err(|_| EngineError::Abandoned)
    }

    /// Wait for the reply, giving up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(EngineError::Abandoned),
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Non-blocking check; `Ok(None)` while the exchange is still pending.
    pub fn try_take(&mut self) -> Result<Option<Reply>> {
        match self.rx.try_recv() {
            Ok(reply) => Ok(Some(reply)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(EngineError::Abandoned),
        }
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write the bursts in order, flushing after each.
    Transmit { name: String, chunks: Vec<Bytes> },
    /// Close the link and open it again, then call
    /// [`Engine::restart_complete`].
    Restart,
}

/// The command currently awaiting its reply.
#[derive(Debug)]
pub struct InFlight {
    pub command: QueueCommand,
    pub sent_at: Instant,
}

/// Transaction state.
#[derive(Debug, Default)]
pub enum Phase {
    #[default]
    Idle,
    Awaiting(InFlight),
    Restarting,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Awaiting(_) => "awaiting",
            Phase::Restarting => "restarting",
        }
    }
}

/// Exchange counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub sent: u64,
    pub received: u64,
    pub discarded: u64,
    pub restarts: u64,
    pub link_opens: u64,
}

/// Scheduler, queue, cache and in-flight slot for one link.
pub struct Engine<S> {
    schema: Arc<ProtocolSchema>,
    session: SessionConfig,
    state: S,
    callbacks: Callbacks<S>,
    sink: Box<dyn MetricsSink>,
    queue: CommandQueue,
    cache: ResultCache,
    phase: Phase,
    link_open: bool,
    initialized: bool,
    stats: EngineStats,
}

impl<S> Engine<S> {
    /// Create an engine after checking the session against the schema.
    pub fn new(schema: Arc<ProtocolSchema>, session: SessionConfig, state: S) -> Result<Self> {
        session.validate()?;
        session.check_against(&schema)?;
        let queue = CommandQueue::new(session.max_queued_commands);
        Ok(Self {
            schema,
            session,
            state,
            callbacks: Callbacks::new(),
            sink: Box::new(TracingSink),
            queue,
            cache: ResultCache::new(),
            phase: Phase::Idle,
            link_open: false,
            initialized: false,
            stats: EngineStats::default(),
        })
    }

    /// Replace the hook registry.
    pub fn with_callbacks(mut self, callbacks: Callbacks<S>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replace the metrics sink.
    pub fn with_metrics_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks<S> {
        &mut self.callbacks
    }

    pub fn schema(&self) -> &Arc<ProtocolSchema> {
        &self.schema
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn is_link_open(&self) -> bool {
        self.link_open
    }

    /// Path of the command awaiting its reply, if any.
    pub fn in_flight(&self) -> Option<&str> {
        match &self.phase {
            Phase::Awaiting(in_flight) => Some(in_flight.command.name.as_str()),
            _ => None,
        }
    }

    /// Queue a command without waiting for its reply.
    pub fn submit(&mut self, submission: Submission, now: Instant) -> Result<()> {
        self.enqueue(submission, None, now)
    }

    /// Queue a command and get a handle to its reply.
    pub fn request(&mut self, submission: Submission, now: Instant) -> Result<PendingResponse> {
        let (responder, pending) = PendingResponse::channel();
        self.enqueue(submission, Some(responder), now)?;
        Ok(pending)
    }

    /// Queue the last dispatched command named `name` again.
    pub fn replay(&mut self, name: &str) -> Result<()> {
        let command = self
            .queue
            .resurrect(name)
            .ok_or_else(|| solarsis_schema::SchemaError::UnknownCommand(name.to_string()))?;
        tracing::info!(command = %command.name, "replaying command");
        self.queue.push(command)
    }

    fn enqueue(&mut self, submission: Submission, responder: Option<Responder>, now: Instant) -> Result<()> {
        let Submission {
            target,
            params,
            config,
            callback,
        } = submission;

        let quick = self.session.quick_commands.get(&target).cloned();
        let (path, config, callback, params, defaults) = match quick {
            Some(quick) => {
                let params = match quick.before.as_deref() {
                    Some(hook_name) => {
                        let hook = self
                            .callbacks
                            .pre_send_mut(hook_name)
                            .ok_or_else(|| EngineError::UnknownCallback(hook_name.to_string()))?;
                        let input = params
                            .or_else(|| quick.default_value.clone())
                            .unwrap_or_default();
                        Some(hook(&mut self.state, input))
                    }
                    None => params,
                };
                (
                    quick.command,
                    config.or(quick.config),
                    callback.or(quick.callback),
                    params,
                    quick.default_value,
                )
            }
            None => (target, config, callback, params, None),
        };

        let built = self
            .schema
            .build(&path, params.as_ref(), defaults.as_ref(), config.as_deref())?;

        let mut command = QueueCommand::new(built.path.clone(), built.chunks(), now);
        command.config = config;
        command.callback = callback.or(built.callback);
        command.responder = responder;
        self.queue.push(command)?;

        tracing::info!(
            command = %built.path,
            frame = %built.frame.escaped(),
            queued = self.queue.on_demand_len(),
            "command queued"
        );
        Ok(())
    }

    /// The link is open. The first time, periodic commands are registered
    /// and the run-once list is queued.
    ///
    /// A failing entry is logged and skipped so the rest still go in; the
    /// first failure is returned once every entry has been tried.
    pub fn link_opened(&mut self, now: Instant) -> Result<()> {
        self.link_open = true;
        self.stats.link_opens += 1;
        if self.initialized {
            return Ok(());
        }

        let mut first_err = None;
        for entry in self.session.interval_commands.clone() {
            let command = entry.command.clone();
            if let Err(err) = self.register_periodic(entry, now) {
                tracing::warn!(command = %command, error = %err, "periodic command not registered");
                first_err.get_or_insert(err);
            }
        }
        for name in self.session.on_init.run_commands.clone() {
            if let Err(err) = self.submit(Submission::new(name.clone()), now) {
                tracing::warn!(command = %name, error = %err, "init command not queued");
                first_err.get_or_insert(err);
            }
        }

        self.initialized = true;
        first_err.map_or(Ok(()), Err)
    }

    fn register_periodic(&mut self, entry: IntervalCommand, now: Instant) -> Result<()> {
        let built = self
            .schema
            .build(&entry.command, None, None, entry.config.as_deref())?;
        let mut command = QueueCommand::new(built.path.clone(), built.chunks(), now);
        command.config = entry.config;
        command.callback = entry.callback.or(built.callback);
        command.interval = Duration::from_millis(entry.interval);
        command.max_attempts = entry.max;
        tracing::info!(
            command = %built.path,
            interval_ms = entry.interval,
            max = entry.max,
            "periodic command registered"
        );
        self.queue.push_periodic(command);
        Ok(())
    }

    /// The link closed underneath us (read error, EOF).
    pub fn link_closed(&mut self) {
        if self.link_open {
            tracing::warn!("link closed");
        }
        self.link_open = false;
    }

    /// Decide the next action at scheduler tick `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Action> {
        match &self.phase {
            Phase::Restarting => None,
            Phase::Awaiting(in_flight) => {
                let elapsed = now.saturating_duration_since(in_flight.sent_at);
                if elapsed > self.session.restart_threshold() {
                    self.begin_restart(elapsed);
                    Some(Action::Restart)
                } else {
                    None
                }
            }
            Phase::Idle if !self.link_open => None,
            Phase::Idle => {
                let command = self.queue.next_ready(now)?;
                let action = Action::Transmit {
                    name: command.name.clone(),
                    chunks: command.chunks.clone(),
                };
                tracing::info!(
                    command = %command.name,
                    attempt = command.attempts,
                    bursts = command.chunks.len(),
                    "sending command"
                );
                self.stats.sent += 1;
                self.phase = Phase::Awaiting(InFlight {
                    command,
                    sent_at: now,
                });
                Some(action)
            }
        }
    }

    fn begin_restart(&mut self, elapsed: Duration) {
        let previous = std::mem::replace(&mut self.phase, Phase::Restarting);
        let name = match &previous {
            Phase::Awaiting(in_flight) => in_flight.command.name.clone(),
            _ => String::new(),
        };
        tracing::error!(
            command = %name,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = self.session.restart_threshold_ms,
            "reply threshold reached, restarting link"
        );
        // Dropping the in-flight command drops its responder.
        drop(previous);

        if self.session.clear_queue_on_restart {
            let dropped = self.queue.clear_on_demand();
            tracing::warn!(dropped, "cleared on-demand queue on restart");
        }
        self.link_open = false;
        self.stats.restarts += 1;
    }

    /// The driver finished closing and reopening the link.
    pub fn restart_complete(&mut self, reopened: bool) {
        self.phase = Phase::Idle;
        self.link_open = reopened;
        if reopened {
            self.stats.link_opens += 1;
            tracing::info!("link reopened");
        } else {
            tracing::warn!("link reopen failed, retrying on next tick");
        }
    }

    /// Handle one complete reply line.
    pub fn on_line(&mut self, line: &[u8], now: Instant) {
        let in_flight = match std::mem::take(&mut self.phase) {
            Phase::Awaiting(in_flight) => in_flight,
            other => {
                tracing::warn!(
                    phase = other.name(),
                    bytes = line.len(),
                    data = %line.escape_ascii(),
                    "discarding unsolicited data"
                );
                self.phase = other;
                self.stats.discarded += 1;
                return;
            }
        };

        let mut command = in_flight.command;
        command.received = true;
        self.stats.received += 1;
        let elapsed_ms = now.saturating_duration_since(in_flight.sent_at).as_millis() as u64;

        let resolved = self.schema.resolve(&command.name, command.config.as_deref());
        let (definition, config) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(command = %command.name, error = %err, "reply for unresolvable command");
                return;
            }
        };

        let parsed = parse_response(line, definition, config);
        let reply = Reply::new(command.name.clone(), parsed);
        let wants_metrics = definition.metrics;
        let wants_cache = definition.cache;
        tracing::info!(
            command = %reply.command,
            elapsed_ms,
            fields = reply.fields.len(),
            "reply received"
        );

        if let Some(responder) = command.responder.take() {
            // The waiter may have gone away; that is not an error here.
            let _ = responder.send(reply.clone());
        }

        if wants_metrics {
            let line = metric_line(&self.session.metrics_prefix, &reply.command, &reply.metrics);
            self.sink.push(&line);
        }

        if wants_cache {
            self.cache.store(&reply.command, reply.merged.clone());
        }

        let mut follow_ups = FollowUps::default();
        if let Some(name) = command.callback.as_deref() {
            match self.callbacks.receive_mut(name) {
                Some(hook) => hook(&mut self.state, &reply, &mut follow_ups),
                None => tracing::debug!(callback = name, "no hook registered"),
            }
        }
        self.callbacks.notify(&reply);

        for submission in follow_ups.into_inner() {
            let target = submission.target.clone();
            if let Err(err) = self.submit(submission, now) {
                tracing::warn!(command = %target, error = %err, "follow-up command rejected");
            }
        }
    }

    /// Last cached reply of `path` (`family/command` or its cache route).
    pub fn cached(&self, path: &str) -> Option<&Value> {
        self.cache.get(path)
    }
}

impl<S> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.phase.name())
            .field("link_open", &self.link_open)
            .field("queue", &self.queue.len())
            .field("cache", &self.cache.len())
            .field("stats", &self.stats)
            .finish()
    }
}

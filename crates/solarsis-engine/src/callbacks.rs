//! Application hooks.
//!
//! Hooks receive `&mut S`, the embedding application's own state, which the
//! engine owns and serializes together with the queue.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use solarsis_schema::{Params, ParsedResponse};

use crate::engine::Submission;

/// A parsed reply, as handed to hooks and pending responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    /// `family/command` path of the exchange.
    pub command: String,
    /// Reply text with markers, header and checksum removed.
    pub cleaned: String,
    /// Raw fields.
    pub fields: Vec<String>,
    /// Structured result.
    pub merged: Value,
    /// Flattened `key=value,...` form of `merged`.
    pub metrics: String,
}

impl Reply {
    pub fn new(command: impl Into<String>, parsed: ParsedResponse) -> Self {
        Self {
            command: command.into(),
            cleaned: parsed.cleaned,
            fields: parsed.fields,
            merged: parsed.merged,
            metrics: parsed.metrics,
        }
    }
}

/// Commands a post-receive hook wants queued next.
#[derive(Debug, Default)]
pub struct FollowUps {
    submissions: Vec<Submission>,
}

impl FollowUps {
    /// Queue another command or quick command.
    pub fn submit(&mut self, submission: Submission) {
        self.submissions.push(submission);
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<Submission> {
        self.submissions
    }
}

/// Post-receive hook.
pub type ReceiveHook<S> = Box<dyn FnMut(&mut S, &Reply, &mut FollowUps) + Send>;

/// Pre-send hook: rewrites the parameter map before encoding.
pub type PreSendHook<S> = Box<dyn FnMut(&mut S, Params) -> Params + Send>;

/// Observer called for every reply, after the command's own hook.
pub type ReplyObserver = Box<dyn FnMut(&Reply) + Send>;

/// Named hooks supplied by the embedding application.
pub struct Callbacks<S> {
    receive: HashMap<String, ReceiveHook<S>>,
    pre_send: HashMap<String, PreSendHook<S>>,
    observers: Vec<ReplyObserver>,
}

impl<S> Callbacks<S> {
    pub fn new() -> Self {
        Self {
            receive: HashMap::new(),
            pre_send: HashMap::new(),
            observers: Vec::new(),
        }
    }

    /// Register a post-receive hook under `name`.
    pub fn on_receive<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: FnMut(&mut S, &Reply, &mut FollowUps) + Send + 'static,
    {
        self.receive.insert(name.into(), Box::new(hook));
        self
    }

    /// Register a pre-send hook under `name`.
    pub fn before_send<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: FnMut(&mut S, Params) -> Params + Send + 'static,
    {
        self.pre_send.insert(name.into(), Box::new(hook));
        self
    }

    /// Observe every reply regardless of command.
    pub fn observe<F>(&mut self, observer: F) -> &mut Self
    where
        F: FnMut(&Reply) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn has_receive(&self, name: &str) -> bool {
        self.receive.contains_key(name)
    }

    pub fn has_pre_send(&self, name: &str) -> bool {
        self.pre_send.contains_key(name)
    }

    pub(crate) fn receive_mut(&mut self, name: &str) -> Option<&mut ReceiveHook<S>> {
        self.receive.get_mut(name)
    }

    pub(crate) fn pre_send_mut(&mut self, name: &str) -> Option<&mut PreSendHook<S>> {
        self.pre_send.get_mut(name)
    }

    pub(crate) fn notify(&mut self, reply: &Reply) {
        for observer in &mut self.observers {
            observer(reply);
        }
    }
}

impl<S> Default for Callbacks<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for Callbacks<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut receive: Vec<&String> = self.receive.keys().collect();
        receive.sort_unstable();
        let mut pre_send: Vec<&String> = self.pre_send.keys().collect();
        pre_send.sort_unstable();
        f.debug_struct("Callbacks")
            .field("receive", &receive)
            .field("pre_send", &pre_send)
            .field("observers", &self.observers.len())
            .finish()
    }
}

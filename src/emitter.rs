//! Public send/on facade.
//!
//! `Emitter` is the user-facing half of a connection: `send_event` /
//! `send_binary` / `send_request` queue reliable outbound messages
//! through the shared [`Writer`](crate::writer::Writer); `on_event` /
//! `on_binary` / `on_request` (and their `once_*` counterparts) register
//! callbacks the connection controller dispatches inbound messages to.
//!
//! Channels are untyped strings at this layer by design -- any
//! compile-time channel-schema machinery strongly-typed callers might
//! build on top lives outside this crate and has no runtime footprint
//! here.

use crate::completion::Completion;
use crate::config::Config;
use crate::error::RequestError;
use crate::writer::{QueueOptions, Writer};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use transit_protocol::{MessageKind, Payload};

/// Handle returned by a registration call, usable to remove that
/// specific listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
type BinaryFn = Arc<dyn Fn(Bytes, Vec<Value>) + Send + Sync>;
type RequestFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync>;

struct Stored<F> {
    id: HandlerId,
    handler: F,
    once: bool,
}

struct RequestSlot {
    handler: RequestFn,
    once: bool,
}

#[derive(Default)]
struct HandlerRegistry {
    events: HashMap<String, Vec<Stored<EventFn>>>,
    binaries: HashMap<String, Vec<Stored<BinaryFn>>>,
    requests: HashMap<String, RequestSlot>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    fn allocate_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Typed send/on facade shared by client and server connection
/// controllers. Cheaply cloneable -- every clone shares the same
/// underlying [`Writer`] and handler registry.
#[derive(Clone)]
pub struct Emitter {
    writer: Arc<AsyncMutex<Writer>>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    config: Arc<Config>,
}

impl Emitter {
    pub(crate) fn new(writer: Arc<AsyncMutex<Writer>>, config: Arc<Config>) -> Self {
        Self {
            writer,
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            config,
        }
    }

    // -- send operations -----------------------------------------------

    /// Sends an event: one Json payload `[args]`, queued with the
    /// connection's configured ack timeout and no operation timeout.
    pub async fn send_event(&self, channel: impl Into<String>, args: Vec<Value>) -> Completion<()> {
        let mut writer = self.writer.lock().await;
        let (_id, completion) = writer.queue(
            MessageKind::Event,
            channel,
            vec![Payload::Json(Value::Array(args))],
            QueueOptions {
                ack_timeout: self.config.ack_timeout,
                operation_timeout: Duration::ZERO,
                resolve_on_ack: true,
            },
        );
        drop(writer);
        completion.map(|_| ())
    }

    /// Sends a binary event: first payload Json `[args]`, second payload
    /// the raw bytes.
    pub async fn send_binary(&self, channel: impl Into<String>, bytes: Bytes, args: Vec<Value>) -> Completion<()> {
        let mut writer = self.writer.lock().await;
        let (_id, completion) = writer.queue(
            MessageKind::Binary,
            channel,
            vec![Payload::Json(Value::Array(args)), Payload::Binary(bytes)],
            QueueOptions {
                ack_timeout: self.config.ack_timeout,
                operation_timeout: Duration::ZERO,
                resolve_on_ack: true,
            },
        );
        drop(writer);
        completion.map(|_| ())
    }

    /// Sends a request; the completion resolves with the response value
    /// or rejects with a remote error / timeout. `timeout_override`
    /// takes precedence over `Config::default_operation_timeout`.
    pub async fn send_request(
        &self,
        channel: impl Into<String>,
        args: Vec<Value>,
        timeout_override: Option<Duration>,
    ) -> Completion<Value> {
        let operation_timeout = timeout_override.unwrap_or(self.config.default_operation_timeout);
        let mut writer = self.writer.lock().await;
        let (_id, completion) = writer.queue(
            MessageKind::Request,
            channel,
            vec![Payload::Json(Value::Array(args))],
            QueueOptions {
                ack_timeout: self.config.ack_timeout,
                operation_timeout,
                resolve_on_ack: false,
            },
        );
        completion
    }

    // -- listen operations -----------------------------------------------

    pub fn on_event(&self, channel: impl Into<String>, handler: impl Fn(Vec<Value>) + Send + Sync + 'static) -> HandlerId {
        self.register_event(channel, handler, false)
    }

    pub fn once_event(&self, channel: impl Into<String>, handler: impl Fn(Vec<Value>) + Send + Sync + 'static) -> HandlerId {
        self.register_event(channel, handler, true)
    }

    fn register_event(&self, channel: impl Into<String>, handler: impl Fn(Vec<Value>) + Send + Sync + 'static, once: bool) -> HandlerId {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = registry.allocate_id();
        registry
            .events
            .entry(channel.into())
            .or_default()
            .push(Stored { id, handler: Arc::new(handler), once });
        id
    }

    pub fn off_event(&self, channel: &str, id: HandlerId) {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = registry.events.get_mut(channel) {
            list.retain(|s| s.id != id);
        }
    }

    pub fn on_binary(&self, channel: impl Into<String>, handler: impl Fn(Bytes, Vec<Value>) + Send + Sync + 'static) -> HandlerId {
        self.register_binary(channel, handler, false)
    }

    pub fn once_binary(&self, channel: impl Into<String>, handler: impl Fn(Bytes, Vec<Value>) + Send + Sync + 'static) -> HandlerId {
        self.register_binary(channel, handler, true)
    }

    fn register_binary(&self, channel: impl Into<String>, handler: impl Fn(Bytes, Vec<Value>) + Send + Sync + 'static, once: bool) -> HandlerId {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = registry.allocate_id();
        registry
            .binaries
            .entry(channel.into())
            .or_default()
            .push(Stored { id, handler: Arc::new(handler), once });
        id
    }

    pub fn off_binary(&self, channel: &str, id: HandlerId) {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = registry.binaries.get_mut(channel) {
            list.retain(|s| s.id != id);
        }
    }

    /// Registers the channel's request handler. At most one handler per
    /// channel is kept; a later registration replaces an earlier one.
    pub fn on_request<F>(&self, channel: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync + 'static,
    {
        self.register_request(channel, handler, false)
    }

    pub fn once_request<F>(&self, channel: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync + 'static,
    {
        self.register_request(channel, handler, true)
    }

    fn register_request<F>(&self, channel: impl Into<String>, handler: F, once: bool) -> HandlerId
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync + 'static,
    {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = registry.allocate_id();
        registry.requests.insert(
            channel.into(),
            RequestSlot { handler: Arc::new(handler), once },
        );
        id
    }

    pub fn off_request(&self, channel: &str) {
        let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        registry.requests.remove(channel);
    }

    // -- dispatch, called by the connection controller -------------------

    /// Invokes every registered handler for `channel`, in insertion
    /// order, removing `once` handlers afterward. Returns one error
    /// message per handler that panicked, so the caller (the connection
    /// controller) can surface them as `error` events without letting a
    /// single bad handler take down the others.
    pub(crate) fn dispatch_event(&self, channel: &str, args: Vec<Value>) -> Vec<String> {
        let to_call = {
            let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(list) = registry.events.get_mut(channel) else {
                return Vec::new();
            };
            let calls: Vec<EventFn> = list.iter().map(|s| s.handler.clone()).collect();
            list.retain(|s| !s.once);
            calls
        };
        let mut errors = Vec::new();
        for handler in to_call {
            let args = args.clone();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(args))) {
                errors.push(panic_message(&panic));
            }
        }
        errors
    }

    pub(crate) fn dispatch_binary(&self, channel: &str, bytes: Bytes, args: Vec<Value>) -> Vec<String> {
        let to_call = {
            let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(list) = registry.binaries.get_mut(channel) else {
                return Vec::new();
            };
            let calls: Vec<BinaryFn> = list.iter().map(|s| s.handler.clone()).collect();
            list.retain(|s| !s.once);
            calls
        };
        let mut errors = Vec::new();
        for handler in to_call {
            let bytes = bytes.clone();
            let args = args.clone();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(bytes, args))) {
                errors.push(panic_message(&panic));
            }
        }
        errors
    }

    /// Returns `None` if no handler is registered for `channel` (the
    /// controller surfaces that as a generic remote error). A handler
    /// that declines the request with a
    /// [`RequestError`] is distinguished from one that panics: the panic
    /// message never reaches the peer, only a generic one does, but the
    /// controller still surfaces it locally as an `error` event.
    pub(crate) async fn dispatch_request(&self, channel: &str, args: Vec<Value>) -> Option<RequestOutcome> {
        let slot = {
            let mut registry = self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let slot = registry.requests.get(channel).map(|s| (s.handler.clone(), s.once))?;
            if slot.1 {
                registry.requests.remove(channel);
            }
            slot
        };
        let outcome = std::panic::AssertUnwindSafe(slot.0(args)).catch_unwind().await;
        Some(match outcome {
            Ok(Ok(value)) => RequestOutcome::Value(value),
            Ok(Err(e)) => RequestOutcome::Declined(e),
            Err(panic) => RequestOutcome::Panicked(panic_message(&panic)),
        })
    }
}

/// The result of invoking a channel's request handler, as seen by the
/// connection controller.
pub(crate) enum RequestOutcome {
    Value(Value),
    Declined(RequestError),
    Panicked(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

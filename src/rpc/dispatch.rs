//! Inbound message dispatch.
//!
//! One [`Value`] parsed off the stream comes in; classification per the
//! msgpack-rpc rules decides where it goes: a registered handler (deferred
//! to the host through the [`EventSink`]), the armed sync-slot, or a
//! fallback event. Handlers are never invoked on the pump thread.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::{DeferredCall, EventSink, NotificationHandler, RequestHandler, RpcEvent};
use crate::rpc::message::RpcMessage;
use crate::rpc::session::SyncSlot;
use crate::value::Value;

/// Registered request and notification handlers, keyed by method name.
#[derive(Default)]
pub(crate) struct HandlerTable {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_request(
        &mut self,
        method: &str,
        handler: RequestHandler,
        overwrite: bool,
    ) -> Result<()> {
        register(&mut self.requests, method, handler, overwrite)
    }

    pub(crate) fn register_notification(
        &mut self,
        method: &str,
        handler: NotificationHandler,
        overwrite: bool,
    ) -> Result<()> {
        register(&mut self.notifications, method, handler, overwrite)
    }

    pub(crate) fn unregister_request(&mut self, method: &str) -> Result<()> {
        self.requests
            .remove(method)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(method.to_string()))
    }

    pub(crate) fn unregister_notification(&mut self, method: &str) -> Result<()> {
        self.notifications
            .remove(method)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(method.to_string()))
    }

    fn request(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).cloned()
    }

    fn notification(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method).cloned()
    }
}

fn register<H>(map: &mut HashMap<String, H>, method: &str, handler: H, overwrite: bool) -> Result<()> {
    if !overwrite && map.contains_key(method) {
        return Err(Error::AlreadyExists(method.to_string()));
    }
    map.insert(method.to_string(), handler);
    Ok(())
}

/// Classify one parsed message and route it.
pub(crate) fn dispatch_message(
    value: Value,
    handlers: &Mutex<HandlerTable>,
    slot: &SyncSlot,
    sink: &dyn EventSink,
) {
    sink.event(RpcEvent::MessageReceived(value.clone()));

    let message = match RpcMessage::from_value(value) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!("dropping malformed rpc message: {}", error);
            sink.event(RpcEvent::Error {
                error,
                context: "inbound message",
            });
            return;
        }
    };

    match message {
        RpcMessage::Request {
            msgid,
            method,
            params,
        } => {
            // Clone the handler out so the lock never spans the sink call.
            let handler = handlers.lock().request(&method);
            match handler {
                Some(handler) => sink.defer(DeferredCall::Request {
                    handler,
                    msgid,
                    params,
                }),
                None => sink.event(RpcEvent::RequestReceived {
                    msgid,
                    method,
                    params,
                }),
            }
        }
        RpcMessage::Response {
            msgid,
            error,
            result,
        } => {
            if let Some((error, result)) = slot.complete(msgid, error, result) {
                sink.event(RpcEvent::ResponseReceived {
                    msgid,
                    error,
                    result,
                });
            }
        }
        RpcMessage::Notification { method, params } => {
            let handler = handlers.lock().notification(&method);
            match handler {
                Some(handler) => sink.defer(DeferredCall::Notification { handler, params }),
                None => sink.event(RpcEvent::NotificationReceived { method, params }),
            }
        }
    }
}

//! Command dispatch by message id.
//!
//! Decoded `UserCmdReq` messages go to the handler registered for their
//! `msg_id`; `UserUpAck` messages go to the single acknowledgement slot.
//! The message is released after every dispatch, whatever the handler did.

use crate::error::LinkError;
use nbiot_codec::{Message, MessageType};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of command handler slots.
pub const COMMAND_MAX_HANDLER: usize = 8;

/// Handler for a command request. A returned message is the reply.
pub type CommandHandler = Box<dyn FnMut(&Message<'_>) -> Option<Message<'static>> + Send>;

/// Handler for uplink acknowledgements.
pub type AckHandler = Box<dyn FnMut(&Message<'_>) + Send>;

/// What happened to a dispatched message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A command handler ran. `reply` carries the request's correlation tag.
    Handled {
        msg_id: u8,
        reply: Option<Message<'static>>,
    },
    /// The acknowledgement handler ran.
    Acknowledged { correlation_tag: u16 },
    /// Nothing was registered for this message.
    Unhandled { msg_type: MessageType, msg_id: u8 },
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, DispatchOutcome::Unhandled { .. })
    }
}

/// Bounded `msg_id -> handler` registry plus one acknowledgement slot.
pub struct Dispatcher {
    handlers: Vec<(u8, Arc<Mutex<CommandHandler>>)>,
    capacity: usize,
    ack: Option<Arc<Mutex<AckHandler>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(COMMAND_MAX_HANDLER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handlers: Vec::with_capacity(capacity),
            capacity,
            ack: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registers a handler for command requests with `msg_id`.
    ///
    /// Fails with the fatal [`LinkError::RegistryFull`] once every slot is
    /// taken. A second handler for the same id is kept but never reached.
    pub fn register(
        &mut self,
        msg_id: u8,
        handler: impl FnMut(&Message<'_>) -> Option<Message<'static>> + Send + 'static,
    ) -> Result<(), LinkError> {
        if self.handlers.len() >= self.capacity {
            return Err(LinkError::RegistryFull {
                capacity: self.capacity,
            });
        }
        if self.handlers.iter().any(|(id, _)| *id == msg_id) {
            warn!(msg_id, "handler already registered for this id, new one is shadowed");
        }
        let handler: CommandHandler = Box::new(handler);
        self.handlers.push((msg_id, Arc::new(Mutex::new(handler))));
        debug!(msg_id, slots = self.handlers.len(), "registered command handler");
        Ok(())
    }

    /// Sets the acknowledgement handler, replacing any previous one.
    pub fn set_ack_handler(&mut self, handler: impl FnMut(&Message<'_>) + Send + 'static) {
        let handler: AckHandler = Box::new(handler);
        self.ack = Some(Arc::new(Mutex::new(handler)));
    }

    /// Picks the handler for `msg` without running it.
    pub fn route(&self, msg: &Message<'_>) -> Route {
        match msg.msg_type() {
            MessageType::UserCmdReq => self
                .handlers
                .iter()
                .find(|(id, _)| *id == msg.msg_id())
                .map(|(_, handler)| Route::Command(Arc::clone(handler)))
                .unwrap_or(Route::Unrouted),
            MessageType::UserUpAck => self.ack.clone().map(Route::Ack).unwrap_or(Route::Unrouted),
            _ => Route::Unrouted,
        }
    }

    /// Routes `msg` to its handler and releases it.
    pub fn dispatch(&self, msg: Message<'_>) -> DispatchOutcome {
        self.route(&msg).run(msg)
    }
}

/// Handler selected for one message.
///
/// Holds its own reference to the handler, so the registry can be unlocked
/// (and registered into) while it runs.
pub enum Route {
    Command(Arc<Mutex<CommandHandler>>),
    Ack(Arc<Mutex<AckHandler>>),
    Unrouted,
}

impl Route {
    /// Runs the handler on `msg` and releases it.
    pub fn run(self, msg: Message<'_>) -> DispatchOutcome {
        let msg_type = msg.msg_type();
        let msg_id = msg.msg_id();
        let correlation_tag = msg.correlation_tag();

        let outcome = match self {
            Route::Command(handler) => {
                info!(msg_id, tag = correlation_tag, "dispatching command");
                let mut handler = handler.lock();
                let reply = (*handler)(&msg).map(|mut reply| {
                    reply.set_correlation_tag(correlation_tag);
                    reply
                });
                DispatchOutcome::Handled { msg_id, reply }
            }
            Route::Ack(handler) => {
                debug!(tag = correlation_tag, "uplink acknowledged");
                (*handler.lock())(&msg);
                DispatchOutcome::Acknowledged { correlation_tag }
            }
            Route::Unrouted => {
                match msg_type {
                    MessageType::UserCmdReq => warn!(msg_id, "no handler for command"),
                    MessageType::UserUpAck => {
                        debug!(tag = correlation_tag, "no acknowledgement handler")
                    }
                    other => warn!(msg_type = %other, "message type is not dispatchable"),
                }
                DispatchOutcome::Unhandled { msg_type, msg_id }
            }
        };

        msg.release();
        outcome
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Command(_) => f.write_str("Command"),
            Route::Ack(_) => f.write_str("Ack"),
            Route::Unrouted => f.write_str("Unrouted"),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("msg_ids", &self.handlers.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .field("capacity", &self.capacity)
            .field("ack", &self.ack.is_some())
            .finish()
    }
}

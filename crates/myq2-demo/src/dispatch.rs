// dispatch.rs — per-message-kind callbacks invoked during a parse

use myq2_wire::{MessageKind, ServerMessage};

pub type Handler<'a> = Box<dyn FnMut(&ServerMessage) + 'a>;

/// At most one handler per message kind. Handlers see each message once,
/// in stream order, as it is decoded.
pub struct Dispatcher<'a> {
    handlers: [Option<Handler<'a>>; MessageKind::COUNT],
}

impl Default for Dispatcher<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<&str> = MessageKind::ALL
            .iter()
            .filter(|k| self.is_registered(**k))
            .map(|k| k.name())
            .collect();
        f.debug_struct("Dispatcher").field("registered", &registered).finish()
    }
}

impl<'a> Dispatcher<'a> {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Installs `handler` for `kind`, returning the one it replaces.
    pub fn register<F>(&mut self, kind: MessageKind, handler: F) -> Option<Handler<'a>>
    where
        F: FnMut(&ServerMessage) + 'a,
    {
        self.handlers[kind.index()].replace(Box::new(handler))
    }

    pub fn unregister(&mut self, kind: MessageKind) -> Option<Handler<'a>> {
        self.handlers[kind.index()].take()
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.handlers[kind.index()].is_some()
    }

    /// Whether any handler at all is installed.
    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(Option::is_none)
    }

    pub fn dispatch(&mut self, msg: &ServerMessage) {
        if let Some(handler) = self.handlers[msg.kind().index()].as_mut() {
            handler(msg);
        }
    }
}

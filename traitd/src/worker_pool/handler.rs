// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::message::Message;

/// Per-message work executed on a worker thread.
///
/// Invocations run concurrently and in no particular order.
pub trait MessageHandler: Send + Sync + 'static {
    /// Free-form description, used for logging
    fn desc(&self) -> &str;

    fn handle(&self, message: Message) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("desc", &self.desc())
            .finish()
    }
}

type HandlerFn = dyn Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static;

pub struct ClosureHandler {
    desc: String,
    handler: Box<HandlerFn>,
}

impl ClosureHandler {
    pub fn new(
        desc: impl Into<String>,
        f: impl Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            desc: desc.into(),
            handler: Box::new(f),
        }
    }
}

impl MessageHandler for ClosureHandler {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self.handler)(message)
    }
}

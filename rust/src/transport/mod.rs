pub mod http;
pub mod line;
pub mod sse;
pub mod streamable_http;

use crate::protocol::McpHandler;
use crate::session::SessionManager;

/// What every transport adapter shares: the protocol dispatcher and the
/// session registry.
#[derive(Clone)]
pub struct Gateway {
    pub handler: McpHandler,
    pub sessions: SessionManager,
}

impl Gateway {
    pub fn new(handler: McpHandler, sessions: SessionManager) -> Self {
        Self { handler, sessions }
    }
}

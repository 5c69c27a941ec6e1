//! Runtime state shared by the listeners and the WebSocket services:
//! listener prefixes, the copy-on-write routing tables of an endpoint, and
//! the session manager of a service.

pub mod prefix;
pub mod routing;
pub mod sessions;

pub use self::{
    prefix::{ListenerPrefix, PrefixError},
    routing::{PrefixTable, RoutingError, Snapshot},
    sessions::{ReadyState, ServerState, Session, SessionManager, SessionManagerOptions},
};

//! Call machinery on top of the transport session.
//!
//! - [`client`]: `call(destination, message, timeout)`
//! - [`listener`]: routes replies to waiting calls
//! - [`server`]: answers requests on a queue

pub mod client;
pub mod listener;
pub mod server;

pub use client::RpcClient;
pub use listener::{
    dispatch, DispatchOutcome, Dispatcher, ListenerStats, ListenerStatsSnapshot, ReplyError,
    ReplyListener,
};
pub use server::{handler_fn, FnHandler, RequestContext, RequestHandler, RpcServer, ServerStats};

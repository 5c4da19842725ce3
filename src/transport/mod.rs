//! TCP transport: accept loop, per-connection read loop, reply writer.

mod tcp;
mod writer;

pub use tcp::{RpcClient, RpcServer, ServerBuilder};
pub use writer::{spawn_reply_writer, OutboundReply, ReplyWriter, DEFAULT_REPLY_QUEUE};

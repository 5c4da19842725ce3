//! Typed RPC message model.
//!
//! This module implements the call/reply layer on top of the XDR codec:
//! - flavor-tagged opaque auth blobs (credentials and verifiers)
//! - call header decode/encode, keeping the xid on every failure path
//!   so a correlated reply is still possible
//! - accepted/denied reply encoding and client-side reply decoding

mod auth;
mod call;
mod reply;

pub use auth::{auth_stat, OpaqueAuth, AUTH_NONE, AUTH_SYS, MAX_AUTH_BYTES};
pub use call::{CallDecodeError, RpcCall};
pub use reply::{
    AcceptStatus, AcceptedReply, DeniedReply, RejectStatus, RpcReply, MSG_ACCEPTED, MSG_DENIED,
};

/// RPC protocol version; calls carrying any other value are denied.
pub const RPC_VERSION: u32 = 2;

/// msg_type discriminant for calls.
pub const MSG_CALL: u32 = 0;

/// msg_type discriminant for replies.
pub const MSG_REPLY: u32 = 1;

//! # oncrpc
//!
//! Transport core for ONC-RPC (RFC 5531) services over TCP.
//!
//! ## Architecture
//!
//! - **XDR codec** ([`xdr`]): big-endian four-byte words, opaques padded
//!   to word boundaries
//! - **Record marking** ([`record`]): reassembles fragmented messages
//!   from raw stream chunks
//! - **Message model** ([`message`]): call and reply headers with their
//!   auth trailers
//! - **Dispatch** ([`program`]): per-program procedure tables behind a
//!   privileged-port policy
//!
//! [`transport`] ties the layers to TCP sockets and [`portmap`] speaks
//! to the conventional registry service at port 111.
//!
//! ## Example
//!
//! ```ignore
//! use oncrpc::{Idempotency, RpcClient, RpcProgram, RpcServer};
//!
//! #[tokio::main]
//! async fn main() -> oncrpc::error::Result<()> {
//!     let program = RpcProgram::builder("echo", 200_001)
//!         .allow_insecure_ports(true)
//!         .procedure(1, 1, Idempotency::Idempotent, |_ctx, mut args| async move {
//!             Ok(args.read_rest())
//!         })
//!         .build();
//!
//!     let server = RpcServer::builder(program).bind("0.0.0.0:2049").await?;
//!
//!     let mut client = RpcClient::connect(server.local_addr(), 200_001, 1).await?;
//!     let reply = client.call(1, b"hello").await?;
//!     println!("{reply:?}");
//!     Ok(())
//! }
//! ```

pub mod call_cache;
pub mod error;
pub mod message;
pub mod portmap;
pub mod program;
pub mod record;
pub mod transport;
pub mod xdr;

pub use error::RpcError;
pub use program::{Idempotency, RpcProgram};
pub use transport::{RpcClient, RpcServer};

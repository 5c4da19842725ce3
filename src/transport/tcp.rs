//! TCP server and client endpoints.
//!
//! [`RpcServer`] owns the accept loop. Every connection gets its own
//! frame decoder, read loop, and writer task; calls dispatch through a
//! shared [`RpcProgram`] and replies funnel back over the connection's
//! writer channel. Retransmitted calls to non-idempotent procedures are
//! answered from the duplicate-call cache instead of running again.
//!
//! [`RpcClient`] is the matching caller side: it frames call headers,
//! assigns xids, and reassembles record-marked replies.
//!
//! # Example
//!
//! ```no_run
//! use oncrpc::program::{Idempotency, RpcProgram};
//! use oncrpc::transport::{RpcClient, RpcServer};
//!
//! # async fn run() -> oncrpc::error::Result<()> {
//! let program = RpcProgram::builder("echo", 200_001)
//!     .allow_insecure_ports(true)
//!     .procedure(1, 1, Idempotency::Idempotent, |_ctx, mut args| async move {
//!         Ok(args.read_rest())
//!     })
//!     .build();
//!
//! let server = RpcServer::builder(program).bind("127.0.0.1:0").await?;
//!
//! let mut client = RpcClient::connect(server.local_addr(), 200_001, 1).await?;
//! let reply = client.call(1, b"hello").await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::call_cache::{CacheEntry, CallCache, DEFAULT_CACHE_CAPACITY};
use crate::error::{Result, RpcError};
use crate::message::{AcceptStatus, AcceptedReply, CallDecodeError, DeniedReply, RpcCall, RpcReply};
use crate::program::RpcProgram;
use crate::record::FrameDecoder;
use crate::xdr::{record_mark, XdrDecoder, XdrEncoder, FRAGMENT_HEADER_SIZE};

use super::writer::{spawn_reply_writer, OutboundReply, ReplyWriter, DEFAULT_REPLY_QUEUE};

/// Socket read buffer size for both endpoints.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and starting an [`RpcServer`].
pub struct ServerBuilder {
    program: RpcProgram,
    max_message_size: Option<usize>,
    call_cache_entries: usize,
    reply_queue: usize,
}

impl ServerBuilder {
    fn new(program: RpcProgram) -> Self {
        Self {
            program,
            max_message_size: None,
            call_cache_entries: DEFAULT_CACHE_CAPACITY,
            reply_queue: DEFAULT_REPLY_QUEUE,
        }
    }

    /// Close any connection that sends a message larger than `limit`
    /// bytes once reassembled. No limit is applied by default.
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = Some(limit);
        self
    }

    /// Number of completed replies remembered for duplicate detection.
    pub fn call_cache_entries(mut self, entries: usize) -> Self {
        self.call_cache_entries = entries;
        self
    }

    /// Per-connection reply channel capacity.
    pub fn reply_queue(mut self, capacity: usize) -> Self {
        self.reply_queue = capacity;
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<RpcServer> {
        RpcServer::start(self, addr).await
    }
}

/// State shared by every connection of one server.
struct Shared {
    program: RpcProgram,
    cache: Mutex<CallCache>,
    max_message_size: Option<usize>,
    reply_queue: usize,
}

/// A serving RPC endpoint bound to a TCP port.
///
/// Dropping the server stops the accept loop; connections already
/// established keep running until their peers hang up.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Start configuring a server for `program`.
    pub fn builder(program: RpcProgram) -> ServerBuilder {
        ServerBuilder::new(program)
    }

    async fn start(builder: ServerBuilder, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::debug!(
            "{}: program {} listening on {}",
            builder.program.name(),
            builder.program.program(),
            local_addr
        );

        let shared = Arc::new(Shared {
            cache: Mutex::new(CallCache::new(builder.call_cache_entries)),
            max_message_size: builder.max_message_size,
            reply_queue: builder.reply_queue,
            program: builder.program,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        let Self {
            shutdown_tx,
            accept_task,
            ..
        } = self;
        drop(shutdown_tx);
        let _ = accept_task.await;
    }
}

/// Accept connections until the shutdown signal fires.
async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("connection from {}", remote);

                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, remote, shared).await {
                        tracing::error!("connection from {} failed: {}", remote, e);
                    }
                });
            }
        }
    }
}

/// Drive one connection: split the stream, spawn its writer task, and
/// run the read loop until EOF or a fatal framing error.
async fn serve_connection(stream: TcpStream, remote: SocketAddr, shared: Arc<Shared>) -> Result<()> {
    let (reader, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_reply_writer(write_half, shared.reply_queue);

    let result = read_loop(reader, remote, &shared, writer).await;

    // The read loop owned the last sender; the writer task drains what
    // is queued and exits.
    match writer_task.await {
        Ok(write_result) => result.and(write_result),
        Err(_) => result,
    }
}

/// Read stream chunks, reassemble messages, and answer each call.
async fn read_loop<R>(
    mut reader: R,
    remote: SocketAddr,
    shared: &Shared,
    writer: ReplyWriter,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = match shared.max_message_size {
        Some(limit) => FrameDecoder::with_max_message_size(limit),
        None => FrameDecoder::new(),
    };
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(RpcError::Io(e)),
        };

        let messages = decoder.feed(&buf[..n])?;
        for message in messages {
            answer_message(message, remote, shared, &writer).await?;
        }
    }
}

/// Decode one reassembled message and send whatever reply it earns.
///
/// Messages that cannot be correlated (unreadable xid, stray replies)
/// are dropped without an answer.
async fn answer_message(
    message: Bytes,
    remote: SocketAddr,
    shared: &Shared,
    writer: &ReplyWriter,
) -> Result<()> {
    let mut args = XdrDecoder::new(message);
    let call = match RpcCall::decode(&mut args) {
        Ok(call) => call,
        Err(CallDecodeError::VersionMismatch { xid, version }) => {
            tracing::warn!("refusing RPC version {} from {} (xid {})", version, remote, xid);
            let reply = DeniedReply::rpc_mismatch(xid).encode();
            return writer.send(OutboundReply::new(reply)).await;
        }
        Err(CallDecodeError::NotACall { xid, msg_type }) => {
            tracing::warn!(
                "dropping message type {} from {} (xid {})",
                msg_type,
                remote,
                xid
            );
            return Ok(());
        }
        Err(CallDecodeError::Garbage { xid: Some(xid) }) => {
            tracing::warn!("malformed call header from {} (xid {})", remote, xid);
            let reply = AcceptedReply::with_status(xid, AcceptStatus::GarbageArgs).encode();
            return writer.send(OutboundReply::new(reply)).await;
        }
        Err(CallDecodeError::Garbage { xid: None }) => {
            tracing::warn!("dropping unreadable message from {}", remote);
            return Ok(());
        }
    };

    // Retransmission handling applies only to procedures that change
    // state; idempotent calls run again unconditionally.
    let idempotent = shared.program.is_idempotent(call.version, call.procedure);
    let xid = call.xid;
    if !idempotent {
        let mut cache = shared.cache.lock().await;
        match cache.check_or_insert(remote.ip(), xid) {
            Some(CacheEntry::Completed(reply)) => {
                drop(cache);
                tracing::debug!("replaying cached reply for {} (xid {})", remote, xid);
                return writer.send(OutboundReply::new(reply)).await;
            }
            Some(CacheEntry::InProgress) => {
                tracing::debug!("duplicate of an in-flight call from {} (xid {})", remote, xid);
                return Ok(());
            }
            None => {}
        }
    }

    let reply = shared.program.dispatch(call, remote, args).await;

    if !idempotent {
        shared
            .cache
            .lock()
            .await
            .complete(remote.ip(), xid, reply.clone());
    }
    writer.send(OutboundReply::new(reply)).await
}

/// Caller side of a TCP connection to one remote program.
///
/// Calls are issued one at a time: `call` frames the request, writes it,
/// and reads until the matching reply arrives. Replies carrying an
/// unexpected xid are dropped.
pub struct RpcClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    program: u32,
    version: u32,
    next_xid: u32,
}

impl RpcClient {
    /// Connect to `addr` and address calls to `program` / `version`.
    pub async fn connect(addr: impl ToSocketAddrs, program: u32, version: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            program,
            version,
            next_xid: initial_xid(),
        })
    }

    /// Issue one call with `AUTH_NONE` credentials and wait for its
    /// reply. `args` is the pre-encoded argument body.
    pub async fn call(&mut self, procedure: u32, args: &[u8]) -> Result<RpcReply> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);

        let call = RpcCall::new(xid, self.program, self.version, procedure);
        let mut enc = XdrEncoder::with_capacity(64 + args.len());
        call.encode(&mut enc);
        enc.write_raw(args);
        let body = enc.into_bytes();

        let mut frame = Vec::with_capacity(FRAGMENT_HEADER_SIZE + body.len());
        frame.extend_from_slice(&record_mark(body.len() as u32, true));
        frame.extend_from_slice(&body);
        self.stream.write_all(&frame).await?;

        self.read_reply(xid).await
    }

    /// Issue the NULL procedure, a liveness ping with no arguments.
    pub async fn call_null(&mut self) -> Result<RpcReply> {
        self.call(0, &[]).await
    }

    /// Read messages until one decodes as the reply to `xid`.
    async fn read_reply(&mut self, xid: u32) -> Result<RpcReply> {
        loop {
            let n = match self.stream.read(&mut self.read_buf).await {
                Ok(0) => return Err(RpcError::ConnectionClosed),
                Ok(n) => n,
                Err(e) => return Err(RpcError::Io(e)),
            };

            for message in self.decoder.feed(&self.read_buf[..n])? {
                let reply = RpcReply::decode(message)?;
                if reply.xid() == xid {
                    return Ok(reply);
                }
                tracing::warn!("dropping reply with unexpected xid {}", reply.xid());
            }
        }
    }
}

/// Seed the xid sequence from the clock so reconnecting clients do not
/// collide with cached entries from an earlier run.
fn initial_xid() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    (nanos.wrapping_mul(0x517c_c1b7_2722_0a95) ^ pid) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> RpcProgram {
        RpcProgram::builder("sample", 100_005).versions(1, 3).build()
    }

    #[test]
    fn test_builder_defaults() {
        let builder = RpcServer::builder(sample_program());
        assert_eq!(builder.max_message_size, None);
        assert_eq!(builder.call_cache_entries, DEFAULT_CACHE_CAPACITY);
        assert_eq!(builder.reply_queue, DEFAULT_REPLY_QUEUE);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = RpcServer::builder(sample_program())
            .max_message_size(1 << 20)
            .call_cache_entries(16)
            .reply_queue(8);

        assert_eq!(builder.max_message_size, Some(1 << 20));
        assert_eq!(builder.call_cache_entries, 16);
        assert_eq!(builder.reply_queue, 8);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_and_shutdown() {
        let server = RpcServer::builder(sample_program())
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        assert_ne!(server.local_addr().port(), 0);
        server.shutdown().await;
    }
}

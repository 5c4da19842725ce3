//! Dedicated reply writer task.
//!
//! Each connection owns one writer task fed over an mpsc channel. Reply
//! producers hand off encoded reply bodies; the task prepends the record
//! mark and writes them to the socket, so a connection never interleaves
//! two replies. The channel is bounded and `send` waits when it fills.
//!
//! Replies always travel as a single fragment with the last-fragment bit
//! set. The 31-bit length field covers any reply the encoder can build,
//! so outbound fragmentation is never needed.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::xdr::{record_mark, FRAGMENT_HEADER_SIZE};

/// Default per-connection reply channel capacity.
pub const DEFAULT_REPLY_QUEUE: usize = 64;

/// Maximum replies drained into a single write batch.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded reply with its record mark, ready for the wire.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    /// Record mark covering the payload (last-fragment bit set).
    mark: [u8; FRAGMENT_HEADER_SIZE],
    /// Encoded reply body.
    payload: Bytes,
}

impl OutboundReply {
    /// Wrap an encoded reply body as a single last fragment.
    pub fn new(payload: Bytes) -> Self {
        Self {
            mark: record_mark(payload.len() as u32, true),
            payload,
        }
    }

    /// Bytes this reply occupies on the wire, record mark included.
    pub fn wire_len(&self) -> usize {
        FRAGMENT_HEADER_SIZE + self.payload.len()
    }
}

/// Cloneable sending half of a connection's writer task.
#[derive(Clone)]
pub struct ReplyWriter {
    tx: mpsc::Sender<OutboundReply>,
}

impl ReplyWriter {
    /// Queue a reply for writing. Waits while the channel is full.
    ///
    /// # Errors
    ///
    /// [`RpcError::WriterClosed`] if the writer task has exited.
    pub async fn send(&self, reply: OutboundReply) -> Result<()> {
        self.tx
            .send(reply)
            .await
            .map_err(|_| RpcError::WriterClosed)
    }
}

/// Spawn the writer task for one connection.
///
/// Returns the sending handle and the task's join handle. The task exits
/// once every [`ReplyWriter`] clone is dropped and the queue drains, or
/// earlier on a write error.
pub fn spawn_reply_writer<W>(writer: W, capacity: usize) -> (ReplyWriter, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(writer_loop(writer, rx));
    (ReplyWriter { tx }, task)
}

/// Receive replies and write them in batches until the channel closes.
async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<OutboundReply>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(reply) => batch.push(reply),
                Err(_) => break,
            }
        }
        write_batch(&mut writer, &batch).await?;
    }
    Ok(())
}

/// Write a batch of replies with vectored I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundReply]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for reply in batch {
        slices.push(IoSlice::new(&reply.mark));
        if !reply.payload.is_empty() {
            slices.push(IoSlice::new(&reply.payload));
        }
    }

    let total: usize = batch.iter().map(OutboundReply::wire_len).sum();
    let mut written = writer.write_vectored(&slices).await?;

    // Short writes resume from the unwritten tail.
    while written < total {
        let remaining = build_remaining_slices(batch, written);
        let n = writer.write_vectored(&remaining).await?;
        if n == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "socket accepted no bytes mid-reply",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Rebuild the slice list starting `skip` bytes into the batch.
fn build_remaining_slices(batch: &[OutboundReply], mut skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::new();
    for reply in batch {
        for part in [&reply.mark[..], &reply.payload[..]] {
            if skip >= part.len() {
                skip -= part.len();
                continue;
            }
            slices.push(IoSlice::new(&part[skip..]));
            skip = 0;
        }
    }
    slices
}

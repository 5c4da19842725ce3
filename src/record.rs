//! Record-marking frame decoder.
//!
//! RPC messages travel over a stream as one or more fragments, each
//! carrying a 4-byte record mark (top bit = last fragment, low 31 bits =
//! payload length). The decoder accumulates partial reads with
//! `bytes::BytesMut` and runs a two-state machine per connection:
//! - `AwaitingHeader`: need at least 4 bytes
//! - `AwaitingPayload`: record mark parsed, need N more payload bytes
//!
//! A complete message is emitted only once the payload of a fragment with
//! the last-fragment bit has fully arrived. One decoder instance belongs
//! to exactly one connection; dropping it discards any partial state.
//!
//! # Example
//!
//! ```
//! use oncrpc::record::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//!
//! // Data arrives in arbitrary chunks from the socket.
//! let mut wire = vec![0x80, 0, 0, 5];
//! wire.extend_from_slice(b"hello");
//!
//! let messages = decoder.feed(&wire).unwrap();
//! assert_eq!(messages.len(), 1);
//! assert_eq!(&messages[0][..], b"hello");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, RpcError};
use crate::xdr::{fragment_size, is_last_fragment, FRAGMENT_HEADER_SIZE};

/// State machine for fragment parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete record mark (need 4 bytes).
    AwaitingHeader,
    /// Record mark parsed, waiting for payload bytes.
    AwaitingPayload { remaining: u32, last: bool },
}

/// Reassembles record-marked messages from raw stream chunks.
///
/// Feeding bytes never blocks: partial input advances internal state and
/// returns no output until enough bytes arrive. A single `feed` may yield
/// zero, one, or several complete messages, and may complete a message
/// whose earlier fragments arrived in previous calls.
pub struct FrameDecoder {
    /// Raw bytes not yet consumed by the state machine.
    buffer: BytesMut,
    /// Payload accumulated for the in-progress message.
    message: BytesMut,
    /// Current parsing state.
    state: State,
    /// Last-fragment flag of the most recently completed fragment.
    last_fragment: bool,
    /// Optional cap on the accumulated message size.
    max_message_size: Option<usize>,
}

impl FrameDecoder {
    /// Create a decoder with no message size cap.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            message: BytesMut::new(),
            state: State::AwaitingHeader,
            last_fragment: false,
            max_message_size: None,
        }
    }

    /// Create a decoder that fails once a message would exceed `limit`
    /// bytes. The check runs when a record mark is parsed, before the
    /// oversize payload is buffered.
    pub fn with_max_message_size(limit: usize) -> Self {
        Self {
            max_message_size: Some(limit),
            ..Self::new()
        }
    }

    /// Feed newly-arrived bytes and extract all completed messages.
    ///
    /// # Errors
    ///
    /// [`RpcError::MessageTooLarge`] if a configured size cap is
    /// exceeded; the connection is no longer decodable and must be
    /// closed by the caller.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Advance the state machine until a message completes or input runs
    /// out.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete message was reassembled
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the message exceeds the configured cap
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::AwaitingHeader => {
                    if self.buffer.len() < FRAGMENT_HEADER_SIZE {
                        return Ok(None);
                    }

                    let last = is_last_fragment(&self.buffer);
                    let length = fragment_size(&self.buffer);

                    if let Some(limit) = self.max_message_size {
                        let projected = self.message.len() + length as usize;
                        if projected > limit {
                            return Err(RpcError::MessageTooLarge {
                                size: projected,
                                limit,
                            });
                        }
                    }

                    self.buffer.advance(FRAGMENT_HEADER_SIZE);
                    self.state = State::AwaitingPayload {
                        remaining: length,
                        last,
                    };
                }

                State::AwaitingPayload { remaining, last } => {
                    let needed = remaining as usize;

                    if self.buffer.len() < needed {
                        // Buffer what is present and wait for the rest.
                        let available = self.buffer.len();
                        self.message.extend_from_slice(&self.buffer.split_to(available));
                        self.state = State::AwaitingPayload {
                            remaining: (needed - available) as u32,
                            last,
                        };
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(needed);
                    self.last_fragment = last;
                    self.state = State::AwaitingHeader;

                    if !last {
                        self.message.extend_from_slice(&payload);
                        continue;
                    }

                    // Single-fragment messages skip the accumulator
                    // entirely (zero-copy hand-off).
                    let message = if self.message.is_empty() {
                        payload.freeze()
                    } else {
                        self.message.extend_from_slice(&payload);
                        self.message.split().freeze()
                    };
                    return Ok(Some(message));
                }
            }
        }
    }

    /// Last-fragment flag of the most recently completed fragment.
    ///
    /// Diagnostic only; message emission is driven by the state machine,
    /// not by polling this flag.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.last_fragment
    }

    /// Number of raw bytes buffered but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True if no raw bytes are waiting and no message is in progress.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.message.is_empty()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

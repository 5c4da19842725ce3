//! RPC call messages.
//!
//! A call names a `{program, version, procedure}` triple, carries a
//! transaction id for reply correlation, and two auth blobs. The RPC
//! protocol version is fixed at 2: `decode` rejects anything else and
//! `encode` always writes it, so the struct does not store it.

use thiserror::Error;

use crate::message::{MSG_CALL, RPC_VERSION};
use crate::xdr::{XdrDecoder, XdrEncoder};

use super::auth::OpaqueAuth;

/// Why a message failed to decode as a call.
///
/// Each variant keeps the xid where one was readable, so the caller can
/// still produce a correlated reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallDecodeError {
    /// Message type field was not CALL. Servers drop these.
    #[error("message type {msg_type} is not a call (xid {xid})")]
    NotACall { xid: u32, msg_type: u32 },

    /// RPC version other than 2; answered with an RPC_MISMATCH denial.
    #[error("unsupported RPC version {version} (xid {xid})")]
    VersionMismatch { xid: u32, version: u32 },

    /// Header was truncated or a declared length overran the buffer.
    /// Answered with GARBAGE_ARGS when the xid was readable.
    #[error("malformed call header")]
    Garbage { xid: Option<u32> },
}

/// A decoded RPC call header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    /// Transaction id; every reply copies it back.
    pub xid: u32,
    /// Program number the call is addressed to.
    pub program: u32,
    /// Program version.
    pub version: u32,
    /// Procedure number within the program (0 = NULL).
    pub procedure: u32,
    /// Caller credentials, passed through uninterpreted.
    pub credentials: OpaqueAuth,
    /// Caller verifier, passed through uninterpreted.
    pub verifier: OpaqueAuth,
}

impl RpcCall {
    /// Create a call with `AUTH_NONE` credentials and verifier.
    pub fn new(xid: u32, program: u32, version: u32, procedure: u32) -> Self {
        Self {
            xid,
            program,
            version,
            procedure,
            credentials: OpaqueAuth::none(),
            verifier: OpaqueAuth::none(),
        }
    }

    /// True for the NULL procedure (liveness ping).
    #[inline]
    pub fn is_null_procedure(&self) -> bool {
        self.procedure == 0
    }

    /// Write the call header. Argument bytes, if any, follow on the same
    /// encoder.
    pub fn encode(&self, enc: &mut XdrEncoder) {
        enc.write_u32(self.xid);
        enc.write_u32(MSG_CALL);
        enc.write_u32(RPC_VERSION);
        enc.write_u32(self.program);
        enc.write_u32(self.version);
        enc.write_u32(self.procedure);
        self.credentials.encode(enc);
        self.verifier.encode(enc);
    }

    /// Read a call header from the start of an assembled message.
    ///
    /// On success the decoder is left positioned at the first argument
    /// byte.
    pub fn decode(dec: &mut XdrDecoder) -> Result<Self, CallDecodeError> {
        let xid = dec
            .read_u32()
            .map_err(|_| CallDecodeError::Garbage { xid: None })?;
        let garbage = |_| CallDecodeError::Garbage { xid: Some(xid) };

        let msg_type = dec.read_u32().map_err(garbage)?;
        if msg_type != MSG_CALL {
            return Err(CallDecodeError::NotACall { xid, msg_type });
        }

        let rpc_version = dec.read_u32().map_err(garbage)?;
        if rpc_version != RPC_VERSION {
            return Err(CallDecodeError::VersionMismatch {
                xid,
                version: rpc_version,
            });
        }

        let program = dec.read_u32().map_err(garbage)?;
        let version = dec.read_u32().map_err(garbage)?;
        let procedure = dec.read_u32().map_err(garbage)?;
        let credentials = OpaqueAuth::decode(dec).map_err(garbage)?;
        let verifier = OpaqueAuth::decode(dec).map_err(garbage)?;

        Ok(Self {
            xid,
            program,
            version,
            procedure,
            credentials,
            verifier,
        })
    }
}

//! RPC reply messages.
//!
//! A reply is either *accepted* (the server processed or explicitly
//! refused the call: success, unknown program/version/procedure, garbage
//! arguments, internal error) or *denied* (the call never reached
//! dispatch: wrong RPC version or failed authentication). Every reply
//! opens with the xid of the call it answers; correlation is never
//! skipped, including on error paths.

use bytes::Bytes;

use crate::error::{Result, RpcError};
use crate::message::{MSG_REPLY, RPC_VERSION};
use crate::xdr::{XdrDecoder, XdrEncoder};

use super::auth::OpaqueAuth;

/// reply_stat discriminant: the call was accepted for processing.
pub const MSG_ACCEPTED: u32 = 0;

/// reply_stat discriminant: the call was denied before dispatch.
pub const MSG_DENIED: u32 = 1;

/// Status of an accepted reply.
///
/// Wire codes: `Success`=0, `ProgUnavail`=1, `ProgMismatch`=2,
/// `ProcUnavail`=3, `GarbageArgs`=4, `SystemErr`=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// Procedure ran; results follow.
    Success,
    /// Program number not served here.
    ProgUnavail,
    /// Program version outside the supported range (carried in reply).
    ProgMismatch { low: u32, high: u32 },
    /// Procedure number not registered for this program version.
    ProcUnavail,
    /// Arguments could not be decoded.
    GarbageArgs,
    /// Server-side failure, including port-policy refusals.
    SystemErr,
}

impl AcceptStatus {
    /// Wire code for this status.
    pub fn code(&self) -> u32 {
        match self {
            AcceptStatus::Success => 0,
            AcceptStatus::ProgUnavail => 1,
            AcceptStatus::ProgMismatch { .. } => 2,
            AcceptStatus::ProcUnavail => 3,
            AcceptStatus::GarbageArgs => 4,
            AcceptStatus::SystemErr => 5,
        }
    }
}

/// Status of a denied reply.
///
/// Wire codes: `RpcMismatch`=0, `AuthError`=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStatus {
    /// RPC version not supported; carries the supported range.
    RpcMismatch { low: u32, high: u32 },
    /// Authentication failed; carries an `auth_stat` code.
    AuthError { stat: u32 },
}

/// An accepted reply: `xid | REPLY | MSG_ACCEPTED | verifier |
/// accept_stat | status data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedReply {
    pub xid: u32,
    pub verifier: OpaqueAuth,
    pub status: AcceptStatus,
    /// Procedure results; non-empty only for `Success`.
    pub results: Bytes,
}

impl AcceptedReply {
    /// A successful reply carrying procedure results.
    pub fn success(xid: u32, results: Bytes) -> Self {
        Self {
            xid,
            verifier: OpaqueAuth::none(),
            status: AcceptStatus::Success,
            results,
        }
    }

    /// An accepted error reply (no results).
    pub fn with_status(xid: u32, status: AcceptStatus) -> Self {
        Self {
            xid,
            verifier: OpaqueAuth::none(),
            status,
            results: Bytes::new(),
        }
    }

    /// A `PROG_MISMATCH` reply advertising the supported version range.
    pub fn prog_mismatch(xid: u32, low: u32, high: u32) -> Self {
        Self::with_status(xid, AcceptStatus::ProgMismatch { low, high })
    }

    /// Append this reply to an encoder.
    pub fn encode_into(&self, enc: &mut XdrEncoder) {
        enc.write_u32(self.xid);
        enc.write_u32(MSG_REPLY);
        enc.write_u32(MSG_ACCEPTED);
        self.verifier.encode(enc);
        enc.write_u32(self.status.code());
        match self.status {
            AcceptStatus::Success => enc.write_raw(&self.results),
            AcceptStatus::ProgMismatch { low, high } => {
                enc.write_u32(low);
                enc.write_u32(high);
            }
            _ => {}
        }
    }

    /// Encode as a complete message payload.
    pub fn encode(&self) -> Bytes {
        let mut enc = XdrEncoder::with_capacity(24 + self.results.len());
        self.encode_into(&mut enc);
        enc.into_bytes()
    }
}

/// A denied reply: `xid | REPLY | MSG_DENIED | reject_stat | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeniedReply {
    pub xid: u32,
    pub status: RejectStatus,
}

impl DeniedReply {
    /// Deny a call whose RPC version is not 2.
    pub fn rpc_mismatch(xid: u32) -> Self {
        Self {
            xid,
            status: RejectStatus::RpcMismatch {
                low: RPC_VERSION,
                high: RPC_VERSION,
            },
        }
    }

    /// Deny a call for an authentication failure.
    pub fn auth_error(xid: u32, stat: u32) -> Self {
        Self {
            xid,
            status: RejectStatus::AuthError { stat },
        }
    }

    /// Append this reply to an encoder.
    pub fn encode_into(&self, enc: &mut XdrEncoder) {
        enc.write_u32(self.xid);
        enc.write_u32(MSG_REPLY);
        enc.write_u32(MSG_DENIED);
        match self.status {
            RejectStatus::RpcMismatch { low, high } => {
                enc.write_u32(0);
                enc.write_u32(low);
                enc.write_u32(high);
            }
            RejectStatus::AuthError { stat } => {
                enc.write_u32(1);
                enc.write_u32(stat);
            }
        }
    }

    /// Encode as a complete message payload.
    pub fn encode(&self) -> Bytes {
        let mut enc = XdrEncoder::with_capacity(24);
        self.encode_into(&mut enc);
        enc.into_bytes()
    }
}

/// Either kind of reply, as decoded by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    Accepted(AcceptedReply),
    Denied(DeniedReply),
}

impl RpcReply {
    /// The xid this reply correlates to.
    pub fn xid(&self) -> u32 {
        match self {
            RpcReply::Accepted(reply) => reply.xid,
            RpcReply::Denied(reply) => reply.xid,
        }
    }

    /// Decode a complete message as a reply.
    pub fn decode(message: Bytes) -> Result<Self> {
        let mut dec = XdrDecoder::new(message);

        let xid = dec.read_u32()?;
        let msg_type = dec.read_u32()?;
        if msg_type != MSG_REPLY {
            return Err(RpcError::Protocol(format!(
                "message type {msg_type} is not a reply"
            )));
        }

        match dec.read_u32()? {
            MSG_ACCEPTED => {
                let verifier = OpaqueAuth::decode(&mut dec)?;
                let code = dec.read_u32()?;
                let status = match code {
                    0 => AcceptStatus::Success,
                    1 => AcceptStatus::ProgUnavail,
                    2 => AcceptStatus::ProgMismatch {
                        low: dec.read_u32()?,
                        high: dec.read_u32()?,
                    },
                    3 => AcceptStatus::ProcUnavail,
                    4 => AcceptStatus::GarbageArgs,
                    5 => AcceptStatus::SystemErr,
                    other => {
                        return Err(RpcError::Protocol(format!(
                            "unknown accept status {other}"
                        )))
                    }
                };
                let results = match status {
                    AcceptStatus::Success => dec.read_rest(),
                    _ => Bytes::new(),
                };
                Ok(RpcReply::Accepted(AcceptedReply {
                    xid,
                    verifier,
                    status,
                    results,
                }))
            }
            MSG_DENIED => {
                let status = match dec.read_u32()? {
                    0 => RejectStatus::RpcMismatch {
                        low: dec.read_u32()?,
                        high: dec.read_u32()?,
                    },
                    1 => RejectStatus::AuthError {
                        stat: dec.read_u32()?,
                    },
                    other => {
                        return Err(RpcError::Protocol(format!(
                            "unknown reject status {other}"
                        )))
                    }
                };
                Ok(RpcReply::Denied(DeniedReply { xid, status }))
            }
            other => Err(RpcError::Protocol(format!(
                "unknown reply status {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reply_layout() {
        let reply = AcceptedReply::success(0x42, Bytes::from_static(&[0, 0, 0, 9]));
        let wire = reply.encode();

        let mut dec = XdrDecoder::new(wire);
        assert_eq!(dec.read_u32().unwrap(), 0x42); // xid
        assert_eq!(dec.read_u32().unwrap(), MSG_REPLY);
        assert_eq!(dec.read_u32().unwrap(), MSG_ACCEPTED);
        assert_eq!(dec.read_u32().unwrap(), 0); // verifier flavor
        assert_eq!(dec.read_u32().unwrap(), 0); // verifier length
        assert_eq!(dec.read_u32().unwrap(), 0); // SUCCESS
        assert_eq!(dec.read_u32().unwrap(), 9); // results
        assert!(dec.is_exhausted());
    }

    #[test]
    fn test_prog_mismatch_carries_range() {
        let wire = AcceptedReply::prog_mismatch(1, 2, 5).encode();

        match RpcReply::decode(wire).unwrap() {
            RpcReply::Accepted(reply) => {
                assert_eq!(reply.status, AcceptStatus::ProgMismatch { low: 2, high: 5 });
                assert!(reply.results.is_empty());
            }
            other => panic!("expected accepted reply, got {other:?}"),
        }
    }

    #[test]
    fn test_denied_rpc_mismatch_layout() {
        let wire = DeniedReply::rpc_mismatch(0x77).encode();

        let mut dec = XdrDecoder::new(wire);
        assert_eq!(dec.read_u32().unwrap(), 0x77);
        assert_eq!(dec.read_u32().unwrap(), MSG_REPLY);
        assert_eq!(dec.read_u32().unwrap(), MSG_DENIED);
        assert_eq!(dec.read_u32().unwrap(), 0); // RPC_MISMATCH
        assert_eq!(dec.read_u32().unwrap(), RPC_VERSION); // low
        assert_eq!(dec.read_u32().unwrap(), RPC_VERSION); // high
        assert!(dec.is_exhausted());
    }

    #[test]
    fn test_auth_error_carries_stat() {
        use crate::message::auth::auth_stat::AUTH_FAILED;

        let wire = DeniedReply::auth_error(3, AUTH_FAILED).encode();
        match RpcReply::decode(wire).unwrap() {
            RpcReply::Denied(reply) => {
                assert_eq!(reply.status, RejectStatus::AuthError { stat: AUTH_FAILED });
            }
            other => panic!("expected denied reply, got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip_accepted_variants() {
        let replies = [
            AcceptedReply::success(1, Bytes::from_static(b"okay")),
            AcceptedReply::with_status(2, AcceptStatus::ProgUnavail),
            AcceptedReply::prog_mismatch(3, 1, 4),
            AcceptedReply::with_status(4, AcceptStatus::ProcUnavail),
            AcceptedReply::with_status(5, AcceptStatus::GarbageArgs),
            AcceptedReply::with_status(6, AcceptStatus::SystemErr),
        ];

        for reply in replies {
            let decoded = RpcReply::decode(reply.encode()).unwrap();
            assert_eq!(decoded, RpcReply::Accepted(reply));
        }
    }

    #[test]
    fn test_roundtrip_denied_variants() {
        let replies = [
            DeniedReply::rpc_mismatch(10),
            DeniedReply::auth_error(11, 7),
        ];

        for reply in replies {
            let decoded = RpcReply::decode(reply.encode()).unwrap();
            assert_eq!(decoded.xid(), reply.xid);
            assert_eq!(decoded, RpcReply::Denied(reply));
        }
    }

    #[test]
    fn test_decode_rejects_call_message() {
        let mut enc = XdrEncoder::new();
        enc.write_u32(9);
        enc.write_u32(crate::message::MSG_CALL);
        assert!(matches!(
            RpcReply::decode(enc.into_bytes()),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_reply_is_underflow() {
        let wire = AcceptedReply::with_status(5, AcceptStatus::ProgUnavail).encode();
        let truncated = wire.slice(..wire.len() - 2);
        assert!(matches!(
            RpcReply::decode(truncated),
            Err(RpcError::Underflow { .. })
        ));
    }

    #[test]
    fn test_unknown_accept_code_rejected() {
        let mut enc = XdrEncoder::new();
        enc.write_u32(1);
        enc.write_u32(MSG_REPLY);
        enc.write_u32(MSG_ACCEPTED);
        OpaqueAuth::none().encode(&mut enc);
        enc.write_u32(99);
        assert!(matches!(
            RpcReply::decode(enc.into_bytes()),
            Err(RpcError::Protocol(_))
        ));
    }
}

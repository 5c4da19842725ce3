//! Authentication blobs carried by calls and replies.
//!
//! Credential and verifier *semantics* live outside this crate; here they
//! are opaque flavor-tagged byte blobs with a wire shape of
//! `flavor(4) | body(opaque<400>)`.

use bytes::Bytes;

use crate::error::{Result, RpcError};
use crate::xdr::{XdrDecoder, XdrEncoder};

/// No authentication. The only flavor this crate constructs itself.
pub const AUTH_NONE: u32 = 0;

/// Unix-style uid/gid credentials (passed through, never interpreted).
pub const AUTH_SYS: u32 = 1;

/// Largest auth body the wire format permits.
pub const MAX_AUTH_BYTES: usize = 400;

/// Status codes carried by `AUTH_ERROR` rejections.
pub mod auth_stat {
    pub const AUTH_OK: u32 = 0;
    pub const AUTH_BADCRED: u32 = 1;
    pub const AUTH_REJECTEDCRED: u32 = 2;
    pub const AUTH_BADVERF: u32 = 3;
    pub const AUTH_REJECTEDVERF: u32 = 4;
    pub const AUTH_TOOWEAK: u32 = 5;
    pub const AUTH_INVALIDRESP: u32 = 6;
    pub const AUTH_FAILED: u32 = 7;
}

/// A flavor-tagged opaque auth blob (credentials or verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Bytes,
}

impl OpaqueAuth {
    /// Create an auth blob with an arbitrary flavor and body.
    pub fn new(flavor: u32, body: Bytes) -> Self {
        Self { flavor, body }
    }

    /// The `AUTH_NONE` blob: flavor 0, empty body.
    pub fn none() -> Self {
        Self {
            flavor: AUTH_NONE,
            body: Bytes::new(),
        }
    }

    /// Write `flavor | body` in XDR form.
    pub fn encode(&self, enc: &mut XdrEncoder) {
        enc.write_u32(self.flavor);
        enc.write_var_opaque(&self.body);
    }

    /// Read `flavor | body`, rejecting bodies over [`MAX_AUTH_BYTES`].
    pub fn decode(dec: &mut XdrDecoder) -> Result<Self> {
        let flavor = dec.read_u32()?;
        let body = dec.read_var_opaque()?;
        if body.len() > MAX_AUTH_BYTES {
            return Err(RpcError::Protocol(format!(
                "auth body of {} bytes exceeds {} byte maximum",
                body.len(),
                MAX_AUTH_BYTES
            )));
        }
        Ok(Self { flavor, body })
    }
}

impl Default for OpaqueAuth {
    fn default() -> Self {
        Self::none()
    }
}

//! Portmapper (rpcbind v2) client.
//!
//! The portmapper is the well-known registry service at port 111 that
//! maps `{program, version, protocol}` to a port number. Servers are
//! not registered automatically; a process that wants to be reachable
//! through the portmapper calls [`PortmapClient::set`] itself and
//! [`PortmapClient::unset`] on the way out.
//!
//! All argument and result bodies are four-word XDR structures; `DUMP`
//! returns a boolean-chained list (a `true` word before every entry,
//! one `false` word after the last).

use tokio::net::ToSocketAddrs;

use crate::error::{Result, RpcError};
use crate::message::{AcceptStatus, RpcReply};
use crate::transport::RpcClient;
use crate::xdr::{XdrDecoder, XdrEncoder};

/// Program number of the portmapper itself.
pub const PMAP_PROGRAM: u32 = 100_000;

/// Portmapper protocol version spoken here.
pub const PMAP_VERSION: u32 = 2;

/// Conventional TCP port of the portmapper.
pub const PMAP_PORT: u16 = 111;

/// Register a mapping.
pub const PMAPPROC_SET: u32 = 1;

/// Remove a mapping.
pub const PMAPPROC_UNSET: u32 = 2;

/// Look up the port for a mapping.
pub const PMAPPROC_GETPORT: u32 = 3;

/// List all mappings.
pub const PMAPPROC_DUMP: u32 = 4;

/// Transport protocol numbers used in mappings.
pub const PROTOCOL_TCP: u32 = 6;
pub const PROTOCOL_UDP: u32 = 17;

/// One registry entry: a program/version reachable on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortmapMapping {
    pub program: u32,
    pub version: u32,
    /// [`PROTOCOL_TCP`] or [`PROTOCOL_UDP`].
    pub protocol: u32,
    /// Carried as a full word on the wire even though ports fit in 16
    /// bits.
    pub port: u32,
}

impl PortmapMapping {
    /// A TCP mapping for `program` / `version` on `port`.
    pub fn tcp(program: u32, version: u32, port: u16) -> Self {
        Self {
            program,
            version,
            protocol: PROTOCOL_TCP,
            port: u32::from(port),
        }
    }

    /// Append the four-word wire form to an encoder.
    pub fn encode_into(&self, enc: &mut XdrEncoder) {
        enc.write_u32(self.program);
        enc.write_u32(self.version);
        enc.write_u32(self.protocol);
        enc.write_u32(self.port);
    }

    /// Read the four-word wire form from a cursor.
    pub fn decode(dec: &mut XdrDecoder) -> Result<Self> {
        Ok(Self {
            program: dec.read_u32()?,
            version: dec.read_u32()?,
            protocol: dec.read_u32()?,
            port: dec.read_u32()?,
        })
    }
}

/// Client for a portmapper endpoint.
pub struct PortmapClient {
    rpc: RpcClient,
}

impl PortmapClient {
    /// Connect to a portmapper, conventionally at `host:111`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let rpc = RpcClient::connect(addr, PMAP_PROGRAM, PMAP_VERSION).await?;
        Ok(Self { rpc })
    }

    /// Ping the portmapper's NULL procedure.
    pub async fn ping(&mut self) -> Result<()> {
        let reply = self.rpc.call_null().await?;
        results(reply).map(|_| ())
    }

    /// Register a mapping. True if the portmapper accepted it.
    pub async fn set(&mut self, mapping: PortmapMapping) -> Result<bool> {
        let mut enc = XdrEncoder::new();
        mapping.encode_into(&mut enc);

        let reply = self.rpc.call(PMAPPROC_SET, enc.as_slice()).await?;
        results(reply)?.read_bool()
    }

    /// Remove the mapping for `program` / `version`. True if one was
    /// removed.
    pub async fn unset(&mut self, program: u32, version: u32) -> Result<bool> {
        // UNSET matches on program and version only; the remaining
        // words are ignored by the registry.
        let mut enc = XdrEncoder::new();
        PortmapMapping {
            program,
            version,
            protocol: 0,
            port: 0,
        }
        .encode_into(&mut enc);

        let reply = self.rpc.call(PMAPPROC_UNSET, enc.as_slice()).await?;
        results(reply)?.read_bool()
    }

    /// Look up the port serving `program` / `version` over `protocol`.
    ///
    /// `None` when nothing is registered; the wire encodes that as
    /// port 0.
    pub async fn getport(
        &mut self,
        program: u32,
        version: u32,
        protocol: u32,
    ) -> Result<Option<u16>> {
        let mut enc = XdrEncoder::new();
        PortmapMapping {
            program,
            version,
            protocol,
            port: 0,
        }
        .encode_into(&mut enc);

        let reply = self.rpc.call(PMAPPROC_GETPORT, enc.as_slice()).await?;
        let port = results(reply)?.read_u32()?;
        Ok(if port == 0 { None } else { Some(port as u16) })
    }

    /// List every mapping the portmapper holds.
    pub async fn dump(&mut self) -> Result<Vec<PortmapMapping>> {
        let reply = self.rpc.call(PMAPPROC_DUMP, &[]).await?;
        let mut dec = results(reply)?;

        let mut mappings = Vec::new();
        while dec.read_bool()? {
            mappings.push(PortmapMapping::decode(&mut dec)?);
        }
        Ok(mappings)
    }
}

/// Unwrap a successful accepted reply into its result cursor.
fn results(reply: RpcReply) -> Result<XdrDecoder> {
    match reply {
        RpcReply::Accepted(r) if r.status == AcceptStatus::Success => {
            Ok(XdrDecoder::new(r.results))
        }
        RpcReply::Accepted(r) => Err(RpcError::Protocol(format!(
            "portmap call failed: {:?} (xid {})",
            r.status, r.xid
        ))),
        RpcReply::Denied(d) => Err(RpcError::Protocol(format!(
            "portmap call denied: {:?} (xid {})",
            d.status, d.xid
        ))),
    }
}

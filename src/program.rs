//! Program registration and call dispatch.
//!
//! An [`RpcProgram`] owns an immutable `{version, procedure}` handler
//! table plus the program number, supported version range, and port
//! policy. Given a decoded call and the connection's remote endpoint it
//! produces exactly one encoded reply, on every path:
//!
//! 1. wrong program number → `PROG_UNAVAIL`
//! 2. version outside the range → `PROG_MISMATCH` with the range
//! 3. NULL procedure → `SUCCESS` with empty results, skipping the port
//!    check so liveness probes work from anywhere
//! 4. unprivileged source port under a strict policy → `SYSTEM_ERR`,
//!    handler not invoked
//! 5. unknown procedure → `PROC_UNAVAIL`
//! 6. handler runs; its error becomes `GARBAGE_ARGS` or `SYSTEM_ERR`
//!
//! # Example
//!
//! ```
//! use oncrpc::program::{Idempotency, RpcProgram};
//!
//! let program = RpcProgram::builder("echo", 200_005)
//!     .versions(1, 1)
//!     .procedure(1, 1, Idempotency::Idempotent, |_ctx, mut args| async move {
//!         let word = args.read_u32()?;
//!         let mut out = oncrpc::xdr::XdrEncoder::new();
//!         out.write_u32(word);
//!         Ok(out.into_bytes())
//!     })
//!     .build();
//! assert_eq!(program.program(), 200_005);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use crate::error::RpcError;
use crate::message::{AcceptStatus, AcceptedReply, RpcCall};
use crate::xdr::XdrDecoder;

/// First port number treated as unprivileged.
pub const MIN_UNPRIVILEGED_PORT: u16 = 1024;

/// Boxed future for procedure results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error a procedure reports back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcedureError {
    /// Arguments could not be decoded; answered with `GARBAGE_ARGS`.
    #[error("arguments could not be decoded")]
    GarbageArgs,

    /// Any other failure; answered with `SYSTEM_ERR`.
    #[error("procedure failed: {0}")]
    System(String),
}

impl From<RpcError> for ProcedureError {
    /// Decode failures map to `GarbageArgs` so handlers can read
    /// arguments with `?` directly.
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Underflow { .. } | RpcError::Protocol(_) => ProcedureError::GarbageArgs,
            other => ProcedureError::System(other.to_string()),
        }
    }
}

/// Result type for procedure handlers: encoded result bytes or an error.
pub type ProcedureResult = std::result::Result<Bytes, ProcedureError>;

/// Metadata handed to a procedure along with its argument cursor.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The decoded call header.
    pub call: RpcCall,
    /// Remote endpoint the call arrived from.
    pub remote: SocketAddr,
}

/// A registered procedure body.
pub trait Procedure: Send + Sync + 'static {
    /// Run the procedure, producing encoded result bytes.
    fn call(&self, ctx: CallContext, args: XdrDecoder) -> BoxFuture<'static, ProcedureResult>;
}

/// Adapter implementing [`Procedure`] for async closures.
pub struct FnProcedure<F, Fut>
where
    F: Fn(CallContext, XdrDecoder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnProcedure<F, Fut>
where
    F: Fn(CallContext, XdrDecoder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    /// Wrap an async closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Procedure for FnProcedure<F, Fut>
where
    F: Fn(CallContext, XdrDecoder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    fn call(&self, ctx: CallContext, args: XdrDecoder) -> BoxFuture<'static, ProcedureResult> {
        Box::pin((self.f)(ctx, args))
    }
}

/// Whether a procedure is safe to re-execute on a retransmitted call.
///
/// Consulted by the transport shell's duplicate-call cache; the
/// dispatcher itself does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Safe to re-run; duplicate calls may execute again.
    Idempotent,
    /// Side-effecting; duplicate calls are answered from the cache.
    NonIdempotent,
}

/// Entry for a registered procedure.
struct ProcedureEntry {
    handler: Box<dyn Procedure>,
    idempotent: bool,
}

/// Builder for [`RpcProgram`].
pub struct RpcProgramBuilder {
    name: String,
    program: u32,
    low_version: u32,
    high_version: u32,
    allow_insecure_ports: bool,
    procedures: HashMap<(u32, u32), ProcedureEntry>,
}

impl RpcProgramBuilder {
    /// Supported version range, inclusive on both ends.
    pub fn versions(mut self, low: u32, high: u32) -> Self {
        debug_assert!(low <= high);
        self.low_version = low;
        self.high_version = high;
        self
    }

    /// Accept non-NULL calls from unprivileged (≥ 1024) source ports.
    /// Off by default.
    pub fn allow_insecure_ports(mut self, allow: bool) -> Self {
        self.allow_insecure_ports = allow;
        self
    }

    /// Register an async closure for `{version, procedure}`.
    ///
    /// Procedure 0 is the NULL procedure and is answered by the
    /// dispatcher itself; registrations for it are never consulted.
    pub fn procedure<F, Fut>(
        self,
        version: u32,
        procedure: u32,
        idempotency: Idempotency,
        f: F,
    ) -> Self
    where
        F: Fn(CallContext, XdrDecoder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.procedure_handler(version, procedure, idempotency, FnProcedure::new(f))
    }

    /// Register a [`Procedure`] implementation for `{version, procedure}`.
    pub fn procedure_handler<P>(
        mut self,
        version: u32,
        procedure: u32,
        idempotency: Idempotency,
        handler: P,
    ) -> Self
    where
        P: Procedure,
    {
        self.procedures.insert(
            (version, procedure),
            ProcedureEntry {
                handler: Box::new(handler),
                idempotent: idempotency == Idempotency::Idempotent,
            },
        );
        self
    }

    /// Finish the registration. The program is immutable afterwards.
    pub fn build(self) -> RpcProgram {
        RpcProgram {
            name: self.name,
            program: self.program,
            low_version: self.low_version,
            high_version: self.high_version,
            allow_insecure_ports: self.allow_insecure_ports,
            procedures: self.procedures,
        }
    }
}

/// An immutable program registration plus its dispatch logic.
///
/// Safe to share across connection tasks behind an `Arc`; nothing in it
/// mutates after [`RpcProgramBuilder::build`].
pub struct RpcProgram {
    name: String,
    program: u32,
    low_version: u32,
    high_version: u32,
    allow_insecure_ports: bool,
    procedures: HashMap<(u32, u32), ProcedureEntry>,
}

impl RpcProgram {
    /// Start building a program registration.
    ///
    /// Defaults: versions 1..=1, insecure ports refused, no procedures.
    pub fn builder(name: impl Into<String>, program: u32) -> RpcProgramBuilder {
        RpcProgramBuilder {
            name: name.into(),
            program,
            low_version: 1,
            high_version: 1,
            allow_insecure_ports: false,
            procedures: HashMap::new(),
        }
    }

    /// Service name used in log events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered program number.
    pub fn program(&self) -> u32 {
        self.program
    }

    /// Lowest supported version.
    pub fn low_version(&self) -> u32 {
        self.low_version
    }

    /// Highest supported version.
    pub fn high_version(&self) -> u32 {
        self.high_version
    }

    /// Whether non-NULL calls from unprivileged ports are accepted.
    pub fn allows_insecure_ports(&self) -> bool {
        self.allow_insecure_ports
    }

    /// Retransmission-safety flag for `{version, procedure}`.
    ///
    /// The NULL procedure is always idempotent. Unregistered procedures
    /// report idempotent; they have no side effects to protect.
    pub fn is_idempotent(&self, version: u32, procedure: u32) -> bool {
        if procedure == 0 {
            return true;
        }
        self.procedures
            .get(&(version, procedure))
            .map_or(true, |entry| entry.idempotent)
    }

    /// Route one decoded call to its procedure and encode the reply.
    ///
    /// `args` is the message cursor positioned just past the call
    /// header. Always returns reply bytes; no call goes unanswered.
    pub async fn dispatch(&self, call: RpcCall, remote: SocketAddr, args: XdrDecoder) -> Bytes {
        let xid = call.xid;

        if call.program != self.program {
            tracing::warn!(
                "{}: program {} unavailable (xid {})",
                self.name,
                call.program,
                xid
            );
            return AcceptedReply::with_status(xid, AcceptStatus::ProgUnavail).encode();
        }

        if call.version < self.low_version || call.version > self.high_version {
            tracing::warn!(
                "{}: version {} outside {}..={} (xid {})",
                self.name,
                call.version,
                self.low_version,
                self.high_version,
                xid
            );
            return AcceptedReply::prog_mismatch(xid, self.low_version, self.high_version)
                .encode();
        }

        // NULL answers before the port check so liveness probes work
        // even from disallowed ports.
        if call.is_null_procedure() {
            tracing::debug!("{}: null procedure (xid {})", self.name, xid);
            return AcceptedReply::success(xid, Bytes::new()).encode();
        }

        if !self.allow_insecure_ports && remote.port() >= MIN_UNPRIVILEGED_PORT {
            tracing::warn!(
                "{}: refusing call from unprivileged port {} (xid {})",
                self.name,
                remote.port(),
                xid
            );
            return AcceptedReply::with_status(xid, AcceptStatus::SystemErr).encode();
        }

        let Some(entry) = self.procedures.get(&(call.version, call.procedure)) else {
            tracing::warn!(
                "{}: procedure {} unavailable for version {} (xid {})",
                self.name,
                call.procedure,
                call.version,
                xid
            );
            return AcceptedReply::with_status(xid, AcceptStatus::ProcUnavail).encode();
        };

        tracing::debug!(
            "{}: dispatching procedure {} (xid {})",
            self.name,
            call.procedure,
            xid
        );
        let ctx = CallContext { call, remote };
        match entry.handler.call(ctx, args).await {
            Ok(results) => AcceptedReply::success(xid, results).encode(),
            Err(ProcedureError::GarbageArgs) => {
                tracing::warn!("{}: garbage arguments (xid {})", self.name, xid);
                AcceptedReply::with_status(xid, AcceptStatus::GarbageArgs).encode()
            }
            Err(ProcedureError::System(message)) => {
                tracing::warn!("{}: procedure failed: {} (xid {})", self.name, message, xid);
                AcceptedReply::with_status(xid, AcceptStatus::SystemErr).encode()
            }
        }
    }
}

//! Loopback example: an RPC server and client in one process.
//!
//! This example demonstrates:
//! - Registering a program with the builder pattern
//! - Serving it on an ephemeral TCP port
//! - Driving it with `RpcClient`, including a NULL ping
//!
//! # Running
//!
//! ```sh
//! cargo run --example loopback
//! ```

use oncrpc::message::{AcceptStatus, RpcReply};
use oncrpc::program::{Idempotency, RpcProgram};
use oncrpc::transport::{RpcClient, RpcServer};
use oncrpc::xdr::{XdrDecoder, XdrEncoder};

const PROGRAM: u32 = 200_001;
const VERSION: u32 = 1;
const PROC_REVERSE: u32 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Procedure 1 reverses a variable-length opaque.
    let program = RpcProgram::builder("reverse", PROGRAM)
        .versions(VERSION, VERSION)
        .allow_insecure_ports(true)
        .procedure(
            VERSION,
            PROC_REVERSE,
            Idempotency::Idempotent,
            |_ctx, mut args| async move {
                let mut data = args.read_var_opaque()?.to_vec();
                data.reverse();
                let mut out = XdrEncoder::new();
                out.write_var_opaque(&data);
                Ok(out.into_bytes())
            },
        )
        .build();

    let server = RpcServer::builder(program).bind("127.0.0.1:0").await?;
    println!("serving program {} on {}", PROGRAM, server.local_addr());

    let mut client = RpcClient::connect(server.local_addr(), PROGRAM, VERSION).await?;

    client.call_null().await?;
    println!("null ping answered");

    let mut enc = XdrEncoder::new();
    enc.write_var_opaque(b"remote procedure call");
    let reply = client.call(PROC_REVERSE, enc.as_slice()).await?;

    match reply {
        RpcReply::Accepted(r) if r.status == AcceptStatus::Success => {
            let mut dec = XdrDecoder::new(r.results);
            let reversed = dec.read_var_opaque()?;
            println!("reversed: {}", String::from_utf8_lossy(&reversed));
        }
        other => eprintln!("call failed: {other:?}"),
    }

    server.shutdown().await;
    Ok(())
}

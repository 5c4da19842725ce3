//! rpcinfo: list the registrations a portmapper holds.
//!
//! This example demonstrates:
//! - Connecting to a portmapper endpoint
//! - The DUMP listing and GETPORT lookups
//!
//! # Running
//!
//! ```sh
//! cargo run --example rpcinfo -- 127.0.0.1:111
//! cargo run --example rpcinfo -- 127.0.0.1:111 100003
//! ```

use oncrpc::portmap::{PortmapClient, PROTOCOL_TCP, PROTOCOL_UDP};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:111".to_string());

    let mut client = PortmapClient::connect(addr.as_str()).await?;

    client.ping().await?;
    println!("portmapper at {} is alive", addr);

    println!("   program vers proto   port");
    for mapping in client.dump().await? {
        let proto = match mapping.protocol {
            PROTOCOL_TCP => "tcp",
            PROTOCOL_UDP => "udp",
            _ => "?",
        };
        println!(
            "{:>10} {:>4} {:>5} {:>6}",
            mapping.program, mapping.version, proto, mapping.port
        );
    }

    if let Some(spec) = std::env::args().nth(2) {
        let program: u32 = spec.parse()?;
        match client.getport(program, 1, PROTOCOL_TCP).await? {
            Some(port) => println!("program {} version 1 tcp -> port {}", program, port),
            None => println!("program {} version 1 tcp is not registered", program),
        }
    }

    Ok(())
}

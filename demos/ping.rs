//! Two engines over a loopback link exchanging the built-in ping.
//!
//! Run with: `cargo run --example ping`

use std::time::Duration;

use cmdlink::{loopback_pair, CmdLink, OP_PING};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let ((host_wire, host_events), (slave_wire, slave_events)) = loopback_pair();

    // Responder side: answers pings with "ok".
    let _slave = CmdLink::builder()
        .ping()
        .start(Box::new(slave_wire), slave_events);

    // Initiator side: observes the completed exchange.
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let host = CmdLink::builder()
        .operation(OP_PING)
        .observer(move |event| {
            let _ = done_tx.send((event.op_code, event.payload.clone(), event.timeout));
        })
        .start(Box::new(host_wire), host_events);

    host.ping().expect("link is idle");

    match tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await {
        Ok(Some((op_code, payload, timeout))) => {
            println!(
                "ping exchange finished: op=0x{:02X} payload={:?} timeout={}",
                op_code,
                String::from_utf8_lossy(&payload),
                timeout
            );
        }
        _ => eprintln!("no ping response"),
    }
}

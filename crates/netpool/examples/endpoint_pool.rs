//! Endpoint pooling example.
//!
//! Starts two local echo servers, pools connections to them through a
//! manager, takes one endpoint out of rotation and prints pool status
//! along the way.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=netpool=debug cargo run --example endpoint_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use netpool::{ConnectionManager, PoolConfig, PoolStatus, TcpConnection, TcpConnector};
use netpool_testing::{MockServer, refused_address};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Endpoint Pool Example ===\n");

    let primary = MockServer::start().await?;
    let secondary = MockServer::start().await?;
    let dead = refused_address()?;

    let config = PoolConfig::new()
        .idle_ttl(Duration::from_secs(60))
        .retry_interval(Duration::from_secs(5));
    let connector = TcpConnector::new()
        .connect_timeout(Duration::from_secs(2))
        .rw_timeout(Duration::from_secs(2));

    let manager: Arc<ConnectionManager<TcpConnection>> =
        Arc::new(ConnectionManager::new(connector, config));
    let list = format!("{}|4, {}|4, {}", primary.address(), secondary.address(), dead);
    manager.add_list(&list, 2)?;
    let reaper = manager.spawn_reaper(Duration::from_secs(30));

    println!("Endpoints:");
    print_status(&manager.status());

    // Pools are blocking; keep them off the async workers.
    let worker = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || {
        println!("\n1. Round-robin requests:");
        for i in 0..6 {
            match worker.acquire() {
                Ok(mut conn) => {
                    let message = format!("request {i}");
                    conn.write_all(message.as_bytes()).unwrap();
                    let mut reply = vec![0u8; message.len()];
                    conn.read_exact(&mut reply).unwrap();
                    println!(
                        "  {} -> {}",
                        conn.address(),
                        String::from_utf8_lossy(&reply)
                    );
                    worker.release(conn, true);
                }
                Err(e) => println!("  request {i} failed: {e}"),
            }
        }

        println!("\n2. Keyed requests:");
        for key in ["alice", "bob", "alice"] {
            match worker.acquire_by_key(key) {
                Ok(conn) => {
                    println!("  {key} -> {}", conn.address());
                    worker.release(conn, true);
                }
                Err(e) => println!("  {key} failed: {e}"),
            }
        }
    })
    .await?;

    println!("\nAfter traffic:");
    print_status(&manager.status());

    println!("\n3. Removing {}:", secondary.address());
    let worker = Arc::clone(&manager);
    let address = secondary.address();
    tokio::task::spawn_blocking(move || {
        let held = worker.acquire_from(&address).unwrap();
        worker.remove(&address);
        println!("  draining pools: {}", worker.draining_count());
        let outcome = worker.release(held, true);
        println!("  last connection returned: {outcome:?}");
        println!("  draining pools: {}", worker.draining_count());
    })
    .await?;

    println!("\nFinal status:");
    print_status(&manager.status());

    reaper.shutdown().await;
    println!(
        "\nServers accepted {} and {} connections",
        primary.accepted_count(),
        secondary.accepted_count()
    );
    Ok(())
}

fn print_status(status: &[PoolStatus]) {
    for s in status {
        println!(
            "  [{}] {:<22} alive={:<5} live={} idle={} in_use={} acquired={} max={}",
            s.index,
            s.address,
            s.alive,
            s.live,
            s.idle,
            s.in_use,
            s.total_acquired,
            if s.max == 0 { "unbounded".to_string() } else { s.max.to_string() },
        );
    }
}

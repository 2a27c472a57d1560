//! End-to-end throughput benchmark for Beacon.
//!
//! Every client sends pulses as fast as it can and counts the pulse events
//! it receives: confirmations of its own pulses and every other client's
//! pulses. Measures actual WebSocket throughput with real network I/O.

use beacon_protocol::codec::{decode_json, encode_json};
use beacon_protocol::{ClientFrame, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    confirmed: AtomicU64,
    received: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.sent.store(0, Ordering::SeqCst);
        self.confirmed.store(0, Ordering::SeqCst);
        self.received.store(0, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Beacon End-to-End Pulse Benchmark                    ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_pulse_benchmark(num_clients).await;
}

async fn run_pulse_benchmark(num_clients: usize) {
    println!("📊 Pulse Benchmark: {} clients", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, counters, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.reset();
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let sent = counters.sent.load(Ordering::SeqCst);
    let confirmed = counters.confirmed.load(Ordering::SeqCst);
    let received = counters.received.load(Ordering::SeqCst);

    // Each accepted pulse should reach every other client once.
    let expected = confirmed * (num_clients as u64).saturating_sub(1);
    let delivery_ratio = if expected == 0 {
        0.0
    } else {
        received as f64 / expected as f64 * 100.0
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed
    );
    println!(
        "║  Pulses Sent:          {:>10.0} pulse/s                  ║",
        sent as f64 / elapsed
    );
    println!(
        "║  Pulses Confirmed:     {:>10.0} pulse/s                  ║",
        confirmed as f64 / elapsed
    );
    println!(
        "║  Fan-out Received:     {:>10.0} event/s                  ║",
        received as f64 / elapsed
    );
    println!(
        "║  Delivery Ratio:       {:>10.1}%                          ║",
        delivery_ratio
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}

async fn run_client(
    client_id: usize,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    // Skip the connected event.
    let _ = receiver.next().await;

    barrier.wait().await;

    // Spread the clients over a small grid around Paris.
    let lat = 48.8 + (client_id % 100) as f64 * 0.001;
    let lon = 2.3 + (client_id / 100) as f64 * 0.001;

    let recv_counters = Arc::clone(&counters);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let Ok(Message::Text(text)) = result else {
                continue;
            };
            match decode_json::<ServerEvent>(&text) {
                Ok(ServerEvent::PulseConfirmed { .. }) => {
                    recv_counters.confirmed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ServerEvent::NewPulse { .. }) => {
                    recv_counters.received.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    });

    loop {
        let frame = encode_json(&ClientFrame::send_pulse(now_millis(), lat, lon))?;
        if sender.send(Message::Text(frame)).await.is_err() {
            break;
        }
        counters.sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

//! Countdown drill: run the coordinator standalone, no radio required.
//!
//! Run with: cargo run --example countdown_drill

use redbutton_ble::{CountdownCoordinator, CountdownEvent, TracingFeedback};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redbutton_ble=info".parse().unwrap()),
        )
        .init();

    let countdown = CountdownCoordinator::new(10, Duration::from_secs(1), Arc::new(TracingFeedback));
    let mut events = countdown.subscribe();

    println!("Drill: starting a 10-second countdown. Ctrl+C cancels.\n");
    countdown.start();
    println!("  [{}]", countdown.display());

    loop {
        tokio::select! {
            Ok(event) = events.recv() => match event {
                CountdownEvent::Tick { .. } => println!("  [{}]", countdown.display()),
                CountdownEvent::Finished => {
                    println!("\nBoom. (Terminal haptic fired.)");
                    break;
                }
                CountdownEvent::Cancelled => {
                    println!("\nCancelled; display back to [{}]", countdown.display());
                    break;
                }
                CountdownEvent::Started { .. } => {}
            },
            _ = tokio::signal::ctrl_c() => {
                countdown.cancel();
            }
        }
    }
}

//! Full console demo: discover the launcher, deliver the command, ride
//! the countdown.
//!
//! Run with: cargo run --example launch_console

use redbutton_ble::{AppController, ControllerEvent, CountdownEvent, LaunchConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redbutton_ble=debug".parse().unwrap()),
        )
        .init();

    let config = LaunchConfig::default();
    println!("Hunting for \"{}\"...", config.target_name);
    println!("Make sure the launch console is powered on!\n");

    let controller = AppController::bluetooth(config).await?;
    let mut events = controller.subscribe();
    let mut countdown = controller.subscribe_countdown();

    controller.start_scan().await?;

    loop {
        tokio::select! {
            Ok(event) = events.recv() => match event {
                ControllerEvent::ScanStarted => println!("Scanning..."),
                ControllerEvent::PeerDiscovered { address } => {
                    println!("Found launch console at {}", address);
                }
                ControllerEvent::LaunchCommandSent { address } => {
                    println!("Launch command delivered to {}", address);
                }
                ControllerEvent::CountdownStarted { remaining } => {
                    println!("Countdown running: T-minus {}", remaining);
                }
                ControllerEvent::ScanStopped => {
                    if controller.peers().is_empty() {
                        println!("No console found within the scan window.");
                        break;
                    }
                }
                ControllerEvent::OperationFailed { context, reason } => {
                    println!("{} failed: {}", context, reason);
                }
            },
            Ok(event) = countdown.recv() => match event {
                CountdownEvent::Tick { remaining } => println!("  {:>2}", remaining),
                CountdownEvent::Finished => {
                    println!("Liftoff!");
                    break;
                }
                CountdownEvent::Cancelled => {
                    println!("Countdown cancelled.");
                    break;
                }
                CountdownEvent::Started { .. } => {}
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                break;
            }
        }
    }

    controller.shutdown().await?;
    println!("Done.");

    Ok(())
}

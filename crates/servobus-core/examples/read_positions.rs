//! Servo Bus Test Tool
//!
//! Pings a set of servos, then polls their positions with one sync read per
//! cycle and prints the unwrapped multi-turn position of each.
//!
//! Usage:
//!   cargo run --example read_positions -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first servo bus adapter found)
//!   --baud RATE       Baud rate (default: 1000000)
//!   --ids LIST        Comma separated servo addresses (default: 1)
//!   --cycles N        Number of sync reads (default: 20)
//!   --config FILE     Load settings from a JSON config file
//!   --sim             Use a simulated bus instead of a serial port
//!   --debug           Log every packet

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use servobus_core::prelude::*;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servobus_core=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = BusConfig::default();
    let mut ids: Vec<u8> = vec![1];
    let mut cycles = 20usize;
    let mut simulate = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.port = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.baud_rate = args[i].parse().unwrap_or(config.baud_rate);
                }
            }
            "--ids" => {
                i += 1;
                if i < args.len() {
                    ids = args[i]
                        .split(',')
                        .filter_map(|s| s.trim().parse().ok())
                        .collect();
                }
            }
            "--cycles" | "-n" => {
                i += 1;
                if i < args.len() {
                    cycles = args[i].parse().unwrap_or(cycles);
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    match BusConfig::load(Path::new(&args[i])) {
                        Ok(loaded) => config = loaded,
                        Err(e) => {
                            eprintln!("Failed to load {}: {}", args[i], e);
                            std::process::exit(1);
                        }
                    }
                }
            }
            "--sim" => simulate = true,
            "--debug" => config.debug = true,
            "--help" | "-h" => {
                print_usage();
                return;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if ids.is_empty() {
        eprintln!("No servo addresses given");
        std::process::exit(1);
    }

    let result = if simulate {
        let sim = SimulatedBus::with_servos(config.model, &ids).with_jitter(1, 2);
        run(Bus::from_config(sim, &config), &ids, cycles)
    } else {
        if config.port.is_none() {
            config.port = find_adapter()
                .or_else(|| list_ports().into_iter().next())
                .map(|p| p.name);
        }
        println!("Port: {}", config.port.as_deref().unwrap_or("<none>"));
        match Bus::open(&config) {
            Ok(bus) => run(bus, &ids, cycles),
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}

fn run<T: ByteTransport>(mut bus: Bus<T>, ids: &[u8], cycles: usize) -> Result<(), ProtocolError> {
    println!("Model: {:?}, timeout: {:?}", bus.model(), bus.timeout());

    for &id in ids {
        match bus.ping(id) {
            Ok(response) if response.flags().is_ok() => println!("  servo {:3}: ok", id),
            Ok(response) => println!("  servo {:3}: status {:#04x}", id, response.status),
            Err(e) => println!("  servo {:3}: {}", id, e),
        }
    }

    let mut encoders: BTreeMap<u8, EncoderUnwrapper> = BTreeMap::new();
    for cycle in 0..cycles {
        let samples = bus.sync_read_positions(ids)?;
        let mut line = format!("[{:3}]", cycle);
        for (id, sample) in &samples {
            let encoder = encoders.entry(*id).or_default();
            encoder.update(sample.position);
            line.push_str(&format!(
                "  #{}: {:4} ({:7.1} deg total)",
                id,
                sample.position,
                encoder.degrees()
            ));
        }
        println!("{}", line);
        std::thread::sleep(Duration::from_millis(50));
    }

    let counters = bus.counters();
    println!(
        "tx {} bytes / {} packets, rx {} bytes / {} packets",
        counters.tx_bytes, counters.tx_packets, counters.rx_bytes, counters.rx_packets
    );
    Ok(())
}

fn print_usage() {
    println!("Usage: read_positions [--port PORT] [--baud RATE] [--ids 1,2,3] [--cycles N] [--config FILE] [--sim] [--debug]");
}

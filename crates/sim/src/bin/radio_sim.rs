//! radio simulation for wandlink devices

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use wandlink_radio::framing::fold_hardware_id;
use wandlink_radio::{DeviceId, TransceiverSettings};
use wandlink_sim::{run_network, NetworkReport, SimulationPresets};

const FACTORY_IDS: [u64; 6] = [
    0x0012_4b00_1c9a_51a2,
    0x0012_4b00_1c9a_0c17,
    0x0012_4b00_1d03_9e03,
    0x0012_4b00_1d03_2210,
    0x0012_4b00_1e44_7f44,
    0x0012_4b00_1e44_0b80,
];
const ROUNDS: u32 = 10;
const ROUND_PERIOD: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "Wandlink Radio Simulation".bright_blue().bold());
    println!("{}", "=========================".bright_blue());
    println!();

    let settings = TransceiverSettings {
        base_receive_window_ns: 10_000_000,
        ..Default::default()
    };

    let test_scenarios = vec![
        ("Good Conditions", SimulationPresets::good_conditions()),
        ("Average Conditions", SimulationPresets::average_conditions()),
        ("Poor Conditions", SimulationPresets::poor_conditions()),
        ("Extreme Conditions", SimulationPresets::extreme_conditions()),
    ];

    let progress = ProgressBar::new(test_scenarios.len() as u64);
    progress.set_style(ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}")?);

    let devices: Vec<DeviceId> = FACTORY_IDS.iter().map(|&id| fold_hardware_id(id)).collect();

    let mut results = Vec::new();
    for (name, config) in test_scenarios {
        progress.set_message(name);
        let report = run_network(config.clone(), settings.clone(), &devices, ROUNDS, ROUND_PERIOD).await?;
        results.push((name, config, report));
        progress.inc(1);
    }
    progress.finish_and_clear();

    for (name, config, report) in &results {
        println!("{}", format!("\n>>> {}", name).bright_green().bold());
        println!("Packet Loss: {}%", (config.packet_loss * 100.0) as u32);
        println!("Busy Channel: {}%", (config.busy_probability * 100.0) as u32);
        println!("Mean RSSI: {} dBm", config.rssi_mean_dbm);
        print_report(report);
        println!("{}", "-".repeat(50));
    }

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}

fn print_report(report: &NetworkReport) {
    let medium = &report.medium;
    println!(
        "Medium: {} frames sent, {} delivered, {} dropped, {} missed, {} busy, {} faults",
        medium.frames_sent,
        medium.frames_delivered,
        medium.frames_dropped,
        medium.frames_missed,
        medium.frames_busy,
        medium.faults
    );

    for device in &report.devices {
        let link = &device.link;
        println!(
            "  {:>5}: leader {:>5} at {} hops, {} neighbours, strongest link {}%, {} failed sends, {} rejected frames",
            device.uid,
            device.min_uid,
            device.hops,
            device.neighbours.len(),
            device.strongest_link,
            device.send_failures,
            link.short_packets + link.bad_headers + link.weak_signals + link.too_long + link.integrity_failures,
        );
    }

    if report.converged() {
        println!("{}", "Leader election converged".bright_yellow());
    } else {
        println!("{}", "Leader election did not converge".bright_red());
    }
}

//! MIDI sniffer for debugging the device link
//!
//! Prints every inbound message as hex, with a decoded summary for M300
//! SysEx frames and completed NRPN updates.

use anyhow::{Context, Result};
use colored::*;
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::midi::{find_input_port, format_hex, list_input_ports, list_output_ports, MidiMessage};
use crate::nrpn::NrpnParser;
use crate::sysex::{domain_name, is_device_frame, parse_frame, BulkRecord, ParameterChange};

/// Captured inbound message
#[derive(Debug, Clone)]
pub struct SnifferEvent {
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

/// Open the first input port matching `pattern` and print traffic until Ctrl+C
pub async fn run_sniffer(pattern: &str) -> Result<()> {
    println!("{}", "=== M300 MIDI Sniffer ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let (event_tx, mut event_rx) = mpsc::channel(1000);
    let (_conn, port_name) = connect_input(pattern, event_tx)?;

    println!("Listening on {}", port_name.bright_white());
    println!("{}", "Format: [timestamp] | HEX => DECODED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let mut nrpn = NrpnParser::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                print_event(&event, &mut nrpn);
            }
            _ = &mut ctrl_c => break,
        }
    }

    println!("\n{}", "Sniffer stopped".yellow());
    Ok(())
}

fn connect_input(
    pattern: &str,
    event_tx: mpsc::Sender<SnifferEvent>,
) -> Result<(MidiInputConnection<()>, String)> {
    let mut midi_in = MidiInput::new("M300-Sniffer").context("Failed to create MIDI input")?;
    midi_in.ignore(Ignore::TimeAndActiveSense);

    let (port, name) = find_input_port(&midi_in, pattern)
        .with_context(|| format!("No input port found matching pattern: {}", pattern))?;

    info!("Connecting to: {}", name);
    let start_time = Instant::now();
    let conn = midi_in
        .connect(
            &port,
            "M300-Sniffer",
            move |_timestamp, data, _| {
                let event = SnifferEvent {
                    timestamp_ms: start_time.elapsed().as_millis() as u64,
                    data: data.to_vec(),
                };
                let _ = event_tx.try_send(event);
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", name, e))?;

    Ok((conn, name))
}

fn print_event(event: &SnifferEvent, nrpn: &mut NrpnParser) {
    let timestamp = format!("{:08}", event.timestamp_ms);
    let hex = format_hex(&event.data);
    let message = MidiMessage::parse(&event.data);

    let hex_colored = match &message {
        Some(MidiMessage::SysEx { .. }) => hex.bright_magenta(),
        Some(MidiMessage::ControlChange { .. }) => hex.bright_yellow(),
        Some(_) => hex.normal(),
        None => hex.bright_black(),
    };

    let decoded = match &message {
        Some(MidiMessage::SysEx { data }) => describe_sysex(data),
        Some(MidiMessage::ControlChange { cc, value, .. }) => {
            let base = message.as_ref().map(ToString::to_string).unwrap_or_default();
            match nrpn.feed(*cc, *value) {
                Some(update) => format!(
                    "{} | NRPN domain {} param {} = {}",
                    base, update.domain, update.param, update.value
                ),
                None => base,
            }
        }
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let decoded = if decoded.is_empty() {
        String::new()
    } else {
        format!(" => {}", decoded.bright_blue())
    };

    println!("[{}ms] | {}{}", timestamp.dimmed(), hex_colored, decoded);
}

/// One-line summary of a SysEx frame
pub fn describe_sysex(bytes: &[u8]) -> String {
    if !is_device_frame(bytes) {
        return format!("SysEx {} bytes (not M300)", bytes.len());
    }
    let frame = match parse_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => return format!("M300 malformed: {}", e),
    };

    let prefix = format!(
        "M300 {} ch:{} type:0x{:02X}",
        frame.class, frame.channel, frame.type_byte
    );

    if frame.class.is_bulk() {
        return match BulkRecord::from_frame(&frame) {
            Ok(record) => format!(
                "{} | {} #{} ({} bytes) checksum {} flags {}",
                prefix,
                record.label(),
                record.index,
                record.data.len(),
                if record.checksum_ok() { "ok" } else { "BAD" },
                if record.flags_ok() { "ok" } else { "BAD" },
            ),
            Err(e) => format!("{} | bad bulk: {}", prefix, e),
        };
    }

    match ParameterChange::from_frame(&frame) {
        Ok(change) => format!(
            "{} | {} param {} = {}",
            prefix,
            domain_name(change.domain).unwrap_or("unknown"),
            change.param,
            change.value
        ),
        Err(_) => format!("{} | {} payload bytes", prefix, frame.payload.len()),
    }
}

/// List all ports in a formatted way
pub fn list_ports_formatted() -> Result<()> {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (title, ports) in [
        ("Input Ports:", list_input_ports()?),
        ("Output Ports:", list_output_ports()?),
    ] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for (index, name) in ports.iter().enumerate() {
            let marker = if name.to_lowercase().contains("m300") {
                "[M300]".bright_green()
            } else {
                format!("[{}]", index).normal()
            };
            println!("  {} {}", marker, name);
        }
    }

    println!();
    Ok(())
}

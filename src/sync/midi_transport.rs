//! Wires a real MIDI input port to an `MtcSource` via `midir`, feeding
//! raw bytes from the hardware/software MIDI transport into the decoder.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::Mutex;

use super::MtcSource;

/// Owns the live `midir` connection; dropping it closes the port.
pub struct MidiMtcInput {
    _connection: MidiInputConnection<()>,
}

impl MidiMtcInput {
    /// Opens the named input port and forwards every message byte-for-byte
    /// into `source`. `port_name_contains` matches case-insensitively
    /// against the substring of an available port's name.
    pub fn open(port_name_contains: &str, source: Arc<Mutex<MtcSource>>) -> Result<Self> {
        let mut input = MidiInput::new("framesync-compositor-mtc").context("creating MIDI input client")?;
        input.ignore(Ignore::None);

        let port = input
            .ports()
            .into_iter()
            .find(|p| {
                input
                    .port_name(p)
                    .map(|name| name.to_lowercase().contains(&port_name_contains.to_lowercase()))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no MIDI input port matching \"{port_name_contains}\""))?;

        let port_name = input.port_name(&port).unwrap_or_default();

        let connection = input
            .connect(
                &port,
                "framesync-compositor-mtc-in",
                move |_timestamp_us, bytes, source| {
                    source.lock().feed(bytes);
                },
                source,
            )
            .map_err(|e| anyhow!("connecting to MIDI port \"{port_name}\": {e}"))?;

        Ok(Self {
            _connection: connection,
        })
    }

    pub fn list_port_names() -> Result<Vec<String>> {
        let mut input = MidiInput::new("framesync-compositor-mtc-enum").context("creating MIDI input client")?;
        input.ignore(Ignore::None);
        Ok(input
            .ports()
            .iter()
            .filter_map(|p| input.port_name(p).ok())
            .collect())
    }
}

//! OSC transport: receives `rosc`-encoded packets over UDP and turns
//! them into `Command`s for the router's queue.

use std::net::UdpSocket;

use anyhow::{Context, Result};
use rosc::{OscMessage, OscPacket, OscType};

use super::{Command, CommandQueue};

pub struct OscServer {
    socket: UdpSocket,
}

impl OscServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).with_context(|| format!("binding OSC socket on {addr}"))?;
        socket.set_nonblocking(true).context("setting OSC socket non-blocking")?;
        Ok(Self { socket })
    }

    /// Drains all pending datagrams without blocking, pushing decoded
    /// commands onto `queue`. Malformed packets are logged and skipped.
    pub fn poll(&self, queue: &CommandQueue) {
        let mut buf = [0u8; 4096];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _addr)) => match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => self.dispatch_packet(packet, queue),
                    Err(err) => log::warn!("malformed OSC packet: {err:?}"),
                },
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("OSC socket error: {e}");
                    break;
                }
            }
        }
    }

    fn dispatch_packet(&self, packet: OscPacket, queue: &CommandQueue) {
        match packet {
            OscPacket::Message(msg) => self.dispatch_message(msg, queue),
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    self.dispatch_packet(packet, queue);
                }
            }
        }
    }

    fn dispatch_message(&self, msg: OscMessage, queue: &CommandQueue) {
        let args = msg.args.iter().map(osc_arg_to_string).collect();
        let command = Command { path: msg.addr, args };
        if queue.sender().try_send(command).is_err() {
            log::warn!("command queue full, dropping OSC message");
        }
    }
}

fn osc_arg_to_string(arg: &OscType) -> String {
    match arg {
        OscType::Int(v) => v.to_string(),
        OscType::Float(v) => v.to_string(),
        OscType::Double(v) => v.to_string(),
        OscType::String(v) => v.clone(),
        OscType::Bool(v) => v.to_string(),
        other => format!("{other:?}"),
    }
}

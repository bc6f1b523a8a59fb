//! pnet-based live capture.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pcap_parser::Linktype;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};

use super::CaptureSource;
use crate::domain::{CaptureFrame, Timestamp};
use crate::error::CaptureError;

/// Live capture on a network interface using the pnet library.
///
/// pnet hands us Ethernet frames, so the datalink type is always
/// Ethernet.
pub struct PnetCapture {
    name: String,
    rx: Box<dyn DataLinkReceiver>,
    running: Arc<AtomicBool>,
}

impl PnetCapture {
    /// Open a capture channel on the named interface.
    ///
    /// Blocks until the interface is ready. `read_timeout` bounds how long a
    /// single read waits before the running flag is checked again.
    pub fn open(interface_name: &str, read_timeout: Duration) -> Result<Self, CaptureError> {
        let interface = find_interface(interface_name)?;

        let config = Config {
            read_timeout: Some(read_timeout),
            ..Config::default()
        };

        let rx = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(CaptureError::ChannelCreation(
                    "unsupported channel type".to_string(),
                ))
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("permission") || msg.contains("Operation not permitted") {
                    return Err(CaptureError::InsufficientPermissions);
                }
                return Err(CaptureError::ChannelCreation(msg));
            }
        };

        tracing::info!("Capturing on interface {}", interface.name);

        Ok(Self {
            name: interface.name,
            rx,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// List all available network interfaces.
    pub fn list_interfaces() -> Vec<String> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let status = if iface.is_up() { "UP" } else { "DOWN" };
                let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
                format!(
                    "{}: {} [{}]",
                    iface.name,
                    status,
                    if ips.is_empty() {
                        "no IP".to_string()
                    } else {
                        ips.join(", ")
                    }
                )
            })
            .collect()
    }
}

fn find_interface(interface_name: &str) -> Result<NetworkInterface, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface_name)
        .ok_or_else(|| CaptureError::InterfaceNotFound(interface_name.to_string()))
}

fn now() -> Timestamp {
    let now = Utc::now();
    Timestamp::new(now.timestamp(), now.timestamp_subsec_micros())
}

impl CaptureSource for PnetCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn linktype(&self) -> Linktype {
        Linktype::ETHERNET
    }

    fn next_frame(&mut self) -> Result<Option<CaptureFrame>, CaptureError> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(None);
            }

            match self.rx.next() {
                Ok(packet) => {
                    return Ok(Some(CaptureFrame {
                        data: packet.to_vec(),
                        timestamp: now(),
                        linktype: Linktype::ETHERNET,
                    }))
                }
                // Timeout is expected, go back and check the running flag
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    return Err(CaptureError::Read {
                        source_name: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn set_running(&mut self, running: Arc<AtomicBool>) {
        self.running = running;
    }
}

impl Drop for PnetCapture {
    fn drop(&mut self) {
        tracing::debug!("Closed capture on interface {}", self.name);
    }
}

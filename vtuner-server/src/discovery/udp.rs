//! Tuner box announcements over UDP.
//!
//! Each datagram is one JSON announcement:
//!
//! ```json
//! {"parent": "HDHR-1013ABCD", "parent_id": 269724621, "address": "192.168.1.20",
//!  "lineup": "US-Cable", "tuners": [{"index": 0}, {"index": 1, "lineup": "US-Antenna"}]}
//! ```
//!
//! `address` defaults to the datagram's source address. Repeated
//! announcements refresh the parent's address, so a box that moves after a
//! DHCP renewal keeps streaming from its new address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::net::UdpSocket;

use vtuner_core::{CaptureError, DiscoveryTracker, TunerContext};

use crate::devices::{self, http};
use crate::discovery::{stop_requested, DiscoveryError, ShutdownSignal};

const MAX_DATAGRAM: usize = 8192;
const DEFAULT_LINEUP: &str = "default";
/// Pause after a failed receive so a persistent socket error does not spin.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Deserialize)]
pub struct Announcement {
    pub parent: String,
    pub parent_id: u32,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub lineup: Option<String>,
    pub tuners: Vec<AnnouncedTuner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncedTuner {
    pub index: u32,
    /// Overrides the `<parent>-<index>` device name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lineup: Option<String>,
}

pub struct UdpDiscovery {
    context: Arc<TunerContext>,
    socket: UdpSocket,
}

impl UdpDiscovery {
    pub async fn bind(context: Arc<TunerContext>, addr: SocketAddr) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::Bind { addr, source })?;
        info!("UDP discovery listening on {}", socket.local_addr()?);
        Ok(Self { context, socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive announcements until a stop is requested. The socket is
    /// closed when this returns.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), DiscoveryError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => {
                    info!("UDP discovery stopping");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // ICMP errors from earlier sends surface here too.
                            warn!("UDP discovery receive failed: {}", e);
                            tokio::time::sleep(RECV_RETRY_DELAY).await;
                            continue;
                        }
                    };
                    if let Err(e) = handle_datagram(&self.context, &buf[..len], source) {
                        warn!("{}", e);
                    }
                }
            }
        }
    }
}

/// Parse and apply one datagram. Returns how many devices were newly loaded.
pub fn handle_datagram(
    context: &Arc<TunerContext>,
    datagram: &[u8],
    source: SocketAddr,
) -> Result<usize, DiscoveryError> {
    let announcement: Announcement =
        serde_json::from_slice(datagram).map_err(|e| DiscoveryError::Announcement {
            source_addr: source,
            reason: e.to_string(),
        })?;
    if announcement.parent.trim().is_empty() {
        return Err(DiscoveryError::Announcement {
            source_addr: source,
            reason: "empty parent name".to_string(),
        });
    }
    Ok(apply_announcement(context, &announcement, source.ip()))
}

/// Track the announcing parent and load each of its tuners.
pub fn apply_announcement(context: &Arc<TunerContext>, announcement: &Announcement, source: IpAddr) -> usize {
    let address = announcement.address.unwrap_or(source);
    let parent = context
        .discovery()
        .track_parent(&announcement.parent, announcement.parent_id, Some(address));
    debug!(
        "Announcement from {} ({} tuner(s)) at {}",
        announcement.parent,
        announcement.tuners.len(),
        DiscoveryTracker::remote_address(&parent)
    );

    let mut loaded = 0;
    for tuner in &announcement.tuners {
        let name = tuner
            .name
            .clone()
            .unwrap_or_else(|| http::tuner_name(&announcement.parent, tuner.index));
        let lineup = tuner
            .lineup
            .as_deref()
            .or(announcement.lineup.as_deref())
            .unwrap_or(DEFAULT_LINEUP);
        let recipe = http::recipe(&name, announcement.parent_id, tuner.index, lineup);

        match devices::ensure_loaded(context, &name, recipe, false) {
            Ok(true) => loaded += 1,
            Ok(false) => {}
            Err(CaptureError::Instantiation(e)) => {
                warn!("Announced tuner {} could not be built: {}", name, e)
            }
            Err(e) => warn!("Failed to load announced tuner {}: {}", name, e),
        }
    }
    loaded
}

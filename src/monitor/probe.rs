//! Latency probing.
//!
//! Measures round-trip time to an endpoint with a TCP handshake, falling back
//! to a reachability check. Probing never fails the caller: an endpoint that
//! cannot be measured reports [`UNREACHABLE_PING_MS`], which still orders
//! after every real measurement.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ProbeConfig;
use crate::error::EngineError;

/// Ping reported for an endpoint that could not be measured.
pub const UNREACHABLE_PING_MS: u32 = 999;

/// IPv4 + TCP header bytes subtracted from an MTU hint to size the payload.
const HEADER_OVERHEAD: usize = 40;

/// Measures latency to endpoint addresses.
///
/// Implementations hold no per-call mutable state and may be driven from
/// many tasks at once.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Round-trip time in milliseconds, or [`UNREACHABLE_PING_MS`].
    async fn measure(&self, address: &str) -> u32;

    /// Round-trip time including one payload sized for `mtu`.
    async fn measure_with_mtu(&self, address: &str, mtu: u16) -> u32;

    /// Send a no-op packet to keep the path warm, reporting failure.
    async fn try_keep_alive(&self, address: &str) -> Result<(), EngineError>;

    /// Fire-and-forget keep-alive. Errors are logged and dropped.
    async fn send_keep_alive(&self, address: &str) {
        if let Err(e) = self.try_keep_alive(address).await {
            log::debug!("Keep-alive to {} failed: {}", address, e);
        }
    }
}

/// Probe backed by real TCP connections.
#[derive(Debug, Clone, Default)]
pub struct TcpProber {
    config: ProbeConfig,
}

impl TcpProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Time a TCP handshake to `address:port`.
    async fn handshake(&self, address: &str) -> Option<(TcpStream, u32)> {
        let start = Instant::now();
        match timeout(
            self.config.connect_timeout(),
            TcpStream::connect((address, self.config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => Some((stream, elapsed_ms(start))),
            Ok(Err(e)) => {
                log::debug!("Handshake to {}:{} failed: {}", address, self.config.port, e);
                None
            }
            Err(_) => {
                log::debug!("Handshake to {}:{} timed out", address, self.config.port);
                None
            }
        }
    }

    /// Lower-level reachability check.
    ///
    /// A refused connection still proves the host answered, so it counts as
    /// reachable and its timing is reported.
    async fn reachability(&self, address: &str) -> Option<u32> {
        let start = Instant::now();
        match timeout(
            self.config.reachability_timeout(),
            TcpStream::connect((address, self.config.reachability_port)),
        )
        .await
        {
            Ok(Ok(_)) => Some(elapsed_ms(start)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                Some(elapsed_ms(start))
            }
            Ok(Err(e)) => {
                log::debug!("Reachability check for {} failed: {}", address, e);
                None
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn measure(&self, address: &str) -> u32 {
        if let Some((_stream, rtt)) = self.handshake(address).await {
            return clamp_ping(rtt);
        }
        match self.reachability(address).await {
            Some(rtt) => clamp_ping(rtt),
            None => UNREACHABLE_PING_MS,
        }
    }

    async fn measure_with_mtu(&self, address: &str, mtu: u16) -> u32 {
        let start = Instant::now();
        let Some((mut stream, _)) = self.handshake(address).await else {
            return UNREACHABLE_PING_MS;
        };

        let payload = vec![0u8; usize::from(mtu).saturating_sub(HEADER_OVERHEAD).max(1)];
        let write = async {
            stream.write_all(&payload).await?;
            stream.flush().await
        };
        match timeout(self.config.connect_timeout(), write).await {
            Ok(Ok(())) => clamp_ping(elapsed_ms(start)),
            _ => UNREACHABLE_PING_MS,
        }
    }

    async fn try_keep_alive(&self, address: &str) -> Result<(), EngineError> {
        let send = async {
            let mut stream = TcpStream::connect((address, self.config.port)).await?;
            stream.write_all(&[0x00]).await?;
            stream.flush().await
        };
        match timeout(self.config.keep_alive_timeout(), send).await {
            Ok(Ok(())) => {
                log::trace!("Keep-alive sent to {}", address);
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Network(format!(
                "Keep-alive to {} failed: {}",
                address, e
            ))),
            Err(_) => Err(EngineError::Network(format!(
                "Keep-alive to {} timed out",
                address
            ))),
        }
    }
}

fn elapsed_ms(start: Instant) -> u32 {
    u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX)
}

/// Keep real measurements strictly comparable with the sentinel.
pub fn clamp_ping(rtt_ms: u32) -> u32 {
    rtt_ms.min(UNREACHABLE_PING_MS)
}

/// Convenience for callers holding a `Duration`.
pub fn duration_to_ping(rtt: Duration) -> u32 {
    clamp_ping(u32::try_from(rtt.as_millis()).unwrap_or(u32::MAX))
}

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::source::{FrameSource, SourceError, SourceEvent, SourceOpener};
use crate::address::StreamAddress;
use crate::config::StreamConfig;
use crate::error::{SessionError, StreamAddressError};

/// `set_read_timeout` rejects a zero duration.
const MIN_WAIT: Duration = Duration::from_millis(1);
/// Windows fails a receive into a too-small buffer where Unix truncates.
const WSAEMSGSIZE: i32 = 10040;

/// Decodes a stream where every UDP datagram carries one compressed image
/// (JPEG from the drone-side sender, but any format `image` can sniff works).
pub struct UdpImageSource {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    buf: Vec<u8>,
    units_received: u64,
}

impl UdpImageSource {
    /// Bind the receive socket for `address`.
    pub fn bind(
        address: &StreamAddress,
        max_datagram_size: usize,
    ) -> Result<Self, StreamAddressError> {
        let bind_addr = address.socket_addr();
        let socket = UdpSocket::bind(bind_addr).map_err(|source| StreamAddressError::Bind {
            address: bind_addr,
            source,
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| StreamAddressError::Bind {
                address: bind_addr,
                source,
            })?;

        info!(%address, %local_addr, max_datagram_size, "udp image source bound");

        Ok(Self {
            socket: Some(socket),
            local_addr,
            buf: vec![0u8; max_datagram_size],
            units_received: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl FrameSource for UdpImageSource {
    fn next_frame(&mut self, wait: Duration) -> Result<SourceEvent, SourceError> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(SourceEvent::Ended);
        };

        socket.set_read_timeout(Some(wait.max(MIN_WAIT)))?;

        let len = match socket.recv_from(&mut self.buf) {
            Ok((len, peer)) => {
                if self.units_received == 0 {
                    info!(%peer, len, "first datagram received");
                }
                len
            }
            Err(e) if is_timeout(&e) => return Ok(SourceEvent::Pending),
            // Windows reports ICMP port-unreachable on a UDP socket as a reset.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(%e, "ignoring connection reset on udp socket");
                return Ok(SourceEvent::Pending);
            }
            Err(e) if is_oversized_datagram(&e) => {
                self.units_received += 1;
                return Err(SourceError::Corrupt {
                    len: self.buf.len(),
                    reason: "datagram larger than receive buffer".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.units_received += 1;

        if len == 0 {
            return Err(SourceError::Corrupt {
                len,
                reason: "empty datagram".to_string(),
            });
        }

        let image = image::load_from_memory(&self.buf[..len])
            .map_err(|e| SourceError::Corrupt {
                len,
                reason: e.to_string(),
            })?
            .into_rgb8();

        debug!(
            unit = self.units_received,
            len,
            width = image.width(),
            height = image.height(),
            "decoded datagram"
        );

        Ok(SourceEvent::Frame {
            image,
            encoded_len: len,
        })
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!(
                local_addr = %self.local_addr,
                units_received = self.units_received,
                "closing udp image source"
            );
        }
    }
}

impl Drop for UdpImageSource {
    fn drop(&mut self) {
        if self.socket.is_some() {
            warn!(local_addr = %self.local_addr, "udp image source dropped without close");
            self.close();
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_oversized_datagram(e: &io::Error) -> bool {
    cfg!(windows) && e.raw_os_error() == Some(WSAEMSGSIZE)
}

/// Default opener: one bound [`UdpImageSource`] per session start.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpImageOpener;

impl SourceOpener for UdpImageOpener {
    fn open(
        &self,
        address: &StreamAddress,
        config: &StreamConfig,
    ) -> Result<Box<dyn FrameSource>, SessionError> {
        let source = UdpImageSource::bind(address, config.max_datagram_size)?;
        Ok(Box::new(source))
    }
}

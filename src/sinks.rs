//! Publish sinks shipped with the player.
//!
//! - [`BroadcastSink`]: in-process fan-out over `tokio::sync::broadcast`
//! - [`UdpSink`]: every message becomes one UDP datagram

use log::{debug, trace};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use bagplay_core::{PublishError, PublishSink, TopicMetadata, TopicPublisher};

/// Default per-topic channel depth of a [`BroadcastSink`]
pub const BROADCAST_CAPACITY: usize = 64;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// =============================================================================
// Broadcast
// =============================================================================

/// One broadcast channel per topic.
///
/// Receivers may subscribe before or during playback. Publishing with no
/// receivers attached is not a failure.
pub struct BroadcastSink {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}

struct BroadcastPublisher {
    topic: String,
    tx: broadcast::Sender<Vec<u8>>,
}

impl TopicPublisher for BroadcastPublisher {
    fn publish(&self, payload: &[u8]) -> Result<(), PublishError> {
        if self.tx.send(payload.to_vec()).is_err() {
            trace!("No subscribers on {}", self.topic);
        }
        Ok(())
    }
}

impl PublishSink for BroadcastSink {
    fn create_publisher(
        &self,
        topic: &TopicMetadata,
    ) -> Result<Box<dyn TopicPublisher>, PublishError> {
        Ok(Box::new(BroadcastPublisher {
            topic: topic.name.clone(),
            tx: self.sender(&topic.name),
        }))
    }
}

// =============================================================================
// UDP
// =============================================================================

/// Sends every message to a single address as
/// `topic_len u16 LE | topic | payload`.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpSink {
    /// Bind an ephemeral local socket of the same family as `target`.
    pub fn connect(target: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        if target.ip().is_multicast() || target.ip() == Ipv4Addr::BROADCAST {
            socket.set_broadcast(true)?;
        }
        debug!(
            "UDP sink {} -> {}",
            socket.local_addr()?,
            target
        );
        Ok(Self {
            socket: Arc::new(socket),
            target,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Frame one datagram.
pub fn encode_datagram(topic: &str, payload: &[u8]) -> Result<Vec<u8>, PublishError> {
    let topic_len = u16::try_from(topic.len())
        .map_err(|_| PublishError::Transport(format!("topic name of {} bytes", topic.len())))?;
    let size = 2 + topic.len() + payload.len();
    if size > MAX_DATAGRAM_SIZE {
        return Err(PublishError::Transport(format!(
            "datagram of {} bytes exceeds {}",
            size, MAX_DATAGRAM_SIZE
        )));
    }

    let mut datagram = Vec::with_capacity(size);
    datagram.extend_from_slice(&topic_len.to_le_bytes());
    datagram.extend_from_slice(topic.as_bytes());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

struct UdpPublisher {
    topic: String,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl TopicPublisher for UdpPublisher {
    fn publish(&self, payload: &[u8]) -> Result<(), PublishError> {
        let datagram = encode_datagram(&self.topic, payload)?;
        self.socket
            .send_to(&datagram, self.target)
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl PublishSink for UdpSink {
    fn create_publisher(
        &self,
        topic: &TopicMetadata,
    ) -> Result<Box<dyn TopicPublisher>, PublishError> {
        Ok(Box::new(UdpPublisher {
            topic: topic.name.clone(),
            socket: self.socket.clone(),
            target: self.target,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_broadcast_delivers_to_early_subscriber() {
        let sink = BroadcastSink::default();
        let mut rx = sink.subscribe("/scan");

        let publisher = sink
            .create_publisher(&TopicMetadata::new("/scan", "t/Scan"))
            .unwrap();
        publisher.publish(&[1, 2, 3]).unwrap();

        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastSink::new(4);
        let publisher = sink
            .create_publisher(&TopicMetadata::new("/odom", "t/Odom"))
            .unwrap();
        assert!(publisher.publish(&[0]).is_ok());
    }

    #[test]
    fn test_datagram_framing() {
        let datagram = encode_datagram("/t", &[9, 8]).unwrap();
        assert_eq!(datagram, vec![2, 0, b'/', b't', 9, 8]);

        let too_big = vec![0u8; MAX_DATAGRAM_SIZE];
        assert!(matches!(
            encode_datagram("/t", &too_big),
            Err(PublishError::Transport(_))
        ));
    }

    #[test]
    fn test_udp_sink_sends_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let sink = UdpSink::connect(receiver.local_addr().unwrap()).unwrap();
        let publisher = sink
            .create_publisher(&TopicMetadata::new("/imu", "t/Imu"))
            .unwrap();
        publisher.publish(b"hello").unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(from.port(), sink.local_addr().unwrap().port());
        assert_eq!(&buf[..len], b"\x04\x00/imuhello");
    }
}

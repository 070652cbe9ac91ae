use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::delivery::{Delivery, Outbound};
use crate::error::DeliveryError;

type Subscribers = Arc<Mutex<Vec<TcpStream>>>;

/// A subscriber that can not take a packet within this time is dropped
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Streams every encoded packet to all connected TCP clients
#[derive(Clone)]
pub struct PacketFeed {
    subscribers: Subscribers,
    write_timeout: Duration,
}

impl PacketFeed {
    pub fn new() -> Self {
        Self::with_write_timeout(WRITE_TIMEOUT)
    }

    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(vec!())),
            write_timeout,
        }
    }

    /// Adds a client. Writes to it are bounded so a client that stops reading
    /// can not stall delivery to everyone else.
    pub fn subscribe(&self, stream: TcpStream) -> std::io::Result<()> {
        stream.set_write_timeout(Some(self.write_timeout))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(stream);
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Delivery for PacketFeed {
    fn name(&self) -> &str {
        "packet feed"
    }

    fn deliver(&mut self, outbound: &Outbound) -> Result<(), DeliveryError> {
        let bytes = outbound.packet.encode();

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|stream| {
            let mut stream = stream;
            match stream.write_all(&bytes) {
                Ok(()) => true,
                // A timed out write may have sent part of a packet, the stream
                // is unusable after that
                Err(e) => {
                    info!("Dropping packet subscriber {:?}: {}", stream.peer_addr().ok(), e);
                    false
                }
            }
        });
        Ok(())
    }
}

/// Accepts subscribers forever
pub fn tcp_handler(listener: TcpListener, feed: PacketFeed) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                info!("New packet subscriber {:?}", stream.peer_addr().ok());
                if let Err(e) = feed.subscribe(stream) {
                    warn!("Failed to set up packet subscriber: {}", e);
                }
            }
            Err(e) => warn!("Failed to accept packet subscriber: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    use common::{SensorPacket, PACKET_LEN};

    use super::*;
    use crate::delivery::PressureUnit;
    use crate::types::Reading;

    #[test]
    fn subscribers_receive_packets() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut feed = PacketFeed::new();
        {
            let feed = feed.clone();
            thread::spawn(move || tcp_handler(listener, feed));
        }

        let mut client = TcpStream::connect(address).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while feed.subscriber_count() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }

        let reading = Reading {temperature: Some(2508), ..Reading::absent(1)};
        feed.deliver(&Outbound::new(reading, PressureUnit::HPa)).unwrap();

        let mut bytes = [0; PACKET_LEN];
        client.read_exact(&mut bytes).unwrap();
        let packet = SensorPacket::decode(&bytes).unwrap();
        assert_eq!(packet.temperature, Some(2508));
        assert_eq!(packet.timestamp_ns, reading.timestamp_nanos());
    }

    #[test]
    fn stalled_subscriber_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut feed = PacketFeed::with_write_timeout(Duration::from_millis(50));

        // Connected but never reads
        let _idle = TcpStream::connect(address).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        feed.subscribe(accepted).unwrap();

        let reading = Reading {temperature: Some(2508), ..Reading::absent(1)};
        let outbound = Outbound::new(reading, PressureUnit::HPa);
        let deadline = Instant::now() + Duration::from_secs(30);
        let mut delivered = 0u64;
        while feed.subscriber_count() > 0 {
            assert!(Instant::now() < deadline, "still subscribed after {} packets", delivered);
            let started = Instant::now();
            feed.deliver(&outbound).unwrap();
            assert!(started.elapsed() < Duration::from_secs(2));
            delivered += 1;
        }

        // Delivery carries on without the stalled client
        let started = Instant::now();
        feed.deliver(&outbound).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}

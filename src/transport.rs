use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tokio_util::udp::UdpFramed;

use crate::codec::NmeaCodec;
use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::nmea::EncodedSentence;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportMode {
    /// Datagrams to a fixed destination
    #[default]
    #[serde(alias = "udp")]
    Udp,
    /// Single inbound client session
    #[serde(alias = "tcp")]
    Tcp,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Udp => f.write_str("UDP"),
            TransportMode::Tcp => f.write_str("TCP"),
        }
    }
}

/// Anything a broadcast session can push sentences into.
#[allow(async_fn_in_trait)]
pub trait SentenceSink {
    /// Transmits one sentence.
    async fn send(&mut self, sentence: &EncodedSentence) -> Result<()>;

    /// Releases the underlying resource. Safe to call more than once.
    async fn teardown(&mut self);
}

#[derive(Debug, Clone)]
pub struct TransportManager {
    mode: TransportMode,
    address: String,
    port: u16,
    accept_timeout: Duration,
    write_timeout: Duration,
    broadcast: bool,
}

impl TransportManager {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            mode: config.mode,
            address: config.address.clone(),
            port: config.port,
            accept_timeout: config.accept_timeout_duration(),
            write_timeout: config.write_timeout_duration(),
            broadcast: config.broadcast,
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Opens the channel for the configured mode.
    pub async fn establish(&self) -> Result<Endpoint> {
        match self.mode {
            TransportMode::Udp => self.open_datagram().await,
            TransportMode::Tcp => self.listen().await?.accept().await,
        }
    }

    async fn open_datagram(&self) -> Result<Endpoint> {
        let target = lookup_host((self.address.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{}:{} did not resolve", self.address, self.port),
                )
            })?;

        // outgoing only, any local port
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(self.broadcast)?;

        info!("UDP target: {target}");
        Ok(Endpoint {
            channel: Channel::Datagram {
                framed: UdpFramed::new(socket, NmeaCodec::new()),
                target,
            },
            write_timeout: self.write_timeout,
        })
    }

    /// Binds the TCP listener without waiting for a peer yet.
    pub async fn listen(&self) -> Result<Listening> {
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Listening {
            listener,
            local_addr,
            accept_timeout: self.accept_timeout,
            write_timeout: self.write_timeout,
        })
    }
}

/// A bound TCP listener waiting for its single peer.
#[derive(Debug)]
pub struct Listening {
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: Duration,
    write_timeout: Duration,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits up to the accept timeout for one connection, then stops listening.
    pub async fn accept(self) -> Result<Endpoint> {
        info!(
            "Server is waiting up to {:?} for a connection at {}",
            self.accept_timeout, self.local_addr
        );
        let (stream, peer) = tokio::time::timeout(self.accept_timeout, self.listener.accept())
            .await
            .map_err(|_| Error::NoPeerConnected {
                addr: self.local_addr,
                timeout: self.accept_timeout,
            })??;
        stream.set_nodelay(true)?;
        info!("Connected to {peer}");

        Ok(Endpoint {
            channel: Channel::Stream {
                framed: Framed::new(stream, NmeaCodec::new()),
                peer,
            },
            write_timeout: self.write_timeout,
        })
    }
}

enum Channel {
    Datagram {
        framed: UdpFramed<NmeaCodec>,
        target: SocketAddr,
    },
    Stream {
        framed: Framed<TcpStream, NmeaCodec>,
        peer: SocketAddr,
    },
    Closed,
}

/// An established channel owned by one broadcast session.
pub struct Endpoint {
    channel: Channel,
    write_timeout: Duration,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.channel {
            Channel::Datagram { .. } => "Datagram",
            Channel::Stream { .. } => "Stream",
            Channel::Closed => "Closed",
        };
        f.debug_struct("Endpoint")
            .field("channel", &kind)
            .field("peer", &self.peer_addr())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Endpoint {
    pub fn is_closed(&self) -> bool {
        matches!(self.channel, Channel::Closed)
    }

    /// Destination for datagrams, or the connected client.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.channel {
            Channel::Datagram { target, .. } => Some(*target),
            Channel::Stream { peer, .. } => Some(*peer),
            Channel::Closed => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.channel {
            Channel::Datagram { framed, .. } => framed.get_ref().local_addr().ok(),
            Channel::Stream { framed, .. } => framed.get_ref().local_addr().ok(),
            Channel::Closed => None,
        }
    }
}

impl SentenceSink for Endpoint {
    async fn send(&mut self, sentence: &EncodedSentence) -> Result<()> {
        let limit = self.write_timeout;
        let channel = &mut self.channel;
        let write = async move {
            match channel {
                Channel::Datagram { framed, target } => framed.send((sentence, *target)).await,
                Channel::Stream { framed, .. } => framed.send(sentence).await,
                Channel::Closed => Err(io::Error::from(io::ErrorKind::NotConnected).into()),
            }
        };
        match tokio::time::timeout(limit, write).await {
            Err(_) => Err(Error::WriteTimeout(limit)),
            Ok(Err(Error::Io(e))) => Err(Error::TransportWriteFailure(e)),
            Ok(result) => result,
        }
    }

    async fn teardown(&mut self) {
        match std::mem::replace(&mut self.channel, Channel::Closed) {
            Channel::Datagram { target, .. } => debug!("Closed UDP socket for {target}"),
            Channel::Stream { mut framed, peer } => {
                // flushes a send interrupted by cancellation before the write half shuts
                let close = SinkExt::<&EncodedSentence>::close(&mut framed);
                match tokio::time::timeout(self.write_timeout, close).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Error closing connection to {peer}: {e}"),
                    Err(_) => debug!("Timed out closing connection to {peer}"),
                }
                info!("Closed connection to {peer}");
            }
            Channel::Closed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::SentenceKind;
    use crate::reading::ReadingSnapshot;

    fn config(mode: TransportMode, port: u16) -> BroadcastConfig {
        BroadcastConfig {
            address: "127.0.0.1".into(),
            port,
            mode,
            accept_timeout: 0.2,
            write_timeout: 1.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn datagram_endpoint_sends_crlf_terminated_lines() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let manager = TransportManager::new(&config(TransportMode::Udp, port));
        let mut endpoint = manager.establish().await.unwrap();
        assert_eq!(endpoint.peer_addr(), Some(receiver.local_addr().unwrap()));

        let sentence = SentenceKind::Hdm.encode(&ReadingSnapshot::default()).unwrap();
        endpoint.send(&sentence).await.unwrap();

        let mut buf = [0u8; 128];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$IIHDM,0.0,M*22\r\n");

        endpoint.teardown().await;
        assert!(endpoint.is_closed());
        endpoint.teardown().await;
    }

    #[tokio::test]
    async fn accept_times_out_without_peer() {
        let manager = TransportManager::new(&config(TransportMode::Tcp, 0));
        match manager.establish().await {
            Err(Error::NoPeerConnected { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(200))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn teardown_delivers_buffered_bytes_before_eof() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let listening = TransportManager::new(&config(TransportMode::Tcp, 0))
            .listen()
            .await
            .unwrap();
        let addr = listening.local_addr();
        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let lines = FramedRead::new(stream, NmeaCodec::new());
            lines.map(|line| line.unwrap().into_string()).collect::<Vec<_>>().await
        });
        let mut endpoint = listening.accept().await.unwrap();

        let sentence = SentenceKind::Hdm.encode(&ReadingSnapshot::default()).unwrap();
        match &mut endpoint.channel {
            // queued in the write buffer, not flushed
            Channel::Stream { framed, .. } => framed.feed(&sentence).await.unwrap(),
            _ => panic!("expected a stream endpoint"),
        }
        endpoint.teardown().await;
        assert!(endpoint.is_closed());

        let received = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, vec!["$IIHDM,0.0,M*22".to_string()]);
    }

    #[tokio::test]
    async fn send_after_teardown_is_a_write_failure() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mut endpoint = TransportManager::new(&config(TransportMode::Udp, port))
            .establish()
            .await
            .unwrap();
        endpoint.teardown().await;

        let sentence = SentenceKind::Mmb.encode(&ReadingSnapshot::default()).unwrap();
        assert!(matches!(
            endpoint.send(&sentence).await,
            Err(Error::TransportWriteFailure(_))
        ));
    }
}

//! Connection handling.

use crate::codec::{MessageCodec, RawMessage};
use crate::{Message, NetworkError, NetworkResult, VersionPayload, MAINNET_MAGIC};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Network magic.
    pub magic: u32,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Deadline for the whole version/verack exchange.
    pub handshake_timeout: Duration,
    /// Silence after which an active peer is considered stalled.
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            magic: MAINNET_MAGIC,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(90),
        }
    }
}

type Transport = Framed<TcpStream, MessageCodec>;

/// A framed P2P connection.
pub struct Connection {
    /// Remote address.
    pub addr: SocketAddr,
    framed: Transport,
}

impl Connection {
    /// Wrap an established socket.
    pub fn new(stream: TcpStream, addr: SocketAddr, magic: u32) -> Self {
        Self {
            addr,
            framed: Framed::new(stream, MessageCodec::with_magic(magic)),
        }
    }

    /// Connect to a remote peer.
    #[instrument(skip(config))]
    pub async fn connect(addr: SocketAddr, config: &ConnectionConfig) -> NetworkResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout(format!("connect to {addr}")))?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);
        Ok(Self::new(stream, addr, config.magic))
    }

    /// Send a message.
    pub async fn send(&mut self, message: &Message) -> NetworkResult<()> {
        send_on(&mut self.framed, message).await
    }

    /// Receive the next message, waiting at most `timeout`.
    ///
    /// A deadline returns [`NetworkError::Timeout`]; end of stream returns
    /// [`NetworkError::ConnectionClosed`].
    pub async fn receive(&mut self, timeout: Duration) -> NetworkResult<Message> {
        receive_on(&mut self.framed, timeout).await
    }

    /// Run the version/verack exchange.
    ///
    /// Both sides send `version` first, then acknowledge the other's with
    /// `verack`. Returns the remote version payload.
    #[instrument(skip(self, local), fields(addr = %self.addr))]
    pub async fn handshake(
        &mut self,
        local: &VersionPayload,
        timeout: Duration,
    ) -> NetworkResult<VersionPayload> {
        tokio::time::timeout(timeout, self.exchange_versions(local))
            .await
            .map_err(|_| NetworkError::Timeout("handshake".to_string()))?
    }

    async fn exchange_versions(&mut self, local: &VersionPayload) -> NetworkResult<VersionPayload> {
        self.send(&Message::Version(local.clone())).await?;

        let remote = match self.next_message().await? {
            Message::Version(v) => v,
            other => {
                return Err(NetworkError::HandshakeFailed(format!(
                    "expected version, got {}",
                    other.command()
                )))
            }
        };
        if remote.nonce == local.nonce {
            return Err(NetworkError::SelfConnection);
        }

        self.send(&Message::Verack).await?;

        match self.next_message().await? {
            Message::Verack => {}
            other => {
                return Err(NetworkError::HandshakeFailed(format!(
                    "expected verack, got {}",
                    other.command()
                )))
            }
        }

        debug!(
            remote_height = remote.start_height,
            agent = %remote.user_agent,
            "Handshake complete"
        );
        Ok(remote)
    }

    async fn next_message(&mut self) -> NetworkResult<Message> {
        match self.framed.next().await {
            Some(raw) => Message::decode(&raw?),
            None => Err(NetworkError::ConnectionClosed),
        }
    }

    /// Split into independently owned read and write halves.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (sink, stream) = self.framed.split();
        (
            ConnectionReader {
                addr: self.addr,
                stream,
            },
            ConnectionWriter {
                addr: self.addr,
                sink,
            },
        )
    }

    /// Close the connection.
    pub async fn close(mut self) -> NetworkResult<()> {
        SinkExt::<RawMessage>::close(&mut self.framed).await?;
        debug!("Connection closed");
        Ok(())
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Read half of a [`Connection`].
pub struct ConnectionReader {
    pub addr: SocketAddr,
    stream: SplitStream<Transport>,
}

impl ConnectionReader {
    /// Receive the next message together with its raw payload.
    pub async fn receive(&mut self, timeout: Duration) -> NetworkResult<(Message, RawMessage)> {
        let raw = match tokio::time::timeout(timeout, self.stream.next()).await {
            Err(_) => return Err(NetworkError::Timeout(format!("read from {}", self.addr))),
            Ok(None) => return Err(NetworkError::ConnectionClosed),
            Ok(Some(raw)) => raw?,
        };
        let message = Message::decode(&raw)?;
        Ok((message, raw))
    }
}

/// Write half of a [`Connection`].
pub struct ConnectionWriter {
    pub addr: SocketAddr,
    sink: SplitSink<Transport, RawMessage>,
}

impl ConnectionWriter {
    pub async fn send(&mut self, message: &Message) -> NetworkResult<()> {
        self.sink.send(message.to_raw()).await?;
        debug!(addr = %self.addr, command = %message.command(), "Sent message");
        Ok(())
    }

    pub async fn close(mut self) -> NetworkResult<()> {
        self.sink.close().await
    }
}

async fn send_on(framed: &mut Transport, message: &Message) -> NetworkResult<()> {
    framed.send(message.to_raw()).await?;
    debug!(command = %message.command(), "Sent message");
    Ok(())
}

async fn receive_on(framed: &mut Transport, timeout: Duration) -> NetworkResult<Message> {
    match tokio::time::timeout(timeout, framed.next()).await {
        Err(_) => Err(NetworkError::Timeout("read".to_string())),
        Ok(None) => Err(NetworkError::ConnectionClosed),
        Ok(Some(raw)) => Message::decode(&raw?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NODE_NETWORK;
    use tokio::net::TcpListener;

    fn version(nonce: u32, height: u32) -> VersionPayload {
        VersionPayload {
            version: 0,
            services: NODE_NETWORK,
            timestamp: 0,
            port: 0,
            nonce,
            user_agent: "/test/".into(),
            start_height: height,
            relay: true,
        }
    }

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (stream, remote) = listener.accept().await.unwrap();
            Connection::new(stream, remote, MAINNET_MAGIC)
        });
        let client = Connection::connect(addr, &ConnectionConfig::default())
            .await
            .unwrap();
        (client, accept.await.unwrap())
    }

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.read_timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_handshake_both_sides() {
        let (mut a, mut b) = pair().await;
        let timeout = Duration::from_secs(5);
        let (va, vb) = (version(1, 10), version(2, 20));
        let (ra, rb) = tokio::join!(
            a.handshake(&va, timeout),
            b.handshake(&vb, timeout)
        );
        assert_eq!(ra.unwrap().start_height, 20);
        assert_eq!(rb.unwrap().start_height, 10);
    }

    #[tokio::test]
    async fn test_self_connection_rejected() {
        let (mut a, mut b) = pair().await;
        let timeout = Duration::from_secs(5);
        let (va, vb) = (version(7, 0), version(7, 0));
        let (ra, _) = tokio::join!(
            a.handshake(&va, timeout),
            b.handshake(&vb, timeout)
        );
        assert!(matches!(ra, Err(NetworkError::SelfConnection)));
    }

    #[tokio::test]
    async fn test_receive_timeout_distinct_from_close() {
        let (mut a, b) = pair().await;
        let err = a.receive(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());

        drop(b);
        let err = a.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (a, mut b) = pair().await;
        let (mut reader, mut writer) = a.split();
        writer.send(&Message::GetAddr).await.unwrap();
        assert_eq!(
            b.receive(Duration::from_secs(5)).await.unwrap(),
            Message::GetAddr
        );
        b.send(&Message::Verack).await.unwrap();
        let (msg, raw) = reader.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(msg, Message::Verack);
        assert_eq!(raw.command, "verack");
    }
}

//! Short-lived TCP connections to peers.
//!
//! Every send opens a fresh connection per attempt, writes one message
//! frame and closes it. Failed attempts are retried after a fixed backoff
//! until the configured attempt budget is spent; the outcome then reports
//! why the last attempt failed.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::codec::{self, TypeRegistry};
use crate::config::TransportConfig;
use crate::error::{DecodingError, EncodingError, FailureReason, FrameError, ReceiveError, TransportFailure};
use crate::frame;
use crate::message::{Action, Message, Payload, Peer};
use crate::record::AnyRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered {
        attempts: u32,
    },

    /// Sending is disabled by a non-positive attempt budget.
    NotAttempted,

    Failed(TransportFailure),
}

impl SendOutcome {
    #[inline]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transport {
    config: TransportConfig,
}

impl Transport {
    #[inline]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends `message` to `peer`, retrying on network failures.
    ///
    /// Peer failures are reported in the outcome. Only a message that cannot
    /// be encoded is an error.
    pub async fn send(&self, message: &Message, peer: &Peer) -> Result<SendOutcome, EncodingError> {
        let Some(tries) = self.tries() else {
            info!(%peer, "tries_maximum is below 1, not sending {}", message.action);

            return Ok(SendOutcome::NotAttempted);
        };

        let frame = frame::frame_record(message, self.config.max_frame_size)?;

        Ok(self.deliver(&frame, peer, message.action, tries).await)
    }

    /// Sends `message` to every peer concurrently.
    ///
    /// A failing peer never affects delivery to the others.
    pub async fn send_to_all(&self, message: &Message, peers: &[Peer]) -> Result<Vec<(Peer, SendOutcome)>, EncodingError> {
        let Some(tries) = self.tries() else {
            info!("tries_maximum is below 1, not sending {}", message.action);

            return Ok(peers.iter()
                .map(|peer| (peer.clone(), SendOutcome::NotAttempted))
                .collect());
        };

        let frame = frame::frame_record(message, self.config.max_frame_size)?;

        let outcomes = futures::future::join_all(peers.iter().map(|peer| {
            self.deliver(&frame, peer, message.action, tries)
        })).await;

        Ok(peers.iter().cloned().zip(outcomes).collect())
    }

    /// Announces a freshly mined block to every peer.
    pub async fn announce_block(&self, block: &Block, port: u16, peers: &[Peer]) -> Result<Vec<(Peer, SendOutcome)>, EncodingError> {
        let message = Message::new(Action::BlockRev, Payload::Block(block.clone()), port);

        self.send_to_all(&message, peers).await
    }

    /// Probes `peer` with a short connect. Any failure counts as unreachable.
    pub async fn is_reachable(&self, peer: &Peer) -> bool {
        match connect(peer, Some(self.config.probe_timeout())).await {
            Ok(mut stream) => {
                if let Err(err) = stream.shutdown().await {
                    debug!(%peer, %err, "failed to close probe connection");
                }

                true
            }

            Err(err) => {
                debug!(%peer, %err, "peer is unreachable");

                false
            }
        }
    }

    /// Reads and decodes one message frame from `source`.
    ///
    /// `None` when the peer sent a zero-length frame or closed the stream
    /// before a frame completed.
    pub async fn receive<R>(&self, source: &mut R, registry: &TypeRegistry) -> Result<Option<AnyRecord>, ReceiveError>
    where
        R: AsyncRead + Unpin,
    {
        let payload = match frame::read_message_frame(source, self.config.max_frame_size).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(None),
            Err(err) => return absent_if_truncated(err),
        };

        let text = String::from_utf8(payload).map_err(DecodingError::from)?;

        Ok(Some(codec::decode(&text, registry)?))
    }

    /// Reads and decodes one bulk frame holding a chain snapshot.
    pub async fn receive_chain<R>(&self, source: &mut R, registry: &TypeRegistry) -> Result<Option<Vec<AnyRecord>>, ReceiveError>
    where
        R: AsyncRead + Unpin,
    {
        let bulk = match frame::read_bulk_frame(source, self.config.max_frame_size).await {
            Ok(Some(bulk)) => bulk,
            Ok(None) => return Ok(None),
            Err(err) => return absent_if_truncated(err),
        };

        let text = String::from_utf8(bulk.payload).map_err(DecodingError::from)?;
        let records = codec::decode_seq(&text, registry)?;

        if records.len() as u64 != bulk.item_count {
            return Err(DecodingError::CountMismatch {
                declared: bulk.item_count,
                decoded: records.len(),
            }.into());
        }

        Ok(Some(records))
    }

    fn tries(&self) -> Option<u32> {
        match self.config.tries_maximum {
            tries if tries <= 0 => None,
            tries => Some(u32::try_from(tries).unwrap_or(u32::MAX)),
        }
    }

    async fn deliver(&self, frame: &[u8], peer: &Peer, action: Action, tries: u32) -> SendOutcome {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt(frame, peer).await {
                Ok(()) => {
                    info!(%peer, attempt, "sent {action}");

                    return SendOutcome::Delivered { attempts: attempt };
                }

                Err(err) => {
                    let reason = FailureReason::classify(&err);

                    warn!(%peer, attempt, tries, %reason, %err, "failed to send {action}");

                    if attempt >= tries {
                        return SendOutcome::Failed(TransportFailure {
                            peer: peer.clone(),
                            attempts: attempt,
                            reason,
                        });
                    }

                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
            }
        }
    }

    async fn attempt(&self, frame: &[u8], peer: &Peer) -> io::Result<()> {
        let mut stream = connect(peer, self.config.connect_timeout()).await?;

        stream.write_all(frame).await?;
        stream.flush().await?;

        if let Err(err) = stream.shutdown().await {
            debug!(%peer, %err, "failed to close connection");
        }

        Ok(())
    }
}

async fn connect(peer: &Peer, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let connect = TcpStream::connect((peer.host.as_str(), peer.port));

    match timeout {
        Some(timeout) => within(timeout, connect).await,
        None => connect.await,
    }
}

/// Runs `attempt`, turning an elapsed deadline into [`io::ErrorKind::TimedOut`].
async fn within<T>(timeout: Duration, attempt: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    tokio::time::timeout(timeout, attempt).await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
}

fn absent_if_truncated<T>(err: FrameError) -> Result<Option<T>, ReceiveError> {
    match err {
        FrameError::Truncated { expected, received } => {
            debug!(expected, received, "stream closed mid-frame");

            Ok(None)
        }

        err => Err(err.into()),
    }
}

/// A decoded record together with the address it came from.
#[derive(Debug)]
pub struct InboundMessage {
    pub record: AnyRecord,
    pub from: SocketAddr,
}

/// Handle returned by [`Listener::start`].
pub struct ListenerHandle {
    pub inbound_rx: mpsc::Receiver<InboundMessage>,
    /// The bound address, useful when listening on port 0.
    pub local_addr: SocketAddr,
}

/// Accepts peer connections and forwards every decoded record.
pub struct Listener {
    transport: Transport,
    registry: Arc<TypeRegistry>,
    channel_size: usize,
}

impl Listener {
    pub fn new(transport: Transport, registry: Arc<TypeRegistry>) -> Self {
        Self {
            transport,
            registry,
            channel_size: 1024,
        }
    }

    pub async fn start(self, addr: SocketAddr) -> io::Result<ListenerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("listening for peers on {local_addr}");

        let (tx, rx) = mpsc::channel(self.channel_size);
        let this = Arc::new(self);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, from)) => {
                        debug!("accepted connection from {from}");

                        tokio::spawn(this.clone().handle_connection(stream, from, tx.clone()));
                    }

                    Err(err) => warn!("accept error: {err}"),
                }
            }
        });

        Ok(ListenerHandle {
            inbound_rx: rx,
            local_addr,
        })
    }

    /// Reads frames until the peer closes the connection.
    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, from: SocketAddr, tx: mpsc::Sender<InboundMessage>) {
        loop {
            match self.transport.receive(&mut stream, &self.registry).await {
                Ok(Some(record)) => {
                    debug!("received {} from {from}", record.type_name());

                    if tx.send(InboundMessage { record, from }).await.is_err() {
                        info!("inbound channel closed, stopping reader for {from}");

                        break;
                    }
                }

                Ok(None) => break,

                // The whole frame was consumed, the next one is still readable.
                Err(ReceiveError::Decoding(err)) => warn!("dropping malformed message from {from}: {err}"),

                Err(ReceiveError::Frame(err)) => {
                    warn!("frame error from {from}: {err}");

                    break;
                }
            }
        }

        debug!("connection from {from} closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::AsyncReadExt;

    use super::*;

    use crate::record::standard_registry;
    use crate::tx::Transaction;

    fn fast_config(tries_maximum: i64) -> TransportConfig {
        TransportConfig {
            tries_maximum,
            retry_backoff_ms: 10,
            connect_timeout_ms: Some(1_000),
            probe_timeout_ms: 1_000,
            ..TransportConfig::default()
        }
    }

    /// Address nothing is listening on.
    async fn closed_peer() -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        drop(listener);

        Peer::new("127.0.0.1", port)
    }

    fn tx_message() -> Message {
        Message::new(Action::TxRev, Payload::Transaction(Transaction::coinbase("1miner", 50, 7)), 9999)
    }

    #[tokio::test]
    async fn refused_after_every_attempt() {
        let transport = Transport::new(fast_config(3));
        let peer = closed_peer().await;

        let started = Instant::now();
        let outcome = transport.send(&tx_message(), &peer).await.unwrap();

        assert_eq!(outcome, SendOutcome::Failed(TransportFailure {
            peer,
            attempts: 3,
            reason: FailureReason::Refused,
        }));

        // Two backoffs between three attempts.
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn elapsed_connect_is_a_timeout() {
        let err = within(Duration::from_millis(1), std::future::pending::<io::Result<()>>())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(FailureReason::classify(&err), FailureReason::Timeout);
    }

    #[tokio::test]
    async fn finished_connect_beats_the_deadline() {
        let value = within(Duration::from_secs(1), async { Ok::<_, io::Error>(7) }).await.unwrap();

        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn non_positive_budget_sends_nothing() {
        let peer = closed_peer().await;

        for tries in [0, -1] {
            let transport = Transport::new(fast_config(tries));

            assert_eq!(transport.send(&tx_message(), &peer).await.unwrap(), SendOutcome::NotAttempted);
        }
    }

    #[tokio::test]
    async fn delivered_message_decodes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = Peer::new("127.0.0.1", listener.local_addr().unwrap().port());

        let receiver = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            Transport::default().receive(&mut stream, &standard_registry()).await.unwrap()
        });

        let outcome = Transport::new(fast_config(3)).send(&tx_message(), &peer).await.unwrap();

        assert_eq!(outcome, SendOutcome::Delivered { attempts: 1 });
        assert_eq!(receiver.await.unwrap(), Some(AnyRecord::Message(tx_message())));
    }

    #[tokio::test]
    async fn one_dead_peer_does_not_block_others() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let alive = Peer::new("127.0.0.1", listener.local_addr().unwrap().port());
        let dead = closed_peer().await;

        let receiver = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut bytes = Vec::new();

            stream.read_to_end(&mut bytes).await.unwrap();

            bytes
        });

        let outcomes = Transport::new(fast_config(2))
            .send_to_all(&tx_message(), &[dead.clone(), alive.clone()])
            .await
            .unwrap();

        assert!(matches!(&outcomes[0], (peer, SendOutcome::Failed(failure)) if *peer == dead && failure.attempts == 2));
        assert_eq!(outcomes[1], (alive, SendOutcome::Delivered { attempts: 1 }));

        assert_eq!(receiver.await.unwrap(), frame::frame_record(&tx_message(), usize::MAX).unwrap());
    }

    #[tokio::test]
    async fn reachability_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let alive = Peer::new("127.0.0.1", listener.local_addr().unwrap().port());

        let transport = Transport::new(fast_config(1));

        assert!(transport.is_reachable(&alive).await);
        assert!(!transport.is_reachable(&closed_peer().await).await);
    }

    #[tokio::test]
    async fn receive_handles_empty_and_truncated_sources() {
        let transport = Transport::default();
        let registry = standard_registry();

        let mut closed: &[u8] = &[];

        assert_eq!(transport.receive(&mut &[0u8, 0, 0, 0][..], &registry).await.unwrap(), None);
        assert_eq!(transport.receive(&mut closed, &registry).await.unwrap(), None);

        let frame = frame::frame_record(&tx_message(), usize::MAX).unwrap();

        assert_eq!(transport.receive(&mut &frame[..frame.len() - 1], &registry).await.unwrap(), None);
    }

    #[tokio::test]
    async fn receive_reports_malformed_payload() {
        let frame = frame::message_frame(br#"{"_type":"Ghost"}"#, usize::MAX).unwrap();

        let err = Transport::default()
            .receive(&mut frame.as_slice(), &standard_registry())
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiveError::Decoding(DecodingError::UnknownType(_))));
    }

    #[tokio::test]
    async fn chain_snapshot_round_trip() {
        let genesis = Block::new("", vec![Transaction::coinbase("1miner", 50, 0)], 1, 0).unwrap();
        let next = Block::new(genesis.id(), vec![Transaction::coinbase("1miner", 50, 1)], 2, 0).unwrap();

        let frame = frame::frame_chain(&[genesis.clone(), next.clone()]).unwrap();

        let records = Transport::default()
            .receive_chain(&mut frame.as_slice(), &standard_registry())
            .await
            .unwrap();

        assert_eq!(records, Some(vec![AnyRecord::Block(genesis), AnyRecord::Block(next)]));
    }

    #[tokio::test]
    async fn chain_snapshot_count_must_match() {
        let payload = codec::encode_seq(&[Peer::new("a", 1)]).unwrap();
        let frame = frame::bulk_frame(2, payload.as_bytes());

        let err = Transport::default()
            .receive_chain(&mut frame.as_slice(), &standard_registry())
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiveError::Decoding(DecodingError::CountMismatch { declared: 2, decoded: 1 })));
    }

    #[tokio::test]
    async fn listener_skips_malformed_messages() {
        let transport = Transport::new(fast_config(1));

        let mut handle = Listener::new(transport.clone(), Arc::new(standard_registry()))
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr).await.unwrap();

        stream.write_all(&frame::message_frame(b"not json", usize::MAX).unwrap()).await.unwrap();
        stream.write_all(&frame::frame_record(&tx_message(), usize::MAX).unwrap()).await.unwrap();
        stream.shutdown().await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), handle.inbound_rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("channel closed");

        assert_eq!(inbound.record, AnyRecord::Message(tx_message()));
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use symact_transport::{IpcStream, PipeInstance, PipeSecurity, TransportError};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::codec::{FrameConfig, PacketCodec};
use crate::error::{FrameError, Result};
use crate::packet::{EncodedPacket, InboundPacket};

static NEXT_PIPE_ID: AtomicU32 = AtomicU32::new(1);

fn next_pipe_id() -> u32 {
    NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed)
}

/// One connected, framed pipe endpoint.
///
/// Reads and writes are guarded by independent locks: two writers never
/// interleave their packets and two readers never split one, while a read
/// and a write may proceed at the same time.
pub struct DuplexPipe {
    id: u32,
    name: String,
    config: FrameConfig,
    peer_credentials: Option<(u32, u32, u32)>,
    reader: Mutex<FramedRead<ReadHalf<IpcStream>, PacketCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<IpcStream>, PacketCodec>>,
}

impl DuplexPipe {
    /// Wrap an already connected stream.
    pub fn from_stream(name: impl Into<String>, stream: IpcStream, config: FrameConfig) -> Self {
        let peer_credentials = stream.peer_credentials();
        let (read_half, write_half) = tokio::io::split(stream);
        let codec = PacketCodec::new(config.max_payload_size);
        let pipe = Self {
            id: next_pipe_id(),
            name: name.into(),
            peer_credentials,
            reader: Mutex::new(FramedRead::new(read_half, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            config,
        };
        debug!(pipe_id = pipe.id, pipe = %pipe.name, "pipe connected");
        pipe
    }

    /// Create an unconnected server endpoint. See [`PendingPipe::accept`].
    pub fn make_server(
        name: impl Into<String>,
        security: &PipeSecurity,
        config: FrameConfig,
    ) -> Result<PendingPipe> {
        let name = name.into();
        let instance = PipeInstance::create(&name, security)?;
        Ok(PendingPipe {
            name,
            config,
            instance,
        })
    }

    /// Connect to a listening server endpoint.
    pub async fn connect(name: impl Into<String>, config: FrameConfig) -> Result<Self> {
        let name = name.into();
        let stream = symact_transport::connect(&name).await?;
        Ok(Self::from_stream(name, stream, config))
    }

    /// Create two connected in-memory endpoints sharing `name`.
    pub fn memory_pair(name: &str, config: FrameConfig) -> (Self, Self) {
        let (a, b) = IpcStream::memory_pair();
        (
            Self::from_stream(name, a, config.clone()),
            Self::from_stream(name, b, config),
        )
    }

    /// Process-unique id of this endpoint.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// `(uid, gid, pid)` of the connected peer, where the platform exposes it.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.peer_credentials
    }

    /// Encode and write one packet.
    ///
    /// `timeout` falls back to [`FrameConfig::write_timeout`].
    pub async fn write_packet<H, P>(
        &self,
        header: &H,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<()>
    where
        H: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        let packet = EncodedPacket::new(header, payload)?;
        self.write_encoded(packet, timeout).await
    }

    /// Write one pre-encoded packet.
    ///
    /// On timeout the packet stays buffered and is flushed by the next write,
    /// so the stream never carries half a packet followed by another.
    pub async fn write_encoded(&self, packet: EncodedPacket, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.or(self.config.write_timeout);
        let len = packet.body_len();
        with_timeout(timeout, async {
            let mut writer = self.writer.lock().await;
            writer.send(packet).await
        })
        .await?;
        trace!(pipe_id = self.id, len, "wrote packet");
        Ok(())
    }

    /// Read the next packet.
    ///
    /// `timeout` falls back to [`FrameConfig::read_timeout`]. A peer that
    /// closed the pipe yields [`TransportError::PipeBroken`].
    pub async fn read_packet(&self, timeout: Option<Duration>) -> Result<InboundPacket> {
        let timeout = timeout.or(self.config.read_timeout);
        let body = with_timeout(timeout, async {
            let mut reader = self.reader.lock().await;
            match reader.next().await {
                Some(body) => body,
                None => Err(FrameError::Transport(TransportError::PipeBroken(
                    "peer closed the pipe".to_string(),
                ))),
            }
        })
        .await?;
        trace!(pipe_id = self.id, len = body.len(), "read packet");
        Ok(InboundPacket::new(body))
    }

    /// Read the next packet and deserialize its header.
    pub async fn read_packet_consume_header<H: DeserializeOwned>(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(H, InboundPacket)> {
        let mut packet = self.read_packet(timeout).await?;
        let header = packet.consume_header()?;
        Ok((header, packet))
    }
}

impl std::fmt::Debug for DuplexPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexPipe")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// A server endpoint waiting for its peer.
#[derive(Debug)]
pub struct PendingPipe {
    name: String,
    config: FrameConfig,
    instance: PipeInstance,
}

impl PendingPipe {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suspend until a peer connects, yielding the connected endpoint.
    pub async fn accept(self) -> Result<DuplexPipe> {
        let stream = self.instance.accept().await?;
        Ok(DuplexPipe::from_stream(self.name, stream, self.config))
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FrameError::Transport(TransportError::Timeout(limit))),
        },
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::packet::{RequestHeader, ResponseHeader};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        text: String,
        count: u64,
    }

    #[tokio::test]
    async fn packets_flow_both_ways() {
        let (a, b) = DuplexPipe::memory_pair("test", FrameConfig::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "test");

        let header = RequestHeader {
            identifier: "Sample".into(),
            command_token: 1,
        };
        let sample = Sample {
            text: "hi".into(),
            count: 3,
        };
        a.write_packet(&header, &sample, None).await.unwrap();

        let (got, packet) = b
            .read_packet_consume_header::<RequestHeader>(None)
            .await
            .unwrap();
        assert_eq!(got, header);
        assert_eq!(packet.consume_payload::<Sample>().unwrap(), sample);

        b.write_packet(&ResponseHeader::default(), &(), None)
            .await
            .unwrap();
        let (response, _) = a
            .read_packet_consume_header::<ResponseHeader>(None)
            .await
            .unwrap();
        assert_eq!(response.status, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_releases_lock() {
        let (a, b) = DuplexPipe::memory_pair("timeout", FrameConfig::default());

        let started = tokio::time::Instant::now();
        let err = b
            .read_packet(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(started.elapsed() <= Duration::from_millis(100));

        a.write_packet(&ResponseHeader::default(), &7u32, None)
            .await
            .unwrap();
        let (_, packet) = b
            .read_packet_consume_header::<ResponseHeader>(Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(packet.consume_payload::<u32>().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn config_read_timeout_is_the_default() {
        let config = FrameConfig::default().with_read_timeout(Some(Duration::from_millis(20)));
        let (_a, b) = DuplexPipe::memory_pair("default-timeout", config);

        let err = b.read_packet(None).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn peer_drop_is_benign() {
        let (a, b) = DuplexPipe::memory_pair("closed", FrameConfig::default());
        drop(a);

        let err = b.read_packet(None).await.unwrap_err();
        assert!(err.is_benign(), "expected PipeBroken, got {err:?}");
    }

    #[tokio::test]
    async fn oversized_packet_is_rejected_before_writing() {
        let config = FrameConfig::default().with_max_payload_size(16);
        let (a, b) = DuplexPipe::memory_pair("small", config);

        let err = a
            .write_packet(&ResponseHeader::default(), &vec![0u8; 64], None)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));

        // The pipe stays usable after a rejected write.
        a.write_packet(&ResponseHeader::default(), &1u8, None)
            .await
            .unwrap();
        let (_, packet) = b
            .read_packet_consume_header::<ResponseHeader>(None)
            .await
            .unwrap();
        assert_eq!(packet.consume_payload::<u8>().unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave() {
        let (a, b) = DuplexPipe::memory_pair("interleave", FrameConfig::default());
        let big = vec![0xABu8; 32 * 1024];

        let writes = async {
            let one = ResponseHeader { command_token: 1, status: 0 };
            let two = ResponseHeader { command_token: 2, status: 0 };
            let first = a.write_packet(&one, &big, None);
            let second = a.write_packet(&two, &big, None);
            let (r1, r2) = tokio::join!(first, second);
            r1.unwrap();
            r2.unwrap();
        };
        let reads = async {
            let mut tokens = Vec::new();
            for _ in 0..2 {
                let (header, packet) = b
                    .read_packet_consume_header::<ResponseHeader>(None)
                    .await
                    .unwrap();
                assert_eq!(packet.consume_payload::<Vec<u8>>().unwrap().len(), big.len());
                tokens.push(header.command_token);
            }
            tokens.sort_unstable();
            assert_eq!(tokens, vec![1, 2]);
        };
        tokio::join!(writes, reads);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_and_client_over_socket() {
        let name = format!(r"\\.\pipe\symact-frame-test-{}", std::process::id());
        let pending =
            DuplexPipe::make_server(&name, &PipeSecurity::Default, FrameConfig::default())
                .unwrap();
        assert_eq!(pending.name(), name);

        let client_name = name.clone();
        let client = tokio::spawn(async move {
            let pipe = DuplexPipe::connect(client_name, FrameConfig::default())
                .await
                .unwrap();
            pipe.write_packet(&ResponseHeader::default(), &"hello", None)
                .await
                .unwrap();
        });

        let server = pending.accept().await.unwrap();
        let (_, packet) = server
            .read_packet_consume_header::<ResponseHeader>(None)
            .await
            .unwrap();
        assert_eq!(packet.consume_payload::<String>().unwrap(), "hello");
        client.await.unwrap();
    }
}

//! Socket plumbing: dialing a node, and the reader and writer tasks of one
//! connection. Every event a task reports is tagged with its connection id.

use crate::connection::{CloseReason, ConnectionId};
use crate::endpoint::NodeEndpoints;
use crate::error::ClientError;
use crate::settings::Settings;
use crate::tls::create_tls_connector;
use bytes::BytesMut;
use evstore_protocol::{Decoder, Package};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Plain or TLS stream.
pub(crate) type BoxedStream = Box<dyn AsyncStream>;

pub(crate) struct TransportEvent {
    pub connection_id: ConnectionId,
    pub kind: TransportEventKind,
}

pub(crate) enum TransportEventKind {
    Established(BoxedStream),
    ConnectFailed(ClientError),
    Inbound(Package),
    Closed(CloseReason),
}

/// Dials a node, upgrading to TLS when enabled.
pub(crate) async fn open(
    endpoints: &NodeEndpoints,
    settings: &Settings,
) -> Result<BoxedStream, ClientError> {
    let addr = endpoints.select(settings.tls.enabled);
    debug!("dialing {}", addr);

    let tcp_stream = tokio::time::timeout(settings.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))??;
    tcp_stream.set_nodelay(true).ok();

    if !settings.tls.enabled {
        return Ok(Box::new(tcp_stream));
    }

    let host = addr.ip().to_string();
    let (connector, server_name) = create_tls_connector(&settings.tls, &host)?;
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
    debug!("TLS handshake with {} complete", addr);
    Ok(Box::new(tls_stream))
}

/// Reads frames until the socket fails, then reports why.
pub(crate) fn spawn_reader(
    connection_id: ConnectionId,
    mut reader: ReadHalf<BoxedStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let reason = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break CloseReason::ServerClosed,
                Ok(n) => n,
                Err(e) => break CloseReason::Io(e.to_string()),
            };
            decoder.extend(&buf[..n]);
            if let Err(reason) = drain(&mut decoder, connection_id, &events) {
                break reason;
            }
        };

        debug!("reader for {} stopped: {}", connection_id, reason);
        let _ = events.send(TransportEvent {
            connection_id,
            kind: TransportEventKind::Closed(reason),
        });
    })
}

fn drain(
    decoder: &mut Decoder,
    connection_id: ConnectionId,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), CloseReason> {
    loop {
        match decoder.decode_package() {
            Ok(Some(package)) => {
                let event = TransportEvent {
                    connection_id,
                    kind: TransportEventKind::Inbound(package),
                };
                if events.send(event).is_err() {
                    return Err(CloseReason::Shutdown);
                }
            }
            Ok(None) => return Ok(()),
            Err(e) if !e.is_connection_fatal() => {
                warn!("{}: dropping frame: {}", connection_id, e);
            }
            Err(e) => return Err(CloseReason::Framing(e.to_string())),
        }
    }
}

/// Writes frames in the order they are queued. The socket is shut down once
/// the returned sender is dropped.
pub(crate) fn spawn_writer(
    connection_id: ConnectionId,
    mut writer: WriteHalf<BoxedStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> mpsc::UnboundedSender<BytesMut> {
    let (tx, mut rx) = mpsc::unbounded_channel::<BytesMut>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                let _ = events.send(TransportEvent {
                    connection_id,
                    kind: TransportEventKind::Closed(CloseReason::Io(e.to_string())),
                });
                return;
            }
        }
        let _ = writer.shutdown().await;
    });
    tx
}

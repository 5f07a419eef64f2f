//! End-to-end RPC tests over unix sockets: the echo round-trip, the
//! error paths that must close a call, and the admission limit.

use std::sync::Arc;

use async_trait::async_trait;
use murkbot::error::RpcError;
use murkbot::net::{Connector, Listener};
use murkbot::rpc::{encode, CallHandle, Dispatcher, Endpoint, Handler, RpcClient, RpcServer, Typed};
use murkbot::runtime::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[derive(Clone, PartialEq, ::prost::Message)]
struct Ping {
    #[prost(string, tag = "1")]
    payload: String,
}

const METHOD_PING: u32 = 7;

/// Server-side handler: echoes every ping back.
struct EchoHandler {
    closed_tx: mpsc::UnboundedSender<Option<String>>,
}

#[async_trait]
impl Handler<Ping> for EchoHandler {
    async fn message(&mut self, call: &CallHandle, msg: &Ping) {
        call.send(&Ping {
            payload: msg.payload.clone(),
        });
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        let _ = self.closed_tx.send(error.map(ToString::to_string));
    }
}

struct EchoDispatcher {
    errors_tx: mpsc::UnboundedSender<String>,
    closed_tx: mpsc::UnboundedSender<Option<String>>,
}

#[async_trait]
impl Dispatcher for EchoDispatcher {
    async fn dispatch(&self, method: u32) -> Result<Box<dyn Endpoint>, RpcError> {
        match method {
            METHOD_PING => Ok(Typed::endpoint(EchoHandler {
                closed_tx: self.closed_tx.clone(),
            })),
            other => Err(RpcError::UnknownMethod(other)),
        }
    }

    fn error(&self, error: RpcError) {
        let _ = self.errors_tx.send(error.to_string());
    }
}

struct TestServer {
    socket_path: std::path::PathBuf,
    errors_rx: mpsc::UnboundedReceiver<String>,
    server_closed_rx: mpsc::UnboundedReceiver<Option<String>>,
    shutdown: Shutdown,
    _dir: tempfile::TempDir,
}

fn start_server(max_calls: usize) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("rpc.sock");
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let (closed_tx, server_closed_rx) = mpsc::unbounded_channel();

    let listener = Listener::bind_unix(&socket_path).unwrap();
    let shutdown = Shutdown::new();
    RpcServer::start(
        listener,
        Arc::new(EchoDispatcher {
            errors_tx,
            closed_tx,
        }),
        max_calls,
        shutdown.clone(),
    );

    TestServer {
        socket_path,
        errors_rx,
        server_closed_rx,
        shutdown,
        _dir: dir,
    }
}

/// Client-side handler: records the first response, then closes.
struct ClientRecorder {
    pong_tx: mpsc::UnboundedSender<String>,
    closed_tx: mpsc::UnboundedSender<Option<String>>,
}

#[async_trait]
impl Handler<Ping> for ClientRecorder {
    async fn message(&mut self, call: &CallHandle, msg: &Ping) {
        let _ = self.pong_tx.send(msg.payload.clone());
        call.close(None, true);
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        let _ = self.closed_tx.send(error.map(ToString::to_string));
    }
}

#[tokio::test]
async fn ping_round_trip() {
    let mut server = start_server(16);
    let client = RpcClient::new(Connector::new().unix(&server.socket_path));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    client.call(
        METHOD_PING,
        Typed::endpoint(ClientRecorder { pong_tx, closed_tx }),
        Some(encode(&Ping {
            payload: "hello world".into(),
        })),
    );

    let pong = timeout(Duration::from_secs(5), pong_rx.recv())
        .await
        .expect("response in time")
        .expect("response received");
    assert_eq!(pong, "hello world");

    // client close is clean on both sides
    let client_close = timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client_close, None);
    let server_close = timeout(Duration::from_secs(5), server.server_closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server_close, None);

    server.shutdown.trigger();
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let mut server = start_server(16);

    let mut raw = tokio::net::UnixStream::connect(&server.socket_path)
        .await
        .unwrap();
    raw.write_all(&0xdeadu32.to_le_bytes()).await.unwrap();

    let error = timeout(Duration::from_secs(5), server.errors_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(error.contains("unknown method"), "{error}");

    // the server hung up on us
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    server.shutdown.trigger();
}

#[tokio::test]
async fn unterminated_varint_header_closes_call() {
    let mut server = start_server(16);

    let mut raw = tokio::net::UnixStream::connect(&server.socket_path)
        .await
        .unwrap();
    raw.write_all(&METHOD_PING.to_le_bytes()).await.unwrap();
    // ten continuation bytes: not a valid varint header
    raw.write_all(&[0x80u8; 10]).await.unwrap();

    let close = timeout(Duration::from_secs(5), server.server_closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(close.unwrap().contains("varint"), "wrong close error");

    server.shutdown.trigger();
}

#[tokio::test]
async fn decode_failure_closes_without_delivery() {
    let mut server = start_server(16);

    let mut raw = tokio::net::UnixStream::connect(&server.socket_path)
        .await
        .unwrap();
    raw.write_all(&METHOD_PING.to_le_bytes()).await.unwrap();
    // frame of one byte: field 1 with 64-bit wire type, but no data
    raw.write_all(&[0x01, 0x09]).await.unwrap();

    let close = timeout(Duration::from_secs(5), server.server_closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(close.unwrap().contains("decode"), "wrong close error");

    server.shutdown.trigger();
}

#[tokio::test]
async fn admission_limit_rejects_excess_calls() {
    let mut server = start_server(1);

    // first call occupies the only slot
    let mut first = tokio::net::UnixStream::connect(&server.socket_path)
        .await
        .unwrap();
    first.write_all(&METHOD_PING.to_le_bytes()).await.unwrap();
    // give the server a beat to take the permit
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = tokio::net::UnixStream::connect(&server.socket_path)
        .await
        .unwrap();
    second.write_all(&METHOD_PING.to_le_bytes()).await.unwrap();

    let error = timeout(Duration::from_secs(5), server.errors_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(error.contains("call limit"), "{error}");

    // the rejected socket reads EOF
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    // the first call is still alive: it answers a ping
    let mut frame = bytes::BytesMut::new();
    murk_proto::VarintFrameCodec::put_varint(&mut frame, 0);
    first.write_all(&frame).await.unwrap();

    server.shutdown.trigger();
}

//! End-to-end tests against a scripted peer.
//!
//! The peer speaks real wire bytes over an in-memory duplex stream:
//! each test scripts the server side of the conversation and asserts
//! on what the connection does in response.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use amqpwire::protocol::{FieldValue, Frame, Method, Table, FRAME_END, PROTOCOL_HEADER};
use amqpwire::{Connection, ConnectionOptions, ErrorKind};

/// Server side of the conversation.
struct Peer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer }
    }

    async fn expect_protocol_header(&mut self) {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, PROTOCOL_HEADER);
    }

    async fn read_frame(&mut self) -> Frame {
        let mut prefix = [0u8; 7];
        self.reader.read_exact(&mut prefix).await.unwrap();
        let frame_type = prefix[0];
        let channel_id = u16::from_be_bytes([prefix[1], prefix[2]]);
        let size = u32::from_be_bytes([prefix[3], prefix[4], prefix[5], prefix[6]]) as usize;

        let mut payload = vec![0u8; size + 1];
        self.reader.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload[size], FRAME_END, "frame end marker");
        payload.truncate(size);

        Frame::decode(frame_type, channel_id, Bytes::from(payload)).unwrap()
    }

    /// Next method frame, skipping heartbeats.
    async fn read_method(&mut self) -> (u16, Method) {
        loop {
            match self.read_frame().await {
                Frame::Method { channel_id, method } => return (channel_id, method),
                Frame::Heartbeat => continue,
                other => panic!("unexpected frame from client: {other:?}"),
            }
        }
    }

    async fn send_frame(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        self.writer.write_all(&buf).await.unwrap();
    }

    async fn send_method(&mut self, channel_id: u16, method: Method) {
        self.send_frame(Frame::Method { channel_id, method }).await;
    }

    /// Drive the server side of a full open handshake.
    async fn handshake(&mut self, channel_max: u16, frame_max: u32, heartbeat: u16) {
        self.expect_protocol_header().await;

        let mut capabilities = Table::new();
        capabilities.insert("connection.blocked".into(), FieldValue::Bool(true));
        capabilities.insert("basic.nack".into(), FieldValue::Bool(true));
        let mut server_properties = Table::new();
        server_properties.insert("capabilities".into(), FieldValue::Table(capabilities));
        server_properties.insert("product".into(), FieldValue::LongString("scripted".into()));

        self.send_method(
            0,
            Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties,
                mechanisms: "PLAIN AMQPLAIN".into(),
                locales: "en_US".into(),
            },
        )
        .await;

        let (_, start_ok) = self.read_method().await;
        let Method::ConnectionStartOk { mechanism, response, .. } = start_ok else {
            panic!("expected start-ok, got {start_ok:?}");
        };
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(response, "\u{0}guest\u{0}guest");

        self.send_method(
            0,
            Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            },
        )
        .await;

        let (_, tune_ok) = self.read_method().await;
        assert!(matches!(tune_ok, Method::ConnectionTuneOk { .. }));

        let (_, open) = self.read_method().await;
        let Method::ConnectionOpen { vhost } = open else {
            panic!("expected open, got {open:?}");
        };
        assert_eq!(vhost, "/");

        self.send_method(0, Method::ConnectionOpenOk).await;
    }
}

/// Open a connection against a peer running the standard handshake.
async fn connect(
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
    options: ConnectionOptions,
) -> (Connection, Peer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server);
        peer.handshake(channel_max, frame_max, heartbeat).await;
        peer
    });

    let conn = Connection::open(client, options).await.unwrap();
    let peer = peer_task.await.unwrap();
    (conn, peer)
}

#[tokio::test]
async fn handshake_negotiates_tuning_and_captures_server_info() {
    let (conn, _peer) = connect(2047, 131_072, 60, ConnectionOptions::default()).await;

    let tuning = conn.tuning().unwrap();
    assert_eq!(tuning.channel_max, 2047);
    assert_eq!(tuning.frame_max, 131_072);
    // Client default of 10s beats the server's 60s proposal.
    assert_eq!(tuning.heartbeat, Duration::from_secs(10));

    let info = conn.server_info().unwrap();
    assert_eq!((info.major, info.minor), (0, 9));

    assert!(conn.is_capable("connection.blocked"));
    assert!(conn.is_capable("basic.nack"));
    assert!(!conn.is_capable("confirm.select"));
}

#[tokio::test]
async fn zero_proposals_mean_the_other_side_wins() {
    let options = ConnectionOptions {
        channel_max: 512,
        frame_max: 4096,
        ..ConnectionOptions::default()
    };
    let (conn, _peer) = connect(0, 0, 0, options).await;

    let tuning = conn.tuning().unwrap();
    assert_eq!(tuning.channel_max, 512);
    assert_eq!(tuning.frame_max, 4096);
    assert_eq!(tuning.heartbeat, Duration::from_secs(10));
}

#[tokio::test]
async fn open_channel_allocates_id_one_and_runs_the_open_exchange() {
    let (conn, mut peer) = connect(2047, 131_072, 60, ConnectionOptions::default()).await;

    let open_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.open_channel().await })
    };

    let (channel_id, method) = peer.read_method().await;
    assert_eq!(channel_id, 1);
    assert!(matches!(method, Method::ChannelOpen));
    peer.send_method(1, Method::ChannelOpenOk).await;

    let channel = open_task.await.unwrap().unwrap();
    assert_eq!(channel.id(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_connection_emits_heartbeats() {
    // Negotiated heartbeat: min(10, 1) = 1 second.
    let (_conn, mut peer) = connect(0, 0, 1, ConnectionOptions::default()).await;

    // No caller traffic: the next frame on the wire must be a
    // heartbeat, within the negotiated interval (time is virtual).
    let frame = peer.read_frame().await;
    assert_eq!(frame, Frame::Heartbeat);
}

#[tokio::test]
async fn server_initiated_close_is_acknowledged_and_fanned_out() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let (close_tx, mut closes) = mpsc::channel(2);
    conn.notify_close(close_tx);
    let (blocked_tx, mut blocks) = mpsc::channel(2);
    conn.notify_blocked(blocked_tx);

    // An RPC left in flight: the channel open never gets its reply.
    let open_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.open_channel().await })
    };
    let (channel_id, _open) = peer.read_method().await;
    assert_eq!(channel_id, 1);

    peer.send_method(
        0,
        Method::ConnectionClose {
            reply_code: 320,
            reply_text: "CONNECTION_FORCED".into(),
            class_id: 0,
            method_id: 0,
        },
    )
    .await;

    // The close is acknowledged before the transport goes down.
    let (_, reply) = peer.read_method().await;
    assert!(matches!(reply, Method::ConnectionCloseOk));

    // Close listeners see the error, then closure.
    let err = closes.recv().await.unwrap();
    assert_eq!(err.code, 320);
    assert_eq!(err.reason, "CONNECTION_FORCED");
    assert!(closes.recv().await.is_none());

    // Block listeners are closed without a value.
    assert!(blocks.recv().await.is_none());

    // The in-flight channel open is unblocked with the same error.
    let open_err = open_task.await.unwrap().unwrap_err();
    assert_eq!(open_err.code, 320);

    // Registration after shutdown closes the sink immediately.
    let (late_tx, mut late_rx) = mpsc::channel(1);
    conn.notify_close(late_tx);
    assert!(late_rx.recv().await.is_none());
}

#[tokio::test]
async fn socket_close_during_tune_is_a_credentials_error() {
    let (client, server) = tokio::io::duplex(4096);
    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server);
        peer.expect_protocol_header().await;
        peer.send_method(
            0,
            Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: Table::new(),
                mechanisms: "PLAIN".into(),
                locales: "en_US".into(),
            },
        )
        .await;
        let (_, start_ok) = peer.read_method().await;
        assert!(matches!(start_ok, Method::ConnectionStartOk { .. }));
        // Bad credentials: the server hangs up instead of tuning.
        drop(peer);
    });

    let err = Connection::open(client, ConnectionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Credentials);
    peer_task.await.unwrap();
}

#[tokio::test]
async fn no_shared_mechanism_is_a_sasl_error() {
    let (client, server) = tokio::io::duplex(4096);
    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server);
        peer.expect_protocol_header().await;
        peer.send_method(
            0,
            Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: Table::new(),
                mechanisms: "GSSAPI".into(),
                locales: "en_US".into(),
            },
        )
        .await;
    });

    let err = Connection::open(client, ConnectionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Sasl);
    peer_task.await.unwrap();
}

#[tokio::test]
async fn rejected_open_is_a_vhost_error() {
    let (client, server) = tokio::io::duplex(4096);
    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server);
        peer.expect_protocol_header().await;
        peer.send_method(
            0,
            Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: Table::new(),
                mechanisms: "PLAIN".into(),
                locales: "en_US".into(),
            },
        )
        .await;
        let _ = peer.read_method().await; // start-ok
        peer.send_method(
            0,
            Method::ConnectionTune {
                channel_max: 0,
                frame_max: 0,
                heartbeat: 0,
            },
        )
        .await;
        let _ = peer.read_method().await; // tune-ok
        let _ = peer.read_method().await; // open
        peer.send_method(
            0,
            Method::ConnectionClose {
                reply_code: 530,
                reply_text: "NOT_ALLOWED - vhost /prod not found".into(),
                class_id: 10,
                method_id: 40,
            },
        )
        .await;
    });

    let options = ConnectionOptions {
        vhost: "/prod".into(),
        ..ConnectionOptions::default()
    };
    let err = Connection::open(client, options).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Vhost);
    peer_task.await.unwrap();
}

#[tokio::test]
async fn late_close_on_an_unknown_channel_is_answered_not_fatal() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let (close_tx, mut closes) = mpsc::channel(1);
    conn.notify_close(close_tx);

    // A channel exception for a channel we no longer track.
    peer.send_method(
        5,
        Method::ChannelClose {
            reply_code: 406,
            reply_text: "PRECONDITION_FAILED".into(),
            class_id: 60,
            method_id: 40,
        },
    )
    .await;

    let (channel_id, reply) = peer.read_method().await;
    assert_eq!(channel_id, 5);
    assert!(matches!(reply, Method::ChannelCloseOk));

    // A stray close-ok is ignored outright.
    peer.send_method(9, Method::ChannelCloseOk).await;

    // The connection is still healthy: a graceful close completes.
    let close_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.close().await })
    };
    let (_, close) = peer.read_method().await;
    let Method::ConnectionClose { reply_code, .. } = close else {
        panic!("expected connection.close, got {close:?}");
    };
    assert_eq!(reply_code, 200);
    peer.send_method(0, Method::ConnectionCloseOk).await;
    close_task.await.unwrap().unwrap();

    // Graceful shutdown: listeners close without receiving an error.
    assert!(closes.recv().await.is_none());
}

#[tokio::test]
async fn closing_a_channel_races_with_a_server_close() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let open_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.open_channel().await })
    };
    let (_, _open) = peer.read_method().await;
    peer.send_method(1, Method::ChannelOpenOk).await;
    let channel = open_task.await.unwrap().unwrap();

    let close_task = tokio::spawn(async move { channel.close().await });
    let (channel_id, close) = peer.read_method().await;
    assert_eq!(channel_id, 1);
    assert!(matches!(close, Method::ChannelClose { .. }));

    // The server's own close wins the race.
    peer.send_method(
        1,
        Method::ChannelClose {
            reply_code: 406,
            reply_text: "PRECONDITION_FAILED".into(),
            class_id: 0,
            method_id: 0,
        },
    )
    .await;

    // The client acknowledges it and surfaces the server's error.
    let (channel_id, reply) = peer.read_method().await;
    assert_eq!(channel_id, 1);
    assert!(matches!(reply, Method::ChannelCloseOk));
    let err = close_task.await.unwrap().unwrap_err();
    assert_eq!(err.code, 406);

    // The connection survives the exchange.
    assert!(conn.tuning().is_some());
}

#[tokio::test]
async fn blocked_and_unblocked_reach_every_listener() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let (tx1, mut rx1) = mpsc::channel(4);
    let (tx2, mut rx2) = mpsc::channel(4);
    conn.notify_blocked(tx1);
    conn.notify_blocked(tx2);

    peer.send_method(
        0,
        Method::ConnectionBlocked {
            reason: "low memory".into(),
        },
    )
    .await;
    peer.send_method(0, Method::ConnectionUnblocked).await;

    for rx in [&mut rx1, &mut rx2] {
        let blocked = rx.recv().await.unwrap();
        assert!(blocked.active);
        assert_eq!(blocked.reason, "low memory");

        let unblocked = rx.recv().await.unwrap();
        assert!(!unblocked.active);
        assert!(unblocked.reason.is_empty());
    }
}

#[tokio::test]
async fn wrong_reply_kind_is_command_invalid() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let close_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.close().await })
    };
    let _ = peer.read_method().await; // connection.close

    // Reply with an undistinguished method instead of close-ok.
    peer.send_frame(Frame::Method {
        channel_id: 0,
        method: Method::Other {
            class_id: 85,
            method_id: 10,
            arguments: Bytes::new(),
        },
    })
    .await;

    let err = close_task.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::CommandInvalid);
}

#[tokio::test]
async fn non_method_frame_on_channel_zero_is_fatal() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let (close_tx, mut closes) = mpsc::channel(1);
    conn.notify_close(close_tx);

    peer.send_frame(Frame::Body {
        channel_id: 0,
        payload: Bytes::from_static(b"nope"),
    })
    .await;

    // The client announces the violation before shutting down.
    let (_, close) = peer.read_method().await;
    let Method::ConnectionClose { reply_code, .. } = close else {
        panic!("expected connection.close, got {close:?}");
    };
    assert_eq!(reply_code, 505);

    let err = closes.recv().await.unwrap();
    assert_eq!(err.kind, ErrorKind::UnexpectedFrame);
    assert!(closes.recv().await.is_none());
}

#[tokio::test]
async fn operations_after_shutdown_fail_with_closed() {
    let (conn, mut peer) = connect(0, 0, 0, ConnectionOptions::default()).await;

    let close_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.close().await })
    };
    let _ = peer.read_method().await;
    peer.send_method(0, Method::ConnectionCloseOk).await;
    close_task.await.unwrap().unwrap();

    let err = conn.open_channel().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
}

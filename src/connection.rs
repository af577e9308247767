//! Connection supervisor.
//!
//! Owns the transport halves, the reader task, the channel registry,
//! the notification hub and the RPC mux, and coordinates exactly-once
//! shutdown across all of them.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────┐   frames   ┌──────────────┐
//!  socket ──────────►  │ FrameReader│ ─────────► │  dispatcher  │
//!                      └────────────┘            └──┬───┬───┬───┘
//!                                        channel 0 ─┘   │   └─ unknown channel
//!                                        (rpc/notify)   │      (close-ok / drop)
//!                                                  channels
//!
//!  callers / heartbeater ─► send() ─► Mutex<FrameWriter> ─► socket
//! ```
//!
//! The reader task is the only consumer of the transport's read half;
//! every outbound frame goes through one write lock, so frames never
//! interleave on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};

use crate::channel::Channel;
use crate::error::{Error, Result, REPLY_SUCCESS};
use crate::heartbeat::HeartbeatIntake;
use crate::notify::{Blocking, NotificationHub};
use crate::options::ConnectionOptions;
use crate::protocol::{
    FieldValue, Frame, FrameReader, FrameWriter, Method, MethodKind, Table,
};
use crate::registry::ChannelRegistry;
use crate::rpc::RpcMux;
use crate::transport::{
    self, BoxStream, IoStream, ReadDeadline, ReadStream, TimeoutReader, TimeoutWriter,
    TlsSettings, WriteStream, READ_WRITE_TIMEOUT,
};

/// Server identity captured from `connection.start`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server's major protocol version.
    pub major: u8,
    /// Server's minor protocol version.
    pub minor: u8,
    /// Server properties, including the `capabilities` table.
    pub properties: Table,
}

/// Negotiated tuning after the open handshake: the merge of client and
/// server proposals, zero meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: Duration,
}

/// A connection to the broker.
///
/// Cheaply cloneable; all clones share one transport. Frames from each
/// channel are dispatched in transport order, and a connection-level
/// failure is fanned out to every close listener and open channel
/// exactly once.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

pub(crate) struct Inner {
    /// Shutdown barrier; set at most once.
    closing: AtomicBool,
    /// Exclusive outbound path.
    writer: Mutex<FrameWriter<WriteStream>>,
    channels: ChannelRegistry,
    hub: NotificationHub,
    rpc: RpcMux,
    /// Timestamps of sent frames, consumed by the heartbeater.
    sends_tx: mpsc::Sender<Instant>,
    /// Read notifications, consumed by the heartbeater.
    reads_tx: mpsc::Sender<()>,
    /// Signals the reader loop that the connection is going down.
    closed_tx: watch::Sender<bool>,
    deadline: ReadDeadline,
    /// Heartbeater receivers, parked here until `connection.tune`.
    heartbeat_intake: StdMutex<Option<HeartbeatIntake>>,
    pub(crate) server: OnceLock<ServerInfo>,
    pub(crate) tuning: OnceLock<Tuning>,
}

impl Connection {
    /// Connect over plain TCP and run the open handshake.
    pub async fn connect(host: &str, port: u16, options: ConnectionOptions) -> Result<Connection> {
        let stream = transport::tcp_connect(host, port, options.connect_timeout).await?;
        Self::open(stream, options).await
    }

    /// Connect over TLS and run the open handshake. The TLS handshake
    /// completes before any protocol bytes are sent; certificate
    /// validation uses `host` unless `tls` names a server explicitly.
    pub async fn connect_tls(
        host: &str,
        port: u16,
        tls: TlsSettings,
        options: ConnectionOptions,
    ) -> Result<Connection> {
        let stream = transport::tcp_connect(host, port, options.connect_timeout).await?;
        let stream = transport::tls_connect(stream, &tls, host, options.connect_timeout).await?;
        Self::open(stream, options).await
    }

    /// Take an established transport, spawn the reader task and run
    /// the open handshake. On handshake failure the transport is
    /// closed by shutdown and the error is returned.
    pub async fn open(
        stream: impl IoStream + 'static,
        options: ConnectionOptions,
    ) -> Result<Connection> {
        let boxed: BoxStream = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);

        // Heartbeating hasn't started yet; don't stall forever on a
        // dead server.
        let deadline = ReadDeadline::new(options.connect_timeout);
        let reader = FrameReader::new(
            TimeoutReader::new(read_half, deadline.clone()),
            options.frame_max,
        );
        let writer = FrameWriter::new(TimeoutWriter::new(write_half, READ_WRITE_TIMEOUT));

        let (sends_tx, sends_rx) = mpsc::channel(1);
        let (reads_tx, reads_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = watch::channel(false);

        let conn = Connection {
            inner: Arc::new(Inner {
                closing: AtomicBool::new(false),
                writer: Mutex::new(writer),
                channels: ChannelRegistry::new(),
                hub: NotificationHub::new(),
                rpc: RpcMux::new(),
                sends_tx,
                reads_tx,
                closed_tx,
                deadline,
                heartbeat_intake: StdMutex::new(Some(HeartbeatIntake {
                    sends: sends_rx,
                    reads: reads_rx,
                })),
                server: OnceLock::new(),
                tuning: OnceLock::new(),
            }),
        };

        tokio::spawn(reader_loop(conn.clone(), reader, closed_rx));

        match conn.handshake(&options).await {
            Ok(()) => Ok(conn),
            Err(err) => {
                conn.shutdown(Some(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Open a new channel and drive its open exchange.
    pub async fn open_channel(&self) -> Result<Channel> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(Error::closed());
        }
        let id = self.inner.channels.next()?;
        let (mut channel, handle) = Channel::new(self.clone(), id);
        self.inner.channels.add(id, Arc::new(handle));

        match channel.open().await {
            Ok(()) => Ok(channel),
            Err(err) => {
                self.inner.channels.remove(id);
                Err(err)
            }
        }
    }

    /// Request and await an orderly connection close, then shut down.
    ///
    /// After this returns, all channels, listeners and the transport
    /// are closed regardless of the result.
    pub async fn close(&self) -> Result<()> {
        let result = self
            .call(
                Some(Method::ConnectionClose {
                    reply_code: REPLY_SUCCESS,
                    reply_text: "kthxbai".to_string(),
                    class_id: 0,
                    method_id: 0,
                }),
                &[MethodKind::ConnectionCloseOk],
            )
            .await;
        self.shutdown(None).await;
        result.map(|_| ())
    }

    /// Close carrying an explicit code and reason, and propagate that
    /// error to listeners and channels.
    pub async fn close_with(&self, err: Error) -> Result<()> {
        let result = self
            .call(
                Some(Method::ConnectionClose {
                    reply_code: err.code,
                    reply_text: err.reason.clone(),
                    class_id: 0,
                    method_id: 0,
                }),
                &[MethodKind::ConnectionCloseOk],
            )
            .await;
        self.shutdown(Some(err)).await;
        result.map(|_| ())
    }

    /// Register a close listener. On error shutdown the sink receives
    /// the error and is then closed; on graceful shutdown it is just
    /// closed. After shutdown the sink closes immediately. Use a
    /// bounded sink with spare capacity; a full sink stalls shutdown.
    pub fn notify_close(&self, sink: mpsc::Sender<Error>) {
        self.inner.hub.register_close(sink);
    }

    /// Register a listener for broker flow-control notifications.
    pub fn notify_blocked(&self, sink: mpsc::Sender<Blocking>) {
        self.inner.hub.register_blocked(sink);
    }

    /// Look up a boolean server capability such as `basic.nack`.
    pub fn is_capable(&self, feature: &str) -> bool {
        let Some(info) = self.inner.server.get() else {
            return false;
        };
        match info.properties.get("capabilities") {
            Some(FieldValue::Table(caps)) => {
                matches!(caps.get(feature), Some(FieldValue::Bool(true)))
            }
            _ => false,
        }
    }

    /// Server version and properties, available once the handshake has
    /// captured them.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.inner.server.get()
    }

    /// Negotiated tuning, available after the tune exchange.
    pub fn tuning(&self) -> Option<Tuning> {
        self.inner.tuning.get().copied()
    }

    /// Serialize one frame to the transport. On success, hint the
    /// heartbeater that traffic flowed; on failure, bring the whole
    /// connection down with the write error.
    pub(crate) async fn send(&self, frame: Frame) -> Result<()> {
        let result = {
            let mut writer = self.inner.writer.lock().await;
            writer.write_frame(&frame).await
        };

        match result {
            Ok(()) => {
                // Only lands if the heartbeater is keeping up; a full
                // slot means a fresher timestamp is already queued.
                let _ = self.inner.sends_tx.try_send(Instant::now());
                Ok(())
            }
            Err(err) => {
                // Shutdown can be re-entered from notification sinks;
                // the barrier makes that a no-op.
                self.shutdown(Some(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Emit the 8-byte preamble that opens version negotiation.
    pub(crate) async fn send_protocol_header(&self) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer.write_protocol_header().await
    }

    /// Channel-0 RPC: optionally send a request, then wait for a reply
    /// of one of the expected kinds.
    pub(crate) async fn call(
        &self,
        request: Option<Method>,
        expected: &[MethodKind],
    ) -> Result<Method> {
        if let Some(method) = request {
            self.send(Frame::Method {
                channel_id: 0,
                method,
            })
            .await?;
        }
        self.inner.rpc.wait(expected).await
    }

    /// Tear the connection down, at most once. Side effects run in a
    /// fixed order: error fan-out, channel shutdowns, RPC unblock,
    /// transport close, sink closure.
    pub(crate) async fn shutdown(&self, err: Option<Error>) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(error = ?err, "connection shutting down");

        // Freeze the hub first so no sink registered from here on can
        // miss its closure.
        let (closes, blocks) = self.inner.hub.drain();

        if let Some(err) = &err {
            for sink in &closes {
                let _ = sink.send(err.clone()).await;
            }
        }

        for handle in self.inner.channels.remove_all() {
            handle.shutdown(err.clone());
        }

        if let Some(err) = &err {
            // One-slot queue: unblocks an in-flight RPC now or the
            // next caller later.
            let _ = self.inner.rpc.errors_tx.try_send(err.clone());
        }

        let _ = self.inner.closed_tx.send(true);
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("transport close failed: {e}");
            }
        }

        // Dropping the senders closes every listener sink.
        drop(closes);
        drop(blocks);
    }

    pub(crate) fn release_channel(&self, id: u16) {
        self.inner.channels.remove(id);
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }
}

impl Inner {
    pub(crate) fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub(crate) fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub(crate) fn deadline(&self) -> &ReadDeadline {
        &self.deadline
    }

    pub(crate) fn take_heartbeat_intake(&self) -> Option<HeartbeatIntake> {
        self.heartbeat_intake.lock().unwrap().take()
    }
}

/// Reader task: the only reader of the transport and the sole caller
/// of the dispatcher. Runs until the transport fails or shutdown
/// signals closure.
async fn reader_loop(
    conn: Connection,
    mut reader: FrameReader<ReadStream>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            result = reader.read_frame() => match result {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!("reader stopped: {err}");
                    conn.shutdown(Some(err)).await;
                    return;
                }
            },
            _ = closed.changed() => return,
        };

        conn.demux(frame).await;
        // Best-effort: a full slot means a refresh is already pending.
        let _ = conn.inner.reads_tx.try_send(());
    }
}

impl Connection {
    async fn demux(&self, frame: Frame) {
        if frame.channel_id() == 0 {
            self.dispatch0(frame).await;
        } else {
            self.dispatch_n(frame).await;
        }
    }

    async fn dispatch0(&self, frame: Frame) {
        match frame {
            Frame::Method { method, .. } => match method {
                Method::ConnectionClose {
                    reply_code,
                    reply_text,
                    ..
                } => {
                    // Reply before shutdown closes our side of the
                    // writer.
                    let _ = self
                        .send(Frame::Method {
                            channel_id: 0,
                            method: Method::ConnectionCloseOk,
                        })
                        .await;
                    self.shutdown(Some(Error::remote_close(reply_code, reply_text)))
                        .await;
                }
                Method::ConnectionBlocked { reason } => {
                    self.inner
                        .hub
                        .broadcast_blocking(Blocking {
                            active: true,
                            reason,
                        })
                        .await;
                }
                Method::ConnectionUnblocked => {
                    self.inner.hub.broadcast_blocking(Blocking::default()).await;
                }
                other => {
                    // Synchronous replies rendezvous with call().
                    let _ = self.inner.rpc.methods_tx.send(other).await;
                }
            },
            // All reads reset the deadline, so there is nothing left
            // to do with the heartbeat itself.
            Frame::Heartbeat => {}
            _ => {
                // Channel 0 only carries methods and heartbeats.
                self.close_from_reader(Error::unexpected_frame()).await;
            }
        }
    }

    async fn dispatch_n(&self, frame: Frame) {
        if let Some(handle) = self.inner.channels.get(frame.channel_id()) {
            handle.recv(frame);
        } else {
            self.dispatch_closed(frame).await;
        }
    }

    /// Frames for a channel that is no longer registered. A close can
    /// cross with a close-ok when the server raises a channel
    /// exception while we are closing the same channel, so both are
    /// tolerated in either order; content frames are dropped.
    async fn dispatch_closed(&self, frame: Frame) {
        let channel_id = frame.channel_id();
        if let Frame::Method { method, .. } = frame {
            match method {
                Method::ChannelClose { .. } => {
                    let _ = self
                        .send(Frame::Method {
                            channel_id,
                            method: Method::ChannelCloseOk,
                        })
                        .await;
                }
                Method::ChannelCloseOk => {
                    tracing::debug!(channel = channel_id, "late close-ok ignored");
                }
                other => {
                    tracing::debug!(
                        channel = channel_id,
                        method = ?other.class_method(),
                        "method for an unknown channel"
                    );
                    self.close_from_reader(Error::closed()).await;
                }
            }
        }
    }

    /// Announce a fatal condition to the server, then shut down with
    /// it. Used from the reader task, which cannot wait for the
    /// close-ok it will never get to read.
    async fn close_from_reader(&self, err: Error) {
        let _ = self
            .send(Frame::Method {
                channel_id: 0,
                method: Method::ConnectionClose {
                    reply_code: err.code,
                    reply_text: err.reason.clone(),
                    class_id: 0,
                    method_id: 0,
                },
            })
            .await;
        self.shutdown(Some(err)).await;
    }
}

//! Channel handles.
//!
//! A channel is split in two: the registry owns a [`ChannelHandle`]
//! (the sink the dispatcher delivers frames into, and the lever
//! shutdown pulls), while the caller owns the [`Channel`] with the
//! receiving side and the connection reference for outbound traffic.
//!
//! Only the open and close exchanges live here; content semantics
//! (exchanges, queues, consumers, publishing) belong to a layer above,
//! which consumes the raw frames this handle receives.

use tokio::sync::{mpsc, watch};

use crate::connection::Connection;
use crate::error::{Error, Result, REPLY_SUCCESS};
use crate::protocol::{Frame, Method, MethodKind};

/// Registry-owned side of a channel.
pub(crate) struct ChannelHandle {
    id: u16,
    frames: mpsc::UnboundedSender<Frame>,
    shutdown: watch::Sender<Option<Error>>,
}

impl ChannelHandle {
    /// Deliver an inbound frame. Called only by the dispatcher, in
    /// transport order.
    pub(crate) fn recv(&self, frame: Frame) {
        if self.frames.send(frame).is_err() {
            tracing::debug!(channel = self.id, "frame for a dropped channel");
        }
    }

    /// Terminate the channel with the connection's close cause.
    pub(crate) fn shutdown(&self, err: Option<Error>) {
        let _ = self
            .shutdown
            .send(Some(err.unwrap_or_else(Error::closed)));
    }

    #[cfg(test)]
    pub(crate) fn for_tests(id: u16) -> Self {
        let (frames, _) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(None);
        Self {
            id,
            frames,
            shutdown,
        }
    }
}

/// A logical session multiplexed over the connection.
pub struct Channel {
    id: u16,
    conn: Connection,
    frames: mpsc::UnboundedReceiver<Frame>,
    shutdown: watch::Receiver<Option<Error>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(conn: Connection, id: u16) -> (Channel, ChannelHandle) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        (
            Channel {
                id,
                conn,
                frames: frames_rx,
                shutdown: shutdown_rx,
            },
            ChannelHandle {
                id,
                frames: frames_tx,
                shutdown: shutdown_tx,
            },
        )
    }

    /// The channel ID, unique among live channels on this connection.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Drive the open exchange. Runs once, right after registration.
    pub(crate) async fn open(&mut self) -> Result<()> {
        self.call(Method::ChannelOpen, &[MethodKind::ChannelOpenOk])
            .await
            .map(|_| ())
    }

    /// Request and await an orderly close, then release the ID.
    pub async fn close(mut self) -> Result<()> {
        let result = self
            .call(
                Method::ChannelClose {
                    reply_code: REPLY_SUCCESS,
                    reply_text: "kthxbai".to_string(),
                    class_id: 0,
                    method_id: 0,
                },
                &[MethodKind::ChannelCloseOk],
            )
            .await;
        self.conn.release_channel(self.id);
        result.map(|_| ())
    }

    /// Next inbound frame, or `None` once the channel is down.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        if self.shutdown.borrow().is_some() {
            return None;
        }
        tokio::select! {
            frame = self.frames.recv() => frame,
            _ = self.shutdown.changed() => None,
        }
    }

    /// Send a request method on this channel and wait for a reply of
    /// one of the expected kinds. Intervening non-method frames are
    /// passed over; a server-initiated `channel.close` is acknowledged
    /// and surfaced as the error it carries.
    async fn call(&mut self, request: Method, expected: &[MethodKind]) -> Result<Method> {
        self.conn
            .send(Frame::Method {
                channel_id: self.id,
                method: request,
            })
            .await?;

        loop {
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Some(Frame::Method { method, .. }) => {
                        if expected.contains(&method.kind()) {
                            return Ok(method);
                        }
                        if let Method::ChannelClose { reply_code, reply_text, .. } = method {
                            let _ = self
                                .conn
                                .send(Frame::Method {
                                    channel_id: self.id,
                                    method: Method::ChannelCloseOk,
                                })
                                .await;
                            self.conn.release_channel(self.id);
                            return Err(Error::remote_close(reply_code, reply_text));
                        }
                        return Err(Error::command_invalid());
                    }
                    Some(_) => continue,
                    None => return Err(Error::closed()),
                },
                _ = self.shutdown.changed() => {
                    let err = self.shutdown.borrow().clone().unwrap_or_else(Error::closed);
                    return Err(err);
                }
            }
        }
    }
}

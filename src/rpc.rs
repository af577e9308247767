//! Synchronous RPC plumbing for channel 0.
//!
//! The dispatcher forwards undistinguished channel-0 methods into a
//! single-slot queue; callers rendezvous with it here, racing against
//! the one-shot errors queue that shutdown populates. At most one RPC
//! is in flight at a time; the receivers live behind a lock.

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::protocol::{Method, MethodKind};

pub(crate) struct RpcMux {
    /// Dispatcher side of the method queue.
    pub(crate) methods_tx: mpsc::Sender<Method>,
    /// Shutdown side of the one-shot errors queue.
    pub(crate) errors_tx: mpsc::Sender<Error>,
    intake: Mutex<Intake>,
}

struct Intake {
    methods_rx: mpsc::Receiver<Method>,
    errors_rx: mpsc::Receiver<Error>,
}

impl RpcMux {
    pub(crate) fn new() -> Self {
        let (methods_tx, methods_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Self {
            methods_tx,
            errors_tx,
            intake: Mutex::new(Intake {
                methods_rx,
                errors_rx,
            }),
        }
    }

    /// Wait for the next channel-0 reply and match it against the
    /// expected kinds. A shutdown error wins the race; a reply of the
    /// wrong kind is a command-invalid error.
    pub(crate) async fn wait(&self, expected: &[MethodKind]) -> Result<Method> {
        let mut intake = self.intake.lock().await;
        let Intake {
            methods_rx,
            errors_rx,
        } = &mut *intake;

        tokio::select! {
            err = errors_rx.recv() => Err(err.unwrap_or_else(Error::closed)),
            method = methods_rx.recv() => match method {
                Some(m) if expected.contains(&m.kind()) => Ok(m),
                Some(_) => Err(Error::command_invalid()),
                None => Err(Error::closed()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_reply_is_returned() {
        let mux = RpcMux::new();
        mux.methods_tx
            .send(Method::ConnectionOpenOk)
            .await
            .unwrap();

        let method = mux.wait(&[MethodKind::ConnectionOpenOk]).await.unwrap();
        assert_eq!(method, Method::ConnectionOpenOk);
    }

    #[tokio::test]
    async fn any_expected_kind_matches() {
        let mux = RpcMux::new();
        mux.methods_tx
            .send(Method::ConnectionTune {
                channel_max: 0,
                frame_max: 0,
                heartbeat: 0,
            })
            .await
            .unwrap();

        let method = mux
            .wait(&[MethodKind::ConnectionSecure, MethodKind::ConnectionTune])
            .await
            .unwrap();
        assert_eq!(method.kind(), MethodKind::ConnectionTune);
    }

    #[tokio::test]
    async fn mismatched_reply_is_command_invalid() {
        let mux = RpcMux::new();
        mux.methods_tx
            .send(Method::ConnectionCloseOk)
            .await
            .unwrap();

        let err = mux.wait(&[MethodKind::ConnectionOpenOk]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CommandInvalid);
    }

    #[tokio::test]
    async fn shutdown_error_unblocks_a_waiter() {
        let mux = std::sync::Arc::new(RpcMux::new());
        let waiter = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.wait(&[MethodKind::ConnectionOpenOk]).await })
        };

        mux.errors_tx
            .send(Error::remote_close(320, "CONNECTION_FORCED"))
            .await
            .unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code, 320);
    }
}

//! Heartbeat task.
//!
//! Ensures at least one frame is sent per negotiated interval (with a
//! one-second jitter tolerance) and stretches the read deadline after
//! every inbound frame so a quiet but healthy server is not cut off.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::Error;
use crate::protocol::Frame;
use crate::transport::ReadDeadline;

/// Missed server heartbeats tolerated before a read times out.
const MAX_SERVER_HEARTBEATS_IN_FLIGHT: u32 = 3;

/// Receivers feeding the heartbeat loop: send timestamps from the
/// frame writer and read notifications from the reader loop. Both are
/// one-slot queues written with non-blocking sends.
pub(crate) struct HeartbeatIntake {
    pub(crate) sends: mpsc::Receiver<Instant>,
    pub(crate) reads: mpsc::Receiver<()>,
}

/// Run until the connection closes (`done` is a registered close
/// listener), the intake closes, or a heartbeat send fails.
pub(crate) async fn run(
    conn: Connection,
    interval: Duration,
    mut intake: HeartbeatIntake,
    mut done: mpsc::Receiver<Error>,
    deadline: ReadDeadline,
) {
    let enabled = !interval.is_zero();
    let tick_period = if enabled {
        interval
    } else {
        Duration::from_secs(3600)
    };
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + tick_period, tick_period);
    let mut last_sent = Instant::now();

    tracing::debug!(?interval, "heartbeater running");

    loop {
        tokio::select! {
            sent = intake.sends.recv() => match sent {
                // When actively sending, rely on regular frames to keep
                // the server's timer happy.
                Some(at) => last_sent = at,
                None => return,
            },
            _ = ticker.tick(), if enabled => {
                // When idle, fill the space with a heartbeat frame.
                if last_sent.elapsed() + Duration::from_secs(1) > interval
                    && conn.send(Frame::Heartbeat).await.is_err()
                {
                    // Keep ticking through close/close-ok; stop only
                    // once the transport errors out.
                    return;
                }
            },
            read = intake.reads.recv() => {
                if enabled {
                    deadline.set(interval * MAX_SERVER_HEARTBEATS_IN_FLIGHT);
                }
                if read.is_none() {
                    return;
                }
            },
            _ = done.recv() => return,
        }
    }
}

//! The open-connection state machine.
//!
//! ```text
//! C:protocol-header
//! S:START   C:START-OK
//! *( S:SECURE C:SECURE-OK )
//! S:TUNE    C:TUNE-OK
//! C:OPEN    S:OPEN-OK
//! ```
//!
//! Replies arrive through the same reader task and RPC mux that serve
//! the connection afterwards; the handshake is just the first (and
//! strictly sequential) user of `call`.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::auth::{pick_mechanism, Sasl};
use crate::connection::{Connection, ServerInfo, Tuning};
use crate::error::{Error, Result};
use crate::heartbeat;
use crate::options::ConnectionOptions;
use crate::protocol::{FieldValue, Frame, Method, MethodKind, Table};
use crate::transport::READ_WRITE_TIMEOUT;

impl Connection {
    pub(crate) async fn handshake(&self, options: &ConnectionOptions) -> Result<()> {
        self.send_protocol_header().await?;
        self.open_start(options).await
    }

    async fn open_start(&self, options: &ConnectionOptions) -> Result<()> {
        let Method::ConnectionStart {
            version_major,
            version_minor,
            server_properties,
            mechanisms,
            ..
        } = self.call(None, &[MethodKind::ConnectionStart]).await?
        else {
            return Err(Error::command_invalid());
        };

        tracing::debug!(
            major = version_major,
            minor = version_minor,
            "server greeting"
        );
        let _ = self.inner().server.set(ServerInfo {
            major: version_major,
            minor: version_minor,
            properties: server_properties,
        });

        let auth = pick_mechanism(&options.sasl, &mechanisms).ok_or_else(Error::sasl)?;
        self.open_tune(options, auth.as_ref()).await
    }

    async fn open_tune(&self, options: &ConnectionOptions, auth: &dyn Sasl) -> Result<()> {
        let start_ok = Method::ConnectionStartOk {
            client_properties: client_properties(options),
            mechanism: auth.mechanism().to_string(),
            response: auth.response(),
            locale: "en_US".to_string(),
        };

        // A server rejecting the credentials closes the socket here
        // instead of sending a protocol close: the connection is not
        // open yet, so it has no other way to say no.
        let mut reply = self
            .call(
                Some(start_ok),
                &[MethodKind::ConnectionTune, MethodKind::ConnectionSecure],
            )
            .await
            .map_err(|_| Error::credentials())?;

        while matches!(reply, Method::ConnectionSecure { .. }) {
            let secure_ok = Method::ConnectionSecureOk {
                response: auth.response(),
            };
            reply = self
                .call(
                    Some(secure_ok),
                    &[MethodKind::ConnectionTune, MethodKind::ConnectionSecure],
                )
                .await
                .map_err(|_| Error::credentials())?;
        }

        let Method::ConnectionTune {
            channel_max,
            frame_max,
            heartbeat,
        } = reply
        else {
            return Err(Error::command_invalid());
        };

        let client_heartbeat = if options.heartbeat < Duration::from_secs(1) {
            0
        } else {
            options.heartbeat.as_secs().min(u64::from(u16::MAX))
        };
        let tuning = Tuning {
            channel_max: pick(u64::from(options.channel_max), u64::from(channel_max)) as u16,
            frame_max: pick(u64::from(options.frame_max), u64::from(frame_max)) as u32,
            heartbeat: Duration::from_secs(pick(client_heartbeat, u64::from(heartbeat))),
        };
        tracing::debug!(
            channel_max = tuning.channel_max,
            frame_max = tuning.frame_max,
            heartbeat = ?tuning.heartbeat,
            "tuned"
        );

        let _ = self.inner().tuning.set(tuning);
        self.inner().channels().set_limit(tuning.channel_max);
        // Idle reads fall back to the fixed deadline until the
        // heartbeater starts stretching it.
        self.inner().deadline().set(READ_WRITE_TIMEOUT);

        // The client starts heartbeating after receiving tune, not
        // after open-ok.
        if let Some(intake) = self.inner().take_heartbeat_intake() {
            let (done_tx, done_rx) = mpsc::channel(1);
            self.inner().hub().register_close(done_tx);
            tokio::spawn(heartbeat::run(
                self.clone(),
                tuning.heartbeat,
                intake,
                done_rx,
                self.inner().deadline().clone(),
            ));
        }

        self.send(Frame::Method {
            channel_id: 0,
            method: Method::ConnectionTuneOk {
                channel_max: tuning.channel_max,
                frame_max: tuning.frame_max,
                heartbeat: tuning.heartbeat.as_secs() as u16,
            },
        })
        .await?;

        self.open_vhost(options).await
    }

    async fn open_vhost(&self, options: &ConnectionOptions) -> Result<()> {
        self.call(
            Some(Method::ConnectionOpen {
                vhost: options.vhost.clone(),
            }),
            &[MethodKind::ConnectionOpenOk],
        )
        .await
        .map_err(|_| Error::vhost())?;

        tracing::debug!(vhost = %options.vhost, "connection open");
        Ok(())
    }
}

/// Merge one tuning parameter: zero on either side means "no limit",
/// so the other side wins; otherwise the smaller proposal wins.
fn pick(client: u64, server: u64) -> u64 {
    if client == 0 || server == 0 {
        client.max(server)
    } else {
        client.min(server)
    }
}

fn client_properties(options: &ConnectionOptions) -> Table {
    let mut capabilities = Table::new();
    capabilities.insert("connection.blocked".to_string(), FieldValue::Bool(true));

    let mut properties = Table::new();
    properties.insert(
        "product".to_string(),
        FieldValue::LongString(env!("CARGO_PKG_NAME").to_string()),
    );
    properties.insert(
        "version".to_string(),
        FieldValue::LongString(env!("CARGO_PKG_VERSION").to_string()),
    );
    properties.insert(
        "platform".to_string(),
        FieldValue::LongString("rust".to_string()),
    );
    properties.insert("capabilities".to_string(), FieldValue::Table(capabilities));

    for (key, value) in &options.client_properties {
        properties.insert(key.clone(), value.clone());
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_prefers_the_bounded_side() {
        // Zero means unlimited, so the other side wins.
        assert_eq!(pick(0, 2047), 2047);
        assert_eq!(pick(2047, 0), 2047);
        assert_eq!(pick(0, 0), 0);
        // Both bounded: the smaller proposal wins.
        assert_eq!(pick(10, 60), 10);
        assert_eq!(pick(60, 10), 10);
        assert_eq!(pick(7, 7), 7);
    }

    #[test]
    fn client_properties_declare_blocked_capability() {
        let props = client_properties(&ConnectionOptions::default());
        let Some(FieldValue::Table(caps)) = props.get("capabilities") else {
            panic!("capabilities table missing");
        };
        assert_eq!(
            caps.get("connection.blocked"),
            Some(&FieldValue::Bool(true))
        );
        assert!(matches!(
            props.get("product"),
            Some(FieldValue::LongString(_))
        ));
    }

    #[test]
    fn caller_properties_override_defaults() {
        let mut options = ConnectionOptions::default();
        options.client_properties.insert(
            "product".to_string(),
            FieldValue::LongString("custom".to_string()),
        );
        let props = client_properties(&options);
        assert_eq!(
            props.get("product"),
            Some(&FieldValue::LongString("custom".to_string()))
        );
    }
}

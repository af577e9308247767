//! SASL authentication seam.
//!
//! The handshake picks the first caller-provided mechanism the server
//! also advertises and sends its name and initial response in
//! `connection.start-ok`. Challenge rounds reuse the same response.

use std::sync::Arc;

/// An authentication mechanism the client can offer during the
/// handshake.
pub trait Sasl: Send + Sync {
    /// Mechanism name as advertised on the wire, e.g. `PLAIN`.
    fn mechanism(&self) -> &str;

    /// Initial (and challenge) response bytes.
    fn response(&self) -> String;
}

/// The PLAIN mechanism: NUL-delimited username and password.
#[derive(Clone)]
pub struct Plain {
    pub username: String,
    pub password: String,
}

impl Plain {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Sasl for Plain {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn response(&self) -> String {
        format!("\u{0}{}\u{0}{}", self.username, self.password)
    }
}

impl std::fmt::Debug for Plain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plain")
            .field("username", &self.username)
            .field("password", &format_args!("<redacted>"))
            .finish()
    }
}

/// Pick the first client mechanism whose name the server lists.
/// `server_mechanisms` is the space-separated list from
/// `connection.start`.
pub(crate) fn pick_mechanism(
    client: &[Arc<dyn Sasl>],
    server_mechanisms: &str,
) -> Option<Arc<dyn Sasl>> {
    let offered: Vec<&str> = server_mechanisms.split(' ').collect();
    client
        .iter()
        .find(|mech| offered.contains(&mech.mechanism()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_response_is_nul_delimited() {
        let plain = Plain::new("guest", "secret");
        assert_eq!(plain.mechanism(), "PLAIN");
        assert_eq!(plain.response(), "\u{0}guest\u{0}secret");
    }

    #[test]
    fn picks_first_client_mechanism_the_server_offers() {
        struct Named(&'static str);
        impl Sasl for Named {
            fn mechanism(&self) -> &str {
                self.0
            }
            fn response(&self) -> String {
                String::new()
            }
        }

        let client: Vec<Arc<dyn Sasl>> = vec![Arc::new(Named("EXTERNAL")), Arc::new(Named("PLAIN"))];

        let picked = pick_mechanism(&client, "PLAIN AMQPLAIN").unwrap();
        assert_eq!(picked.mechanism(), "PLAIN");

        assert!(pick_mechanism(&client, "GSSAPI").is_none());
    }

    #[test]
    fn debug_output_redacts_password() {
        let plain = Plain::new("guest", "super-secret");
        let text = format!("{plain:?}");
        assert!(text.contains("<redacted>"));
        assert!(!text.contains("super-secret"));
    }
}

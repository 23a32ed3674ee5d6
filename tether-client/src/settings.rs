use std::time::Duration;

use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use tether_protocol::{Connect, SessionMode, Will};

/// Everything configurable about a client, built fluently
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_id: String,
    pub keepalive_secs: u16,
    pub session: SessionMode,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl ClientSettings {
    /// Settings with a random `tether-` client id, 60s keepalive, clean
    /// session and the default reconnect policy
    pub fn new() -> ClientSettings {
        ClientSettings {
            client_id: format!("tether-{}", Uuid::new_v4()),
            keepalive_secs: 60,
            session: SessionMode::Clean,
            username: None,
            password: None,
            will: None,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_owned();
        self
    }

    pub fn with_keepalive(mut self, keepalive_secs: u16) -> Self {
        self.keepalive_secs = keepalive_secs;
        self
    }

    pub fn with_session(mut self, session: SessionMode) -> Self {
        self.session = session;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &[u8]) -> Self {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_vec());
        self
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The CONNECT packet these settings describe
    pub fn to_connect(&self) -> Connect {
        Connect {
            client_id: self.client_id.clone(),
            clean_session: self.session.clean_session_flag(),
            keepalive_secs: self.keepalive_secs,
            will: self.will.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> ClientSettings {
        ClientSettings::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_ids_are_unique() {
        let first = ClientSettings::new();
        let second = ClientSettings::new();
        assert_ne!(first.client_id, second.client_id);
    }

    #[test]
    fn test_default_client_ids_carry_the_tether_prefix() {
        assert!(ClientSettings::new().client_id.starts_with("tether-"));
    }

    #[test]
    fn test_settings_shape_the_connect_packet() {
        let sut = ClientSettings::new()
            .with_client_id("device-7")
            .with_keepalive(30)
            .with_session(SessionMode::Resume)
            .with_credentials("user", b"secret");

        let connect = sut.to_connect();

        assert_eq!(connect.client_id, "device-7");
        assert_eq!(connect.keepalive_secs, 30);
        assert!(!connect.clean_session);
        assert_eq!(connect.username.as_deref(), Some("user"));
        assert_eq!(connect.password.as_deref(), Some(&b"secret"[..]));
    }
}

//! Spawn requests and the spawn responder.
//!
//! A start request is one UDP datagram: `"<code> <roleType> <roleVersion>"`.
//! There is no structured response contract on the requesting side —
//! correctness relies on the next recheck cycle observing whether a new
//! peer registered. The responder does reply with a numeric code, which
//! operators can watch but the controller never waits for.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use hydra_addr::RoleDescriptor;
use tokio::net::UdpSocket;

/// Request code asking a host to start one replica of a role.
pub const REQ_START: u32 = 0;

/// Responder reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SpawnResponse {
    /// Replica launch initiated.
    Ok = 0,
    /// Request did not parse.
    InvalidRequest = 1,
    /// Role is unknown to this host.
    InvalidRole = 2,
    /// Role is known but must not be spawned remotely.
    NotSpawnable = 3,
    /// Request code other than start.
    NotImplemented = 4,
    /// Launch was attempted and failed.
    SpawnFailed = 5,
}

impl fmt::Display for SpawnResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// A parsed start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Request code; only [`REQ_START`] is meaningful today.
    pub code: u32,
    /// The role to start.
    pub role: RoleDescriptor,
}

impl SpawnRequest {
    /// A start request for one role.
    pub fn start(role: RoleDescriptor) -> Self {
        Self {
            code: REQ_START,
            role,
        }
    }

    /// The datagram body.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            self.code, self.role.role_type, self.role.role_version
        )
    }

    /// Parse a datagram body.
    pub fn parse(body: &str) -> Option<Self> {
        let mut parts = body.split_whitespace();
        let code = parts.next()?.parse().ok()?;
        let role_type = parts.next()?.parse().ok()?;
        let role_version = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            code,
            role: RoleDescriptor::new(role_type, role_version),
        })
    }
}

/// Launches a local replica of a role. The host side of the spawn
/// contract; process-launch mechanics live behind this seam.
pub trait Spawner: Send + Sync {
    /// Start one replica. `Err` becomes [`SpawnResponse::SpawnFailed`].
    fn spawn(&self, role: RoleDescriptor) -> Result<(), String>;
}

/// Fixed-port listener answering start requests for a set of roles.
pub struct SpawnResponder {
    socket: UdpSocket,
    spawnable: Vec<RoleDescriptor>,
    spawner: Arc<dyn Spawner>,
}

impl SpawnResponder {
    /// Bind the responder.
    pub async fn bind(
        listen: SocketAddr,
        spawnable: Vec<RoleDescriptor>,
        spawner: Arc<dyn Spawner>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        Ok(Self {
            socket,
            spawnable,
            spawner,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests forever.
    pub async fn run(self) {
        let mut buf = [0u8; 256];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("spawn responder recv failed: {e}");
                    continue;
                }
            };

            let body = String::from_utf8_lossy(&buf[..len]);
            let response = self.answer(&body);
            tracing::debug!(%from, %response, "spawn request `{}`", body.trim());
            if let Err(e) = self
                .socket
                .send_to(response.to_string().as_bytes(), from)
                .await
            {
                tracing::warn!("spawn responder reply failed: {e}");
            }
        }
    }

    fn answer(&self, body: &str) -> SpawnResponse {
        let Some(request) = SpawnRequest::parse(body) else {
            return SpawnResponse::InvalidRequest;
        };
        if request.code != REQ_START {
            return SpawnResponse::NotImplemented;
        }
        if !self.spawnable.contains(&request.role) {
            return SpawnResponse::InvalidRole;
        }
        match self.spawner.spawn(request.role) {
            Ok(()) => SpawnResponse::Ok,
            Err(e) => {
                tracing::warn!("spawn of role {} failed: {e}", request.role);
                SpawnResponse::SpawnFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn request_encodes_as_three_numbers() {
        let request = SpawnRequest::start(RoleDescriptor::new(7, 1));
        assert_eq!(request.encode(), "0 7 1");
    }

    #[test]
    fn parse_round_trips() {
        let request = SpawnRequest::start(RoleDescriptor::new(65535, 31));
        assert_eq!(SpawnRequest::parse(&request.encode()), Some(request));
    }

    #[test]
    fn parse_rejects_malformed_bodies() {
        assert_eq!(SpawnRequest::parse(""), None);
        assert_eq!(SpawnRequest::parse("0 7"), None);
        assert_eq!(SpawnRequest::parse("0 7 1 extra"), None);
        assert_eq!(SpawnRequest::parse("zero 7 1"), None);
    }

    struct RecordingSpawner {
        started: Mutex<Vec<RoleDescriptor>>,
        fail: bool,
    }

    impl Spawner for RecordingSpawner {
        fn spawn(&self, role: RoleDescriptor) -> Result<(), String> {
            if self.fail {
                return Err("exec failed".to_string());
            }
            self.started.lock().unwrap().push(role);
            Ok(())
        }
    }

    async fn ask(responder_addr: SocketAddr, body: &str) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(body.as_bytes(), responder_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf[..len]).to_string()
    }

    #[tokio::test]
    async fn responder_starts_known_roles() {
        let spawner = Arc::new(RecordingSpawner {
            started: Mutex::new(Vec::new()),
            fail: false,
        });
        let responder = SpawnResponder::bind(
            "127.0.0.1:0".parse().unwrap(),
            vec![RoleDescriptor::new(7, 1)],
            Arc::clone(&spawner) as Arc<dyn Spawner>,
        )
        .await
        .unwrap();
        let addr = responder.local_addr().unwrap();
        tokio::spawn(responder.run());

        assert_eq!(ask(addr, "0 7 1").await, "0");
        assert_eq!(ask(addr, "0 9 1").await, "2"); // unknown role
        assert_eq!(ask(addr, "3 7 1").await, "4"); // not a start
        assert_eq!(ask(addr, "junk").await, "1");
        assert_eq!(
            spawner.started.lock().unwrap().as_slice(),
            &[RoleDescriptor::new(7, 1)]
        );
    }

    #[tokio::test]
    async fn responder_reports_spawn_failure() {
        let spawner = Arc::new(RecordingSpawner {
            started: Mutex::new(Vec::new()),
            fail: true,
        });
        let responder = SpawnResponder::bind(
            "127.0.0.1:0".parse().unwrap(),
            vec![RoleDescriptor::new(7, 1)],
            spawner as Arc<dyn Spawner>,
        )
        .await
        .unwrap();
        let addr = responder.local_addr().unwrap();
        tokio::spawn(responder.run());

        assert_eq!(ask(addr, "0 7 1").await, "5");
    }
}

//! The stop-redundancy control channel.
//!
//! A fixed-port UDP listener that disables one instance's controller
//! when a datagram matches the shared plaintext token. This is a
//! preserved behavioral contract, documented as insecure by design: the
//! token authenticates nothing and must never guard more than "stop
//! managing redundancy here". Non-matching datagrams are dropped.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Listens for the stop token on one instance's control port.
pub struct StopListener {
    socket: UdpSocket,
    token: String,
}

impl StopListener {
    /// Bind the fixed-port listener.
    pub async fn bind(listen: SocketAddr, token: String) -> std::io::Result<Self> {
        let domain = if listen.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&listen.into())?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket, token })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait until a datagram matches the token.
    ///
    /// Resolves once; the stop is permanent for the instance, so there
    /// is nothing to listen for afterwards.
    pub async fn wait(self) {
        let mut buf = [0u8; 256];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("control channel recv failed: {e}");
                    continue;
                }
            };

            if buf[..len] == *self.token.as_bytes() {
                tracing::info!(%from, "stop token received, disabling redundancy control");
                return;
            }
            tracing::debug!(%from, "control datagram did not match token");
        }
    }
}

/// Send the stop token to every target's control port.
///
/// The operator-side half of the channel: build the target list from a
/// role-prefix query, then fan the token out. Returns how many sends
/// succeeded; there are no acknowledgments.
pub async fn stop_fanout(targets: &[SocketAddr], token: &str) -> usize {
    let v4 = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await.ok();
    let v6 = UdpSocket::bind(SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)))
        .await
        .ok();

    let mut sent = 0;
    for target in targets {
        let socket = if target.is_ipv4() { &v4 } else { &v6 };
        let Some(socket) = socket else {
            tracing::warn!(%target, "no socket for target family");
            continue;
        };
        match socket.send_to(token.as_bytes(), target).await {
            Ok(_) => sent += 1,
            Err(e) => tracing::warn!(%target, "stop token send failed: {e}"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn matching_token_resolves_the_wait() {
        let listener = StopListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            "hydra-stop".to_string(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(listener.wait());

        let sent = stop_fanout(&[addr], "hydra-stop").await;
        assert_eq!(sent, 1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_token_is_ignored() {
        let listener = StopListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            "hydra-stop".to_string(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(listener.wait());

        stop_fanout(&[addr], "wrong").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        stop_fanout(&[addr], "hydra-stop").await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

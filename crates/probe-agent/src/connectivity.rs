//! Agent network connectivity gate.
//!
//! [`StunConnectivity`] sends RFC 5389 binding requests to a public STUN
//! server and caches whether a valid response came back.

use rand::RngCore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const MAGIC_COOKIE: u32 = 0x2112_A442;
const HEADER_LEN: usize = 20;

/// Whether the agent can currently reach the network.
pub trait ConnectivityCheck: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Gate that never closes
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl ConnectivityCheck for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Encode a binding request with the given transaction id.
pub fn binding_request(transaction_id: &[u8; 12]) -> [u8; HEADER_LEN] {
    let mut msg = [0u8; HEADER_LEN];
    msg[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // message length stays 0: no attributes
    msg[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    msg[8..20].copy_from_slice(transaction_id);
    msg
}

/// Whether `msg` is a binding success response to `transaction_id`.
pub fn is_binding_success(msg: &[u8], transaction_id: &[u8; 12]) -> bool {
    if msg.len() < HEADER_LEN {
        return false;
    }
    let msg_type = u16::from_be_bytes([msg[0], msg[1]]);
    let cookie = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
    msg_type == BINDING_SUCCESS && cookie == MAGIC_COOKIE && &msg[8..20] == transaction_id
}

/// Send one binding request and wait for the matching response.
pub async fn stun_check(server: &str, wait: Duration) -> bool {
    let exchange = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;

        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        socket.send(&binding_request(&transaction_id)).await?;

        let mut buf = [0u8; 512];
        loop {
            let n = socket.recv(&mut buf).await?;
            if is_binding_success(&buf[..n], &transaction_id) {
                return Ok::<_, std::io::Error>(());
            }
        }
    };

    match timeout(wait, exchange).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(server, error = %e, "STUN check failed");
            false
        }
        Err(_) => {
            debug!(server, "STUN check timed out");
            false
        }
    }
}

/// Periodic STUN check with the latest outcome cached.
#[derive(Debug)]
pub struct StunConnectivity {
    server: String,
    check_interval: Duration,
    timeout: Duration,
    connected: AtomicBool,
}

impl StunConnectivity {
    pub fn new(server: impl Into<String>, check_interval: Duration, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            check_interval,
            timeout,
            connected: AtomicBool::new(false),
        }
    }

    /// Run one check, then keep checking in the background until `cancel`.
    pub async fn start(self, cancel: CancellationToken) -> Arc<Self> {
        let this = Arc::new(self);
        this.refresh().await;

        let checker = this.clone();
        tokio::spawn(async move {
            let mut ticker = interval(checker.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        checker.refresh().await;
                    }
                }
            }
            debug!("Connectivity checker stopped");
        });

        this
    }

    /// Check now and update the cached flag.
    pub async fn refresh(&self) -> bool {
        let connected = stun_check(&self.server, self.timeout).await;
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            if connected {
                info!(server = %self.server, "Network connectivity established");
            } else {
                warn!(server = %self.server, "Network connectivity lost, pausing probes");
            }
        }
        connected
    }
}

impl ConnectivityCheck for StunConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_stun_server() -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                if n < HEADER_LEN {
                    continue;
                }
                let mut reply = [0u8; HEADER_LEN];
                reply[0..2].copy_from_slice(&BINDING_SUCCESS.to_be_bytes());
                reply[4..20].copy_from_slice(&buf[4..20]);
                socket.send_to(&reply, peer).await.unwrap();
            }
        });
        addr
    }

    #[test]
    fn test_binding_request_layout() {
        let id = [7u8; 12];
        let msg = binding_request(&id);
        assert_eq!(&msg[0..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&msg[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_eq!(&msg[8..], &id);
    }

    #[test]
    fn test_binding_success_validation() {
        let id = [1u8; 12];
        let mut reply = binding_request(&id);
        assert!(!is_binding_success(&reply, &id), "request is not a response");

        reply[0..2].copy_from_slice(&BINDING_SUCCESS.to_be_bytes());
        assert!(is_binding_success(&reply, &id));
        assert!(!is_binding_success(&reply, &[2u8; 12]));
        assert!(!is_binding_success(&reply[..10], &id));
    }

    #[tokio::test]
    async fn test_stun_connectivity_against_local_server() {
        let server = fake_stun_server().await;
        let gate = StunConnectivity::new(server, Duration::from_secs(60), Duration::from_secs(1));
        assert!(!gate.is_connected());
        assert!(gate.refresh().await);
        assert!(gate.is_connected());
    }

    #[tokio::test]
    async fn test_stun_unreachable_server() {
        // Nothing answers on this port; the check must time out.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();
        assert!(!stun_check(&addr, Duration::from_millis(100)).await);
    }
}

use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;

/// Issues and verifies announce tokens.
///
/// A token proves that the requester recently asked us `get_peers` from
/// the address it now announces from. It is the first 8 bytes of
/// `SHA-1(secret || ip)` under a rotating 16-byte secret; verification
/// accepts the current secret or the immediately previous one, so every
/// token survives exactly one rotation.
#[derive(Debug)]
pub struct TokenManager {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    pub fn issue(&self, addr: &SocketAddr) -> Bytes {
        derive(&self.current, addr)
    }

    pub fn verify(&self, addr: &SocketAddr, token: &Bytes) -> bool {
        derive(&self.current, addr) == *token || derive(&self.previous, addr) == *token
    }

    /// Retires the previous secret and draws a fresh current one.
    /// Driven by the engine's rotation interval.
    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

// Tokens are bound to the ip, not the port: announcing peers commonly
// use a different source port than the one they announce.
fn derive(secret: &[u8; 16], addr: &SocketAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(addr.ip().to_string().as_bytes());

    let digest = hasher.finalize();
    Bytes::copy_from_slice(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn issued_token_verifies_for_same_address() {
        let tokens = TokenManager::new();
        let requester = addr("1.2.3.4:6881");

        let token = tokens.issue(&requester);
        assert!(tokens.verify(&requester, &token));
    }

    #[test]
    fn token_is_bound_to_ip_not_port() {
        let tokens = TokenManager::new();

        let token = tokens.issue(&addr("1.2.3.4:6881"));
        assert!(tokens.verify(&addr("1.2.3.4:51413"), &token));
        assert!(!tokens.verify(&addr("4.3.2.1:6881"), &token));
    }

    #[test]
    fn token_survives_one_rotation_but_not_two() {
        let mut tokens = TokenManager::new();
        let requester = addr("1.2.3.4:6881");
        let token = tokens.issue(&requester);

        tokens.rotate();
        assert!(tokens.verify(&requester, &token));

        tokens.rotate();
        assert!(!tokens.verify(&requester, &token));
    }

    #[test]
    fn unrelated_bytes_never_verify() {
        let tokens = TokenManager::new();
        let requester = addr("1.2.3.4:6881");

        assert!(!tokens.verify(&requester, &Bytes::from_static(b"forged!!")));
        assert!(!tokens.verify(&requester, &Bytes::new()));
    }
}

//! Peer address validation.
//!
//! Peer addresses are `host:port` where host is `localhost` or an IPv4
//! dotted quad. Anything else is rejected at configuration time.

/// Returns true when `addr` is a well-formed peer address.
pub fn valid_peer_addr(addr: &str) -> bool {
    let Some((host, port)) = addr.split_once(':') else {
        return false;
    };
    if port.parse::<u16>().is_err() {
        return false;
    }
    if host == "localhost" {
        return true;
    }
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_localhost_and_dotted_quads() {
        assert!(valid_peer_addr("localhost:9999"));
        assert!(valid_peer_addr("127.0.0.1:6324"));
        assert!(valid_peer_addr("10.0.0.2:80"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!valid_peer_addr("localhost"));
        assert!(!valid_peer_addr("example.com:80"));
        assert!(!valid_peer_addr("256.0.0.1:80"));
        assert!(!valid_peer_addr("127.0.0.1:notaport"));
        assert!(!valid_peer_addr("127.0.0.1:"));
        assert!(!valid_peer_addr(":9999"));
    }
}

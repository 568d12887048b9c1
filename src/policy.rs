/// Rules applied to the server certificate once the DTLS handshake completes.
///
/// The defaults accept a self-signed server (the usual setup for a device
/// talking to its own gateway) but otherwise validate strictly.
///
/// `max_chain_depth` is the number of intermediate certificates allowed
/// between the server certificate and a trust anchor. A chain needing more is
/// rejected with the same error as an untrusted chain, so a depth set too low
/// looks like a missing CA rather than a depth problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Check the peer certificate at all. When false, any certificate (or
    /// none, unless `require_peer_cert`) is accepted.
    pub verify_peer: bool,
    /// Fail when the peer presents no certificate.
    pub require_peer_cert: bool,
    pub allow_self_signed: bool,
    /// Accept certificates outside their validity window.
    pub allow_expired: bool,
    /// Walk the chain to a trust anchor.
    pub validate_chain: bool,
    /// Reject revoked certificates. Needs a CRL for every issuer in the chain.
    pub check_revocation: bool,
    pub max_chain_depth: usize,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicy {
            verify_peer: true,
            require_peer_cert: true,
            allow_self_signed: true,
            allow_expired: false,
            validate_chain: true,
            check_revocation: false,
            max_chain_depth: 2,
        }
    }
}

impl SecurityPolicy {
    /// Accept whatever the peer presents. For tests against throwaway servers.
    pub fn insecure() -> Self {
        SecurityPolicy {
            verify_peer: false,
            require_peer_cert: false,
            allow_self_signed: true,
            allow_expired: true,
            validate_chain: false,
            check_revocation: false,
            max_chain_depth: 0,
        }
    }
}

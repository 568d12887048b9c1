use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::message::Method;
use crate::policy::SecurityPolicy;
use crate::Error;

/// Default port for CoAP over DTLS.
pub const COAPS_PORT: u16 = 5684;

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    server: String,
    port: u16,
    local: String,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
    crl_file: Option<PathBuf>,
    policy: SecurityPolicy,
    keepalive: Option<Duration>,
    method: Method,
    path: String,
    payload: Vec<u8>,
    poll_timeout: Duration,
    ack_timeout: Duration,
    ack_random_factor: f32,
    max_retransmit: usize,
    handshake_timeout: Duration,
    response_timeout: Duration,
    mtu: usize,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            server: "localhost".to_string(),
            port: COAPS_PORT,
            local: "0.0.0.0".to_string(),
            cert_file: Some(PathBuf::from("cert.crt")),
            key_file: Some(PathBuf::from("key.pem")),
            ca_file: Some(PathBuf::from("cert.crt")),
            crl_file: None,
            policy: SecurityPolicy::default(),
            keepalive: Some(Duration::from_secs(10)),
            method: Method::Post,
            path: "mydata".to_string(),
            payload: b"this is the payload".to_vec(),
            poll_timeout: Duration::from_millis(1000),
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            handshake_timeout: Duration::from_secs(40),
            response_timeout: Duration::from_secs(90),
            mtu: 1152,
            rng_seed: None,
        }
    }

    /// Server host name or IPv4 address.
    #[inline(always)]
    pub fn server(&self) -> &str {
        &self.server
    }

    #[inline(always)]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Local address to bind the UDP socket to.
    #[inline(always)]
    pub fn local(&self) -> &str {
        &self.local
    }

    /// PEM file with our certificate (and optionally its chain).
    ///
    /// When unset, an ephemeral self-signed certificate is generated.
    #[inline(always)]
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    /// PEM file with the private key for [`Config::cert_file`].
    #[inline(always)]
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    /// PEM file with trust anchors for validating the server.
    #[inline(always)]
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }

    /// PEM file with certificate revocation lists.
    #[inline(always)]
    pub fn crl_file(&self) -> Option<&Path> {
        self.crl_file.as_deref()
    }

    #[inline(always)]
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Idle time after which the session pings the server.
    #[inline(always)]
    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Resource path, segments separated by `/`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Max time one poll iteration blocks.
    #[inline(always)]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Base timeout before the first retransmission.
    #[inline(always)]
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    #[inline(always)]
    pub fn ack_random_factor(&self) -> f32 {
        self.ack_random_factor
    }

    /// Retransmissions before a confirmable message is nacked.
    #[inline(always)]
    pub fn max_retransmit(&self) -> usize {
        self.max_retransmit
    }

    /// Timeout for the entire DTLS handshake.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// How long to wait for a separate response after an empty ACK.
    #[inline(always)]
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Largest datagram we produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for client configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    server: String,
    port: u16,
    local: String,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
    crl_file: Option<PathBuf>,
    policy: SecurityPolicy,
    keepalive: Option<Duration>,
    method: Method,
    path: String,
    payload: Vec<u8>,
    poll_timeout: Duration,
    ack_timeout: Duration,
    ack_random_factor: f32,
    max_retransmit: usize,
    handshake_timeout: Duration,
    response_timeout: Duration,
    mtu: usize,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the server host name or IPv4 address.
    ///
    /// Defaults to `localhost`.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Set the server port.
    ///
    /// Defaults to 5684.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the local bind address.
    ///
    /// Defaults to `0.0.0.0`.
    pub fn local(mut self, local: impl Into<String>) -> Self {
        self.local = local.into();
        self
    }

    /// Set the certificate and key PEM files.
    ///
    /// Defaults to `cert.crt` and `key.pem`.
    pub fn identity_files(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = Some(key.into());
        self
    }

    /// Use a generated self-signed certificate instead of files.
    pub fn ephemeral_identity(mut self) -> Self {
        self.cert_file = None;
        self.key_file = None;
        self
    }

    /// Set the trust anchor PEM file.
    ///
    /// Defaults to `cert.crt`.
    pub fn ca_file(mut self, ca: Option<PathBuf>) -> Self {
        self.ca_file = ca;
        self
    }

    /// Set the CRL PEM file. Defaults to none.
    pub fn crl_file(mut self, crl: Option<PathBuf>) -> Self {
        self.crl_file = crl;
        self
    }

    /// Set the peer certificate policy.
    pub fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the keepalive interval, `None` disables pings.
    ///
    /// Defaults to 10 seconds.
    pub fn keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the request method.
    ///
    /// Defaults to POST.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the resource path.
    ///
    /// Defaults to `mydata`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the request payload. Empty sends no payload.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set how long one poll iteration may block.
    ///
    /// Defaults to 1 second.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the base retransmission timeout.
    ///
    /// Defaults to 2 seconds.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the random factor applied to the first retransmission timeout.
    ///
    /// Defaults to 1.5.
    pub fn ack_random_factor(mut self, factor: f32) -> Self {
        self.ack_random_factor = factor;
        self
    }

    /// Set the max number of retransmissions.
    ///
    /// Defaults to 4.
    pub fn max_retransmit(mut self, retries: usize) -> Self {
        self.max_retransmit = retries;
        self
    }

    /// Set the timeout for the entire handshake.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how long to wait for a separate response.
    ///
    /// Defaults to 90 seconds.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the max transmission unit.
    ///
    /// Defaults to 1152.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Seed the non-cryptographic randomness (message ids, tokens, jitter).
    pub fn rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` for values the session cannot work with.
    pub fn build(self) -> Result<Config, Error> {
        if self.server.is_empty() {
            return Err(Error::Config("server must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".to_string()));
        }
        if self.mtu < 64 {
            return Err(Error::Config(format!("mtu too small: {}", self.mtu)));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must be positive".to_string()));
        }
        if self.ack_timeout.is_zero() {
            return Err(Error::Config("ack timeout must be positive".to_string()));
        }
        if self.ack_random_factor.is_nan() || self.ack_random_factor < 1.0 {
            return Err(Error::Config(format!(
                "ack random factor must be >= 1.0: {}",
                self.ack_random_factor
            )));
        }
        if self.keepalive.map(|k| k.is_zero()).unwrap_or(false) {
            return Err(Error::Config(
                "keepalive must be positive, use None to disable".to_string(),
            ));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(Error::Config(
                "certificate and key files must be set together".to_string(),
            ));
        }

        Ok(self.finish())
    }

    fn finish(self) -> Config {
        Config {
            server: self.server,
            port: self.port,
            local: self.local,
            cert_file: self.cert_file,
            key_file: self.key_file,
            ca_file: self.ca_file,
            crl_file: self.crl_file,
            policy: self.policy,
            keepalive: self.keepalive,
            method: self.method,
            path: self.path,
            payload: self.payload,
            poll_timeout: self.poll_timeout,
            ack_timeout: self.ack_timeout,
            ack_random_factor: self.ack_random_factor,
            max_retransmit: self.max_retransmit,
            handshake_timeout: self.handshake_timeout,
            response_timeout: self.response_timeout,
            mtu: self.mtu,
            rng_seed: self.rng_seed,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().finish()
    }
}

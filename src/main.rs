use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use dcoap::message::Method;
use dcoap::{Config, Error, SecurityPolicy, COAPS_PORT};

#[derive(Parser, Debug)]
#[command(name = "dcoap", about = "Send one CoAP request over DTLS")]
struct Args {
    /// Server host name or IPv4 address.
    #[arg(default_value = "localhost")]
    server: String,
    #[arg(long, default_value_t = COAPS_PORT)]
    port: u16,
    /// Local address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    local: String,

    #[arg(long, default_value = "cert.crt")]
    cert: PathBuf,
    #[arg(long, default_value = "key.pem")]
    key: PathBuf,
    /// Use a generated self-signed certificate instead of --cert/--key.
    #[arg(long)]
    ephemeral: bool,
    /// Trust anchors, PEM.
    #[arg(long, default_value = "cert.crt")]
    ca: PathBuf,
    /// Certificate revocation lists, PEM. Enables revocation checks.
    #[arg(long)]
    crl: Option<PathBuf>,

    /// Intermediate certificates allowed between server and trust anchor.
    #[arg(long, default_value_t = 2)]
    chain_depth: usize,
    #[arg(long)]
    reject_self_signed: bool,
    #[arg(long)]
    allow_expired: bool,
    /// Accept any server certificate.
    #[arg(long)]
    insecure: bool,

    /// Keepalive interval in seconds, 0 disables.
    #[arg(long, default_value_t = 10)]
    keepalive: u64,

    #[arg(long, default_value = "POST")]
    method: Method,
    #[arg(long, default_value = "mydata")]
    path: String,
    #[arg(long, default_value = "this is the payload")]
    payload: String,

    #[arg(long, default_value_t = 1000)]
    poll_timeout_ms: u64,
    #[arg(long, default_value_t = 2000)]
    ack_timeout_ms: u64,
    #[arg(long, default_value_t = 1.5)]
    ack_random_factor: f32,
    #[arg(long, default_value_t = 4)]
    max_retransmit: usize,
    #[arg(long, default_value_t = 40)]
    handshake_timeout: u64,
    #[arg(long, default_value_t = 90)]
    response_timeout: u64,
    #[arg(long, default_value_t = 1152)]
    mtu: usize,
    /// Seed for message ids, tokens and jitter.
    #[arg(long)]
    seed: Option<u64>,

    /// Default log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn policy(&self) -> SecurityPolicy {
        if self.insecure {
            return SecurityPolicy::insecure();
        }
        SecurityPolicy {
            allow_self_signed: !self.reject_self_signed,
            allow_expired: self.allow_expired,
            check_revocation: self.crl.is_some(),
            max_chain_depth: self.chain_depth,
            ..SecurityPolicy::default()
        }
    }

    fn config(&self) -> Result<Config, Error> {
        let mut builder = Config::builder()
            .server(self.server.clone())
            .port(self.port)
            .local(self.local.clone())
            .ca_file(Some(self.ca.clone()))
            .crl_file(self.crl.clone())
            .policy(self.policy())
            .keepalive((self.keepalive > 0).then(|| Duration::from_secs(self.keepalive)))
            .method(self.method)
            .path(self.path.clone())
            .payload(self.payload.clone())
            .poll_timeout(Duration::from_millis(self.poll_timeout_ms))
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .ack_random_factor(self.ack_random_factor)
            .max_retransmit(self.max_retransmit)
            .handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .response_timeout(Duration::from_secs(self.response_timeout))
            .mtu(self.mtu)
            .rng_seed(self.seed);

        builder = if self.ephemeral {
            builder.ephemeral_identity()
        } else {
            builder.identity_files(self.cert.clone(), self.key.clone())
        };

        builder.build()
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Using {}", openssl::version::version());

    let result = args.config().and_then(dcoap::run);

    if let Err(e) = result {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}

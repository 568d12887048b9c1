use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::certificate::Credentials;
use crate::context::{Context, Handlers};
use crate::dtls;
use crate::exchange::Exchange;
use crate::request::RequestBuilder;
use crate::resolve::ServerEndpoint;
use crate::{Config, Error};

/// Send the configured request and poll until it is resolved.
///
/// Responses, nacks and events go to the default logging handlers.
pub fn run(config: Config) -> Result<(), Error> {
    run_with_handlers(config, Handlers::default())
}

pub fn run_with_handlers(config: Config, handlers: Handlers) -> Result<(), Error> {
    dtls::check_support()?;

    let config = Arc::new(config);

    let endpoint = ServerEndpoint::resolve(config.server(), config.port())?;
    let local = local_addr(config.local())?;

    let mut ctx = Context::with_handlers(config.clone(), handlers);

    let credentials = Credentials::load(&config)?;
    let mut session = dtls::connect(&ctx, local, &endpoint, config.policy(), &credentials)?;

    let request = RequestBuilder::new(config.method())
        .host(config.server())
        .port(endpoint.addr().port())
        .path(config.path())
        .payload(config.payload())
        .build(&mut session)?;

    let mut exchange = Exchange::new(config.poll_timeout());
    exchange.send(&mut session, request)?;
    exchange.run(&mut ctx, &mut session);

    ctx.release(session);

    Ok(())
}

fn local_addr(local: &str) -> Result<SocketAddr, Error> {
    let ip: IpAddr = local
        .parse()
        .map_err(|e| Error::Config(format!("local address {}: {}", local, e)))?;
    Ok(SocketAddr::new(ip, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addr_any_port() {
        let addr = local_addr("0.0.0.0").unwrap();
        assert_eq!(addr.port(), 0);
        assert!(local_addr("nope").is_err());
    }

    #[test]
    fn unresolvable_server_exits_2() {
        let config = Config::builder()
            .server("host.invalid")
            .ephemeral_identity()
            .build()
            .unwrap();
        let err = run(config).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}

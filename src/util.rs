use std::net::{Ipv6Addr, SocketAddr};

const DEFAULT_AGENT_PORT: u16 = 8080;

pub fn get_default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

const SMTP_USERNAME: &str = "SMTP_USERNAME";

pub fn get_smtp_username() -> Option<String> {
    std::env::var(SMTP_USERNAME).ok().filter(|v| !v.is_empty())
}

const SMTP_PASSWORD: &str = "SMTP_PASSWORD";

pub fn get_smtp_password() -> Option<String> {
    std::env::var(SMTP_PASSWORD).ok().filter(|v| !v.is_empty())
}

/// Build the URL of an agent endpoint.
///
/// A host that already carries a port (`10.0.0.5:9000`) keeps it, a bare IPv6
/// address gets bracketed, anything else gets `port` appended.
pub fn agent_url(protocol: &str, host: &str, port: u16, path: &str) -> String {
    if host.parse::<SocketAddr>().is_ok() {
        return format!("{protocol}://{host}{path}");
    }
    if host.parse::<Ipv6Addr>().is_ok() {
        return format!("{protocol}://[{host}]:{port}{path}");
    }
    if let Some((name, explicit)) = host.rsplit_once(':')
        && !name.is_empty()
        && explicit.parse::<u16>().is_ok()
    {
        return format!("{protocol}://{host}{path}");
    }
    format!("{protocol}://{host}:{port}{path}")
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const HUB_PORT: &str = "HUB_PORT";

const DEFAULT_PORT: u16 = 8080;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(HUB_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const HUB_ADDR: &str = "HUB_ADDR";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

pub fn get_addr() -> IpAddr {
    let addr_from_env = std::env::var(HUB_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

/// API bind address when the config file does not name one.
pub fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(get_addr(), get_port())
}

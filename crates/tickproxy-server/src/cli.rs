//! Command-line overrides for the proxy binary.
//!
//! Everything else is read from `TICKPROXY_*` environment variables; these
//! flags win over the environment when given.
//!
//! ```bash
//! tickproxy --bind 0.0.0.0 --port 9000 --cache-dir /var/cache/tickproxy
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tickproxy_server::ProxyConfig;

#[derive(Debug, Parser)]
#[command(
    name = "tickproxy",
    version,
    about = "Caching, rate-limited HTTP proxy for historical market series"
)]
pub struct Cli {
    /// Listen address.
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for cached series files.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl Cli {
    pub fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.cache_dir = cache_dir;
        }
        config
    }
}

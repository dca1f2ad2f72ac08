//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "ledger-indexer")]
#[command(about = "Indexes submitted blocks into address balances", version)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "LEDGER_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// SQLite database file (parent directories are created)
    #[arg(long, env = "LEDGER_DATABASE", default_value = "data/ledger.db")]
    pub database: PathBuf,

    /// How long to wait on a locked database before reporting it unavailable
    #[arg(long, env = "LEDGER_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,
}

impl Config {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let cfg = Config::try_parse_from(["ledger-indexer"]).unwrap();
        assert_eq!(cfg.listen.port(), 3000);
        assert_eq!(cfg.database, PathBuf::from("data/ledger.db"));
        assert_eq!(cfg.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "ledger-indexer",
            "--listen",
            "0.0.0.0:8080",
            "--database",
            "/tmp/x.db",
            "--busy-timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cfg.listen.port(), 8080);
        assert_eq!(cfg.busy_timeout(), Duration::from_millis(250));
    }
}

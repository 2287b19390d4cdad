// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use structopt::StructOpt;
use tokio::{fs::File, io::AsyncReadExt};

use ii_proxy_protocol::proxy::ProxyConfig;
use ii_proxy_protocol::Address;

#[derive(Debug, StructOpt)]
pub struct Args {
    #[structopt(short = "c", long = "conf", help("Path to configuration file"))]
    pub config_file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub listen_address: Address,
    /// Protocols offered on the listener, in priority order; the first
    /// entry receives every accepted connection
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    /// Connections idle longer than this many seconds are dropped
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy_protocol: ProxyConfig,
}

fn default_protocols() -> Vec<String> {
    vec!["proxy".to_string(), "echo".to_string()]
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Cannot open configuration file {:?}", path))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .with_context(|| format!("Cannot read configuration file {:?}", path))?;
        toml::from_str(&contents).context("Invalid configuration")
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            listen_address = "0.0.0.0:3333"
            protocols = ["proxy", "echo"]
            idle_timeout_secs = 30

            [proxy_protocol]
            next_protocol = "echo"
            max_proxy_header = 2048
            "#,
        )
        .expect("BUG: Cannot parse configuration");

        assert_eq!(Address("0.0.0.0".to_string(), 3333), config.listen_address);
        assert_eq!(vec!["proxy", "echo"], config.protocols);
        assert_eq!(Some(Duration::from_secs(30)), config.idle_timeout());
        assert_eq!(Some("echo"), config.proxy_protocol.next_protocol.as_deref());
        assert_eq!(2048, config.proxy_protocol.max_proxy_header);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str("listen_address = \"127.0.0.1:3333\"")
            .expect("BUG: Cannot parse configuration");

        assert_eq!(default_protocols(), config.protocols);
        assert_eq!(None, config.idle_timeout());
        assert_eq!(None, config.proxy_protocol.next_protocol);
        assert_eq!(
            ii_proxy_protocol::proxy::DEFAULT_MAX_PROXY_HEADER,
            config.proxy_protocol.max_proxy_header
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let res: std::result::Result<Config, _> =
            toml::from_str("listen_address = \"127.0.0.1:3333\"\nsurprise = true");
        assert!(res.is_err(), "BUG: unknown fields must be rejected");
    }
}

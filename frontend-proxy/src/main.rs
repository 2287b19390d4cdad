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

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::prelude::*;
use structopt::StructOpt;

use ii_logging::macros::*;
use ii_logging::LoggingConfig;

use ii_frontend_proxy::config::{Args, Config};
use ii_frontend_proxy::echo::EchoConnectionFactory;
use ii_proxy_protocol::proxy::ProxyConnectionFactory;
use ii_proxy_protocol::{drive, Connector, Server, TcpEndpoint};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = ii_logging::setup_for_app(LoggingConfig::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE);

    let args = Args::from_args();
    let config = Config::load(&args.config_file)
        .await
        .context("Cannot load configuration")?;

    let mut connector = Connector::new().with_executor(tokio::runtime::Handle::current());
    for name in &config.protocols {
        connector = match name.to_ascii_lowercase().as_str() {
            "proxy" => connector.with_protocol(
                name.clone(),
                Arc::new(ProxyConnectionFactory::new(config.proxy_protocol.clone())),
            ),
            "echo" => connector.with_protocol(name.clone(), Arc::new(EchoConnectionFactory)),
            other => bail!("Unknown protocol in configuration: {}", other),
        };
    }
    let connector = Arc::new(connector);

    let mut server = Server::bind(&config.listen_address)
        .with_context(|| format!("Cannot bind {}", config.listen_address))?;
    info!(
        "Listening on {} with protocols {:?}",
        config.listen_address,
        connector.protocols()
    );

    let idle_timeout = config.idle_timeout();
    loop {
        tokio::select! {
            accepted = server.next() => match accepted {
                Some(Ok(stream)) => match TcpEndpoint::new(stream) {
                    Ok(endpoint) => {
                        let endpoint = endpoint.with_idle_timeout(idle_timeout);
                        let connector = connector.clone();
                        connector
                            .clone()
                            .executor()
                            .spawn(drive(Box::new(endpoint), connector));
                    }
                    Err(e) => warn!("Cannot set up accepted connection: {}", e),
                },
                Some(Err(e)) => warn!("Accept failed: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

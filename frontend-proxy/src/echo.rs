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

//! Demonstration next protocol: echoes everything back to the peer.

use std::sync::Arc;

use ii_logging::macros::*;

use ii_proxy_protocol::connection::{Connection, ConnectionFactory, Connector, Next};
use ii_proxy_protocol::endpoint::{Endpoint, Fill};

pub struct EchoConnectionFactory;

impl ConnectionFactory for EchoConnectionFactory {
    fn new_connection(
        &self,
        _connector: Arc<Connector>,
        endpoint: &mut dyn Endpoint,
    ) -> Box<dyn Connection> {
        debug!("New echo session for {}", endpoint.remote_addr());
        Box::new(EchoConnection {
            pending: Vec::new(),
        })
    }
}

struct EchoConnection {
    /// Output the socket refused to take, flushed on the next event
    pending: Vec<u8>,
}

impl EchoConnection {
    /// Send as much of `data` as the socket takes, queue the rest
    fn send(&mut self, endpoint: &mut dyn Endpoint, data: &[u8]) -> std::io::Result<()> {
        let mut data = data;
        while !data.is_empty() && self.pending.is_empty() {
            match endpoint.write(data)? {
                0 => break,
                n => data = &data[n..],
            }
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }
}

impl Connection for EchoConnection {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            if let Err(e) = self.send(endpoint, &pending) {
                warn!("Echo write failed for {}: {}", endpoint.remote_addr(), e);
                return Next::Close;
            }
        }

        let mut buf = [0u8; 4096];
        loop {
            match endpoint.fill(&mut buf) {
                Ok(Fill::Data(n)) => {
                    let data: Vec<u8> = buf[..n].to_vec();
                    if let Err(e) = self.send(endpoint, &data) {
                        warn!("Echo write failed for {}: {}", endpoint.remote_addr(), e);
                        return Next::Close;
                    }
                }
                Ok(Fill::WouldBlock) => return Next::Wait,
                Ok(Fill::Eof) => {
                    endpoint.shutdown_output();
                    return Next::Close;
                }
                Err(e) => {
                    warn!("Echo read failed for {}: {}", endpoint.remote_addr(), e);
                    return Next::Close;
                }
            }
        }
    }
}

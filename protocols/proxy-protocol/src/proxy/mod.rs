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

//! Decoding of the [PROXY protocol](http://www.haproxy.org/download/1.8/doc/proxy-protocol.txt)
//! preface a load balancer prepends to a proxied connection.
//!
//! Every accepted connection starts in [`VersionDetect`], which reads the
//! 16 byte discovery window and upgrades the endpoint to the matching
//! variant decoder. The variant decoder consumes the rest of the preface
//! with bounded reads, wraps the endpoint in a [`ProxyEndpoint`] reporting
//! the decoded addresses and upgrades once more, into the protocol that
//! owns every byte after the preface.

mod endpoint;
pub mod v1;
pub mod v2;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::ProxyEndpoint;
pub use v1::V1Decoder;
pub use v2::V2Decoder;

use std::sync::Arc;

use serde::Deserialize;

use ii_logging::macros::*;

use crate::connection::{Connection, ConnectionFactory, Connector, Next};
use crate::endpoint::{Endpoint, Fill};
use crate::error::{Error, Result};

/// Attribute key under which the TLS version from a v2 SSL TLV is stored
/// on the wrapped endpoint
pub const TLS_VERSION: &str = "TLS_VERSION";

/// Fixed 12 byte signature opening every v2 preface
pub(crate) const V2_SIGNATURE: &[u8] = b"\x0D\x0A\x0D\x0A\x00\x0D\x0A\x51\x55\x49\x54\x0A";

/// Fixed v2 header size. Also the discovery window: 16 bytes are enough to
/// tell the variants apart (v1 opens with `P`, v2 with `0x0D`) without
/// per-byte reads, and never reach past a well formed v1 preface.
pub(crate) const V2_HEADER_SIZE: usize = 16;

/// Hard cap on a v1 preface, CRLF included
pub(crate) const V1_MAX_LENGTH: usize = 108;

/// Default cap on the v2 payload following the fixed header
pub const DEFAULT_MAX_PROXY_HEADER: u16 = 1024;

// v2 command nibble
pub(crate) const COMMAND_LOCAL: u8 = 0x0;
pub(crate) const COMMAND_PROXY: u8 = 0x1;

// TLV types defined by the protocol. Only SSL (and its version sub-TLV)
// is interpreted here, the others are recognized and skipped.
pub(crate) const PP2_TYPE_ALPN: u8 = 0x01;
pub(crate) const PP2_TYPE_AUTHORITY: u8 = 0x02;
pub(crate) const PP2_TYPE_CRC32C: u8 = 0x03;
pub(crate) const PP2_TYPE_NOOP: u8 = 0x04;
pub(crate) const PP2_TYPE_SSL: u8 = 0x20;
pub(crate) const PP2_SUBTYPE_SSL_VERSION: u8 = 0x21;
pub(crate) const PP2_TYPE_NETNS: u8 = 0x30;

/// Client field value of the SSL TLV indicating the client connected over
/// TLS
pub(crate) const PP2_CLIENT_SSL: u8 = 0x01;

/// Address family from the high nibble of the v2 `fam_trans` byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Unspec,
    Inet,
    Inet6,
    Unix,
}

impl Family {
    pub(crate) fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0x0 => Ok(Family::Unspec),
            0x1 => Ok(Family::Inet),
            0x2 => Ok(Family::Inet6),
            0x3 => Ok(Family::Unix),
            other => Err(Error::Malformed(format!(
                "unknown v2 address family 0x{:x}",
                other
            ))),
        }
    }
}

/// Transport from the low nibble of the v2 `fam_trans` byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Unspec,
    Stream,
    Dgram,
}

impl Transport {
    pub(crate) fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0x0 => Ok(Transport::Unspec),
            0x1 => Ok(Transport::Stream),
            0x2 => Ok(Transport::Dgram),
            other => Err(Error::Malformed(format!(
                "unknown v2 transport 0x{:x}",
                other
            ))),
        }
    }
}

/// Preface decoder configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Protocol receiving the connection once the preface is decoded.
    /// When unset, the protocol listed right after `proxy` in the
    /// connector's ordered protocol list is used.
    #[serde(default)]
    pub next_protocol: Option<String>,
    /// Cap on the v2 payload that follows the fixed header
    #[serde(default = "default_max_proxy_header")]
    pub max_proxy_header: u16,
}

fn default_max_proxy_header() -> u16 {
    DEFAULT_MAX_PROXY_HEADER
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            next_protocol: None,
            max_proxy_header: DEFAULT_MAX_PROXY_HEADER,
        }
    }
}

/// Creates a [`VersionDetect`] decoder for every accepted connection
pub struct ProxyConnectionFactory {
    config: ProxyConfig,
}

impl ProxyConnectionFactory {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }
}

impl Default for ProxyConnectionFactory {
    fn default() -> Self {
        Self::new(ProxyConfig::default())
    }
}

impl ConnectionFactory for ProxyConnectionFactory {
    fn new_connection(
        &self,
        connector: Arc<Connector>,
        _endpoint: &mut dyn Endpoint,
    ) -> Box<dyn Connection> {
        Box::new(VersionDetect::new(connector, self.config.clone()))
    }
}

/// Factory of the protocol taking over after the preface.
///
/// Without a configured name the protocol listed immediately after `proxy`
/// is chosen; `proxy` being the last entry (or missing) is a configuration
/// error, not something to guess around.
pub(crate) fn next_protocol_factory(
    connector: &Connector,
    configured: Option<&str>,
) -> Result<Arc<dyn ConnectionFactory>> {
    let name = match configured {
        Some(name) => name,
        None => connector.protocol_after("proxy").ok_or_else(|| {
            Error::NoNextProtocol("no protocol follows \"proxy\" in the protocol list".to_string())
        })?,
    };
    connector
        .connection_factory(name)
        .ok_or_else(|| Error::NoNextProtocol(name.to_string()))
}

/// Log the fatal preface error and close the connection
pub(crate) fn fatal(endpoint: &dyn Endpoint, err: Error) -> Next {
    warn!(
        "Closing connection from {}: {}",
        endpoint.remote_addr(),
        err
    );
    Next::Close
}

/// First decoding stage: reads the discovery window and routes to the
/// variant decoder matching the first byte.
pub struct VersionDetect {
    connector: Arc<Connector>,
    config: ProxyConfig,
    seed: [u8; V2_HEADER_SIZE],
    filled: usize,
}

impl VersionDetect {
    pub fn new(connector: Arc<Connector>, config: ProxyConfig) -> Self {
        Self {
            connector,
            config,
            seed: [0u8; V2_HEADER_SIZE],
            filled: 0,
        }
    }

    fn process(&mut self, endpoint: &mut dyn Endpoint) -> Result<Next> {
        while self.filled < V2_HEADER_SIZE {
            match endpoint.fill(&mut self.seed[self.filled..])? {
                Fill::Data(n) => self.filled += n,
                Fill::WouldBlock => return Ok(Next::Wait),
                Fill::Eof => {
                    endpoint.shutdown_output();
                    return Err(Error::Truncated);
                }
            }
        }

        match self.seed[0] {
            b'P' => Ok(Next::upgrade_to(Box::new(V1Decoder::new(
                self.connector.clone(),
                self.config.clone(),
                &self.seed,
            )))),
            0x0D => {
                let decoder = V2Decoder::new(self.connector.clone(), self.config.clone(), &self.seed)?;
                Ok(Next::upgrade_to(Box::new(decoder)))
            }
            other => Err(Error::Malformed(format!(
                "unknown preface variant, first byte 0x{:02x}",
                other
            ))),
        }
    }
}

impl Connection for VersionDetect {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next {
        match self.process(endpoint) {
            Ok(next) => next,
            Err(err) => fatal(endpoint, err),
        }
    }
}

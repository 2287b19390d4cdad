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

//! Decoder for the binary v2 preface: fixed 16 byte header, address block
//! and optional TLVs.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Buf, BytesMut};

use ii_logging::macros::*;

use crate::connection::{Connection, Connector, Next, Wrap};
use crate::endpoint::{Attributes, Endpoint, Fill};
use crate::error::{Error, Result};

use super::{
    fatal, next_protocol_factory, Family, ProxyConfig, Transport, COMMAND_LOCAL, COMMAND_PROXY,
    PP2_CLIENT_SSL, PP2_SUBTYPE_SSL_VERSION, PP2_TYPE_ALPN, PP2_TYPE_AUTHORITY, PP2_TYPE_CRC32C,
    PP2_TYPE_NETNS, PP2_TYPE_NOOP, PP2_TYPE_SSL, TLS_VERSION, V2_HEADER_SIZE, V2_SIGNATURE,
};

const INET_ADDRESS_BLOCK: usize = 4 + 4 + 2 + 2;
const INET6_ADDRESS_BLOCK: usize = 16 + 16 + 2 + 2;

/// Decodes the v2 payload once the discovery window delivered (and
/// validated) the fixed header. On completion the endpoint is wrapped with
/// the decoded addresses, unless the command was LOCAL, and upgraded.
pub struct V2Decoder {
    connector: Arc<Connector>,
    config: ProxyConfig,
    /// LOCAL command: a locally originated connection (health check),
    /// addresses in the preface are meaningless
    local: bool,
    family: Family,
    /// Payload buffer, allocated to exactly the declared length
    payload: BytesMut,
    filled: usize,
}

impl V2Decoder {
    /// Validate the fixed 16 byte header and prepare the payload read
    pub fn new(
        connector: Arc<Connector>,
        config: ProxyConfig,
        header: &[u8; V2_HEADER_SIZE],
    ) -> Result<Self> {
        if &header[..V2_SIGNATURE.len()] != V2_SIGNATURE {
            return Err(Error::Malformed("bad v2 signature".to_string()));
        }

        let ver_cmd = header[12];
        if ver_cmd >> 4 != 0x2 {
            return Err(Error::Malformed(format!(
                "unsupported version nibble 0x{:x} in v2 preface",
                ver_cmd >> 4
            )));
        }
        let local = match ver_cmd & 0x0F {
            COMMAND_LOCAL => true,
            COMMAND_PROXY => false,
            command => {
                return Err(Error::Malformed(format!(
                    "unknown v2 command 0x{:x}",
                    command
                )))
            }
        };

        let fam_trans = header[13];
        let family = Family::from_nibble(fam_trans >> 4)?;
        let transport = Transport::from_nibble(fam_trans & 0x0F)?;

        if !local {
            match family {
                Family::Inet | Family::Inet6 => {}
                other => {
                    return Err(Error::UnsupportedMode(format!(
                        "family {:?} with the PROXY command",
                        other
                    )))
                }
            }
            if transport != Transport::Stream {
                return Err(Error::UnsupportedMode(format!(
                    "transport {:?} with the PROXY command",
                    transport
                )));
            }
        }

        let declared_len = u16::from_be_bytes([header[14], header[15]]) as usize;
        if declared_len > config.max_proxy_header as usize {
            return Err(Error::Oversize(format!(
                "v2 payload of {} bytes exceeds the {} byte cap",
                declared_len, config.max_proxy_header
            )));
        }

        let mut payload = BytesMut::with_capacity(declared_len);
        payload.resize(declared_len, 0);

        Ok(Self {
            connector,
            config,
            local,
            family,
            payload,
            filled: 0,
        })
    }

    fn process(&mut self, endpoint: &mut dyn Endpoint) -> Result<Next> {
        while self.filled < self.payload.len() {
            let filled = self.filled;
            match endpoint.fill(&mut self.payload[filled..])? {
                Fill::Data(n) => self.filled += n,
                Fill::WouldBlock => return Ok(Next::Wait),
                Fill::Eof => {
                    endpoint.shutdown_output();
                    return Err(Error::Truncated);
                }
            }
        }
        self.next(endpoint)
    }

    /// The whole payload has arrived, extract addresses and TLVs and
    /// upgrade
    fn next(&mut self, endpoint: &mut dyn Endpoint) -> Result<Next> {
        let factory = next_protocol_factory(&self.connector, self.config.next_protocol.as_deref())?;

        if self.local {
            // Health-check style connection, there is no real client
            // behind it, hand the endpoint through untouched
            debug!(
                "PROXY v2 LOCAL preface on {}, endpoint passed through",
                endpoint.remote_addr()
            );
            return Ok(Next::upgrade_via(factory));
        }

        let mut buf = std::mem::take(&mut self.payload);
        let (remote, local) = match self.family {
            Family::Inet => {
                if buf.len() < INET_ADDRESS_BLOCK {
                    return Err(Error::Malformed(format!(
                        "v2 payload of {} bytes is too short for INET addresses",
                        buf.len()
                    )));
                }
                let src = Ipv4Addr::from(buf.get_u32());
                let dst = Ipv4Addr::from(buf.get_u32());
                let src_port = buf.get_u16();
                let dst_port = buf.get_u16();
                (
                    SocketAddr::new(src.into(), src_port),
                    SocketAddr::new(dst.into(), dst_port),
                )
            }
            Family::Inet6 => {
                if buf.len() < INET6_ADDRESS_BLOCK {
                    return Err(Error::Malformed(format!(
                        "v2 payload of {} bytes is too short for INET6 addresses",
                        buf.len()
                    )));
                }
                let src = Ipv6Addr::from(buf.get_u128());
                let dst = Ipv6Addr::from(buf.get_u128());
                let src_port = buf.get_u16();
                let dst_port = buf.get_u16();
                (
                    SocketAddr::new(src.into(), src_port),
                    SocketAddr::new(dst.into(), dst_port),
                )
            }
            other => {
                return Err(Error::UnsupportedMode(format!(
                    "family {:?} with the PROXY command",
                    other
                )))
            }
        };

        // Whatever trails the address block is optional metadata; a broken
        // TLV must not take down an otherwise valid preface
        let mut attributes = Attributes::new();
        if let Err(err) = walk_tlvs(&buf, &mut attributes) {
            warn!(
                "Ignoring malformed TLVs in v2 preface from {}: {}",
                endpoint.remote_addr(),
                err
            );
        }

        debug!(
            "PROXY v2 preface complete on {}: client {}, server {}",
            endpoint.remote_addr(),
            remote,
            local
        );

        Ok(Next::upgrade_wrapped(
            Wrap {
                remote,
                local,
                attributes,
            },
            factory,
        ))
    }
}

impl Connection for V2Decoder {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next {
        match self.process(endpoint) {
            Ok(next) => next,
            Err(err) => fatal(endpoint, err),
        }
    }
}

/// Walk the TLVs trailing the address block. Only the SSL TLV is
/// interpreted, everything else the protocol defines is skipped.
fn walk_tlvs(buf: &[u8], attributes: &mut Attributes) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        if pos + 3 > buf.len() {
            return Err(Error::Malformed("truncated TLV header".to_string()));
        }
        let typ = buf[pos];
        let len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
        pos += 3;
        if pos + len > buf.len() {
            return Err(Error::Malformed(format!(
                "TLV 0x{:02x} runs past the payload",
                typ
            )));
        }
        let value = &buf[pos..pos + len];
        pos += len;

        match typ {
            PP2_TYPE_SSL => parse_ssl_tlv(value, attributes)?,
            PP2_TYPE_ALPN | PP2_TYPE_AUTHORITY | PP2_TYPE_CRC32C | PP2_TYPE_NOOP
            | PP2_TYPE_NETNS => {
                trace!("Skipping v2 TLV 0x{:02x} ({} bytes)", typ, len);
            }
            other => {
                trace!("Skipping unknown v2 TLV 0x{:02x} ({} bytes)", other, len);
            }
        }
    }
    Ok(())
}

/// SSL TLV: a client byte and a 32 bit verify field, then sub-TLVs. The
/// TLS version sub-TLV is decoded as ASCII into the TLS_VERSION attribute.
/// Sub-TLVs of other TLV types are not descended into.
fn parse_ssl_tlv(value: &[u8], attributes: &mut Attributes) -> Result<()> {
    if value.len() < 5 {
        return Err(Error::Malformed("SSL TLV too short".to_string()));
    }
    if value[0] != PP2_CLIENT_SSL {
        return Ok(());
    }

    let mut pos = 5;
    while pos < value.len() {
        if pos + 3 > value.len() {
            return Err(Error::Malformed("truncated SSL sub-TLV".to_string()));
        }
        let sub_type = value[pos];
        let len = u16::from_be_bytes([value[pos + 1], value[pos + 2]]) as usize;
        pos += 3;
        if pos + len > value.len() {
            return Err(Error::Malformed(format!(
                "SSL sub-TLV 0x{:02x} runs past its parent",
                sub_type
            )));
        }

        if sub_type == PP2_SUBTYPE_SSL_VERSION {
            let version = std::str::from_utf8(&value[pos..pos + len])?;
            if !version.is_ascii() {
                return Err(Error::Malformed("TLS version is not ASCII".to_string()));
            }
            attributes.insert(TLS_VERSION.to_string(), version.to_string());
        } else {
            trace!("Skipping SSL sub-TLV 0x{:02x} ({} bytes)", sub_type, len);
        }
        pos += len;
    }
    Ok(())
}

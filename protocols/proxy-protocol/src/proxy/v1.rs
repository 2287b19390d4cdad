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

//! Decoder for the ASCII v1 preface
//! `PROXY <family> <src-ip> <dst-ip> <src-port> <dst-port>\r\n`.

use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use ii_logging::macros::*;

use crate::connection::{Connection, Connector, Next, Wrap};
use crate::endpoint::{Attributes, Endpoint, Fill};
use crate::error::{Error, Result};

use super::{fatal, next_protocol_factory, ProxyConfig, V1_MAX_LENGTH, V2_HEADER_SIZE};

const SP: u8 = 0x20;
const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// Largest number of bytes that can still belong to the preface while the
/// token with the given index is incomplete. Every read is bounded by this
/// table minus what is already accumulated, so the decoder cannot consume
/// bytes of the upgraded protocol.
const MAX_REMAINING: [usize; 6] = [29, 23, 21, 13, 5, 3];

#[derive(Debug, PartialEq, Eq)]
enum State {
    /// Accumulating a space-terminated token (CR terminates the last one)
    Token,
    /// CR seen, the next byte must be LF
    Lf,
}

/// Continues decoding a v1 preface after the discovery window identified
/// the variant. On completion the endpoint is wrapped with the decoded
/// addresses and upgraded to the next protocol.
pub struct V1Decoder {
    connector: Arc<Connector>,
    config: ProxyConfig,
    seed: [u8; V2_HEADER_SIZE],
    seed_pos: usize,
    state: State,
    /// Completed tokens
    fields: Vec<String>,
    /// Token in progress
    accum: String,
    /// Preface bytes consumed so far, the discovery window included
    total: usize,
}

impl V1Decoder {
    pub fn new(connector: Arc<Connector>, config: ProxyConfig, seed: &[u8; V2_HEADER_SIZE]) -> Self {
        Self {
            connector,
            config,
            seed: *seed,
            seed_pos: 0,
            state: State::Token,
            fields: Vec::with_capacity(6),
            accum: String::new(),
            total: 0,
        }
    }

    /// Feed one preface byte into the state machine, true when the
    /// trailing LF has been consumed
    fn push(&mut self, byte: u8) -> Result<bool> {
        match self.state {
            State::Lf => {
                if byte == LF {
                    Ok(true)
                } else {
                    Err(Error::Malformed(format!(
                        "expected LF after CR, got 0x{:02x}",
                        byte
                    )))
                }
            }
            State::Token => match byte {
                SP => {
                    if self.fields.len() == 5 {
                        return Err(Error::Malformed(
                            "more than six fields in v1 preface".to_string(),
                        ));
                    }
                    self.fields.push(mem::take(&mut self.accum));
                    Ok(false)
                }
                CR => {
                    self.fields.push(mem::take(&mut self.accum));
                    self.state = State::Lf;
                    Ok(false)
                }
                byte if byte < 0x20 => Err(Error::Malformed(format!(
                    "control byte 0x{:02x} in v1 preface",
                    byte
                ))),
                byte => {
                    self.accum.push(byte as char);
                    Ok(false)
                }
            },
        }
    }

    /// How many bytes the next read may ask for without reaching past the
    /// preface. Bounded by the per-token table and by the shortest tail a
    /// six token preface can still have from this state (one byte per
    /// outstanding token plus separators and CRLF), so even one-character
    /// tokens cannot make a read span the trailing LF.
    fn read_size(&self) -> usize {
        match self.state {
            State::Lf => 1,
            State::Token => {
                let index = self.fields.len().min(MAX_REMAINING.len() - 1);
                let per_token = MAX_REMAINING[index].saturating_sub(self.accum.len());
                let started = if self.accum.is_empty() { 1 } else { 0 };
                let shortest_tail = started + 2 * (5 - index) + 2;
                per_token.min(shortest_tail).max(1)
            }
        }
    }

    fn process(&mut self, endpoint: &mut dyn Endpoint) -> Result<Next> {
        // Bytes of the discovery window first
        while self.seed_pos < self.seed.len() {
            let byte = self.seed[self.seed_pos];
            self.seed_pos += 1;
            self.total += 1;
            if self.push(byte)? {
                if self.seed_pos < self.seed.len() {
                    // Whatever follows the preface belongs to the next
                    // protocol and is no longer obtainable from the
                    // endpoint, so such a preface cannot be upgraded
                    return Err(Error::Malformed(
                        "v1 preface ends inside the discovery window".to_string(),
                    ));
                }
                return self.finish(endpoint);
            }
        }

        let mut buf = [0u8; 32];
        loop {
            let want = self.read_size();
            match endpoint.fill(&mut buf[..want])? {
                Fill::WouldBlock => return Ok(Next::Wait),
                Fill::Eof => {
                    endpoint.shutdown_output();
                    return Err(Error::Truncated);
                }
                Fill::Data(n) => {
                    self.total += n;
                    if self.total > V1_MAX_LENGTH {
                        return Err(Error::Oversize(format!(
                            "v1 preface exceeds {} bytes",
                            V1_MAX_LENGTH
                        )));
                    }
                    for i in 0..n {
                        if self.push(buf[i])? {
                            if i + 1 != n {
                                return Err(Error::Malformed(
                                    "bytes past the v1 preface in a bounded read".to_string(),
                                ));
                            }
                            return self.finish(endpoint);
                        }
                    }
                }
            }
        }
    }

    /// The trailing LF has been consumed, turn the tokens into addresses
    /// and upgrade
    fn finish(&mut self, endpoint: &mut dyn Endpoint) -> Result<Next> {
        if self.fields.len() != 6 {
            return Err(Error::Malformed(format!(
                "v1 preface has {} fields instead of 6",
                self.fields.len()
            )));
        }
        if self.fields[0] != "PROXY" {
            return Err(Error::Malformed(format!(
                "v1 preface does not start with PROXY: {:?}",
                self.fields[0]
            )));
        }

        let factory = next_protocol_factory(&self.connector, self.config.next_protocol.as_deref())?;

        let family = &self.fields[1];
        let (remote, local) = if family.eq_ignore_ascii_case("UNKNOWN") {
            // Address fields are untrustworthy for UNKNOWN, report what
            // the socket itself knows
            (endpoint.remote_addr(), endpoint.local_addr())
        } else {
            let src_port: u16 = self.fields[4].parse()?;
            let dst_port: u16 = self.fields[5].parse()?;
            let (src, dst): (IpAddr, IpAddr) = match family.as_str() {
                "TCP4" => (
                    self.fields[2].parse::<Ipv4Addr>()?.into(),
                    self.fields[3].parse::<Ipv4Addr>()?.into(),
                ),
                "TCP6" => (
                    self.fields[2].parse::<Ipv6Addr>()?.into(),
                    self.fields[3].parse::<Ipv6Addr>()?.into(),
                ),
                other => {
                    return Err(Error::Malformed(format!(
                        "unknown v1 family: {:?}",
                        other
                    )))
                }
            };
            (
                SocketAddr::new(src, src_port),
                SocketAddr::new(dst, dst_port),
            )
        };

        debug!(
            "PROXY v1 preface complete on {}: client {}, server {}",
            endpoint.remote_addr(),
            remote,
            local
        );

        Ok(Next::upgrade_wrapped(
            Wrap {
                remote,
                local,
                attributes: Attributes::new(),
            },
            factory,
        ))
    }
}

impl Connection for V1Decoder {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next {
        match self.process(endpoint) {
            Ok(next) => next,
            Err(err) => fatal(endpoint, err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::testing::*;
    use super::*;

    fn decode_one_chunk(input: &[u8]) -> (bool, RecorderHandle, ScriptHandle) {
        let (connector, recorder) = recording_connector(ProxyConfig::default());
        let (endpoint, script) = ScriptedEndpoint::new(vec![Step::data(input)]);
        let closed = run_decode(connector, endpoint, &script);
        (closed, recorder, script)
    }

    #[test]
    fn test_v1_tcp4() {
        let (closed, recorder, _) =
            decode_one_chunk(b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\nGET / HTTP/1.1\r\n");

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert!(recorder.built);
        assert_eq!("192.0.2.1:12345".parse().ok(), recorder.remote);
        assert_eq!("203.0.113.2:80".parse().ok(), recorder.local);
        assert_eq!(b"GET / HTTP/1.1\r\n".to_vec(), recorder.data);
    }

    #[test]
    fn test_v1_tcp6() {
        let (closed, recorder, _) =
            decode_one_chunk(b"PROXY TCP6 2001:db8::1 2001:db8::2 56324 443\r\nHELLO");

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert_eq!("[2001:db8::1]:56324".parse().ok(), recorder.remote);
        assert_eq!("[2001:db8::2]:443".parse().ok(), recorder.local);
        assert_eq!(b"HELLO".to_vec(), recorder.data);
    }

    /// Compressed IPv6 literals are far shorter than the per-token read
    /// table assumes; the shortest-tail bound must keep the decoder from
    /// swallowing buffered payload bytes
    #[test]
    fn test_v1_short_tcp6_addresses_with_buffered_payload() {
        let (closed, recorder, _) = decode_one_chunk(b"PROXY TCP6 ::1 ::2 1 1\r\nHELLO");

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert_eq!("[::1]:1".parse().ok(), recorder.remote);
        assert_eq!("[::2]:1".parse().ok(), recorder.local);
        assert_eq!(b"HELLO".to_vec(), recorder.data);
    }

    #[test]
    fn test_v1_unknown_reports_socket_addresses() {
        let (closed, recorder, _) = decode_one_chunk(b"PROXY UNKNOWN 0.0.0.0 0.0.0.0 0 0\r\nHELLO");

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert!(recorder.built);
        assert_eq!(Some(kernel_remote()), recorder.remote);
        assert_eq!(Some(kernel_local()), recorder.local);
        assert_eq!(b"HELLO".to_vec(), recorder.data);
    }

    #[test]
    fn test_v1_unknown_is_case_insensitive() {
        let (closed, recorder, _) = decode_one_chunk(b"PROXY unknown 1.2.3.4 5.6.7.8 1 2\r\nX");

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert_eq!(Some(kernel_remote()), recorder.remote);
    }

    /// The terminal state must not depend on how the preface is chunked
    /// across readable events
    #[test]
    fn test_v1_chunking_independence() {
        let input = b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\nPING";
        for chunk_size in 1..input.len() {
            let (connector, recorder) = recording_connector(ProxyConfig::default());
            let mut steps = Vec::new();
            for chunk in input.chunks(chunk_size) {
                steps.push(Step::data(chunk));
                steps.push(Step::WouldBlock);
            }
            let (endpoint, script) = ScriptedEndpoint::new(steps);

            let closed = run_decode(connector, endpoint, &script);

            assert!(!closed, "BUG: closed with chunk size {}", chunk_size);
            let recorder = recorder.lock().expect("BUG: recorder lock");
            assert_eq!(
                "192.0.2.1:12345".parse().ok(),
                recorder.remote,
                "BUG: wrong remote with chunk size {}",
                chunk_size
            );
            assert_eq!(b"PING".to_vec(), recorder.data);
        }
    }

    #[test]
    fn test_v1_oversize_preface_is_rejected() {
        // 109 bytes and no CRLF in sight
        let input: Vec<u8> = b"PROXY TCP4 "
            .iter()
            .copied()
            .chain(std::iter::repeat(b'1').take(98))
            .collect();
        assert_eq!(109, input.len());

        let (closed, recorder, _) = decode_one_chunk(&input);

        assert!(closed, "BUG: oversize preface must close the connection");
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_bad_tag_is_rejected() {
        let (closed, recorder, _) = decode_one_chunk(b"PROXZ TCP4 1.2.3.4 5.6.7.8 1 2\r\nX");
        assert!(closed);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_control_byte_is_rejected() {
        let (closed, recorder, _) = decode_one_chunk(b"PROXY TCP4 192.0.2.1\t203.0.113.2 1 2\r\nX");
        assert!(closed);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_bad_address_is_rejected() {
        let (closed, recorder, _) =
            decode_one_chunk(b"PROXY TCP4 192.0.2.999 203.0.113.2 12345 80\r\nX");
        assert!(closed);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_bad_port_is_rejected() {
        let (closed, recorder, _) =
            decode_one_chunk(b"PROXY TCP4 192.0.2.1 203.0.113.2 123456 80\r\nX");
        assert!(closed);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_missing_fields_are_rejected() {
        let (closed, recorder, script) =
            decode_one_chunk(b"PROXY TCP4 192.0.2.1 203.0.113.2\r\nXYZ");
        assert!(closed);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
        // even the failure path stops reading at the preface boundary
        assert_eq!(3, script.lock().expect("BUG: script lock").remaining());
    }

    #[test]
    fn test_v1_truncated_preface_closes() {
        let (connector, recorder) = recording_connector(ProxyConfig::default());
        let (endpoint, script) =
            ScriptedEndpoint::new(vec![Step::data(b"PROXY TCP4 192.0.2.1 203."), Step::Eof]);

        let closed = run_decode(connector, endpoint, &script);

        assert!(closed);
        assert!(script.lock().expect("BUG: script lock").shut_output);
        assert!(!recorder.lock().expect("BUG: recorder lock").built);
    }

    #[test]
    fn test_v1_no_next_protocol_closes() {
        let connector = proxy_last_connector(ProxyConfig::default());
        let (endpoint, script) =
            ScriptedEndpoint::new(vec![Step::data(b"PROXY TCP4 1.2.3.4 5.6.7.8 1 2\r\nX")]);

        let closed = run_decode(connector, endpoint, &script);

        assert!(closed, "BUG: missing next protocol must close");
    }

    #[test]
    fn test_v1_configured_next_protocol() {
        let config = ProxyConfig {
            next_protocol: Some("echo".to_string()),
            ..ProxyConfig::default()
        };
        let (connector, recorder) = recording_connector(config);
        let (endpoint, script) =
            ScriptedEndpoint::new(vec![Step::data(b"PROXY TCP4 1.2.3.4 5.6.7.8 1 2\r\nPING")]);

        let closed = run_decode(connector, endpoint, &script);

        assert!(!closed);
        assert_eq!(
            b"PING".to_vec(),
            recorder.lock().expect("BUG: recorder lock").data
        );
    }

    /// The decoder must never read bytes belonging to the next protocol,
    /// no matter how much data the endpoint has buffered
    #[test]
    fn test_v1_bounded_reads_leave_payload_intact() {
        let preface = b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\n";
        let payload = [b'x'; 512];
        let mut input = preface.to_vec();
        input.extend_from_slice(&payload);

        let (closed, recorder, _) = decode_one_chunk(&input);

        assert!(!closed);
        let recorder = recorder.lock().expect("BUG: recorder lock");
        assert_eq!(
            payload.to_vec(),
            recorder.data,
            "BUG: decoder consumed bytes of the upgraded protocol"
        );
    }
}

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

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::connection::Wrap;
use crate::endpoint::{Attributes, Endpoint, Fill};

/// Endpoint wrapper reporting the addresses decoded from a PROXY preface
/// instead of the kernel addresses of the carrying socket.
///
/// Everything except the address getters and the attribute bag delegates
/// to the wrapped endpoint untouched; the upgraded protocol keeps reading
/// the very same byte stream it would have read without the wrapper.
pub struct ProxyEndpoint {
    inner: Box<dyn Endpoint>,
    remote: SocketAddr,
    local: SocketAddr,
    attributes: Attributes,
}

impl ProxyEndpoint {
    pub fn new(inner: Box<dyn Endpoint>, wrap: Wrap) -> Self {
        Self {
            inner,
            remote: wrap.remote,
            local: wrap.local,
            attributes: wrap.attributes,
        }
    }

    /// The endpoint this wrapper delegates to
    pub fn inner(&self) -> &dyn Endpoint {
        self.inner.as_ref()
    }
}

impl Endpoint for ProxyEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        self.inner.fill(buf)
    }

    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.poll_readable(cx)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn shutdown_output(&mut self) {
        self.inner.shutdown_output()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn idle_timeout(&self) -> Option<Duration> {
        self.inner.idle_timeout()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proxy::testing::*;
    use crate::proxy::TLS_VERSION;

    #[test]
    fn test_overrides_and_delegation() {
        let (inner, script) = ScriptedEndpoint::new(vec![Step::data(b"HELLO")]);
        let remote: SocketAddr = "192.0.2.1:12345".parse().expect("BUG: Cannot parse IP");
        let local: SocketAddr = "203.0.113.2:80".parse().expect("BUG: Cannot parse IP");
        let mut attributes = Attributes::new();
        attributes.insert(TLS_VERSION.to_string(), "1.3".to_string());

        let mut wrapped = ProxyEndpoint::new(
            inner,
            Wrap {
                remote,
                local,
                attributes,
            },
        );

        // the getters report the decoded addresses
        assert_eq!(remote, wrapped.remote_addr());
        assert_eq!(local, wrapped.local_addr());
        assert_eq!(Some("1.3"), wrapped.attribute(TLS_VERSION));
        assert_eq!(None, wrapped.attribute("no-such-attribute"));

        // while the byte stream and the rest of the surface pass through
        let mut buf = [0u8; 8];
        match wrapped.fill(&mut buf).expect("BUG: fill failed") {
            Fill::Data(n) => assert_eq!(b"HELLO", &buf[..n]),
            other => panic!("BUG: expected data, got {:?}", other),
        }
        wrapped.shutdown_output();
        wrapped.close();
        assert!(!wrapped.is_open());

        let state = script.lock().expect("BUG: script lock");
        assert!(state.shut_output);
        assert!(state.closed);
    }
}

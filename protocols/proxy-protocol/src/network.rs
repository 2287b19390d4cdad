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

//! TCP integration: the socket-backed endpoint, the listener and the
//! dispatch loop that delivers readable events to connections.

use std::fmt;
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs as StdToSocketAddrs};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future;
use futures::prelude::*;
use futures::ready;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};

use ii_logging::macros::*;

use crate::connection::{Connector, Next, NextConnection, Upgrade};
use crate::endpoint::{Endpoint, Fill};
use crate::error::{Error, Result};
use crate::proxy::ProxyEndpoint;

/// `host:port` pair used in configuration files and for binding listeners
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Address(pub String, pub u16);

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Address(format!("missing port in {:?}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::Address(format!("missing host in {:?}", s)));
        }
        let port = port
            .parse()
            .map_err(|_| Error::Address(format!("invalid port in {:?}", s)))?;
        Ok(Address(host.to_string(), port))
    }
}

impl std::convert::TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains(':') {
            write!(f, "[{}]:{}", self.0, self.1)
        } else {
            write!(f, "{}:{}", self.0, self.1)
        }
    }
}

impl StdToSocketAddrs for Address {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        (self.0.as_str(), self.1).to_socket_addrs()
    }
}

mod raw_fd {
    //! Half-closing a tokio stream requires going through the raw socket:
    //! the std stream borrowed from the fd must be leaked back afterwards,
    //! otherwise its drop() would close the socket under tokio's feet.

    use std::io;
    use std::net::{Shutdown, TcpStream as StdStream};

    #[cfg(target_family = "unix")]
    use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
    #[cfg(target_family = "windows")]
    use std::os::windows::io::{AsRawSocket, FromRawSocket, IntoRawSocket, RawSocket};

    #[cfg(target_family = "unix")]
    #[derive(Clone, Copy, Debug)]
    pub struct Fd(RawFd);

    #[cfg(target_family = "windows")]
    #[derive(Clone, Copy, Debug)]
    pub struct Fd(RawSocket);

    impl<'a> From<&'a tokio::net::TcpStream> for Fd {
        #[cfg(target_family = "unix")]
        fn from(stream: &'a tokio::net::TcpStream) -> Fd {
            Fd(stream.as_raw_fd())
        }

        #[cfg(target_family = "windows")]
        fn from(stream: &'a tokio::net::TcpStream) -> Fd {
            Fd(stream.as_raw_socket())
        }
    }

    impl Fd {
        pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
            #[cfg(target_family = "unix")]
            let stream = unsafe { StdStream::from_raw_fd(self.0) };
            #[cfg(target_family = "windows")]
            let stream = unsafe { StdStream::from_raw_socket(self.0) };

            let res = stream.shutdown(how);
            #[cfg(target_family = "unix")]
            let _ = stream.into_raw_fd();
            #[cfg(target_family = "windows")]
            let _ = stream.into_raw_socket();
            res
        }
    }
}

/// Endpoint over an accepted TCP socket
#[derive(Debug)]
pub struct TcpEndpoint {
    stream: TcpStream,
    fd: raw_fd::Fd,
    remote: SocketAddr,
    local: SocketAddr,
    idle_timeout: Option<Duration>,
    open: bool,
}

impl TcpEndpoint {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let fd = raw_fd::Fd::from(&stream);
        Ok(Self {
            stream,
            fd,
            remote,
            local,
            idle_timeout: None,
            open: true,
        })
    }

    /// Close the connection when no readable event arrives within `limit`
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }
}

impl Endpoint for TcpEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        match self.stream.try_read(buf) {
            Ok(0) => Ok(Fill::Eof),
            Ok(n) => Ok(Fill::Data(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Fill::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_read_ready(cx)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn shutdown_output(&mut self) {
        let _ = self.fd.shutdown(Shutdown::Write);
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.fd.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

/// Stream of accepted TCP sockets
#[derive(Debug)]
pub struct Server {
    tcp: Option<TcpListener>,
}

impl Server {
    pub fn bind<A: StdToSocketAddrs>(addr: A) -> io::Result<Self> {
        let tcp = StdTcpListener::bind(addr)?;
        tcp.set_nonblocking(true)?;
        let tcp = Some(TcpListener::from_std(tcp)?);

        Ok(Server { tcp })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|tcp| tcp.local_addr().ok())
    }

    /// Stop accepting; the stream terminates on the next poll
    pub fn shutdown(&mut self) {
        self.tcp = None;
    }
}

impl Stream for Server {
    type Item = io::Result<TcpStream>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(tcp) = self.tcp.as_mut() {
            let (socket, _) = ready!(tcp.poll_accept(cx))?;
            Poll::Ready(Some(Ok(socket)))
        } else {
            Poll::Ready(None)
        }
    }
}

/// Dispatch loop for one endpoint.
///
/// Owns the endpoint and the connection currently bound to it, delivers
/// one `on_readable` callback per readable event and applies the returned
/// verdict. An upgrade verdict swaps the bound connection (wrapping the
/// endpoint first when the preface decoder asked for it), so the decoder
/// objects simply drop once the next protocol has taken over.
pub async fn drive(mut endpoint: Box<dyn Endpoint>, connector: Arc<Connector>) {
    let mut connection = {
        let factory = connector
            .protocols()
            .first()
            .and_then(|name| connector.connection_factory(name));
        match factory {
            Some(factory) => factory.new_connection(connector.clone(), endpoint.as_mut()),
            None => {
                warn!(
                    "No initial protocol registered, dropping connection from {}",
                    endpoint.remote_addr()
                );
                endpoint.close();
                return;
            }
        }
    };

    loop {
        match connection.on_readable(endpoint.as_mut()) {
            Next::Wait => {
                let idle = endpoint.idle_timeout();
                let res = {
                    let readable = future::poll_fn(|cx| endpoint.poll_readable(cx));
                    match idle {
                        Some(limit) => tokio::time::timeout(limit, readable)
                            .await
                            .unwrap_or_else(|_| {
                                Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))
                            }),
                        None => readable.await,
                    }
                };
                if let Err(e) = res {
                    debug!("Closing connection from {}: {}", endpoint.remote_addr(), e);
                    endpoint.close();
                    return;
                }
            }
            Next::Close => {
                endpoint.close();
                return;
            }
            Next::Upgrade(Upgrade { wrap, to }) => {
                if let Some(wrap) = wrap {
                    endpoint = Box::new(ProxyEndpoint::new(endpoint, wrap));
                }
                connection = match to {
                    NextConnection::Ready(connection) => connection,
                    NextConnection::Factory(factory) => {
                        factory.new_connection(connector.clone(), endpoint.as_mut())
                    }
                };
            }
        }
    }
}

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

//! Scripted endpoints and a synchronous dispatch harness for exercising
//! the preface decoders without sockets. A script is a sequence of fill
//! outcomes, so a test controls exactly how the preface is chunked across
//! readable events.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::connection::{Connection, ConnectionFactory, Connector, Next, NextConnection, Upgrade};
use crate::endpoint::{Endpoint, Fill};
use crate::proxy::{ProxyConnectionFactory, ProxyConfig, ProxyEndpoint, TLS_VERSION};

/// Kernel-reported peer address of every scripted endpoint
pub(crate) fn kernel_remote() -> SocketAddr {
    "198.51.100.7:40000"
        .parse()
        .expect("BUG: Cannot parse test address")
}

/// Kernel-reported local address of every scripted endpoint
pub(crate) fn kernel_local() -> SocketAddr {
    "10.1.2.3:3333"
        .parse()
        .expect("BUG: Cannot parse test address")
}

/// One scripted fill outcome
pub(crate) enum Step {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
}

impl Step {
    pub(crate) fn data(bytes: &[u8]) -> Self {
        Step::Data(bytes.to_vec())
    }
}

#[derive(Default)]
pub(crate) struct ScriptState {
    script: VecDeque<Step>,
    /// Total bytes handed out by `fill`
    pub consumed: usize,
    pub shut_output: bool,
    pub closed: bool,
}

impl ScriptState {
    /// Data bytes not handed out yet
    pub fn remaining(&self) -> usize {
        self.script
            .iter()
            .map(|step| match step {
                Step::Data(bytes) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    fn drained(&self) -> bool {
        self.script.is_empty()
    }
}

pub(crate) type ScriptHandle = Arc<Mutex<ScriptState>>;

pub(crate) struct ScriptedEndpoint {
    state: ScriptHandle,
}

impl ScriptedEndpoint {
    pub fn new(steps: Vec<Step>) -> (Box<dyn Endpoint>, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState {
            script: steps.into_iter().collect(),
            ..ScriptState::default()
        }));
        let endpoint = Box::new(ScriptedEndpoint {
            state: state.clone(),
        });
        (endpoint, state)
    }
}

impl Endpoint for ScriptedEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        let mut state = self.state.lock().expect("BUG: script lock");
        match state.script.front_mut() {
            None => Ok(Fill::WouldBlock),
            Some(Step::Eof) => Ok(Fill::Eof),
            Some(Step::WouldBlock) => {
                state.script.pop_front();
                Ok(Fill::WouldBlock)
            }
            Some(Step::Data(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    state.script.pop_front();
                }
                state.consumed += n;
                Ok(Fill::Data(n))
            }
        }
    }

    fn poll_readable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn shutdown_output(&mut self) {
        self.state.lock().expect("BUG: script lock").shut_output = true;
    }

    fn close(&mut self) {
        self.state.lock().expect("BUG: script lock").closed = true;
    }

    fn is_open(&self) -> bool {
        !self.state.lock().expect("BUG: script lock").closed
    }

    fn remote_addr(&self) -> SocketAddr {
        kernel_remote()
    }

    fn local_addr(&self) -> SocketAddr {
        kernel_local()
    }
}

/// What the recording next protocol observed
#[derive(Default)]
pub(crate) struct RecorderLog {
    /// The factory was asked to build the next-protocol connection
    pub built: bool,
    /// Endpoint addresses at construction time
    pub remote: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    /// TLS_VERSION attribute at construction time
    pub tls_version: Option<String>,
    /// Everything the connection read after the upgrade
    pub data: Vec<u8>,
}

pub(crate) type RecorderHandle = Arc<Mutex<RecorderLog>>;

pub(crate) struct RecorderFactory {
    log: RecorderHandle,
}

impl ConnectionFactory for RecorderFactory {
    fn new_connection(
        &self,
        _connector: Arc<Connector>,
        endpoint: &mut dyn Endpoint,
    ) -> Box<dyn Connection> {
        let mut log = self.log.lock().expect("BUG: recorder lock");
        log.built = true;
        log.remote = Some(endpoint.remote_addr());
        log.local = Some(endpoint.local_addr());
        log.tls_version = endpoint.attribute(TLS_VERSION).map(str::to_string);
        Box::new(RecorderConnection {
            log: self.log.clone(),
        })
    }
}

struct RecorderConnection {
    log: RecorderHandle,
}

impl Connection for RecorderConnection {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next {
        let mut buf = [0u8; 1024];
        loop {
            match endpoint.fill(&mut buf) {
                Ok(Fill::Data(n)) => {
                    let mut log = self.log.lock().expect("BUG: recorder lock");
                    log.data.extend_from_slice(&buf[..n]);
                }
                Ok(Fill::WouldBlock) => return Next::Wait,
                Ok(Fill::Eof) | Err(_) => return Next::Close,
            }
        }
    }
}

/// Connector with the preface decoder first and a recording protocol
/// registered as `echo` right after it
pub(crate) fn recording_connector(config: ProxyConfig) -> (Arc<Connector>, RecorderHandle) {
    let log = RecorderHandle::default();
    let connector = Connector::new()
        .with_protocol("proxy", Arc::new(ProxyConnectionFactory::new(config)))
        .with_protocol("echo", Arc::new(RecorderFactory { log: log.clone() }));
    (Arc::new(connector), log)
}

/// Connector where `proxy` is the last (and only) protocol, so automatic
/// next-protocol resolution has nothing to resolve to
pub(crate) fn proxy_last_connector(config: ProxyConfig) -> Arc<Connector> {
    Arc::new(
        Connector::new().with_protocol("proxy", Arc::new(ProxyConnectionFactory::new(config))),
    )
}

/// Synchronous rendition of the dispatch loop: delivers events until the
/// connection closes or the script runs dry. Returns whether the endpoint
/// ended up closed.
pub(crate) fn run_decode(
    connector: Arc<Connector>,
    mut endpoint: Box<dyn Endpoint>,
    script: &ScriptHandle,
) -> bool {
    let factory = connector
        .protocols()
        .first()
        .and_then(|name| connector.connection_factory(name))
        .expect("BUG: test connector has no initial protocol");
    let mut connection = factory.new_connection(connector.clone(), endpoint.as_mut());

    loop {
        match connection.on_readable(endpoint.as_mut()) {
            Next::Wait => {
                if script.lock().expect("BUG: script lock").drained() {
                    return false;
                }
            }
            Next::Close => {
                endpoint.close();
                return true;
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

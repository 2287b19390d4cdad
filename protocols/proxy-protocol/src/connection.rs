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

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::endpoint::{Attributes, Endpoint};

/// Verdict of a connection callback.
///
/// The dispatch loop applies the verdict only after the callback has
/// returned, which is what makes the upgrade atomic: a connection that
/// returned [`Next::Upgrade`] is guaranteed to never be entered again and
/// the replacement receives every subsequent readable event.
pub enum Next {
    /// Re-arm read interest and wait for the next readable event
    Wait,
    /// Replace the connection bound to the endpoint
    Upgrade(Upgrade),
    /// Close the endpoint
    Close,
}

impl Next {
    /// Hand the endpoint over to an already built connection
    pub fn upgrade_to(connection: Box<dyn Connection>) -> Self {
        Next::Upgrade(Upgrade {
            wrap: None,
            to: NextConnection::Ready(connection),
        })
    }

    /// Hand the endpoint over to a factory-built connection
    pub fn upgrade_via(factory: Arc<dyn ConnectionFactory>) -> Self {
        Next::Upgrade(Upgrade {
            wrap: None,
            to: NextConnection::Factory(factory),
        })
    }

    /// Wrap the endpoint with address overrides first, then hand it over
    /// to a factory-built connection
    pub fn upgrade_wrapped(wrap: Wrap, factory: Arc<dyn ConnectionFactory>) -> Self {
        Next::Upgrade(Upgrade {
            wrap: Some(wrap),
            to: NextConnection::Factory(factory),
        })
    }
}

/// Address overrides and attributes a preface decoder captured for the
/// endpoint wrapper
#[derive(Debug)]
pub struct Wrap {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub attributes: Attributes,
}

/// The connection taking over an endpoint
pub enum NextConnection {
    /// Already constructed by the previous connection
    Ready(Box<dyn Connection>),
    /// Built by the factory against the (possibly wrapped) endpoint
    Factory(Arc<dyn ConnectionFactory>),
}

/// An upgrade request carried by [`Next::Upgrade`]
pub struct Upgrade {
    pub wrap: Option<Wrap>,
    pub to: NextConnection,
}

/// A protocol state machine bound to an endpoint.
///
/// `on_readable` is invoked by the dispatch loop once per readable event.
/// The implementation reads until the endpoint reports would-block and
/// returns a verdict; it must not block and must not read more bytes than
/// its current parsing state needs.
pub trait Connection: Send {
    fn on_readable(&mut self, endpoint: &mut dyn Endpoint) -> Next;
}

/// Builds a protocol connection for a freshly accepted or freshly upgraded
/// endpoint
pub trait ConnectionFactory: Send + Sync {
    fn new_connection(
        &self,
        connector: Arc<Connector>,
        endpoint: &mut dyn Endpoint,
    ) -> Box<dyn Connection>;
}

/// Registry of the protocols a listener speaks, in priority order.
///
/// The first protocol in the list receives every accepted connection;
/// a preface decoder registered there later upgrades the endpoint to one
/// of the other entries. Protocol names are matched case-insensitively.
pub struct Connector {
    protocols: Vec<String>,
    factories: HashMap<String, Arc<dyn ConnectionFactory>>,
    executor: Option<Handle>,
}

impl Connector {
    pub fn new() -> Self {
        Self {
            protocols: Vec::new(),
            factories: HashMap::new(),
            executor: None,
        }
    }

    /// Register `factory` under `name`, appending it to the protocol order
    pub fn with_protocol<N: Into<String>>(
        mut self,
        name: N,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let name = name.into();
        self.factories.insert(name.to_ascii_lowercase(), factory);
        self.protocols.push(name);
        self
    }

    /// Use `handle` for spawning per-connection tasks
    pub fn with_executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    /// Protocols offered on this listener, in priority order
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// The protocol listed immediately after `name`, if any
    pub fn protocol_after(&self, name: &str) -> Option<&str> {
        let mut iter = self.protocols.iter();
        iter.find(|p| p.eq_ignore_ascii_case(name))?;
        iter.next().map(String::as_str)
    }

    pub fn connection_factory(&self, name: &str) -> Option<Arc<dyn ConnectionFactory>> {
        self.factories.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Executor used for per-connection tasks; falls back to the ambient
    /// runtime when none was configured
    pub fn executor(&self) -> Handle {
        self.executor.clone().unwrap_or_else(Handle::current)
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

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

//! Wire-level plumbing for a multi-protocol TCP front-end.
//!
//! The crate provides the endpoint and connection machinery a front-end
//! server needs to route a freshly accepted socket to one of several
//! protocol implementations, plus a
//! [PROXY protocol](http://www.haproxy.org/download/1.8/doc/proxy-protocol.txt)
//! preface decoder (v1 and v2) that recovers the original client and server
//! addresses a load balancer put in front of the byte stream, before the
//! first byte of the actual protocol is interpreted.

// Tokio is re-exported here for the benefit of dependant crates.
// That way, the Tokio dependency is specified in one place.
pub use tokio;

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod network;
pub mod proxy;

pub use connection::{Connection, ConnectionFactory, Connector, Next};
pub use endpoint::{Endpoint, Fill};
pub use error::{Error, Result};
pub use network::{drive, Address, Server, TcpEndpoint};

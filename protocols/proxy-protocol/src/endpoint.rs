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
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

/// Attribute bag a preface decoder attaches to an endpoint
pub type Attributes = HashMap<String, String>;

/// Outcome of a single non-blocking read from an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Number of bytes copied into the caller's buffer, never zero
    Data(usize),
    /// No bytes available right now; the caller must re-arm read interest
    /// and yield
    WouldBlock,
    /// The peer shut down its write side
    Eof,
}

/// A bidirectional, non-blocking byte channel with readiness notification.
///
/// Connections never block on an endpoint. `fill` either copies bytes or
/// reports [`Fill::WouldBlock`], and `poll_readable` is what the dispatch
/// loop parks on between readable events. One readable event results in at
/// most one `on_readable` callback on the bound connection.
pub trait Endpoint: Send {
    /// Copy available bytes into `buf`
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill>;

    /// Readiness for the next `fill`. The dispatch loop awaits this
    /// whenever the bound connection returns `Next::Wait`.
    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Non-blocking write, returns the number of bytes accepted,
    /// zero when the channel is congested
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Half-close the write side
    fn shutdown_output(&mut self);

    /// Tear the endpoint down
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Peer address as reported by this endpoint
    fn remote_addr(&self) -> SocketAddr;

    /// Local address as reported by this endpoint
    fn local_addr(&self) -> SocketAddr;

    /// Named attribute attached by a preface decoder, if any
    fn attribute(&self, name: &str) -> Option<&str> {
        let _ = name;
        None
    }

    /// Idle limit the dispatch loop applies while waiting for readability
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }
}

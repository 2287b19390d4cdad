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

use thiserror::Error;

/// Error type for this crate.
///
/// Every preface error is fatal for the connection it occurred on: the
/// decoder logs one warning and closes the endpoint, there are no retries
/// and no partial upgrades.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed PROXY preface: {0}")]
    Malformed(String),

    #[error("PROXY preface too long: {0}")]
    Oversize(String),

    #[error("Connection closed before the PROXY preface was complete")]
    Truncated,

    #[error("Unsupported PROXY mode: {0}")]
    UnsupportedMode(String),

    #[error("No connection factory for next protocol: {0}")]
    NoNextProtocol(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid encoding in PROXY preface: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid IP address in PROXY preface: {0}")]
    IpAddress(#[from] std::net::AddrParseError),

    #[error("Invalid port in PROXY preface: {0}")]
    Port(#[from] std::num::ParseIntError),
}

/// Convenient Result type, with our Error included
pub type Result<T> = std::result::Result<T, Error>;

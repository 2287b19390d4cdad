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

//! Reconfiguring the global logger after it has been instantiated is a
//! programming error and must panic.
//!
//! **Warning**: Each logging test needs its own file because the global
//! LOGGER can only be configured once per process.

use ii_logging::macros::*;
use ii_logging::LoggingConfig;

#[test]
#[should_panic]
fn test_logging_config_too_late() {
    ii_logging::set_logger_config(LoggingConfig::no_logging());

    // First use instantiates the logger
    trace!("instantiate the logger");

    // Too late now
    ii_logging::set_logger_config(LoggingConfig::default());
}

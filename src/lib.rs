//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! A transactional, per-mailbox message store.
//!
//! The store keeps an ordered index of the messages of each mailbox, hands
//! out UIDs and MODSEQs, applies flag changes and expunges, and reports what
//! happened to quota tracking and event listeners. All mutations of one
//! mailbox are serialised; distinct mailboxes proceed in parallel.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod services;
pub mod store;
pub mod support;

pub use crate::store::message_store::MessageStore;
pub use crate::support::error::{Error, ErrorKind};

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let config = support::system_config::LoggingConfig {
            level: "debug".to_owned(),
            config_file: None,
        };
        // Another test harness may already own the global logger.
        let _ = support::logging::init_logging(&config);
    })
}

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

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::file::Deserializers;
use log4rs::encode::pattern::PatternEncoder;

use crate::support::error::Error;
use crate::support::system_config::LoggingConfig;

/// Install the global logger described by `config`.
///
/// A configured log4rs file takes precedence. Otherwise, everything at or
/// above `config.level` goes to stderr.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    if let Some(ref file) = config.config_file {
        return log4rs::init_file(file, Deserializers::new())
            .map_err(|e| Error::Logging(e.to_string()));
    }

    let level = config
        .level
        .parse::<LevelFilter>()
        .map_err(|_| Error::Logging(format!("bad level: {}", config.level)))?;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();

    let log_config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Logging(e.to_string()))?;

    log4rs::init_config(log_config)
        .map(|_| ())
        .map_err(|e| Error::Logging(e.to_string()))
}

//! Logging setup.
//!
//! Everything in the crate logs through `tracing` macros. The binary calls
//! [`init`] once, which writes formatted events to `~/.quest/quest.log`
//! (truncated on each start).
//!
//! Filtering:
//! - `QUEST_LOG` takes a full `EnvFilter` directive, e.g. `quest=trace`
//! - otherwise `--debug` or `QUEST_DEBUG=1` selects debug level
//! - otherwise info level

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::Result;

const FILTER_ENV: &str = "QUEST_LOG";
const DEBUG_ENV: &str = "QUEST_DEBUG";

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Default directive when `QUEST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "quest=debug"
    } else {
        "quest=info"
    }
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug || env_debug())))
}

/// Install the global subscriber writing to the log file. Returns the log
/// path. Calling it twice is harmless; the first subscriber stays.
pub fn init(debug: bool) -> Result<PathBuf> {
    let dir = Config::quest_dir()?;
    fs::create_dir_all(&dir)?;
    let path = Config::log_path()?;
    let file = File::create(&path)?;

    let installed = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init();

    if installed.is_ok() {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "quest started");
    }
    Ok(path)
}

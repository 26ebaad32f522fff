mod documents;
mod server;
mod stub;

pub use documents::*;
pub use server::*;
pub use stub::*;

use analytics_core::{ClusterOptions, Credential};
use log::LevelFilter;
use std::{env, time::Duration};

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

pub fn credential() -> Credential {
    Credential::from_username_and_password("Administrator", "password")
}

/// Options with a backoff short enough for tests.
pub fn fast_options() -> ClusterOptions {
    let mut options = ClusterOptions::default();
    options.backoff.base = Duration::from_millis(1);
    options.backoff.max = Duration::from_millis(5);
    options
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}

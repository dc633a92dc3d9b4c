//! `init_logging` installs process-global state, so it runs in its own test
//! binary.

use tasker_common::{init_logging, LogConfig};

#[test]
fn test_init_logging_once_per_process() {
    let config = LogConfig::quiet().with_filter("warn");
    assert!(init_logging(config.clone()).is_ok());

    // `log` records are forwarded once the subscriber is up.
    assert!(log::max_level() >= log::LevelFilter::Warn);
    log::warn!("forwarded through the log bridge");

    assert!(init_logging(config).is_err());
}

//! Logging facilities

use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

/// Initialize the console logger from `-v` counts. Level 0 is INFO for our
/// own crates and silence for dependencies; more `v`s open both up.
pub fn init(verbosity: u8, without_time: bool) {
    let (level, other_level) = match verbosity {
        0 => (LevelFilter::INFO, LevelFilter::OFF),
        1 => (LevelFilter::DEBUG, LevelFilter::OFF),
        2 => (LevelFilter::TRACE, LevelFilter::OFF),
        3 => (LevelFilter::TRACE, LevelFilter::DEBUG),
        _ => (LevelFilter::TRACE, LevelFilter::TRACE),
    };

    let self_modules = ["vwserver", "vless_ws"];
    let is_self_module = move |target: &str| self_modules.iter().any(|m| target.starts_with(m));

    let filter = filter_fn(move |metadata| {
        if is_self_module(metadata.target()) {
            metadata.level() <= &level
        } else {
            metadata.level() <= &other_level
        }
    })
    .with_max_level_hint(level.max(other_level));

    let append = tracing_subscriber::fmt::layer().with_target(false);
    let append = if without_time {
        append.without_time().with_filter(filter).boxed()
    } else {
        append.with_filter(filter).boxed()
    };

    tracing_subscriber::registry().with(append).init();
}

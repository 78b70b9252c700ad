pub mod logging;
pub mod monitor;
pub mod service;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const EXIT_CODE_UNKNOWN_SUBCOMMAND: u8 = 1;
pub const EXIT_CODE_LOAD_CONFIG_FAILURE: u8 = 1;
pub const EXIT_CODE_SERVER_ABORTED: u8 = 1;

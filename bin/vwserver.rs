//! The server binary.
//!
//! `vwserver [run] [options]`: `run` is the only subcommand and the
//! default; configuration comes from `-c config.json` plus command line
//! overrides.

use std::process::ExitCode;

use clap::Command;

use vless_ws_rust::service::server;

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().collect();

    // Subcommand dispatch: a leading non-flag argument must be `run`.
    if args.len() >= 2 && !args[1].starts_with('-') {
        let subcommand = args[1].to_lowercase();
        if subcommand != "run" {
            eprintln!("unknown subcommand: {}\n", subcommand);
            return ExitCode::from(vless_ws_rust::EXIT_CODE_UNKNOWN_SUBCOMMAND);
        }
        args.remove(1);
    }

    let mut app = Command::new("vwserver")
        .version(vless_ws_rust::VERSION)
        .about("A lightweight VLESS-over-WebSocket tunnel proxy server");
    app = server::define_command_line_options(app);

    let matches = app.get_matches_from(args);
    server::main(&matches)
}

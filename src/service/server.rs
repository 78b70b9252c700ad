//! Server launcher

use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use futures::future::{self, Either};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vless_ws::{vless::Uuid, Config};
use vless_ws_service::run_server;

use crate::{logging, monitor};

/// Defines command line options
pub fn define_command_line_options(mut app: Command) -> Command {
    app = app
        .arg(
            Arg::new("CONFIG")
                .short('c')
                .long("config")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath)
                .help("Server configuration file (JSON)"),
        )
        .arg(
            Arg::new("LISTEN_ADDR")
                .short('l')
                .long("listen-addr")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(SocketAddr))
                .help("Address the HTTP/WebSocket listener binds"),
        )
        .arg(
            Arg::new("USER")
                .short('u')
                .long("user")
                .num_args(1)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(Uuid))
                .help("Allowed user UUID, repeatable"),
        )
        .arg(
            Arg::new("FIXED_TUNNEL_PATH")
                .long("fixed-tunnel-path")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Fixed tunnel path served without a UUID in it"),
        )
        .arg(
            Arg::new("PUSH_INTERVAL")
                .long("push-interval")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(i64))
                .help("Seconds between usage pushes to the control plane"),
        )
        .arg(
            Arg::new("BUFFER_SIZE")
                .long("buffer-size")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize))
                .help("Relay buffer capacity in bytes"),
        )
        .arg(
            Arg::new("DISABLE_METERING")
                .long("disable-metering")
                .action(ArgAction::SetTrue)
                .help("Turn off per-user traffic accounting"),
        )
        .arg(
            Arg::new("REGISTER_URL")
                .long("register-url")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Control plane endpoint receiving usage pushes"),
        )
        .arg(
            Arg::new("REGISTER_TOKEN")
                .long("register-token")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Authorization header value for usage pushes"),
        )
        .arg(
            Arg::new("SUB_ADDRESS")
                .long("sub-address")
                .num_args(1)
                .action(ArgAction::Append)
                .help("host:port advertised in subscription URLs, repeatable"),
        )
        .arg(
            Arg::new("VERBOSE")
                .short('v')
                .action(ArgAction::Count)
                .help("Set log level"),
        )
        .arg(
            Arg::new("LOG_WITHOUT_TIME")
                .long("log-without-time")
                .action(ArgAction::SetTrue)
                .help("Log without datetime prefix"),
        );

    app
}

/// Program entrance `main`
pub fn main(matches: &ArgMatches) -> ExitCode {
    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(config_path) => match Config::load_from_file(config_path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("loading config {:?}, {}", config_path, err);
                return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
            }
        },
        None => Config::default(),
    };

    if let Some(addr) = matches.get_one::<SocketAddr>("LISTEN_ADDR") {
        config.listen_addr = *addr;
    }

    if let Some(users) = matches.get_many::<Uuid>("USER") {
        config.allow_users.extend(users.copied());
    }

    if let Some(path) = matches.get_one::<String>("FIXED_TUNNEL_PATH") {
        config.fixed_tunnel_path = path.clone();
    }

    if let Some(interval) = matches.get_one::<i64>("PUSH_INTERVAL") {
        config.push_interval_secs = *interval;
    }

    if let Some(buffer_size) = matches.get_one::<usize>("BUFFER_SIZE") {
        config.buffer_size = *buffer_size;
    }

    if matches.get_flag("DISABLE_METERING") {
        config.enable_usage_metering = false;
    }

    if let Some(url) = matches.get_one::<String>("REGISTER_URL") {
        config.register_url = Some(url.clone());
    }

    if let Some(token) = matches.get_one::<String>("REGISTER_TOKEN") {
        config.register_token = Some(token.clone());
    }

    if let Some(addrs) = matches.get_many::<String>("SUB_ADDRESS") {
        config.sub_addresses.extend(addrs.cloned());
    }

    if let Err(err) = config.check_integrity() {
        eprintln!("config integrity check failed, {}", err);
        return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
    }

    logging::init(
        matches.get_count("VERBOSE"),
        matches.get_flag("LOG_WITHOUT_TIME"),
    );

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("create tokio Runtime");

    runtime.block_on(async move {
        info!("vless-ws server {}", crate::VERSION);

        let app_cancel = CancellationToken::new();

        let abort_signal = monitor::create_signal_monitor(app_cancel.clone());
        let server = run_server(config, app_cancel.clone());

        tokio::pin!(abort_signal);
        tokio::pin!(server);

        match future::select(server, abort_signal).await {
            // The graceful path: a signal cancelled the token and the
            // server drained within its budget.
            Either::Left((Ok(..), ..)) => {
                info!("server done");
                ExitCode::SUCCESS
            }
            // Listener errors in most cases
            Either::Left((Err(err), ..)) => {
                error!(error = ?err, "server exited with error");
                crate::EXIT_CODE_SERVER_ABORTED.into()
            }
            // The signal monitor gave up waiting; resources die with the
            // process.
            Either::Right(_) => ExitCode::SUCCESS,
        }
    })
}

#[cfg(test)]
mod test {
    use clap::Command;

    #[test]
    fn verify_server_command() {
        let mut app = Command::new("vwserver")
            .version(crate::VERSION)
            .about("A lightweight VLESS-over-WebSocket tunnel proxy server");
        app = super::define_command_line_options(app);
        app.debug_assert();
    }
}

//! The plain-HTTP corners of the listener: liveness and subscription URLs.

use std::io;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};

use vless_ws::{vless::Uuid, Config};

use super::context::ServiceContext;

pub fn ping(_context: &ServiceContext) -> io::Result<Response<Full<Bytes>>> {
    text_response(
        StatusCode::OK,
        format!("vless-ws-rust {} is running\n", vless_ws::VERSION),
    )
}

/// `GET /sub/{uuid}`: the connection URLs for one known user, one per
/// line. Unknown or malformed users get the same 404 as a bad path.
pub fn subscription(context: &ServiceContext, user: &str) -> io::Result<Response<Full<Bytes>>> {
    let user: Uuid = match user.parse() {
        Ok(user) => user,
        Err(_) => return not_found(),
    };

    if !context.meter().is_known(&user) {
        return not_found();
    }

    let mut body = vless_urls(context.config(), &user).join("\n");
    body.push('\n');
    text_response(StatusCode::OK, body)
}

/// Builds the `vless://` URLs a client imports, one per advertised
/// subscription address. Without any, the listener's own port is offered.
pub fn vless_urls(config: &Config, user: &Uuid) -> Vec<String> {
    let addresses = if config.sub_addresses.is_empty() {
        vec![format!("127.0.0.1:{}", config.listen_addr.port())]
    } else {
        config.sub_addresses.clone()
    };

    addresses
        .iter()
        .map(|hostport| {
            let host = hostport.rsplit_once(':').map(|(h, _)| h).unwrap_or(hostport);
            format!(
                "vless://{user}@{hostport}?encryption=none&security=none&type=ws&host={host}&path=%2F{user}#vless-ws-{host}",
            )
        })
        .collect()
}

pub fn not_found() -> io::Result<Response<Full<Bytes>>> {
    text_response(StatusCode::NOT_FOUND, "not found\n".to_string())
}

fn text_response(status: StatusCode, body: String) -> io::Result<Response<Full<Bytes>>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

//! Periodic usage report to the control plane.
//!
//! Each push uploads the traffic snapshot and takes back the currently
//! entitled user set, which replaces the meter's key table. Failures are
//! logged and the ticker keeps going; a node must keep serving through
//! control-plane outages.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use vless_ws::vless::Uuid;

use super::context::ServiceContext;

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type GenericResult<T> = std::result::Result<T, GenericError>;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
// The final push must fit inside the graceful-shutdown budget.
const FINAL_PUSH_TIMEOUT: Duration = Duration::from_secs(4);

/// The upload document. Field names are the control-plane contract.
#[derive(Debug, Serialize)]
pub struct NodeStat {
    pub traffic: HashMap<Uuid, i64>,
    pub hostname: String,
    pub goroutine: i64,
    pub version_info: String,
    pub sub_addresses: Vec<String>,
}

pub async fn run(context: Arc<ServiceContext>) {
    let cancel = context.cancel().clone();

    let url = match context.config().register_url.clone() {
        Some(url) => url,
        None => {
            info!("no register_url configured, running standalone");
            cancel.cancelled().await;
            return;
        }
    };

    let client = match reqwest::Client::builder().timeout(PUSH_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "cannot build push client, usage reporting disabled");
            cancel.cancelled().await;
            return;
        }
    };

    let mut ticker = time::interval(context.config().push_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The immediate first tick: at startup there is nothing to report yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                match time::timeout(FINAL_PUSH_TIMEOUT, push_once(&context, &client, &url)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!(error = %err, "final usage push failed"),
                    Err(_elapsed) => debug!("final usage push timed out"),
                }
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = push_once(&context, &client, &url).await {
                    warn!(error = %err, "usage push failed");
                }
            }
        }
    }
}

async fn push_once(context: &ServiceContext, client: &reqwest::Client, url: &str) -> GenericResult<()> {
    let stat = collect_stat(context);

    let mut request = client.post(url).json(&stat);
    if let Some(token) = context.config().register_token.as_deref() {
        request = request.header(reqwest::header::AUTHORIZATION, token);
    }

    let response = request.send().await?.error_for_status()?;

    // Response maps every entitled user to its remaining kibibytes; the
    // allowance itself is enforced control-plane-side, only the key set
    // matters here.
    let allowances: HashMap<Uuid, i64> = response.json().await?;

    let users: Vec<Uuid> = allowances
        .keys()
        .chain(context.config().allow_users.iter())
        .copied()
        .collect();
    let user_count = users.len();
    context.meter().replace(users);

    debug!(users = user_count, "known user set refreshed from control plane");
    Ok(())
}

fn collect_stat(context: &ServiceContext) -> NodeStat {
    NodeStat {
        traffic: context.meter().snapshot(),
        hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        goroutine: context.active_sessions(),
        version_info: format!("vless-ws-rust {}", vless_ws::VERSION),
        sub_addresses: context.config().sub_addresses.clone(),
    }
}

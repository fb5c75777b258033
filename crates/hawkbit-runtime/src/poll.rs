//! Poll Loop: a cooperative 1-second ticker that drives the base-resource
//! GET at a server-advised cadence.

use std::sync::Arc;
use std::time::Duration;

use hawkbit_core::ddi::BaseResource;
use hawkbit_core::{ActionState, Config};
use hawkbit_http::{ControllerUrls, HttpClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coordinator::Coordinator;

const TICK: Duration = Duration::from_secs(1);
/// Interval used whenever an action is in flight, so cancel requests are
/// picked up promptly.
const ACTIVE_ACTION_INTERVAL: Duration = Duration::from_secs(5);

fn parse_iso8601_duration(value: &str) -> Option<Duration> {
    let mut parts = value.splitn(3, ':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let s: u64 = parts.next()?.parse().ok()?;
    Some(Duration::from_secs(h * 3600 + m * 60 + s))
}

/// Runs the poll loop. In run-once mode, returns after one tick's worth
/// of work (including any spawned download/install) with `Ok(true)` iff
/// that tick completed without error.
pub async fn run(
    config: Arc<Config>,
    client: Arc<HttpClient>,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    run_once: bool,
) -> bool {
    let urls = ControllerUrls::new(&config);
    let mut elapsed = TICK;
    let mut desired = TICK;
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => {
                debug!("poll loop canceled");
                return true;
            }
        }

        elapsed += TICK;
        if elapsed < desired {
            continue;
        }
        elapsed = Duration::ZERO;

        let (success, base) = tick(&client, &urls, &coordinator).await;

        desired = if coordinator.active().state().await != ActionState::None {
            ACTIVE_ACTION_INTERVAL
        } else {
            base.as_ref()
                .map_or(config.retry_wait, |b| next_interval(b, config.retry_wait))
        };

        if run_once {
            return success;
        }
    }
}

async fn tick(
    client: &HttpClient,
    urls: &ControllerUrls,
    coordinator: &Coordinator,
) -> (bool, Option<BaseResource>) {
    let value = match client.get_json(urls.base()).await {
        Ok(v) => v,
        Err(err) => {
            if let hawkbit_http::HttpError::Http { status: 401 } = err {
                warn!("401 Unauthorized from base resource poll — check auth_token/gateway_token");
            } else {
                warn!(%err, "base resource poll failed");
            }
            return (false, None);
        }
    };

    let base: BaseResource = match serde_json::from_value(value) {
        Ok(b) => b,
        Err(err) => {
            warn!(%err, "base resource did not parse");
            return (false, None);
        }
    };

    if let Err(err) = coordinator.process_base(&base).await {
        warn!(%err, "processing base resource failed");
        return (false, Some(base));
    }

    (true, Some(base))
}

/// Resolve the next polling interval from `$.config.polling.sleep`:
/// unparseable or absent falls back to `retry_wait`.
#[must_use]
pub fn next_interval(base: &BaseResource, retry_wait: Duration) -> Duration {
    base.config
        .as_ref()
        .and_then(|c| c.polling.sleep.as_deref())
        .and_then(parse_iso8601_duration)
        .unwrap_or(retry_wait)
}

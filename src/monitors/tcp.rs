//! TCP connect check
//!
//! Config: `port` (required). Metric: `duration`, the connect time in ms.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use super::millis;
use crate::check::Check;
use crate::engine::Probe;
use crate::module::CheckModule;
use crate::stats::{Availability, State};

pub struct TcpModule;

fn socket_addr(check: &Check) -> Result<SocketAddr> {
    let port = check
        .config_value("port")
        .context("missing port")?
        .parse::<u16>()
        .context("invalid port")?;
    Ok(SocketAddr::new(check.address(), port))
}

/// Bound on a connect attempt, past the engine timeout so that one settles
/// the firing first
fn connect_limit(timeout: Duration) -> Duration {
    timeout.saturating_mul(2)
}

#[instrument(skip_all, fields(check = %probe.check(), %address))]
async fn connect(address: SocketAddr, probe: Probe) {
    let start = Instant::now();
    let limit = connect_limit(probe.check().timeout());
    let result = tokio::time::timeout(limit, TcpStream::connect(address)).await;
    let elapsed = start.elapsed();

    match result {
        Ok(Ok(_stream)) => {
            debug!("connected in {elapsed:?}");
            probe.set_metric("duration", millis(elapsed));
            probe.set_availability(Availability::Available);
            probe.set_state(State::Good);
            probe.set_status(format!("connected to {address}"));
            probe.complete();
        }
        Ok(Err(e)) => {
            debug!("connect failed: {e}");
            probe.fail(format!("connect to {address}: {e}"));
        }
        Err(_) => {
            debug!("connect still pending after {limit:?}, giving up");
        }
    }
}

impl CheckModule for TcpModule {
    fn name(&self) -> &str {
        "tcp"
    }

    fn start_probe(&self, probe: Probe) {
        let address = match socket_addr(probe.check()) {
            Ok(address) => address,
            Err(e) => {
                probe.fail(format!("{e:#}"));
                return;
            }
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            probe.fail("no async runtime available");
            return;
        };
        handle.spawn(connect(address, probe));
    }
}

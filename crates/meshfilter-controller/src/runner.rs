//! Controller runner - builds the policy and consumer controller futures

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use meshfilter_common::crd::{Consumer, HttpFilterPolicy};

use crate::controller::{error_policy, reconcile_consumer, reconcile_policy, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the HTTPFilterPolicy and Consumer controller futures
///
/// Both controllers share one context, so their passes are serialized.
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let policies: Api<HttpFilterPolicy> = Api::all(client.clone());
    let consumers: Api<Consumer> = Api::all(client);

    tracing::info!("- HTTPFilterPolicy controller");
    let policy_ctrl = Controller::new(
        policies,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_policy, error_policy::<HttpFilterPolicy>, ctx.clone())
    .for_each(log_reconcile_result("HTTPFilterPolicy"));

    tracing::info!("- Consumer controller");
    let consumer_ctrl = Controller::new(
        consumers,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_consumer, error_policy::<Consumer>, ctx)
    .for_each(log_reconcile_result("Consumer"));

    vec![Box::pin(policy_ctrl), Box::pin(consumer_ctrl)]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

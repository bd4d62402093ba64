use crate::crd::Rollout;
use crate::reconcile::reconcile_rollout;

use rollop_operator::backoff_reconciler;
use rollop_operator::controller::{ControllerId, State, check_api_queryable, error_policy};
use rollop_remote_sync::crd::RemoteSync;

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher;
use tokio::time::Duration;
use tracing::info;

pub const CONTROLLER_ID: ControllerId = "rollout";

/// Initialize the rollout controller.
///
/// Owned RemoteSyncs are watched so status movement on any of them (driven
/// by the remote sync controller) re-enqueues the owning rollout.
pub async fn run(state: State, client: Client) {
    let rollout = check_api_queryable::<Rollout>(client.clone()).await;
    let remote_sync = Api::<RemoteSync>::all(client.clone());

    let ctx = Arc::new(state.to_context(client, CONTROLLER_ID));

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    let rollout_controller = Controller::new(rollout, watcher::Config::default().any_semantic())
        // debounce to filter out reconcile calls that happen quick succession (only taking the latest)
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .owns(remote_sync, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            backoff_reconciler!(reconcile_rollout),
            error_policy,
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::join!(rollout_controller);
}

use crate::crd::RemoteSync;
use crate::reconcile::reconcile_remote_sync;

use rollop_operator::backoff_reconciler;
use rollop_operator::controller::watch::SyncKey;
use rollop_operator::controller::{ControllerId, State, check_api_queryable, error_policy};

use std::sync::Arc;

use futures::StreamExt;
use futures::channel::mpsc;
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use tokio::time::Duration;
use tracing::info;

pub const CONTROLLER_ID: ControllerId = "remote-sync";

/// Initialize the remote sync controller.
///
/// `events` carries reconcile triggers from the watch multiplexer: status
/// changes observed on target clusters map back to the owning RemoteSync.
pub async fn run(state: State, client: Client, events: mpsc::Receiver<SyncKey>) {
    let remote_sync = check_api_queryable::<RemoteSync>(client.clone()).await;

    let ctx = Arc::new(state.to_context(client, CONTROLLER_ID));

    let trigger = events
        .map(|key| ObjectRef::<RemoteSync>::new(&key.name).within(&key.namespace));

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    let remote_sync_controller =
        Controller::new(remote_sync, watcher::Config::default().any_semantic())
            // debounce to filter out reconcile calls that happen quick succession (only taking the latest)
            .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
            .reconcile_on(trigger)
            .shutdown_on_signal()
            .run(
                backoff_reconciler!(reconcile_remote_sync),
                error_policy,
                ctx.clone(),
            )
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::join!(remote_sync_controller);
}

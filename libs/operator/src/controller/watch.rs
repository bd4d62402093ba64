//! Shared watches on target clusters.
//!
//! One watch runs per (cluster, resource kind), shared by every sync object
//! interested in it through a lien set. The watch is started on the first
//! lien and cancelled when the last lien is released. Stream failures back
//! off exponentially between one and thirty seconds, reset on recovery.

use rollop_cluster_store::{ClusterRef, ClusterStore};
use rollop_k8s_util::error::{Error, Result};

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use kube::api::{Api, DynamicObject};
use kube::client::Client;
use kube::core::ApiResource;
use kube::runtime::watcher;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Labels linking an applied object on a target cluster back to the sync
/// object that owns it.
pub const REMOTE_SYNC_NAME_LABEL: &str = "gitops.kpt.dev/remotesync-name";
pub const REMOTE_SYNC_NAMESPACE_LABEL: &str = "gitops.kpt.dev/remotesync-namespace";

const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const EVENT_BUFFER_SIZE: usize = 256;

/// Control-plane identity of a RemoteSync, used both as lien key and as the
/// reconcile trigger forwarded to the controller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct WatchKey {
    cluster: String,
    kind: String,
}

struct WatchEntry {
    liens: HashSet<SyncKey>,
    cancel: CancellationToken,
}

/// Maintains one watch per (target cluster, resource kind), shared across
/// all rollouts that need it; a watch exits when no lienholders remain.
pub struct WatchMultiplexer {
    cluster_store: Arc<ClusterStore>,
    events: mpsc::Sender<SyncKey>,
    watches: Mutex<HashMap<WatchKey, WatchEntry>>,
}

impl WatchMultiplexer {
    /// Returns the multiplexer and the stream of reconcile triggers fed by
    /// all of its watches.
    pub fn new(cluster_store: Arc<ClusterStore>) -> (Self, mpsc::Receiver<SyncKey>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER_SIZE);
        (
            Self {
                cluster_store,
                events,
                watches: Mutex::new(HashMap::new()),
            },
            receiver,
        )
    }

    /// Ensure a watch is running for `resource` on the referenced cluster,
    /// holding a lien under `key`.
    pub async fn acquire(
        &self,
        cluster: &ClusterRef,
        resource: &ApiResource,
        key: SyncKey,
    ) -> Result<()> {
        let watch_key = WatchKey {
            cluster: cluster.name.clone(),
            kind: resource.kind.clone(),
        };

        {
            let mut watches = self.watches.lock().await;
            if let Some(entry) = watches.get_mut(&watch_key) {
                entry.liens.insert(key);
                return Ok(());
            }
        }

        // Build the client outside the lock; a concurrent acquire for the
        // same key simply wins the map insert below.
        let client = self
            .cluster_store
            .target_client(cluster)
            .await
            .map_err(|e| Error::WatchError(format!("failed to connect watch client: {e}")))?;

        let mut watches = self.watches.lock().await;
        if let Some(entry) = watches.get_mut(&watch_key) {
            entry.liens.insert(key);
            return Ok(());
        }

        let cancel = CancellationToken::new();
        debug!(
            msg = "starting target cluster watch",
            cluster = watch_key.cluster,
            kind = watch_key.kind
        );
        tokio::spawn(run_watch(
            client,
            watch_key.clone(),
            resource.clone(),
            cancel.clone(),
            self.events.clone(),
        ));
        watches.insert(
            watch_key,
            WatchEntry {
                liens: HashSet::from([key]),
                cancel,
            },
        );
        Ok(())
    }

    /// Release the lien held under `key` for `resource` on the cluster;
    /// cancels the watch when the lien set empties.
    pub async fn release(&self, cluster: &ClusterRef, resource: &ApiResource, key: &SyncKey) {
        let watch_key = WatchKey {
            cluster: cluster.name.clone(),
            kind: resource.kind.clone(),
        };
        let mut watches = self.watches.lock().await;
        if let Some(entry) = watches.get_mut(&watch_key) {
            entry.liens.remove(key);
            if entry.liens.is_empty() {
                debug!(
                    msg = "last lien released, cancelling watch",
                    cluster = watch_key.cluster,
                    kind = watch_key.kind
                );
                entry.cancel.cancel();
                watches.remove(&watch_key);
            }
        }
    }

    /// Release every lien held under `key`, across all watches. Used by
    /// finalizers that no longer know which clusters the key referenced.
    pub async fn release_all(&self, key: &SyncKey) {
        let mut watches = self.watches.lock().await;
        watches.retain(|watch_key, entry| {
            entry.liens.remove(key);
            if entry.liens.is_empty() {
                debug!(
                    msg = "last lien released, cancelling watch",
                    cluster = watch_key.cluster,
                    kind = watch_key.kind
                );
                entry.cancel.cancel();
                false
            } else {
                true
            }
        });
    }
}

async fn run_watch(
    client: Client,
    watch_key: WatchKey,
    resource: ApiResource,
    cancel: CancellationToken,
    events: mpsc::Sender<SyncKey>,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &resource);
    let config = watcher::Config::default().labels(REMOTE_SYNC_NAME_LABEL);

    let mut backoff = reconnect_backoff();
    let mut stream = pin!(watcher(api, config));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(msg = "watch cancelled", cluster = watch_key.cluster, kind = watch_key.kind);
                break;
            }
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    backoff = reconnect_backoff();
                    forward(event, &watch_key, &events).await;
                }
                Some(Err(e)) => {
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!(
                        msg = "watch stream error, backing off",
                        cluster = watch_key.cluster,
                        kind = watch_key.kind,
                        delay = ?delay,
                        %e,
                    );
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }
    }
}

fn reconnect_backoff() -> backon::ExponentialBackoff {
    ExponentialBuilder::default()
        .with_min_delay(MIN_RECONNECT_DELAY)
        .with_max_delay(MAX_RECONNECT_DELAY)
        .without_max_times()
        .build()
}

async fn forward(
    event: watcher::Event<DynamicObject>,
    watch_key: &WatchKey,
    events: &mpsc::Sender<SyncKey>,
) {
    let object = match event {
        watcher::Event::Apply(o) | watcher::Event::InitApply(o) | watcher::Event::Delete(o) => o,
        _ => return,
    };
    let labels = object.metadata.labels.unwrap_or_default();
    let (Some(name), Some(namespace)) = (
        labels.get(REMOTE_SYNC_NAME_LABEL),
        labels.get(REMOTE_SYNC_NAMESPACE_LABEL),
    ) else {
        trace!(
            msg = "watched object has no remotesync back-labels, ignoring",
            cluster = watch_key.cluster,
        );
        return;
    };
    let key = SyncKey {
        namespace: namespace.clone(),
        name: name.clone(),
    };
    let mut sender = events.clone();
    if let Err(e) = sender.send(key).await {
        warn!(msg = "failed to forward watch event", cluster = watch_key.cluster, %e);
    }
}

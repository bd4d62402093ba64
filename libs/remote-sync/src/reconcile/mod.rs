pub mod external;
pub mod status;

use crate::crd::{RemoteSync, RemoteSyncStatus};

use rollop_k8s_util::error::{Error, Result};
use rollop_operator::controller::DEFAULT_RECONCILE_INTERVAL;
use rollop_operator::controller::context::Context;
use rollop_operator::controller::watch::SyncKey;
use rollop_operator::telemetry;

use std::sync::Arc;

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::runtime::finalizer::{Event as Finalizer, finalizer};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tokio::time::Duration;
use tracing::{Span, debug, field, info, instrument, trace, warn};

pub static REMOTE_SYNC_OPERATOR_NAME: &str = "remotesyncs.gitops.kpt.dev";
pub static REMOTE_SYNC_FINALIZER: &str = "remotesyncs.gitops.kpt.dev/finalizer";

/// Requeue interval while the external object is not yet synced; watch
/// events normally arrive sooner.
const PENDING_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[instrument(skip(ctx, remote_sync), fields(trace_id))]
pub async fn reconcile_remote_sync(
    remote_sync: Arc<RemoteSync>,
    ctx: Arc<Context<RemoteSync>>,
) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile_count_and_measure();

    // safe unwrap: RemoteSync is namespace scoped
    let namespace = remote_sync.namespace().unwrap();
    info!(msg = "reconciling remote sync", name = remote_sync.name_any());

    let api: Api<RemoteSync> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, REMOTE_SYNC_FINALIZER, remote_sync, |event| async {
        match event {
            Finalizer::Apply(rs) => rs.apply(ctx).await,
            Finalizer::Cleanup(rs) => rs.cleanup(ctx).await,
        }
    })
    .await
    .map_err(|e| {
        Error::FinalizerError(
            "failed on remote sync finalizer".to_string(),
            Box::new(e),
        )
    })
}

impl RemoteSync {
    fn sync_key(&self) -> SyncKey {
        SyncKey {
            // safe unwrap: RemoteSync is namespace scoped
            namespace: self.namespace().unwrap(),
            name: self.name_any(),
        }
    }

    /// Project the template onto the target cluster and track its status.
    async fn apply(&self, ctx: Arc<Context<RemoteSync>>) -> Result<Action> {
        let name = self.name_any();
        let resource = external::api_resource(&self.spec.sync_type);

        ctx.watches
            .acquire(&self.spec.cluster_ref, &resource, self.sync_key())
            .await?;

        let target = ctx.cluster_store.target_client(&self.spec.cluster_ref).await?;
        let desired = external::build_external_sync(self)?;
        let external_namespace = external::external_namespace(self);
        let api: Api<DynamicObject> =
            Api::namespaced_with(target, &external_namespace, &resource);

        debug!(msg = "applying external sync", cluster = self.spec.cluster_ref.name);
        if let Err(e) = api
            .patch(
                &name,
                &PatchParams::apply(REMOTE_SYNC_OPERATOR_NAME).force(),
                &Patch::Apply(&desired),
            )
            .await
        {
            let error = Error::ApplyError(
                format!(
                    "failed to apply {} {external_namespace}/{name} on {}",
                    self.spec.sync_type, self.spec.cluster_ref.name
                ),
                Box::new(e),
            );
            self.publish_apply_warning(&ctx, &error).await?;
            return Err(error);
        }

        // read the live object rather than the apply response: the agent
        // updates status out of band
        let sync_status = match api.get(&name).await {
            Ok(live) => status::normalized_sync_status(&live, self.requested_revision()),
            Err(e) => {
                self.update_status(&ctx, status::SYNC_STATUS_UNKNOWN, true)
                    .await?;
                return Err(Error::StatusSyncError(format!(
                    "failed to read {} {external_namespace}/{name} status on {}: {e}",
                    self.spec.sync_type, self.spec.cluster_ref.name
                )));
            }
        };
        self.update_status(&ctx, &sync_status, true).await?;

        if sync_status == status::SYNC_STATUS_SYNCED {
            Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
        } else {
            Ok(Action::requeue(PENDING_RECONCILE_INTERVAL))
        }
    }

    async fn publish_apply_warning(
        &self,
        ctx: &Context<RemoteSync>,
        error: &Error,
    ) -> Result<()> {
        ctx.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: "ApplyFailed".to_string(),
                    note: Some(error.to_string()),
                    action: "Apply".to_string(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| {
                warn!(msg = "failed to publish ApplyFailed event", %e);
                Error::KubeError("failed to publish event".to_string(), Box::new(e))
            })?;
        Ok(())
    }

    /// Tear down the external object before the finalizer clears.
    async fn cleanup(&self, ctx: Arc<Context<RemoteSync>>) -> Result<Action> {
        let name = self.name_any();
        let resource = external::api_resource(&self.spec.sync_type);
        let target = ctx.cluster_store.target_client(&self.spec.cluster_ref).await?;
        let external_namespace = external::external_namespace(self);
        let api: Api<DynamicObject> =
            Api::namespaced_with(target, &external_namespace, &resource);

        debug!(msg = "deleting external sync", cluster = self.spec.cluster_ref.name);
        match api.delete(&name, &Default::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                trace!(msg = "external sync already gone");
            }
            Err(e) => {
                return Err(Error::KubeError(
                    format!(
                        "failed to delete {} {external_namespace}/{name} on {}",
                        self.spec.sync_type, self.spec.cluster_ref.name
                    ),
                    Box::new(e),
                ));
            }
        }

        ctx.watches
            .release(&self.spec.cluster_ref, &resource, &self.sync_key())
            .await;
        Ok(Action::await_change())
    }

    async fn update_status(
        &self,
        ctx: &Context<RemoteSync>,
        sync_status: &str,
        sync_created: bool,
    ) -> Result<()> {
        let new_status = RemoteSyncStatus {
            conditions: None,
            sync_status: Some(sync_status.to_string()),
            sync_created,
            observed_generation: self.metadata.generation,
        };
        if self.status.as_ref() == Some(&new_status) {
            trace!(msg = "status unchanged, skipping write");
            return Ok(());
        }

        // safe unwrap: RemoteSync is namespace scoped
        let namespace = self.namespace().unwrap();
        let name = self.name_any();
        let status_patch = Patch::Apply(json!({
            "apiVersion": "gitops.kpt.dev/v1alpha1",
            "kind": "RemoteSync",
            "status": new_status,
        }));
        debug!(msg = "updating remote sync status", sync_status);
        let patch = PatchParams::apply(REMOTE_SYNC_OPERATOR_NAME).force();
        let api = Api::<RemoteSync>::namespaced(ctx.client.clone(), &namespace);
        api.patch_status(&name, &patch, &status_patch)
            .await
            .map_err(|e| {
                ctx.metrics.status_update_errors_inc();
                warn!(msg = "failed to patch RemoteSync status", %e);
                Error::KubeError(
                    format!("failed to patch RemoteSync/status {namespace}/{name}"),
                    Box::new(e),
                )
            })?;
        Ok(())
    }
}

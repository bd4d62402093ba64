mod status;

use crate::crd::{ROLLOUT_NAME_LABEL, ProgressiveRolloutStrategy, Rollout, StrategyType};
use crate::matcher::match_clusters;
use crate::scheduler::{self, Mutation};
use crate::targets;

use rollop_k8s_util::error::{Error, Result};
use rollop_operator::controller::DEFAULT_RECONCILE_INTERVAL;
use rollop_operator::controller::context::Context;
use rollop_operator::controller::watch::SyncKey;
use rollop_operator::telemetry;
use rollop_remote_sync::crd::RemoteSync;

use std::sync::Arc;

use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::runtime::finalizer::{Event as Finalizer, finalizer};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{Span, debug, field, info, instrument, trace, warn};

pub static ROLLOUT_OPERATOR_NAME: &str = "rollouts.gitops.kpt.dev";
pub static ROLLOUT_FINALIZER: &str = "rollouts.gitops.kpt.dev/finalizer";

#[instrument(skip(ctx, rollout), fields(trace_id))]
pub async fn reconcile_rollout(rollout: Arc<Rollout>, ctx: Arc<Context<Rollout>>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile_count_and_measure();

    // safe unwrap: Rollout is namespace scoped
    let namespace = rollout.namespace().unwrap();
    info!(msg = "reconciling rollout", name = rollout.name_any());

    let api: Api<Rollout> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, ROLLOUT_FINALIZER, rollout, |event| async {
        match event {
            Finalizer::Apply(ro) => ro.apply(ctx).await,
            Finalizer::Cleanup(ro) => ro.cleanup(ctx).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError("failed on rollout finalizer".to_string(), Box::new(e)))
}

impl Rollout {
    fn owned_label_selector(&self) -> String {
        format!("{ROLLOUT_NAME_LABEL}={}", self.name_any())
    }

    async fn list_owned(&self, ctx: &Context<Rollout>) -> Result<Vec<RemoteSync>> {
        // safe unwrap: Rollout is namespace scoped
        let namespace = self.namespace().unwrap();
        let api = Api::<RemoteSync>::namespaced(ctx.client.clone(), &namespace);
        let owned = api
            .list(&ListParams::default().labels(&self.owned_label_selector()))
            .await
            .map_err(|e| {
                Error::KubeError(
                    format!("failed to list RemoteSyncs owned by {namespace}/{}", self.name_any()),
                    Box::new(e),
                )
            })?;
        Ok(owned.items)
    }

    #[inline]
    async fn apply(&self, ctx: Arc<Context<Rollout>>) -> Result<Action> {
        match self.run_rollout(ctx.clone()).await {
            Ok(action) => Ok(action),
            Err(e) if e.is_terminal() => {
                self.publish_config_warning(&ctx, &e).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_rollout(&self, ctx: Arc<Context<Rollout>>) -> Result<Action> {
        // safe unwrap: Rollout is namespace scoped
        let namespace = self.namespace().unwrap();
        let spec = &self.spec;

        let strategy = self.load_progressive_strategy(&ctx, &namespace).await?;
        let selector = spec.target_selector.clone().unwrap_or_default();
        let clusters = ctx
            .cluster_store
            .list(&spec.cluster_source, &namespace, &selector)
            .await?;
        let strategy_view = scheduler::build(self, strategy.as_ref(), &clusters)?;

        let packages = ctx.discovery.discover(&spec.package_source).await?;
        debug!(msg = "resolved rollout inputs", clusters = clusters.len(), packages = packages.len());
        if packages.is_empty() {
            // an empty discovered set never tears down existing syncs on
            // its own; discovery failures surface as errors above
            warn!(msg = "no packages discovered, leaving existing remote syncs untouched");
            return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
        }

        let pairs = match_clusters(&spec.package_to_target_matcher, &clusters, &packages)?;
        let existing = self.list_owned(&ctx).await?;
        let classified = targets::compute(self, &pairs, &existing);
        let per_wave = targets::partition(classified, &strategy_view.waves);

        let remote_sync_api = Api::<RemoteSync>::namespaced(ctx.client.clone(), &namespace);
        let mut paused = false;
        let mut wave_statuses = Vec::new();
        let mut cluster_statuses = Vec::new();
        for (wave, wave_targets) in strategy_view.waves.iter().zip(per_wave.iter()) {
            let plan = scheduler::admit(wave, wave_targets, paused);
            for mutation in &plan.mutations {
                self.execute(&remote_sync_api, mutation).await?;
            }

            let wave_overall = scheduler::overall_status(
                plan.cluster_statuses
                    .iter()
                    .map(|s| s.package_status.status.as_str()),
            );
            wave_statuses.push(crate::crd::WaveStatus {
                name: wave.name.clone(),
                status: wave_overall.to_string(),
                paused,
                cluster_statuses: plan.cluster_statuses.clone(),
            });
            cluster_statuses.extend(plan.cluster_statuses);

            if plan.in_progress {
                paused = true;
            }
            if strategy_view.pause_after_wave.as_deref() == Some(wave.name.as_str()) {
                paused = true;
            }
        }

        self.update_status(&ctx, wave_statuses, cluster_statuses)
            .await?;
        Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
    }

    async fn load_progressive_strategy(
        &self,
        ctx: &Context<Rollout>,
        namespace: &str,
    ) -> Result<Option<ProgressiveRolloutStrategy>> {
        if self.spec.strategy.strategy_type != StrategyType::Progressive {
            return Ok(None);
        }
        let Some(reference) = &self.spec.strategy.progressive else {
            // build() reports the precise config error
            return Ok(None);
        };
        let api = Api::<ProgressiveRolloutStrategy>::namespaced(ctx.client.clone(), namespace);
        match api.get(&reference.name).await {
            Ok(strategy) => Ok(Some(strategy)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::KubeError(
                format!(
                    "failed to get ProgressiveRolloutStrategy {namespace}/{}",
                    reference.name
                ),
                Box::new(e),
            )),
        }
    }

    async fn execute(&self, api: &Api<RemoteSync>, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Create(rs) | Mutation::Update(rs) => {
                let name = rs.name_any();
                debug!(msg = "applying remote sync", name, cluster = rs.spec.cluster_ref.name);
                api.patch(
                    &name,
                    &PatchParams::apply(ROLLOUT_OPERATOR_NAME).force(),
                    &Patch::Apply(rs),
                )
                .await
                .map_err(|e| {
                    Error::KubeError(
                        format!("failed to apply RemoteSync {name}"),
                        Box::new(e),
                    )
                })?;
            }
            Mutation::Delete(rs) => {
                let name = rs.name_any();
                debug!(msg = "deleting remote sync", name, cluster = rs.spec.cluster_ref.name);
                match api.delete(&name, &Default::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {
                        trace!(msg = "remote sync already gone", name);
                    }
                    Err(e) => {
                        return Err(Error::KubeError(
                            format!("failed to delete RemoteSync {name}"),
                            Box::new(e),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete every owned RemoteSync and drop this rollout's watch liens;
    /// the finalizer clears only once nothing owned remains.
    async fn cleanup(&self, ctx: Arc<Context<Rollout>>) -> Result<Action> {
        let owned = self.list_owned(&ctx).await?;
        if owned.is_empty() {
            debug!(msg = "no owned remote syncs remain, releasing finalizer");
            return Ok(Action::await_change());
        }

        // safe unwrap: Rollout is namespace scoped
        let namespace = self.namespace().unwrap();
        let api = Api::<RemoteSync>::namespaced(ctx.client.clone(), &namespace);
        for rs in &owned {
            let name = rs.name_any();
            match api.delete(&name, &Default::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => {
                    return Err(Error::KubeError(
                        format!("failed to delete RemoteSync {name} during finalization"),
                        Box::new(e),
                    ));
                }
            }
            ctx.watches
                .release_all(&SyncKey {
                    namespace: namespace.clone(),
                    name,
                })
                .await;
        }
        // dependents still deleting; keep the finalizer and retry
        Err(Error::DeletionPending(format!(
            "{} owned RemoteSyncs still deleting",
            owned.len()
        )))
    }

    async fn update_status(
        &self,
        ctx: &Context<Rollout>,
        wave_statuses: Vec<crate::crd::WaveStatus>,
        cluster_statuses: Vec<crate::crd::ClusterStatus>,
    ) -> Result<()> {
        let new_status = status::synthesize(self, wave_statuses, cluster_statuses);
        if self.status.as_ref() == Some(&new_status) {
            trace!(msg = "status unchanged, skipping write");
            return Ok(());
        }

        // safe unwrap: Rollout is namespace scoped
        let namespace = self.namespace().unwrap();
        let name = self.name_any();
        let status_patch = Patch::Apply(json!({
            "apiVersion": "gitops.kpt.dev/v1alpha1",
            "kind": "Rollout",
            "status": new_status,
        }));
        debug!(msg = "updating rollout status", overall = new_status.overall);
        let patch = PatchParams::apply(ROLLOUT_OPERATOR_NAME).force();
        let api = Api::<Rollout>::namespaced(ctx.client.clone(), &namespace);
        api.patch_status(&name, &patch, &status_patch)
            .await
            .map_err(|e| {
                ctx.metrics.status_update_errors_inc();
                Error::KubeError(
                    format!("failed to patch Rollout/status {namespace}/{name}"),
                    Box::new(e),
                )
            })?;
        Ok(())
    }

    async fn publish_config_warning(&self, ctx: &Context<Rollout>, error: &Error) -> Result<()> {
        ctx.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: "InvalidRollout".to_string(),
                    note: Some(error.to_string()),
                    action: "Reconcile".to_string(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| {
                warn!(msg = "failed to publish InvalidRollout event", %e);
                Error::KubeError("failed to publish event".to_string(), Box::new(e))
            })?;
        Ok(())
    }
}

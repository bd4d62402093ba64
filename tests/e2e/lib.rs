//! End-to-end tests against a live cluster.
//!
//! Requirements: the CRDs applied (`cargo run --bin crdgen | kubectl apply
//! -f -`), the operator running with `--external-auth dev`, and
//! `E2E_KUBECONFIG` pointing at a kubeconfig for the test cluster. Target
//! clusters are registered as kind kubeconfig secrets looping back to the
//! test cluster itself, so no separate fleet is needed.

#[cfg(all(test, feature = "e2e-test"))]
mod test {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use rollop_remote_sync::crd::RemoteSync;
    use rollop_rollout::crd::{ProgressiveRolloutStrategy, Rollout};

    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
    use kube::runtime::wait::{Condition, await_condition};
    use kube::{Client, ResourceExt};
    use serde_json::json;
    use tokio::time::timeout;

    const NAMESPACE: &str = "default";
    const WAIT: Duration = Duration::from_secs(60);
    const FIELD_MANAGER: &str = "rollop-e2e";

    async fn setup() -> Client {
        Client::try_default()
            .await
            .expect("failed to create kube client")
    }

    fn kubeconfig() -> String {
        let path = std::env::var("E2E_KUBECONFIG").expect("E2E_KUBECONFIG must be set");
        std::fs::read_to_string(path).expect("failed to read E2E_KUBECONFIG")
    }

    /// Register a loop-back kind cluster under the given name and labels.
    async fn register_cluster(client: &Client, name: &str, labels: &[(&str, &str)]) {
        let mut all_labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        all_labels.insert(
            "gitops.kpt.dev/cluster-source".to_string(),
            "kind".to_string(),
        );
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(all_labels),
                ..Default::default()
            },
            data: Some(
                [(
                    "kubeconfig".to_string(),
                    ByteString(kubeconfig().into_bytes()),
                )]
                .into(),
            ),
            ..Default::default()
        };
        let api = Api::<Secret>::namespaced(client.clone(), NAMESPACE);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .expect("failed to register cluster secret");
    }

    fn rollout_json(name: &str, strategy: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "gitops.kpt.dev/v1alpha1",
            "kind": "Rollout",
            "metadata": { "name": name, "namespace": NAMESPACE },
            "spec": {
                "clusterSource": { "sourceType": "KindCluster" },
                "packageSource": {
                    "sourceType": "OCI",
                    "oci": { "image": "us-docker.pkg.dev/e2e/repo/pkg", "dir": "dir" },
                },
                "targetSelector": { "matchLabels": { "rollout": name } },
                "syncTemplate": { "type": "RootSync" },
                "strategy": strategy,
            },
        })
    }

    async fn apply_rollout(client: &Client, rollout: &serde_json::Value) {
        let api = Api::<Rollout>::namespaced(client.clone(), NAMESPACE);
        api.patch(
            rollout["metadata"]["name"].as_str().unwrap(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(rollout),
        )
        .await
        .expect("failed to apply rollout");
    }

    async fn owned_remote_syncs(client: &Client, rollout: &str) -> Vec<RemoteSync> {
        let api = Api::<RemoteSync>::namespaced(client.clone(), NAMESPACE);
        api.list(
            &ListParams::default().labels(&format!("gitops.kpt.dev/rollout-name={rollout}")),
        )
        .await
        .expect("failed to list remote syncs")
        .items
    }

    fn has_overall(overall: &str) -> impl Condition<Rollout> + '_ {
        move |obj: Option<&Rollout>| {
            obj.and_then(|ro| ro.status.as_ref())
                .is_some_and(|status| status.overall == overall)
        }
    }

    fn cluster_reports<'a>(cluster: &'a str, derived: &'a str) -> impl Condition<Rollout> + 'a {
        move |obj: Option<&Rollout>| {
            obj.and_then(|ro| ro.status.as_ref())
                .and_then(|status| status.cluster_statuses.as_ref())
                .is_some_and(|statuses| {
                    statuses
                        .iter()
                        .any(|s| s.name == cluster && s.package_status.status == derived)
                })
        }
    }

    async fn wait_for_rollout(client: &Client, name: &str, cond: impl Condition<Rollout>) {
        let api = Api::<Rollout>::namespaced(client.clone(), NAMESPACE);
        timeout(WAIT, await_condition(api, name, cond))
            .await
            .expect("timed out waiting for rollout condition")
            .expect("failed watching rollout");
    }

    #[tokio::test]
    async fn all_at_once_creates_every_remote_sync() {
        let name = "e2e-all-at-once";
        let client = setup().await;
        register_cluster(&client, "e2e-aao-0", &[("rollout", name)]).await;
        register_cluster(&client, "e2e-aao-1", &[("rollout", name)]).await;

        apply_rollout(&client, &rollout_json(name, json!({ "type": "AllAtOnce" }))).await;
        wait_for_rollout(&client, name, has_overall("Progressing")).await;

        let owned = owned_remote_syncs(&client, name).await;
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|rs| rs.name_any().starts_with("oci-0-dir-")));
    }

    #[tokio::test]
    async fn rolling_update_admits_one_cluster_at_a_time() {
        let name = "e2e-rolling";
        let client = setup().await;
        register_cluster(&client, "e2e-ru-0", &[("rollout", name)]).await;
        register_cluster(&client, "e2e-ru-1", &[("rollout", name)]).await;

        apply_rollout(
            &client,
            &rollout_json(
                name,
                json!({ "type": "RollingUpdate", "rollingUpdate": { "maxConcurrent": 1 } }),
            ),
        )
        .await;
        // the second cluster must wait for the first to sync
        wait_for_rollout(&client, name, cluster_reports("e2e-ru-1", "Waiting")).await;

        let owned = owned_remote_syncs(&client, name).await;
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].spec.cluster_ref.name, "e2e-ru-0");
    }

    #[tokio::test]
    async fn progressive_pauses_upcoming_wave() {
        let name = "e2e-progressive";
        let client = setup().await;
        register_cluster(&client, "e2e-pr-0", &[("rollout", name), ("wave", "1")]).await;
        register_cluster(&client, "e2e-pr-1", &[("rollout", name), ("wave", "1")]).await;
        register_cluster(&client, "e2e-pr-2", &[("rollout", name), ("wave", "2")]).await;

        let strategy = json!({
            "apiVersion": "gitops.kpt.dev/v1alpha1",
            "kind": "ProgressiveRolloutStrategy",
            "metadata": { "name": name, "namespace": NAMESPACE },
            "spec": {
                "waves": [
                    { "name": "wave-1", "targets": { "matchLabels": { "wave": "1" } }, "maxConcurrent": 2 },
                    { "name": "wave-2", "targets": { "matchLabels": { "wave": "2" } }, "maxConcurrent": 1 },
                ],
            },
        });
        let strategy_api = Api::<ProgressiveRolloutStrategy>::namespaced(client.clone(), NAMESPACE);
        strategy_api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&strategy),
            )
            .await
            .expect("failed to apply strategy");

        apply_rollout(
            &client,
            &rollout_json(
                name,
                json!({
                    "type": "Progressive",
                    "progressive": { "name": name, "pauseAfterWave": "wave-1" },
                }),
            ),
        )
        .await;

        wait_for_rollout(
            &client,
            name,
            cluster_reports("e2e-pr-2", "Waiting (Upcoming Wave)"),
        )
        .await;
        let owned = owned_remote_syncs(&client, name).await;
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|rs| rs.spec.cluster_ref.name != "e2e-pr-2"));
    }

    #[tokio::test]
    async fn deselected_cluster_is_torn_down() {
        let name = "e2e-teardown";
        let client = setup().await;
        register_cluster(&client, "e2e-td-0", &[("rollout", name)]).await;
        register_cluster(&client, "e2e-td-1", &[("rollout", name)]).await;

        apply_rollout(&client, &rollout_json(name, json!({ "type": "AllAtOnce" }))).await;
        wait_for_rollout(&client, name, cluster_reports("e2e-td-1", "Progressing")).await;

        // drop the second cluster out of the selector
        let secret_api = Api::<Secret>::namespaced(client.clone(), NAMESPACE);
        secret_api
            .patch(
                "e2e-td-1",
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Merge(&json!({ "metadata": { "labels": { "rollout": "retired" } } })),
            )
            .await
            .expect("failed to relabel cluster secret");

        // the remote sync for the deselected cluster is finalized away
        timeout(WAIT, async {
            loop {
                let owned = owned_remote_syncs(&client, name).await;
                if owned.len() == 1 && owned[0].spec.cluster_ref.name == "e2e-td-0" {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        })
        .await
        .expect("timed out waiting for remote sync teardown");

        let rollout_api = Api::<Rollout>::namespaced(client.clone(), NAMESPACE);
        rollout_api
            .delete(name, &DeleteParams::default())
            .await
            .expect("failed to delete rollout");
        timeout(WAIT, async {
            while !owned_remote_syncs(&client, name).await.is_empty() {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        })
        .await
        .expect("timed out waiting for rollout finalization");
    }
}

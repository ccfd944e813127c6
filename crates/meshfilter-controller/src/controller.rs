//! Reconcile loop for filter policies and consumers
//!
//! Every reconcile runs one full pass: snapshot the cluster, translate, apply
//! the generated EnvoyFilters, prune the ones no longer generated, and write
//! the status of every policy and consumer whose condition changed. Passes
//! are serialized so two controllers never apply interleaved output.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use meshfilter_common::crd::{
    Condition, Consumer, ConsumerStatus, HttpFilterPolicy, HttpFilterPolicyStatus,
    CONDITION_ACCEPTED,
};
use meshfilter_common::policy::EnvoyFilter;
use meshfilter_translation::{
    translate, NamespacedName, ObjectStatus, PluginRegistry, Snapshot, TranslationConfig,
};

use crate::config::RequeueSettings;
use crate::error::ReconcileError;
use crate::store::ClusterStore;

/// Controller context shared by the policy and consumer controllers
pub struct Context {
    /// Cluster access (trait object for testability)
    pub store: Arc<dyn ClusterStore>,
    /// Plugins known to this controller
    pub registry: PluginRegistry,
    /// Translation settings
    pub config: TranslationConfig,
    /// Requeue timing
    pub requeue: RequeueSettings,
    pass_lock: Mutex<()>,
}

impl Context {
    /// Create a context
    pub fn new(
        store: Arc<dyn ClusterStore>,
        registry: PluginRegistry,
        config: TranslationConfig,
        requeue: RequeueSettings,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            requeue,
            pass_lock: Mutex::new(()),
        }
    }
}

/// What one pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// EnvoyFilters applied
    pub applied: usize,
    /// Stale EnvoyFilters deleted
    pub deleted: usize,
    /// Status subresources written
    pub statuses_written: usize,
}

// =============================================================================
// Reconcilers
// =============================================================================

/// Reconcile after a filter policy changed
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any()))]
pub async fn reconcile_policy(
    policy: Arc<HttpFilterPolicy>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    run_pass(&ctx).await?;
    Ok(Action::requeue(ctx.requeue.success))
}

/// Reconcile after a consumer changed
#[instrument(skip(consumer, ctx), fields(consumer = %consumer.name_any()))]
pub async fn reconcile_consumer(
    consumer: Arc<Consumer>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    run_pass(&ctx).await?;
    Ok(Action::requeue(ctx.requeue.success))
}

/// Requeue a failed reconcile
pub fn error_policy<K>(obj: Arc<K>, error: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    error!(
        ?error,
        object = %obj.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue.error)
}

// =============================================================================
// Pass
// =============================================================================

/// Run one full pass against the cluster
pub async fn run_pass(ctx: &Context) -> Result<PassSummary, ReconcileError> {
    let _guard = ctx.pass_lock.lock().await;
    let store = ctx.store.as_ref();
    let namespace = ctx.config.root_namespace.as_str();

    let snapshot = Snapshot {
        gateways: store.list_gateways().await?,
        routes: store.list_routes().await?,
        policies: store.list_policies().await?,
        consumers: store.list_consumers().await?,
        previous_consumer_filter: store
            .get_envoy_filter(namespace, &ctx.config.consumer_filter_name)
            .await?,
    };
    let output = translate(&snapshot, &ctx.registry, &ctx.config)?;

    let filters: Vec<EnvoyFilter> = output.all_filters().cloned().collect();
    let applied = store.apply_filters(&filters).await?;

    let existing = store.list_managed_filters(namespace).await?;
    let stale = stale_filters(&existing, &filters);
    for name in &stale {
        info!(name = %name, namespace, "deleting stale envoy filter");
        store.delete_filter(namespace, name).await?;
    }

    let mut statuses_written = 0;
    let mut failed = Vec::new();
    for policy in &snapshot.policies {
        let conditions = policy
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        let Some(condition) = outcome_condition(policy, &output.policy_status, conditions) else {
            continue;
        };
        let status = HttpFilterPolicyStatus {
            conditions: vec![condition],
        };
        let (ns, name) = (policy.namespace().unwrap_or_default(), policy.name_any());
        match store.patch_policy_status(&ns, &name, &status).await {
            Ok(()) => statuses_written += 1,
            Err(e) => {
                warn!(error = %e, policy = %name, namespace = %ns, "failed to write policy status");
                failed.push(e);
            }
        }
    }
    for consumer in &snapshot.consumers {
        let conditions = consumer
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        let Some(condition) = outcome_condition(consumer, &output.consumer_status, conditions) else {
            continue;
        };
        let status = ConsumerStatus {
            conditions: vec![condition],
        };
        let (ns, name) = (consumer.namespace().unwrap_or_default(), consumer.name_any());
        match store.patch_consumer_status(&ns, &name, &status).await {
            Ok(()) => statuses_written += 1,
            Err(e) => {
                warn!(error = %e, consumer = %name, namespace = %ns, "failed to write consumer status");
                failed.push(e);
            }
        }
    }

    let total = failed.len();
    if let Some(first) = failed.into_iter().next() {
        return Err(ReconcileError::StatusWrite {
            failed: total,
            written: statuses_written,
            first,
        });
    }

    let summary = PassSummary {
        applied,
        deleted: stale.len(),
        statuses_written,
    };
    debug!(?summary, "pass complete");
    Ok(summary)
}

/// Condition to write for one object, or `None` when nothing changed
fn outcome_condition<K: Resource>(
    obj: &K,
    outcomes: &BTreeMap<NamespacedName, ObjectStatus>,
    current: &[Condition],
) -> Option<Condition> {
    let id = NamespacedName::new(obj.namespace().unwrap_or_default(), obj.name_any());
    let outcome = outcomes.get(&id)?;
    next_condition(current, outcome, obj.meta().generation)
}

/// Managed filters that the current pass no longer generates
pub fn stale_filters(existing: &[String], generated: &[EnvoyFilter]) -> Vec<String> {
    let keep: BTreeSet<&str> = generated
        .iter()
        .map(|f| f.metadata.name.as_str())
        .collect();
    let mut stale: Vec<String> = existing
        .iter()
        .filter(|name| !keep.contains(name.as_str()))
        .cloned()
        .collect();
    stale.sort();
    stale.dedup();
    stale
}

/// The `Accepted` condition to write, or `None` if `current` already says it
///
/// The transition time only moves when the condition status flips.
pub fn next_condition(
    current: &[Condition],
    outcome: &ObjectStatus,
    observed_generation: Option<i64>,
) -> Option<Condition> {
    let desired = outcome.to_condition(observed_generation);
    match current.iter().find(|c| c.type_ == CONDITION_ACCEPTED) {
        Some(existing) if existing.same_state(&desired) => None,
        Some(existing) if existing.status == desired.status => Some(Condition {
            last_transition_time: existing.last_transition_time,
            ..desired
        }),
        _ => Some(desired),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MockClusterStore;
    use meshfilter_common::crd::ConditionStatus;
    use meshfilter_common::kube_utils::ObjectMeta;
    use meshfilter_common::network::gateway_api::{Gateway, GatewayListener, GatewaySpec};
    use meshfilter_translation::InvalidReason;
    use serde_json::json;

    fn gateway() -> Gateway {
        Gateway::new(
            ObjectMeta::bare("ingress", "default"),
            GatewaySpec {
                gateway_class_name: "istio".to_string(),
                listeners: vec![GatewayListener::http("http", 80)],
            },
        )
    }

    fn policy(conditions: serde_json::Value) -> HttpFilterPolicy {
        named_policy("demo", conditions)
    }

    fn named_policy(name: &str, conditions: serde_json::Value) -> HttpFilterPolicy {
        serde_json::from_value(json!({
            "apiVersion": "meshfilter.dev/v1alpha1",
            "kind": "HTTPFilterPolicy",
            "metadata": { "name": name, "namespace": "default", "generation": 3 },
            "spec": {
                "targetRef": { "group": "gateway.networking.k8s.io", "kind": "Gateway", "name": "ingress" },
                "filters": { "demo": { "config": { "host_name": "rick" } } }
            },
            "status": { "conditions": conditions }
        }))
        .unwrap()
    }

    fn consumer(conditions: serde_json::Value) -> Consumer {
        serde_json::from_value(json!({
            "apiVersion": "meshfilter.dev/v1alpha1",
            "kind": "Consumer",
            "metadata": { "name": "rick", "namespace": "default", "generation": 1 },
            "spec": { "auth": { "key_auth": { "config": { "key": "rick" } } } },
            "status": { "conditions": conditions }
        }))
        .unwrap()
    }

    fn accepted_condition(generation: i64) -> serde_json::Value {
        json!([{
            "type": "Accepted",
            "status": "True",
            "reason": "Accepted",
            "message": "The resource has been accepted",
            "observedGeneration": generation,
            "lastTransitionTime": "2024-01-01T00:00:00Z"
        }])
    }

    fn context(store: MockClusterStore) -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(store),
            PluginRegistry::with_builtin(),
            TranslationConfig::default(),
            RequeueSettings::default(),
        ))
    }

    /// Store holding one gateway, one policy and one consumer whose status is current
    fn populated_store(policy_conditions: serde_json::Value) -> MockClusterStore {
        let mut store = MockClusterStore::new();
        store
            .expect_list_gateways()
            .returning(|| Ok(vec![gateway()]));
        store.expect_list_routes().returning(|| Ok(vec![]));
        store
            .expect_list_policies()
            .returning(move || Ok(vec![policy(policy_conditions.clone())]));
        store
            .expect_list_consumers()
            .returning(|| Ok(vec![consumer(accepted_condition(1))]));
        store
            .expect_get_envoy_filter()
            .withf(|ns, name| ns == "istio-system" && name == "meshfilter-consumer")
            .returning(|_, _| Ok(None));
        store
            .expect_apply_filters()
            .returning(|filters| Ok(filters.len()));
        store
    }

    #[tokio::test]
    async fn pass_applies_prunes_and_writes_changed_status() {
        let mut store = populated_store(json!([]));
        store.expect_list_managed_filters().returning(|_| {
            Ok(vec![
                "meshfilter-consumer".to_string(),
                "meshfilter-gw-stale".to_string(),
            ])
        });
        store
            .expect_delete_filter()
            .withf(|ns, name| ns == "istio-system" && name == "meshfilter-gw-stale")
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_patch_policy_status()
            .withf(|ns, name, status| {
                ns == "default"
                    && name == "demo"
                    && status.conditions.len() == 1
                    && status.conditions[0].status == ConditionStatus::True
                    && status.conditions[0].observed_generation == Some(3)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store.expect_patch_consumer_status().times(0);

        let summary = run_pass(&context(store)).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.statuses_written, 1);
        // gateway filter plus consumer aggregate
        assert_eq!(summary.applied, 2);
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let mut store = populated_store(accepted_condition(3));
        store
            .expect_list_managed_filters()
            .returning(|_| Ok(vec![]));
        store.expect_delete_filter().times(0);
        store.expect_patch_policy_status().times(0);
        store.expect_patch_consumer_status().times(0);

        let summary = run_pass(&context(store)).await.unwrap();
        assert_eq!(summary.statuses_written, 0);
    }

    #[tokio::test]
    async fn failed_status_write_does_not_skip_later_objects() {
        let mut store = MockClusterStore::new();
        store
            .expect_list_gateways()
            .returning(|| Ok(vec![gateway()]));
        store.expect_list_routes().returning(|| Ok(vec![]));
        store.expect_list_policies().returning(|| {
            Ok(vec![
                named_policy("demo", json!([])),
                named_policy("other", json!([])),
            ])
        });
        store
            .expect_list_consumers()
            .returning(|| Ok(vec![consumer(json!([]))]));
        store.expect_get_envoy_filter().returning(|_, _| Ok(None));
        store
            .expect_apply_filters()
            .returning(|filters| Ok(filters.len()));
        store
            .expect_list_managed_filters()
            .returning(|_| Ok(vec![]));
        store
            .expect_patch_policy_status()
            .withf(|_, name, _| name == "demo")
            .times(1)
            .returning(|_, _, _| Err(meshfilter_common::Error::internal("policy deleted")));
        store
            .expect_patch_policy_status()
            .withf(|_, name, _| name == "other")
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_patch_consumer_status()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let err = run_pass(&context(store)).await.unwrap_err();
        match &err {
            ReconcileError::StatusWrite { failed, written, .. } => {
                assert_eq!(*failed, 1);
                assert_eq!(*written, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert!(err.to_string().contains("policy deleted"));
    }

    #[tokio::test]
    async fn reconcile_requeues_after_success_interval() {
        let mut store = populated_store(accepted_condition(3));
        store
            .expect_list_managed_filters()
            .returning(|_| Ok(vec![]));

        let action = reconcile_policy(Arc::new(policy(json!([]))), context(store))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn store_failure_aborts_the_pass() {
        let mut store = MockClusterStore::new();
        store
            .expect_list_gateways()
            .returning(|| Err(meshfilter_common::Error::internal("list truncated")));
        store.expect_apply_filters().times(0);

        let ctx = context(store);
        let err = reconcile_consumer(Arc::new(consumer(json!([]))), ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Store(_)));

        let action = error_policy(Arc::new(consumer(json!([]))), &err, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn duplicate_gateways_abort_before_any_write() {
        let mut store = MockClusterStore::new();
        store
            .expect_list_gateways()
            .returning(|| Ok(vec![gateway(), gateway()]));
        store.expect_list_routes().returning(|| Ok(vec![]));
        store.expect_list_policies().returning(|| Ok(vec![]));
        store.expect_list_consumers().returning(|| Ok(vec![]));
        store.expect_get_envoy_filter().returning(|_, _| Ok(None));
        store.expect_apply_filters().times(0);

        let err = run_pass(&context(store)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Translation(_)));
    }

    #[test]
    fn stale_filters_excludes_generated_names() {
        let generated = vec![EnvoyFilter::new(
            ObjectMeta::new("meshfilter-consumer", "istio-system"),
            Default::default(),
        )];
        let existing = vec![
            "meshfilter-host-b".to_string(),
            "meshfilter-consumer".to_string(),
            "meshfilter-host-a".to_string(),
        ];
        assert_eq!(
            stale_filters(&existing, &generated),
            vec!["meshfilter-host-a".to_string(), "meshfilter-host-b".to_string()]
        );
    }

    #[test]
    fn next_condition_skips_identical_state() {
        let current: Vec<Condition> =
            serde_json::from_value(accepted_condition(3)).unwrap();
        assert!(next_condition(&current, &ObjectStatus::Accepted, Some(3)).is_none());
    }

    #[test]
    fn next_condition_keeps_transition_time_when_status_holds() {
        let current: Vec<Condition> =
            serde_json::from_value(accepted_condition(3)).unwrap();
        let next = next_condition(&current, &ObjectStatus::Accepted, Some(4)).unwrap();
        assert_eq!(next.observed_generation, Some(4));
        assert_eq!(next.last_transition_time, current[0].last_transition_time);
    }

    #[test]
    fn next_condition_moves_transition_time_on_flip() {
        let current: Vec<Condition> =
            serde_json::from_value(accepted_condition(3)).unwrap();
        let outcome = ObjectStatus::invalid(InvalidReason::TargetNotFound, "gateway gone");
        let next = next_condition(&current, &outcome, Some(3)).unwrap();
        assert_eq!(next.status, ConditionStatus::False);
        assert_eq!(next.reason, "TargetNotFound");
        assert_ne!(next.last_transition_time, current[0].last_transition_time);
    }

    #[test]
    fn next_condition_without_history_writes_desired() {
        let next = next_condition(&[], &ObjectStatus::Accepted, None).unwrap();
        assert_eq!(next.type_, CONDITION_ACCEPTED);
    }
}

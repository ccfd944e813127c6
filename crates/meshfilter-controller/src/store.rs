//! Cluster access for the reconcile pass
//!
//! [`ClusterStore`] is the only seam between the controller and the API
//! server, so a pass can be exercised against a mock in unit tests.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use meshfilter_common::crd::{Consumer, ConsumerStatus, HttpFilterPolicy, HttpFilterPolicyStatus};
use meshfilter_common::kube_utils::{patch_resource_status, ApplyBatch, HasApiResource};
use meshfilter_common::network::gateway_api::{Gateway, HttpRoute};
use meshfilter_common::policy::EnvoyFilter;
use meshfilter_common::{Error, MANAGED_BY_SELECTOR};

use crate::FIELD_MANAGER;

/// Reads the snapshot inputs and writes generated resources and statuses
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// All Gateway API gateways
    async fn list_gateways(&self) -> Result<Vec<Gateway>, Error>;

    /// All Gateway API HTTP routes
    async fn list_routes(&self) -> Result<Vec<HttpRoute>, Error>;

    /// All filter policies
    async fn list_policies(&self) -> Result<Vec<HttpFilterPolicy>, Error>;

    /// All consumers
    async fn list_consumers(&self) -> Result<Vec<Consumer>, Error>;

    /// One EnvoyFilter, if it exists
    async fn get_envoy_filter(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EnvoyFilter>, Error>;

    /// Names of the EnvoyFilters in `namespace` that meshfilter manages
    async fn list_managed_filters(&self, namespace: &str) -> Result<Vec<String>, Error>;

    /// Server-side apply every filter, returning the number applied
    async fn apply_filters(&self, filters: &[EnvoyFilter]) -> Result<usize, Error>;

    /// Delete one EnvoyFilter; a missing filter is not an error
    async fn delete_filter(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Replace the status of a filter policy
    async fn patch_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HttpFilterPolicyStatus,
    ) -> Result<(), Error>;

    /// Replace the status of a consumer
    async fn patch_consumer_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ConsumerStatus,
    ) -> Result<(), Error>;
}

/// [`ClusterStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List a resource through the dynamic API and decode it into `T`
    ///
    /// A missing API (Gateway API CRDs not installed) yields an empty list.
    async fn list_dynamic<T>(&self) -> Result<Vec<T>, Error>
    where
        T: HasApiResource + DeserializeOwned,
    {
        let ar = T::api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                warn!(kind = %ar.kind, "resource type not served, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        list.items.iter().map(decode_dynamic).collect()
    }

    fn envoy_filters(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &EnvoyFilter::api_resource(),
        )
    }
}

fn decode_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T, Error> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_gateways(&self) -> Result<Vec<Gateway>, Error> {
        self.list_dynamic().await
    }

    async fn list_routes(&self) -> Result<Vec<HttpRoute>, Error> {
        self.list_dynamic().await
    }

    async fn list_policies(&self) -> Result<Vec<HttpFilterPolicy>, Error> {
        let api: Api<HttpFilterPolicy> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_consumers(&self) -> Result<Vec<Consumer>, Error> {
        let api: Api<Consumer> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_envoy_filter(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EnvoyFilter>, Error> {
        match self.envoy_filters(namespace).get_opt(name).await? {
            Some(obj) => decode_dynamic(&obj).map(Some),
            None => Ok(None),
        }
    }

    async fn list_managed_filters(&self, namespace: &str) -> Result<Vec<String>, Error> {
        let list = self
            .envoy_filters(namespace)
            .list(&ListParams::default().labels(MANAGED_BY_SELECTOR))
            .await?;
        Ok(list.items.iter().map(|obj| obj.name_any()).collect())
    }

    async fn apply_filters(&self, filters: &[EnvoyFilter]) -> Result<usize, Error> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let ar = EnvoyFilter::api_resource();
        let mut batch = ApplyBatch::new(self.client.clone(), &params);
        for filter in filters {
            batch.push(&filter.metadata.namespace, &filter.metadata.name, filter, &ar)?;
        }
        batch.run("envoyfilters").await
    }

    async fn delete_filter(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .envoy_filters(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name, namespace, "envoy filter already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HttpFilterPolicyStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<HttpFilterPolicy>(
            &self.client,
            name,
            namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }

    async fn patch_consumer_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ConsumerStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<Consumer>(&self.client, name, namespace, status, FIELD_MANAGER)
            .await?;
        Ok(())
    }
}

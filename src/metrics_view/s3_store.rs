use crate::config::S3Config;
use crate::metrics_view::{MetricsViewSchema, MetricsViewStore, MetricsViewStoreError};
use async_trait::async_trait;
use aws_sdk_s3::{config::BehaviorVersion, Client};
use log::debug;
use std::collections::BTreeMap;

/// Metrics views stored as `<tenant>/<name>.json` objects in an S3 bucket.
///
/// Objects are fetched on every lookup so that a newer schema version is
/// picked up by the next resolution.
pub struct S3MetricsViewStore {
    tenant: String,
    s3_client: Client,
    bucket_name: String,
}

impl S3MetricsViewStore {
    pub async fn new(config: S3Config) -> Self {
        let shared_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let s3_client = Client::new(&shared_config);
        S3MetricsViewStore {
            tenant: config.tenant,
            s3_client,
            bucket_name: config.bucket_name,
        }
    }

    async fn get_object_content(&self, name: &str) -> Result<String, MetricsViewStoreError> {
        let key = object_key(&self.tenant, name);
        debug!("Fetching s3://{}/{}", self.bucket_name, key);
        let result = self
            .s3_client
            .get_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    MetricsViewStoreError::MetricsViewNotFound(name.to_string())
                } else {
                    MetricsViewStoreError::Storage(service_error.to_string())
                }
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| MetricsViewStoreError::Storage(e.to_string()))?;

        String::from_utf8(body.to_vec())
            .map_err(|e| MetricsViewStoreError::InvalidJsonFormat(e.to_string()))
    }

    async fn list_names(&self) -> Result<Vec<String>, MetricsViewStoreError> {
        let prefix = tenant_prefix(&self.tenant);
        let result = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(&prefix)
            .send()
            .await
            .map_err(|e| MetricsViewStoreError::Storage(e.to_string()))?;

        Ok(names_from_keys(
            &prefix,
            result.contents().iter().filter_map(|object| object.key()),
        ))
    }
}

fn tenant_prefix(tenant: &str) -> String {
    format!("{}/", tenant)
}

fn object_key(tenant: &str, name: &str) -> String {
    format!("{}{}.json", tenant_prefix(tenant), name)
}

/// Metrics view names of the `.json` objects directly under `prefix`.
fn names_from_keys<'a>(prefix: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    keys.filter_map(|key| key.strip_prefix(prefix))
        .filter(|key| !key.contains('/'))
        .filter_map(|key| key.strip_suffix(".json"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MetricsViewStore for S3MetricsViewStore {
    async fn get_metrics_view(
        &self,
        name: &str,
    ) -> Result<MetricsViewSchema, MetricsViewStoreError> {
        let json = self.get_object_content(name).await?;
        let schema: MetricsViewSchema = serde_json::from_str(&json)
            .map_err(|e| MetricsViewStoreError::InvalidJsonFormat(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    async fn get_all_metrics_views(
        &self,
    ) -> Result<BTreeMap<String, MetricsViewSchema>, MetricsViewStoreError> {
        let mut metrics_views = BTreeMap::new();
        for name in self.list_names().await? {
            let schema = self.get_metrics_view(&name).await?;
            metrics_views.insert(name, schema);
        }
        Ok(metrics_views)
    }
}

use crate::config::MetricsViewJSONConfig;
use crate::metrics_view::{MetricsViewSchema, MetricsViewStore, MetricsViewStoreError};
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fs;

/// Metrics views loaded once from a JSON file holding an array of schemas.
#[derive(Clone, Debug)]
pub struct LocalMetricsViewStore {
    metrics_views: HashMap<String, MetricsViewSchema>,
}

impl LocalMetricsViewStore {
    pub fn new(config: &MetricsViewJSONConfig) -> Result<Self, MetricsViewStoreError> {
        Self::from_path(&config.json_path)
    }

    pub fn from_path(path: &str) -> Result<Self, MetricsViewStoreError> {
        let content =
            fs::read_to_string(path).map_err(|_| MetricsViewStoreError::FileNotFound(path.to_string()))?;
        debug!("Loading metrics views from {}", path);
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, MetricsViewStoreError> {
        let schemas: Vec<MetricsViewSchema> = serde_json::from_str(json)
            .map_err(|e| MetricsViewStoreError::InvalidJsonFormat(e.to_string()))?;
        Self::from_schemas(schemas)
    }

    pub fn from_schemas(schemas: Vec<MetricsViewSchema>) -> Result<Self, MetricsViewStoreError> {
        let mut metrics_views = HashMap::new();
        for schema in schemas {
            schema.validate()?;
            debug!(
                "Registered metrics view {} ({} dimensions, {} measures)",
                schema.name,
                schema.dimensions.len(),
                schema.measures.len()
            );
            if metrics_views.insert(schema.name.clone(), schema).is_some() {
                return Err(MetricsViewStoreError::InvalidSchema(
                    "duplicate metrics view name".to_string(),
                ));
            }
        }
        Ok(LocalMetricsViewStore { metrics_views })
    }
}

#[async_trait]
impl MetricsViewStore for LocalMetricsViewStore {
    async fn get_metrics_view(
        &self,
        name: &str,
    ) -> Result<MetricsViewSchema, MetricsViewStoreError> {
        self.metrics_views
            .get(name)
            .cloned()
            .ok_or_else(|| MetricsViewStoreError::MetricsViewNotFound(name.to_string()))
    }

    async fn get_all_metrics_views(
        &self,
    ) -> Result<BTreeMap<String, MetricsViewSchema>, MetricsViewStoreError> {
        Ok(self
            .metrics_views
            .iter()
            .map(|(name, schema)| (name.clone(), schema.clone()))
            .collect())
    }
}

//! engine
//! ------
//! Top-level orchestration: resource id + operation spec in, execution
//! result out. The engine owns the cache store, the catalog client and a
//! per-resource schema cache so repeated queries against the same resource
//! skip the schema read.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use polars::prelude::len;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CachedResource, CacheStore};
use crate::catalog::CatalogClient;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::exec::{self, ExecutionResult};
use crate::format::{self, TabularFormat};
use crate::pipeline::{self, OperationSpec};
use crate::schema::{self, TableSchema};

/// Lightweight resource description for callers that want to inspect a
/// resource before querying it.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub resource_id: u64,
    pub format: TabularFormat,
    pub row_count: usize,
    /// `name: dtype` pairs in file order.
    pub schema_description: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_row: Option<serde_json::Value>,
}

pub struct TabularEngine {
    config: EngineConfig,
    cache: CacheStore,
    catalog: CatalogClient,
    http: reqwest::Client,
    schemas: Mutex<HashMap<u64, Arc<TableSchema>>>,
}

impl TabularEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| EngineError::internal(e.to_string()))?;
        let cache = CacheStore::new(&config.cache_dir)?;
        let catalog = CatalogClient::new(config.api_base.clone(), http.clone());
        Ok(Self { config, cache, catalog, http, schemas: Mutex::new(HashMap::new()) })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run an operation spec against a resource and return the shaped
    /// result. Downloads and caches the resource on first touch.
    pub async fn resolve_tabular(
        &self,
        resource_id: u64,
        spec: &OperationSpec,
    ) -> EngineResult<ExecutionResult> {
        let resource = self.cached_resource(resource_id).await?;
        let (lf, schema) = self.open_resource(&resource)?;
        let plan = pipeline::build(spec, &schema.columns)?;
        info!(target: "tabq::engine", resource_id, format = %resource.actual_format,
            "executing query");
        exec::execute(&plan, lf, resource_id)
    }

    /// Row count, schema and a sample row without running a query.
    pub async fn resource_metadata(&self, resource_id: u64) -> EngineResult<ResourceSummary> {
        let resource = self.cached_resource(resource_id).await?;
        let (lf, schema) = self.open_resource(&resource)?;

        let counted = lf
            .clone()
            .select([len()])
            .collect()
            .map_err(|e| EngineError::exec(resource_id, "count".to_string(), e.to_string()))?;
        let row_count = counted
            .column("len")
            .and_then(|c| c.u32())
            .ok()
            .and_then(|c| c.get(0))
            .unwrap_or(0) as usize;

        let head = lf
            .limit(1)
            .collect()
            .map_err(|e| EngineError::exec(resource_id, "sample".to_string(), e.to_string()))?;
        let sample_row = exec::dataframe_to_rows(&head, resource_id)?.into_iter().next();

        Ok(ResourceSummary {
            resource_id,
            format: resource.actual_format,
            row_count,
            schema_description: schema.describe(),
            sample_row,
        })
    }

    /// Locate the resource in the cache, downloading it first if needed.
    async fn cached_resource(&self, resource_id: u64) -> EngineResult<CachedResource> {
        if let Some(local_path) = self.cache.find(resource_id) {
            let declared = declared_from_path(&local_path, resource_id)?;
            let actual = format::sniff(&local_path, declared);
            return Ok(CachedResource {
                resource_id,
                declared_format: declared,
                actual_format: actual,
                local_path,
            });
        }

        let meta = self.catalog.lookup_resource(resource_id).await?;
        match meta.media_type.as_deref() {
            Some("file") => {}
            other => {
                return Err(EngineError::unsupported(
                    resource_id,
                    format!("media_type {:?} is not a downloadable file", other.unwrap_or("none")),
                ));
            }
        }
        let declared = meta
            .format
            .as_deref()
            .and_then(TabularFormat::from_declared)
            .ok_or_else(|| {
                EngineError::unsupported(
                    resource_id,
                    format!(
                        "format {:?} is not supported",
                        meta.format.as_deref().unwrap_or("none")
                    ),
                )
            })?;
        let url = meta.download_url.as_deref().ok_or_else(|| {
            EngineError::transport(resource_id, "resource has no download_url".to_string())
        })?;

        let local_path = self.cache.ensure_cached(&self.http, resource_id, url, declared).await?;
        let actual = format::sniff(&local_path, declared);
        debug!(target: "tabq::engine", resource_id, declared = %declared, actual = %actual,
            "resource cached");
        Ok(CachedResource { resource_id, declared_format: declared, actual_format: actual, local_path })
    }

    fn open_resource(
        &self,
        resource: &CachedResource,
    ) -> EngineResult<(polars::prelude::LazyFrame, Arc<TableSchema>)> {
        let schema = self.schema_for(resource)?;
        let lf = schema::open_lazy(
            &resource.local_path,
            resource.actual_format,
            schema.separator,
            resource.resource_id,
        )?;
        Ok((lf, schema))
    }

    // the guard is held across resolution so a resource is resolved at most
    // once even under concurrent first queries
    fn schema_for(&self, resource: &CachedResource) -> EngineResult<Arc<TableSchema>> {
        let mut schemas = self.schemas.lock();
        if let Some(s) = schemas.get(&resource.resource_id) {
            return Ok(s.clone());
        }
        let schema = Arc::new(schema::resolve_schema(
            &resource.local_path,
            resource.actual_format,
            resource.resource_id,
        )?);
        schemas.insert(resource.resource_id, schema.clone());
        Ok(schema)
    }
}

fn declared_from_path(path: &std::path::Path, resource_id: u64) -> EngineResult<TabularFormat> {
    TabularFormat::from_path(path).ok_or_else(|| {
        EngineError::unsupported(
            resource_id,
            format!("cached file {} has an unsupported suffix", path.display()),
        )
    })
}

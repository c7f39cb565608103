// src/exec/registry.rs

//! Content type → executor routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::content_type::ContentType;
use crate::errors::ExecError;
use crate::exec::{ExecRequest, ExecResponse, Executor};

/// Maps every declared content type to the executor serving it.
///
/// Built once, then shared read-only (`Arc<Registry>`) by concurrent workers.
#[derive(Default)]
pub struct Registry {
    by_type: BTreeMap<ContentType, Arc<dyn Executor>>,
    executors: Vec<Arc<dyn Executor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` under each of its content types.
    ///
    /// Fails without registering anything if one of them is already claimed.
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> Result<(), ExecError> {
        if let Some(taken) = executor
            .content_types()
            .iter()
            .find(|ct| self.by_type.contains_key(*ct))
        {
            return Err(ExecError::DuplicateContentType(taken.to_string()));
        }

        for ct in executor.content_types() {
            debug!(executor = %executor.name(), content_type = %ct, "registering executor");
            self.by_type.insert(ct.clone(), Arc::clone(&executor));
        }
        self.executors.push(executor);
        Ok(())
    }

    /// Exact match first, else the most specific registered ancestor.
    pub fn get(&self, content_type: &ContentType) -> Result<Arc<dyn Executor>, ExecError> {
        if let Some(exec) = self.by_type.get(content_type) {
            return Ok(Arc::clone(exec));
        }

        self.by_type
            .iter()
            .filter(|(registered, _)| registered.is_ancestor_of(content_type, None))
            .max_by_key(|(registered, _)| registered.params().len())
            .map(|(_, exec)| Arc::clone(exec))
            .ok_or_else(|| ExecError::NoExecutor(content_type.to_string()))
    }

    /// Resolve and run `request`. Lookup failures come back as a response
    /// carrying the error; no executor is touched.
    pub async fn dispatch(&self, cancel: CancellationToken, request: ExecRequest) -> ExecResponse {
        match self.get(&request.content_type) {
            Ok(executor) => {
                debug!(
                    executor = %executor.name(),
                    content_type = %request.content_type,
                    request_id = %request.header.request_id,
                    "dispatching request"
                );
                executor.execute(cancel, request).await
            }
            Err(err) => ExecResponse::failed(request.header, err),
        }
    }

    /// Registered executors in registration order.
    pub fn executors(&self) -> &[Arc<dyn Executor>] {
        &self.executors
    }

    pub fn content_types(&self) -> impl Iterator<Item = &ContentType> {
        self.by_type.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Clean up every executor.
    pub async fn shutdown(&self) {
        for executor in &self.executors {
            executor.cleanup().await;
        }
        info!(executors = self.executors.len(), "registry shut down");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_type.iter().map(|(ct, e)| (ct.to_string(), e.name().to_string())))
            .finish()
    }
}

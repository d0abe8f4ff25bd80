//! Query-time hierarchy lookup
//!
//! [`HierarchyAssembler`] reads one materialized node and batch-fetches its
//! ancestors and direct reports to render a nested tree. When a node has not
//! been materialized yet, [`HierarchyService`] can fall back to
//! [`LiveResolver`], which walks the source index directly.

pub mod live;
pub mod tree;

pub use live::LiveResolver;
pub use tree::{build_tree, Profile, TreeNode};

use crate::config::{FieldNames, OrgtreeConfig};
use crate::record::HierarchyNode;
use crate::store::{DocumentStore, StoreError, StoredDocument};
use orgtree_algorithms::normalize_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Lookup errors
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// No node exists for the requested id
    #[error("Employee not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A stored node could not be parsed
    #[error("Corrupt hierarchy node {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Where a view was assembled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    /// The materialized target index
    Materialized,
    /// A live walk of the source index
    Live,
}

/// Everything known about one employee's position in the organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyView {
    pub employee: Profile,
    /// The employee's materialized node
    pub node: HierarchyNode,
    pub hierarchy_tree: TreeNode,
    /// Root-first chain ending with the employee
    pub management_chain: Vec<String>,
    pub direct_reports: Vec<String>,
    /// Ids referenced by the node but absent from the store
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing: Vec<String>,
    pub source: ViewSource,
}

impl HierarchyView {
    /// Assemble a view from a node and the profiles fetched for it
    pub(crate) fn assemble(
        id: &str,
        node: HierarchyNode,
        fields: &FieldNames,
        profiles: &HashMap<String, Profile>,
        source: ViewSource,
    ) -> Self {
        let employee = Profile::from_node(id, &node, fields);
        let (hierarchy_tree, missing) =
            build_tree(&node.management_chain, employee.clone(), &node.reports, profiles);
        Self {
            employee,
            hierarchy_tree,
            management_chain: node.management_chain.clone(),
            direct_reports: node.reports.clone(),
            missing,
            node,
            source,
        }
    }
}

/// Renders hierarchies from the materialized index
#[derive(Clone)]
pub struct HierarchyAssembler {
    store: Arc<dyn DocumentStore>,
    index: String,
    fields: FieldNames,
}

impl HierarchyAssembler {
    pub fn new(store: Arc<dyn DocumentStore>, index: impl Into<String>, fields: FieldNames) -> Self {
        Self {
            store,
            index: index.into(),
            fields,
        }
    }

    /// Look up one employee and assemble its view.
    ///
    /// Ancestors or reports missing from the index are skipped with a warning;
    /// a missing target is [`HierarchyError::NotFound`].
    pub async fn assemble(&self, employee_id: &str) -> HierarchyResult<HierarchyView> {
        let id = normalize_id(employee_id)
            .ok_or_else(|| HierarchyError::NotFound(employee_id.to_string()))?;
        let doc = self
            .store
            .get(&self.index, &id)
            .await?
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;
        let node = HierarchyNode::from_document(&doc).map_err(|e| HierarchyError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        let ancestors: Vec<String> = node
            .management_chain
            .iter()
            .filter(|ancestor| **ancestor != id)
            .cloned()
            .collect();
        let (ancestor_docs, report_docs) = futures::try_join!(
            self.fetch(&ancestors),
            self.fetch(&node.reports)
        )?;
        debug!(
            "Assembling {}: {}/{} ancestor(s), {}/{} report(s)",
            id,
            ancestor_docs.len(),
            ancestors.len(),
            report_docs.len(),
            node.reports.len()
        );

        let profiles: HashMap<String, Profile> = ancestor_docs
            .into_iter()
            .chain(report_docs)
            .filter_map(|(key, doc)| self.profile(&key, &doc).map(|p| (key, p)))
            .collect();
        Ok(HierarchyView::assemble(
            &id,
            node,
            &self.fields,
            &profiles,
            ViewSource::Materialized,
        ))
    }

    async fn fetch(&self, ids: &[String]) -> HierarchyResult<HashMap<String, StoredDocument>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.store.multi_get(&self.index, ids).await?)
    }

    fn profile(&self, id: &str, doc: &StoredDocument) -> Option<Profile> {
        match HierarchyNode::from_document(doc) {
            Ok(node) => Some(Profile::from_node(id, &node, &self.fields)),
            Err(e) => {
                warn!("Ignoring unreadable node {}: {}", id, e);
                None
            }
        }
    }
}

/// Hierarchy lookup with optional fallback to the source index
#[derive(Clone)]
pub struct HierarchyService {
    assembler: HierarchyAssembler,
    live: Option<LiveResolver>,
}

impl HierarchyService {
    pub fn new(assembler: HierarchyAssembler, live: Option<LiveResolver>) -> Self {
        Self { assembler, live }
    }

    /// Build the service described by `config`
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &OrgtreeConfig) -> Self {
        let assembler = HierarchyAssembler::new(
            Arc::clone(&store),
            config.target_index.clone(),
            config.fields.clone(),
        );
        let live = config.lookup.fallback_to_source.then(|| {
            LiveResolver::new(
                store,
                config.source_index.clone(),
                config.fields.clone(),
                config.pipeline.max_chain_depth,
            )
        });
        Self::new(assembler, live)
    }

    /// Materialized view when available, otherwise a live walk if enabled
    pub async fn get_hierarchy(&self, employee_id: &str) -> HierarchyResult<HierarchyView> {
        match self.assembler.assemble(employee_id).await {
            Err(HierarchyError::NotFound(id)) => match &self.live {
                Some(live) => {
                    debug!("{} not materialized; resolving from source", id);
                    live.resolve(&id).await
                }
                None => Err(HierarchyError::NotFound(id)),
            },
            other => other,
        }
    }

    /// Whether the backing store answers
    pub async fn ping(&self) -> HierarchyResult<()> {
        Ok(self.assembler.store.ping().await?)
    }
}

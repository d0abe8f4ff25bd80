//! Live chain resolution against the source index
//!
//! Used for employees the pipeline has not materialized yet. The walk issues
//! one term query per level, so it is only suitable for single lookups.

use super::{HierarchyError, HierarchyResult, HierarchyView, Profile, ViewSource};
use crate::config::FieldNames;
use crate::record::{EmployeeRecord, HierarchyNode};
use crate::store::DocumentStore;
use orgtree_algorithms::normalize_id;
use rustc_hash::FxHashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Upper bound on direct reports fetched for one employee
const REPORT_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct LiveResolver {
    store: Arc<dyn DocumentStore>,
    index: String,
    fields: FieldNames,
    max_depth: usize,
}

impl LiveResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: impl Into<String>,
        fields: FieldNames,
        max_depth: usize,
    ) -> Self {
        Self {
            store,
            index: index.into(),
            fields,
            max_depth: max_depth.max(1),
        }
    }

    async fn find(&self, id: &str) -> HierarchyResult<Option<EmployeeRecord>> {
        let hits = self.store.term_query(&self.index, &self.fields.id, id, 1).await?;
        Ok(hits
            .first()
            .and_then(|doc| EmployeeRecord::from_document(doc, &self.fields).ok()))
    }

    /// Walk the source index upward from `employee_id`
    pub async fn resolve(&self, employee_id: &str) -> HierarchyResult<HierarchyView> {
        let id = normalize_id(employee_id)
            .ok_or_else(|| HierarchyError::NotFound(employee_id.to_string()))?;
        let target = self
            .find(&id)
            .await?
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;

        let mut profiles = HashMap::new();
        let mut chain = vec![target.id.clone()];
        let mut visited: FxHashSet<String> = FxHashSet::default();
        visited.insert(target.id.clone());

        let mut next = target.manager_id.clone();
        while let Some(manager) = next.take() {
            if !visited.insert(manager.clone()) {
                warn!("Cycle at {} while resolving {}", manager, id);
                break;
            }
            if chain.len() >= self.max_depth {
                warn!("Chain of {} cut at depth {}", id, self.max_depth);
                break;
            }
            let Some(record) = self.find(&manager).await? else {
                warn!("Manager {} of {} not found", manager, chain[chain.len() - 1]);
                break;
            };
            chain.push(record.id.clone());
            next = record.manager_id.clone();
            profiles.insert(record.id.clone(), Profile::from_record(&record));
        }
        chain.reverse();

        let mut reports = Vec::new();
        for doc in self
            .store
            .term_query(&self.index, &self.fields.manager, &target.id, REPORT_LIMIT)
            .await?
        {
            if let Ok(record) = EmployeeRecord::from_document(&doc, &self.fields) {
                if record.id != target.id {
                    profiles.insert(record.id.clone(), Profile::from_record(&record));
                    reports.push(record.id);
                }
            }
        }

        let node = HierarchyNode::materialize(&target, chain, reports);
        Ok(HierarchyView::assemble(
            &target.id,
            node,
            &self.fields,
            &profiles,
            ViewSource::Live,
        ))
    }
}

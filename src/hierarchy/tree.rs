//! Nested tree rendering of one employee's hierarchy

use crate::config::FieldNames;
use crate::record::{EmployeeRecord, HierarchyNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Display fields of one employee
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Profile {
    pub fn from_node(id: &str, node: &HierarchyNode, fields: &FieldNames) -> Self {
        Self {
            id: id.to_string(),
            name: node.attribute_text(&fields.name),
            title: node.attribute_text(&fields.title),
            department: node.attribute_text(&fields.department),
            email: node.attribute_text(&fields.email),
        }
    }

    pub fn from_record(record: &EmployeeRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            title: record.title.clone(),
            department: record.department.clone(),
            email: record.email.clone(),
        }
    }

    fn into_tree(self, level: usize, is_target: bool, reports: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            profile: self,
            level,
            is_target,
            reports,
        }
    }
}

/// One level of the rendered tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub profile: Profile,
    /// Position in the management chain (0 = root)
    pub level: usize,
    /// Whether this is the employee the tree was built for
    pub is_target: bool,
    pub reports: Vec<TreeNode>,
}

impl TreeNode {
    /// Depth-first search by employee id
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.profile.id == id {
            return Some(self);
        }
        self.reports.iter().find_map(|child| child.find(id))
    }

    /// Number of nodes in the tree
    pub fn size(&self) -> usize {
        1 + self.reports.iter().map(TreeNode::size).sum::<usize>()
    }
}

/// Nest `chain` root-first around the target, with its reports as leaves.
///
/// `chain` ends with the target's id. Ancestors and reports missing from
/// `profiles` are skipped and their ids returned; the levels of the
/// remaining nodes keep their chain positions.
pub fn build_tree(
    chain: &[String],
    target: Profile,
    reports: &[String],
    profiles: &HashMap<String, Profile>,
) -> (TreeNode, Vec<String>) {
    let mut missing = Vec::new();
    let level = chain.len().saturating_sub(1);

    let children = reports
        .iter()
        .filter_map(|id| match profiles.get(id) {
            Some(profile) => Some(profile.clone().into_tree(level + 1, false, Vec::new())),
            None => {
                warn!("Direct report {} of {} not found; skipping", id, target.id);
                missing.push(id.clone());
                None
            }
        })
        .collect();

    let mut tree = target.into_tree(level, true, children);
    for (level, id) in chain.iter().enumerate().take(level).rev() {
        match profiles.get(id) {
            Some(profile) => tree = profile.clone().into_tree(level, false, vec![tree]),
            None => {
                warn!("Ancestor {} not found; skipping", id);
                missing.push(id.clone());
            }
        }
    }
    (tree, missing)
}

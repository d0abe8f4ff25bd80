//! Management chain resolution
//!
//! Walks the employee→manager map upward to produce the root-first chain of
//! identifiers ending at the employee. The walk is iterative and bounded by a
//! configurable maximum depth; revisiting an identifier already on the
//! partial chain is reported as a cycle instead of looping forever.

use crate::maps::RelationshipMaps;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Default safety bound on chain length (number of identifiers, employee included)
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// How a chain walk terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// Reached an employee without a manager
    Complete,
    /// The walk came back to an identifier already on the chain
    Cycle { revisited: String },
    /// The chain hit the depth bound before reaching a root
    DepthExceeded,
    /// The next manager is not a known employee; the last resolvable
    /// ancestor is treated as the effective root
    Dangling { missing_manager: String },
    /// The employee itself was not seen during the relationship pass
    Unmapped,
}

/// Resolved management chain of one employee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// Employee the chain was resolved for
    pub employee_id: String,
    /// Root-first identifiers; the last element is always `employee_id`
    pub ids: Vec<String>,
    /// Termination reason
    pub outcome: ChainOutcome,
}

impl Chain {
    /// Whether the walk stopped on a cycle or on the depth bound
    pub fn is_cycle_affected(&self) -> bool {
        matches!(
            self.outcome,
            ChainOutcome::Cycle { .. } | ChainOutcome::DepthExceeded
        )
    }

    /// Whether the employee itself sits on the detected cycle
    pub fn is_on_cycle(&self) -> bool {
        matches!(&self.outcome, ChainOutcome::Cycle { revisited } if *revisited == self.employee_id)
    }

    /// Depth of the employee (0 for a root)
    pub fn depth(&self) -> usize {
        self.ids.len().saturating_sub(1)
    }
}

/// Resolves management chains against a finished set of relationship maps
#[derive(Debug, Clone, Copy)]
pub struct ChainResolver<'a> {
    maps: &'a RelationshipMaps,
    max_depth: usize,
}

impl<'a> ChainResolver<'a> {
    /// Create a resolver; `max_depth` below 1 is raised to 1
    pub fn new(maps: &'a RelationshipMaps, max_depth: usize) -> Self {
        Self {
            maps,
            max_depth: max_depth.max(1),
        }
    }

    /// Maximum chain length this resolver produces
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Maps this resolver walks
    pub fn maps(&self) -> &'a RelationshipMaps {
        self.maps
    }

    /// Resolve the chain of a single employee
    pub fn resolve(&self, employee_id: &str) -> Chain {
        let (mut ids, outcome) = walk(self.maps, employee_id, self.max_depth);
        ids.reverse();
        Chain {
            employee_id: employee_id.to_string(),
            ids: ids.into_iter().map(str::to_string).collect(),
            outcome,
        }
    }

    /// Resolve every employee in the maps in parallel.
    ///
    /// The maps are shared read-only between workers. Output is sorted by
    /// employee id so repeated runs yield the same order.
    pub fn resolve_all(&self) -> Vec<Chain> {
        let employees: Vec<&str> = self.maps.employees().collect();
        let mut chains: Vec<Chain> = employees
            .par_iter()
            .map(|employee| self.resolve(employee))
            .collect();
        chains.par_sort_unstable_by(|a, b| a.employee_id.cmp(&b.employee_id));
        chains
    }

    /// Resolve every employee in parallel, keeping only the findings
    pub fn audit(&self) -> ChainAudit {
        let employees: Vec<&str> = self.maps.employees().collect();
        let mut audit = employees
            .par_iter()
            .fold(ChainAudit::default, |acc, employee| acc.record(self.resolve(employee)))
            .reduce(ChainAudit::default, ChainAudit::merge);
        audit.cycles.sort_unstable();
        audit.depth_exceeded.sort_unstable();
        audit.dangling.sort_unstable();
        audit
    }
}

/// Data-integrity findings over a whole population.
///
/// Only the affected identifiers are kept, so auditing a large population
/// does not hold every chain in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAudit {
    /// Employees resolved
    pub resolved: usize,
    /// Employees whose walk revisited an identifier
    pub cycles: Vec<String>,
    /// Employees whose chain was cut at the depth bound
    pub depth_exceeded: Vec<String>,
    /// `(employee, missing manager)` for employees whose own manager is unknown
    pub dangling: Vec<(String, String)>,
    /// Longest chain produced
    pub longest_chain: usize,
}

impl ChainAudit {
    fn record(mut self, chain: Chain) -> Self {
        self.resolved += 1;
        self.longest_chain = self.longest_chain.max(chain.ids.len());
        match chain.outcome {
            ChainOutcome::Cycle { .. } => self.cycles.push(chain.employee_id),
            ChainOutcome::DepthExceeded => self.depth_exceeded.push(chain.employee_id),
            ChainOutcome::Dangling { missing_manager } if chain.ids.len() == 1 => {
                self.dangling.push((chain.employee_id, missing_manager))
            }
            _ => {}
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.resolved += other.resolved;
        self.longest_chain = self.longest_chain.max(other.longest_chain);
        self.cycles.extend(other.cycles);
        self.depth_exceeded.extend(other.depth_exceeded);
        self.dangling.extend(other.dangling);
        self
    }

    /// Whether any employee is affected by a cycle or the depth bound
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty() || !self.depth_exceeded.is_empty()
    }
}

/// Upward walk; returns employee-first identifiers
fn walk<'x>(
    maps: &'x RelationshipMaps,
    employee_id: &'x str,
    max_depth: usize,
) -> (Vec<&'x str>, ChainOutcome) {
    let mut ids = vec![employee_id];
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    visited.insert(employee_id);

    let mut next = match maps.manager_of(employee_id) {
        Some(manager) => manager,
        None => return (ids, ChainOutcome::Unmapped),
    };

    let outcome = loop {
        let Some(manager) = next else {
            break ChainOutcome::Complete;
        };
        if !visited.insert(manager) {
            break ChainOutcome::Cycle {
                revisited: manager.to_string(),
            };
        }
        let Some(after) = maps.manager_of(manager) else {
            break ChainOutcome::Dangling {
                missing_manager: manager.to_string(),
            };
        };
        if ids.len() >= max_depth {
            break ChainOutcome::DepthExceeded;
        }
        ids.push(manager);
        next = after;
    };

    (ids, outcome)
}

//! Run-scoped relationship maps
//!
//! Holds the employee→manager map and its inverse (manager→direct reports)
//! for a single materialization run. The maps are populated in one pass by
//! [`RelationshipMapBuilder`] and are read-only once built, so any number of
//! chain resolvers may share them across threads.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Canonical form of an employee or manager identifier.
///
/// Surrounding whitespace is trimmed. Empty strings and the literal
/// placeholders `null` / `None` (which upstream exports write for missing
/// managers) collapse to `None`.
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "null" | "NULL" | "None" => None,
        other => Some(other.to_string()),
    }
}

/// Result of inserting one record into the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this employee was seen
    Inserted,
    /// The employee was already present; the later record wins
    Replaced,
    /// The identifier normalized to nothing and the record was ignored
    Rejected,
}

/// Employee→manager map plus its inverse.
///
/// Invariant: `reports_of(m)` contains `e` iff `manager_of(e) == Some(Some(m))`.
/// Managers that never appear as employees (dangling references) still get
/// a `reports_of` entry so the invariant holds for every manager id.
#[derive(Debug, Default, Clone)]
pub struct RelationshipMaps {
    manager_of: FxHashMap<String, Option<String>>,
    reports_of: FxHashMap<String, BTreeSet<String>>,
}

impl RelationshipMaps {
    /// Manager of `employee_id`.
    ///
    /// The outer `Option` is `None` when the employee is unknown to this run;
    /// the inner one is `None` for a root employee.
    pub fn manager_of(&self, employee_id: &str) -> Option<Option<&str>> {
        self.manager_of.get(employee_id).map(|m| m.as_deref())
    }

    /// Direct reports of `manager_id`, sorted by identifier
    pub fn reports_of(&self, manager_id: &str) -> impl Iterator<Item = &str> + '_ {
        self.reports_of
            .get(manager_id)
            .into_iter()
            .flat_map(|reports| reports.iter().map(String::as_str))
    }

    /// Number of direct reports of `manager_id`
    pub fn report_count(&self, manager_id: &str) -> usize {
        self.reports_of.get(manager_id).map_or(0, BTreeSet::len)
    }

    /// Whether `employee_id` was seen during the build pass
    pub fn contains(&self, employee_id: &str) -> bool {
        self.manager_of.contains_key(employee_id)
    }

    /// Number of employees in the maps
    pub fn len(&self) -> usize {
        self.manager_of.len()
    }

    /// Whether no employee was recorded
    pub fn is_empty(&self) -> bool {
        self.manager_of.is_empty()
    }

    /// All employee identifiers, in no particular order
    pub fn employees(&self) -> impl Iterator<Item = &str> + '_ {
        self.manager_of.keys().map(String::as_str)
    }

    /// Employees without a manager, sorted
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .manager_of
            .iter()
            .filter(|(_, manager)| manager.is_none())
            .map(|(id, _)| id.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// `(employee, manager)` pairs whose manager is not a known employee, sorted
    pub fn dangling_references(&self) -> Vec<(&str, &str)> {
        let mut dangling: Vec<(&str, &str)> = self
            .manager_of
            .iter()
            .filter_map(|(id, manager)| {
                let manager = manager.as_deref()?;
                (!self.manager_of.contains_key(manager)).then_some((id.as_str(), manager))
            })
            .collect();
        dangling.sort_unstable();
        dangling
    }
}

/// Single-pass builder for [`RelationshipMaps`].
///
/// Records may arrive in any order: a manager appearing later in the stream
/// than its reports still ends up linked, because nothing is resolved until
/// [`build`](Self::build) hands the finished maps to the resolver.
#[derive(Debug, Default)]
pub struct RelationshipMapBuilder {
    maps: RelationshipMaps,
    duplicates: usize,
    rejected: usize,
}

impl RelationshipMapBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder sized for roughly `capacity` employees
    pub fn with_capacity(capacity: usize) -> Self {
        let mut builder = Self::default();
        builder.maps.manager_of.reserve(capacity);
        builder
    }

    /// Record one employee and its (raw) manager reference
    pub fn insert(&mut self, employee_id: &str, manager_id: Option<&str>) -> InsertOutcome {
        let Some(employee) = normalize_id(employee_id) else {
            self.rejected += 1;
            return InsertOutcome::Rejected;
        };
        let manager = manager_id.and_then(normalize_id);

        let outcome = match self.maps.manager_of.get(&employee) {
            Some(previous) => {
                // Later occurrence wins; unlink from the previous manager first
                if let Some(previous) = previous.clone() {
                    self.unlink(&previous, &employee);
                }
                self.duplicates += 1;
                InsertOutcome::Replaced
            }
            None => InsertOutcome::Inserted,
        };

        if let Some(manager) = &manager {
            self.maps
                .reports_of
                .entry(manager.clone())
                .or_default()
                .insert(employee.clone());
        }
        self.maps.manager_of.insert(employee, manager);
        outcome
    }

    fn unlink(&mut self, manager: &str, employee: &str) {
        if let Some(reports) = self.maps.reports_of.get_mut(manager) {
            reports.remove(employee);
            if reports.is_empty() {
                self.maps.reports_of.remove(manager);
            }
        }
    }

    /// Number of employee ids seen more than once
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Number of records whose identifier was unusable
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Number of distinct employees recorded so far
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Finish the build pass
    pub fn build(self) -> RelationshipMaps {
        self.maps
    }
}

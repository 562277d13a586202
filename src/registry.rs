//! Check registry
//!
//! Two indexes over the same set of checks:
//!
//! - **by id**: hash map, used to route pushes and for deschedule
//! - **by (target, name)**: ordered map, used for exact lookups and for the
//!   "every check on this target" range scan passive modules fan data into
//!
//! Both live behind a single `RwLock`, so an insert or removal is visible in
//! both indexes at once or in neither. A third, secondary index maps a cause
//! id to the checks that name it, so a re-added cause finds its dependents
//! without a full scan.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::check::Check;
use crate::error::{EngineError, EngineResult};

type NameKey = (String, String);

#[derive(Default)]
struct Indexes {
    by_id: HashMap<Uuid, Arc<Check>>,
    by_name: BTreeMap<NameKey, Arc<Check>>,
    by_cause: HashMap<Uuid, Vec<Uuid>>,
}

/// Owner of every scheduled check
#[derive(Default)]
pub struct Registry {
    indexes: RwLock<Indexes>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check to both indexes
    pub fn insert(&self, check: Arc<Check>) -> EngineResult<()> {
        let mut indexes = self.indexes.write();

        if indexes.by_id.contains_key(&check.id()) {
            return Err(EngineError::DuplicateId(check.id()));
        }

        let key = name_key(&check);
        if indexes.by_name.contains_key(&key) {
            return Err(EngineError::DuplicateName {
                target: key.0,
                name: key.1,
            });
        }

        if let Some(cause) = check.cause() {
            indexes.by_cause.entry(cause).or_default().push(check.id());
        }
        indexes.by_id.insert(check.id(), check.clone());
        indexes.by_name.insert(key, check);
        Ok(())
    }

    /// Remove a check from both indexes
    ///
    /// Returns `None` when the id is not registered, so concurrent removals
    /// of the same check see exactly one winner.
    pub fn remove(&self, id: Uuid) -> Option<Arc<Check>> {
        let mut indexes = self.indexes.write();
        let check = indexes.by_id.remove(&id)?;

        let key = name_key(&check);
        if indexes.by_name.remove(&key).is_none() {
            error!(check = %check, "registry indexes out of sync, aborting");
            std::process::abort();
        }

        if let Some(cause) = check.cause()
            && let Some(dependents) = indexes.by_cause.get_mut(&cause)
        {
            dependents.retain(|id| *id != check.id());
            if dependents.is_empty() {
                indexes.by_cause.remove(&cause);
            }
        }

        Some(check)
    }

    pub fn lookup(&self, id: Uuid) -> Option<Arc<Check>> {
        self.indexes.read().by_id.get(&id).cloned()
    }

    pub fn lookup_by_target_name(&self, target: &str, name: &str) -> Option<Arc<Check>> {
        self.indexes
            .read()
            .by_name
            .get(&(target.to_string(), name.to_string()))
            .cloned()
    }

    /// Every check on `target`, ordered by name
    pub fn lookup_all_by_target(&self, target: &str) -> Vec<Arc<Check>> {
        let start = (target.to_string(), String::new());
        self.indexes
            .read()
            .by_name
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((check_target, _), _)| check_target == target)
            .map(|(_, check)| check.clone())
            .collect()
    }

    /// Ids of the registered checks whose cause is `cause`
    pub fn caused_by(&self, cause: Uuid) -> Vec<Uuid> {
        self.indexes
            .read()
            .by_cause
            .get(&cause)
            .cloned()
            .unwrap_or_default()
    }

    /// Call `f` for every check
    ///
    /// `f` runs on a snapshot taken under the read lock, so it may call back
    /// into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Check>)) {
        let checks: Vec<Arc<Check>> = self.indexes.read().by_id.values().cloned().collect();
        for check in &checks {
            f(check);
        }
    }

    pub fn len(&self) -> usize {
        self.indexes.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn name_key(check: &Check) -> NameKey {
    (check.target().to_string(), check.name().to_string())
}

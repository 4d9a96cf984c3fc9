//! Department configuration: SLA tables and seniority hierarchies
//!
//! Departments are provisioned outside the engine and supplied as data. The
//! [`DepartmentCatalog`] holds the current set behind an `Arc` snapshot so the
//! escalation sweep can pin one consistent view for a whole tick while a
//! reload swaps in the next one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConfigError, ConfigFile};
use crate::consult::{ActorId, Assignee, DepartmentId, Urgency};

/// Per-urgency SLA durations, in minutes
///
/// Keyed by urgency name in configuration (`URGENT = 240`); names are
/// matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<String, u32>", into = "HashMap<String, u32>")]
pub struct SlaTable(HashMap<Urgency, u32>);

impl TryFrom<HashMap<String, u32>> for SlaTable {
    type Error = String;

    fn try_from(raw: HashMap<String, u32>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(name, minutes)| {
                name.parse::<Urgency>()
                    .map(|urgency| (urgency, minutes))
                    .map_err(|e| e.to_string())
            })
            .collect::<Result<HashMap<_, _>, _>>()
            .map(SlaTable)
    }
}

impl From<SlaTable> for HashMap<String, u32> {
    fn from(table: SlaTable) -> Self {
        table
            .0
            .into_iter()
            .map(|(urgency, minutes)| (urgency.to_string(), minutes))
            .collect()
    }
}

impl SlaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, urgency: Urgency, minutes: u32) -> Self {
        self.0.insert(urgency, minutes);
        self
    }

    /// Configured minutes for `urgency`, if any
    pub fn minutes(&self, urgency: Urgency) -> Option<u32> {
        self.0.get(&urgency).copied()
    }

    /// Configured duration for `urgency`; zero-length entries count as missing
    pub fn duration_for(&self, urgency: Urgency) -> Option<Duration> {
        self.minutes(urgency)
            .filter(|m| *m > 0)
            .map(|m| Duration::minutes(i64::from(m)))
    }
}

/// One rung of a department's seniority ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rung {
    /// Role title, e.g. "Registrar" or "Head of Department"
    pub title: String,
    /// Seniority level; must strictly increase up the ladder
    pub seniority: u32,
    /// Named person for this rung; without one the rung is a role
    #[serde(default)]
    pub actor: Option<ActorId>,
}

impl Rung {
    pub fn role(title: impl Into<String>, seniority: u32) -> Self {
        Self {
            title: title.into(),
            seniority,
            actor: None,
        }
    }

    pub fn person(title: impl Into<String>, seniority: u32, actor: impl Into<ActorId>) -> Self {
        Self {
            title: title.into(),
            seniority,
            actor: Some(actor.into()),
        }
    }

    /// Who a consult escalated to this rung is assigned to
    pub fn assignee(&self, department: &str) -> Assignee {
        match &self.actor {
            Some(actor_id) => Assignee::actor(actor_id.clone()),
            None => Assignee::role(department, self.title.clone()),
        }
    }
}

/// Why a hierarchy cannot be used for escalation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("hierarchy is empty")]
    Empty,

    #[error("rung {index} ({title}) is not more senior than the rung below it")]
    NotAscending { index: usize, title: String },
}

/// Ordered escalation ladder, lowest seniority first
///
/// Rung 0 is where a fresh consult sits; the last rung is the head of department.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeniorityHierarchy(Vec<Rung>);

impl SeniorityHierarchy {
    pub fn new(rungs: Vec<Rung>) -> Self {
        Self(rungs)
    }

    /// Number of rungs
    pub fn depth(&self) -> u32 {
        self.0.len() as u32
    }

    /// Highest reachable escalation level (depth − 1)
    pub fn ceiling(&self) -> Option<u32> {
        self.depth().checked_sub(1)
    }

    /// Rung at `level`
    pub fn rung(&self, level: u32) -> Option<&Rung> {
        self.0.get(level as usize)
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.0
    }

    /// Check the ladder is non-empty and strictly ascending in seniority
    pub fn validate(&self) -> Result<(), HierarchyError> {
        if self.0.is_empty() {
            return Err(HierarchyError::Empty);
        }
        for (index, pair) in self.0.windows(2).enumerate() {
            if pair[1].seniority <= pair[0].seniority {
                return Err(HierarchyError::NotAscending {
                    index: index + 1,
                    title: pair[1].title.clone(),
                });
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// A department that can receive consults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
    pub code: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub accepting_consults: bool,
    #[serde(default, rename = "sla_minutes")]
    pub sla: SlaTable,
    #[serde(default)]
    pub hierarchy: SeniorityHierarchy,
}

impl Department {
    pub fn new(id: impl Into<DepartmentId>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code: code.into(),
            active: true,
            accepting_consults: true,
            sla: SlaTable::new(),
            hierarchy: SeniorityHierarchy::default(),
        }
    }

    pub fn with_sla(mut self, sla: SlaTable) -> Self {
        self.sla = sla;
        self
    }

    pub fn with_hierarchy(mut self, rungs: Vec<Rung>) -> Self {
        self.hierarchy = SeniorityHierarchy::new(rungs);
        self
    }

    /// Whether new consults (or reassignments) may target this department
    pub fn accepts_consults(&self) -> bool {
        self.active && self.accepting_consults
    }
}

/// Immutable view of all departments at one point in time
#[derive(Debug, Clone, Default)]
pub struct DepartmentSnapshot {
    departments: HashMap<DepartmentId, Department>,
    generation: u64,
}

impl DepartmentSnapshot {
    fn new(departments: Vec<Department>, generation: u64) -> Self {
        Self {
            departments: departments.into_iter().map(|d| (d.id.clone(), d)).collect(),
            generation,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Department> {
        self.departments.get(id)
    }

    /// Incremented on every reload
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Department> {
        self.departments.values()
    }
}

struct FileSource {
    path: PathBuf,
    modified: Option<SystemTime>,
}

/// Shared reference to DepartmentCatalog
pub type SharedDepartmentCatalog = Arc<DepartmentCatalog>;

/// Hot-reloadable set of departments
pub struct DepartmentCatalog {
    current: RwLock<Arc<DepartmentSnapshot>>,
    source: Option<Mutex<FileSource>>,
}

impl DepartmentCatalog {
    /// Catalog over a fixed list (replace with [`DepartmentCatalog::replace`])
    pub fn new(departments: Vec<Department>) -> Self {
        warn_malformed(&departments);
        Self {
            current: RwLock::new(Arc::new(DepartmentSnapshot::new(departments, 0))),
            source: None,
        }
    }

    /// Catalog backed by a configuration file, re-read by [`refresh_if_changed`](Self::refresh_if_changed)
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let file = ConfigFile::load(&path)?;
        let modified = modified_time(&path);
        warn_malformed(&file.departments);
        Ok(Self {
            current: RwLock::new(Arc::new(DepartmentSnapshot::new(file.departments, 0))),
            source: Some(Mutex::new(FileSource { path, modified })),
        })
    }

    /// Create a shared reference to this catalog
    pub fn shared(self) -> SharedDepartmentCatalog {
        Arc::new(self)
    }

    /// Current snapshot; holders keep a consistent view across reloads
    pub fn snapshot(&self) -> Arc<DepartmentSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Clone of one department from the current snapshot
    pub fn get(&self, id: &str) -> Option<Department> {
        self.snapshot().get(id).cloned()
    }

    /// Swap in a new department set
    pub fn replace(&self, departments: Vec<Department>) {
        warn_malformed(&departments);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let generation = current.generation + 1;
        *current = Arc::new(DepartmentSnapshot::new(departments, generation));
        info!(generation, count = current.len(), "Department catalog replaced");
    }

    /// Re-read the backing file if its modification time changed
    ///
    /// Returns `Ok(true)` when a new snapshot was installed. On a parse error
    /// the previous snapshot stays in place.
    pub fn refresh_if_changed(&self) -> Result<bool, ConfigError> {
        let Some(source) = &self.source else {
            return Ok(false);
        };
        let mut source = source.lock().unwrap_or_else(|e| e.into_inner());

        let modified = modified_time(&source.path);
        if modified.is_some() && modified == source.modified {
            return Ok(false);
        }

        let file = ConfigFile::load(&source.path)?;
        source.modified = modified;
        self.replace(file.departments);
        Ok(true)
    }

    /// Path of the backing file, if any
    pub fn source_path(&self) -> Option<PathBuf> {
        self.source.as_ref().map(|s| {
            s.lock()
                .unwrap_or_else(|e| e.into_inner())
                .path
                .clone()
        })
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn warn_malformed(departments: &[Department]) {
    for department in departments {
        if let Err(e) = department.hierarchy.validate() {
            warn!(department = %department.id, "Escalation hierarchy unusable: {}", e);
        }
    }
}

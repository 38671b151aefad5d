//! Working memory - the per-execution store of stuff
//!
//! Memory is append-only within a scope. Forks inherit the parent's bindings
//! read-only; their own writes stay invisible to the parent until the owning
//! controller merges them back with [`WorkingMemory::set_result`].

use crate::core::concept::{Concept, ConceptRegistry};
use crate::core::error::{PipeError, PipeResult};
use crate::core::stuff::{Stuff, StuffContent};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered name -> stuff store for one execution scope
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    /// Frozen bindings of the scope this one was forked from
    parent: Option<Arc<WorkingMemory>>,

    /// Bindings written in this scope
    local: IndexMap<String, Arc<Stuff>>,

    /// Most recently bound name
    main: Option<String>,
}

impl WorkingMemory {
    /// Create an empty memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory pre-seeded with stuffs, in order
    pub fn from_stuffs<I>(stuffs: I) -> PipeResult<Self>
    where
        I: IntoIterator<Item = Stuff>,
    {
        let mut memory = Self::new();
        for stuff in stuffs {
            let name = stuff.name.clone();
            memory.set(&name, stuff)?;
        }
        Ok(memory)
    }

    /// Bind a new name in this scope
    pub fn set(&mut self, name: &str, stuff: Stuff) -> PipeResult<()> {
        if self.contains(name) {
            return Err(PipeError::DuplicateStuff {
                name: name.to_string(),
            });
        }
        self.bind(name, stuff);
        Ok(())
    }

    /// Explicit result write from a controller; replaces a local binding
    pub fn set_result(&mut self, name: &str, stuff: Stuff) {
        self.bind(name, stuff);
    }

    fn bind(&mut self, name: &str, stuff: Stuff) {
        let stuff = if stuff.name == name {
            stuff
        } else {
            stuff.renamed(name)
        };
        self.local.insert(name.to_string(), Arc::new(stuff));
        self.main = Some(name.to_string());
    }

    /// Look up a binding without type checking
    pub fn lookup(&self, name: &str) -> Option<&Arc<Stuff>> {
        match self.local.get(name) {
            Some(stuff) => Some(stuff),
            None => self.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Whether a name is visible in this scope
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Read a stuff, checking it is compatible with `expected`
    pub fn get(
        &self,
        name: &str,
        expected: &Concept,
        registry: &ConceptRegistry,
    ) -> PipeResult<&Arc<Stuff>> {
        let stuff = self.lookup(name).ok_or_else(|| PipeError::StuffNotFound {
            name: name.to_string(),
        })?;
        let actual = registry.resolve(&stuff.concept)?;
        if !registry.is_compatible(&actual, expected) {
            return Err(PipeError::TypeMismatch {
                name: name.to_string(),
                expected: expected.code.clone(),
                actual: stuff.concept.clone(),
            });
        }
        Ok(stuff)
    }

    /// Read a list-shaped stuff as its items
    pub fn get_as_list(
        &self,
        name: &str,
        item_concept: &Concept,
        registry: &ConceptRegistry,
    ) -> PipeResult<Vec<Stuff>> {
        let stuff = self.get(name, item_concept, registry)?;
        stuff.items().ok_or_else(|| PipeError::TypeMismatch {
            name: name.to_string(),
            expected: format!("{}[]", item_concept.code),
            actual: stuff.concept.clone(),
        })
    }

    /// Create an isolated child scope for a concurrent branch
    pub fn fork(&self) -> WorkingMemory {
        WorkingMemory {
            parent: Some(Arc::new(self.clone())),
            local: IndexMap::new(),
            main: self.main.clone(),
        }
    }

    /// Bindings written in this scope only (not inherited)
    pub fn local_names(&self) -> Vec<&str> {
        self.local.keys().map(String::as_str).collect()
    }

    /// Every visible name, inherited first, in binding order
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .parent
            .as_ref()
            .map(|p| p.names())
            .unwrap_or_default();
        for name in self.local.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.parent.as_ref().map_or(true, |p| p.is_empty())
    }

    /// Name of the most recently bound stuff
    pub fn main_name(&self) -> Option<&str> {
        self.main.as_deref()
    }

    /// The most recently bound stuff
    pub fn main_stuff(&self) -> Option<&Arc<Stuff>> {
        self.main.as_deref().and_then(|name| self.lookup(name))
    }

    /// Serializable view of every visible binding
    pub fn snapshot(&self) -> MemorySnapshot {
        let entries = self
            .names()
            .into_iter()
            .filter_map(|name| {
                self.lookup(&name).map(|stuff| {
                    (
                        name,
                        SnapshotEntry {
                            concept: stuff.concept.clone(),
                            content: stuff.content.clone(),
                        },
                    )
                })
            })
            .collect();
        MemorySnapshot {
            main: self.main.clone(),
            entries,
        }
    }
}

/// Inspection snapshot of a working memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub main: Option<String>,
    pub entries: IndexMap<String, SnapshotEntry>,
}

/// One serialized binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub concept: String,
    pub content: StuffContent,
}

impl MemorySnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

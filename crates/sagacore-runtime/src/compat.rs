//! Compatibility Guard (C8): on resume, checks whether a tool's schema has
//! drifted since the checkpoint was written and, if so, finds an adapter
//! chain or escalates to manual intervention.

use crate::errors::CompatError;
use sagacore_common::{SchemaDiff, SchemaShape};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub tool_name: String,
    pub version: String,
    pub schema_hash: String,
    pub shape: SchemaShape,
}

#[derive(Default)]
pub struct ToolRegistry {
    descriptors: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) {
        self.descriptors.insert(descriptor.tool_name.clone(), descriptor);
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(tool_name)
    }
}

/// A pure transform from one tool-version's parameter shape to another's.
pub trait Adapter: Send + Sync {
    fn tool_name(&self) -> &str;
    fn from_version(&self) -> &str;
    fn to_version(&self) -> &str;
    fn adapt(&self, params: serde_json::Value) -> serde_json::Value;
}

#[derive(Default)]
pub struct AdapterGraph {
    adapters: Vec<Box<dyn Adapter>>,
}

impl AdapterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        self.adapters.push(adapter);
    }

    /// BFS over the adapter graph for the shortest `from -> to` chain for a
    /// given tool. Returns the ordered list of adapter indices to apply.
    fn shortest_chain(&self, tool_name: &str, from: &str, to: &str) -> Option<Vec<usize>> {
        if from == to {
            return Some(Vec::new());
        }
        let edges: Vec<(usize, &str, &str)> = self
            .adapters
            .iter()
            .enumerate()
            .filter(|(_, a)| a.tool_name() == tool_name)
            .map(|(i, a)| (i, a.from_version(), a.to_version()))
            .collect();

        let mut queue: VecDeque<(String, Vec<usize>)> = VecDeque::new();
        queue.push_back((from.to_string(), Vec::new()));
        let mut visited = std::collections::HashSet::new();
        visited.insert(from.to_string());

        while let Some((current, path)) = queue.pop_front() {
            for &(idx, edge_from, edge_to) in &edges {
                if edge_from != current {
                    continue;
                }
                if edge_to == to {
                    let mut full = path.clone();
                    full.push(idx);
                    return Some(full);
                }
                if visited.insert(edge_to.to_string()) {
                    let mut next_path = path.clone();
                    next_path.push(idx);
                    queue.push_back((edge_to.to_string(), next_path));
                }
            }
        }
        None
    }

    pub fn apply_chain(
        &self,
        tool_name: &str,
        from: &str,
        to: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, CompatError> {
        let chain = self.shortest_chain(tool_name, from, to).ok_or_else(|| CompatError::NoAdapterPath {
            tool: tool_name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })?;
        let mut value = params;
        for idx in chain {
            value = self.adapters[idx].adapt(value);
        }
        Ok(value)
    }
}

pub enum CompatOutcome {
    UpToDate,
    Adapted(serde_json::Value),
    ManualInterventionRequired,
}

pub struct CompatibilityGuard<'a> {
    registry: &'a ToolRegistry,
    adapters: &'a AdapterGraph,
}

impl<'a> CompatibilityGuard<'a> {
    pub fn new(registry: &'a ToolRegistry, adapters: &'a AdapterGraph) -> Self {
        Self { registry, adapters }
    }

    pub fn check(
        &self,
        recorded: &ToolDescriptor,
        params: serde_json::Value,
    ) -> CompatOutcome {
        let Some(current) = self.registry.get(&recorded.tool_name) else {
            return CompatOutcome::ManualInterventionRequired;
        };
        if current.schema_hash == recorded.schema_hash {
            return CompatOutcome::UpToDate;
        }

        let diff = SchemaDiff::compute(&recorded.shape, &current.shape);
        if !diff.is_breaking() {
            tracing::warn!(tool = %recorded.tool_name, from = %recorded.version, to = %current.version, "non-breaking schema drift on resume");
            return CompatOutcome::UpToDate;
        }

        match self
            .adapters
            .apply_chain(&recorded.tool_name, &recorded.version, &current.version, params)
        {
            Ok(adapted) => CompatOutcome::Adapted(adapted),
            Err(_) => CompatOutcome::ManualInterventionRequired,
        }
    }
}

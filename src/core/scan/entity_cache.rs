// src/core/scan/entity_cache.rs
use std::collections::HashMap;

use tracing::debug;

use super::chain::{ChainNode, SubChainInstance};

/// Cache key: a cell entered through one of its exports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Library-qualified cell name
    pub cell: String,
    /// Single-bit export the cell is entered through
    pub export: String,
}

impl EntityKey {
    pub fn new(cell: impl Into<String>, export: impl Into<String>) -> Self {
        Self { cell: cell.into(), export: export.into() }
    }
}

/// Handle to an entity owned by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

/// Traced chain for one cell, shared by every instance entered the same way
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: EntityKey,
    pub node: ChainNode,
    /// Export the traced chain leaves the cell through
    pub exit_export: Option<String>,
}

impl Entity {
    /// Reference name used for document definitions; brackets aren't valid there
    pub fn document_key(&self) -> String {
        format!("{}_{}", self.node.data.name, self.key.export).replace(['[', ']'], "_")
    }
}

/// Owns every entity built during one run
#[derive(Debug, Default)]
pub struct EntityCache {
    entities: Vec<Entity>,
    index: HashMap<EntityKey, EntityId>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &EntityKey) -> Option<EntityId> {
        self.index.get(key).copied()
    }

    /// Insert an empty entity before its body is traced, so self references
    /// resolve to it instead of recursing
    pub fn reserve(&mut self, key: EntityKey, name: impl Into<String>) -> EntityId {
        let id = EntityId(self.entities.len());
        self.index.insert(key.clone(), id);
        self.entities.push(Entity {
            node: ChainNode::entity(key.clone(), name),
            key,
            exit_export: None,
        });
        id
    }

    /// Store the traced body of a reserved entity
    pub fn complete(&mut self, id: EntityId, children: Vec<SubChainInstance>, exit_export: Option<String>) {
        let entity = &mut self.entities[id.0];
        entity.node.children = children;
        entity.exit_export = exit_export;
        debug!(
            "Completed entity {} (in: {}, out: {:?})",
            entity.node.data.name,
            entity.key.export,
            entity.exit_export
        );
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    /// Ids in build order
    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.entities.len()).map(EntityId)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

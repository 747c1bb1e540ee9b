// src/core/scan/reducer.rs
use regex::Regex;
use tracing::{debug, info};

use crate::error::{ScanChainError, Result};
use super::catalog::Catalog;
use super::chain::{ChainData, ChainNode, Content, SubChainInstance};
use super::entity_cache::{EntityCache, EntityId};

/// Counts of what a reduction changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReduceStats {
    pub rounds: usize,
    pub removed: usize,
    pub folded: usize,
    pub inlined: usize,
}

impl ReduceStats {
    pub fn changes(&self) -> usize {
        self.removed + self.folded + self.inlined
    }
}

/// Simplifies traced chains without changing how many scan elements they hold.
///
/// Each round drops pass-throughs, folds single-element wrappers into their
/// entity, and splices flatten targets into their parent. Rounds repeat until
/// nothing changes.
pub struct Reducer {
    foldable: Regex,
    enabled: bool,
}

impl Reducer {
    /// `pattern` must match a whole instance name for it to be folded or inlined
    pub fn new(pattern: &str, enabled: bool) -> Result<Self> {
        let foldable = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            ScanChainError::Config(format!("invalid foldable pattern {:?}: {}", pattern, e))
        })?;
        Ok(Self { foldable, enabled })
    }

    pub fn is_foldable(&self, name: &str) -> bool {
        self.foldable.is_match(name)
    }

    pub fn run(&self, chains: &mut [ChainNode], cache: &mut EntityCache, catalog: &Catalog) -> ReduceStats {
        let mut stats = ReduceStats::default();

        loop {
            stats.rounds += 1;
            let removed = drop_pass_throughs(chains, cache);
            let (folded, inlined) = if self.enabled {
                self.fold_and_inline(cache, catalog)
            } else {
                (0, 0)
            };
            debug!(
                "Reduction round {}: {} pass-throughs removed, {} folded, {} inlined",
                stats.rounds, removed, folded, inlined
            );

            stats.removed += removed;
            stats.folded += folded;
            stats.inlined += inlined;
            if removed + folded + inlined == 0 {
                break;
            }
        }

        info!(
            "Reduced chains in {} rounds ({} changes)",
            stats.rounds,
            stats.changes()
        );
        stats
    }

    fn fold_and_inline(&self, cache: &mut EntityCache, catalog: &Catalog) -> (usize, usize) {
        let mut folded = 0;
        let mut inlined = 0;

        for id in cache.ids().collect::<Vec<_>>() {
            if let Some(data) = self.fold_candidate(cache, id) {
                let node = &mut cache.get_mut(id).node;
                debug!("Folding single element into entity {}", node.data.name);
                node.data = data;
                node.children.clear();
                folded += 1;
            }
            inlined += self.inline_flatten_targets(cache, catalog, id);
        }

        (folded, inlined)
    }

    /// The data an entity takes over when its only child is a foldable leaf
    fn fold_candidate(&self, cache: &EntityCache, id: EntityId) -> Option<ChainData> {
        let entity = &cache.get(id).node;
        if entity.data.length > 0 || entity.children.len() != 1 {
            return None;
        }

        let child = &entity.children[0];
        let leaf = child.content.node(cache)?;
        if leaf.data.length <= 0 || !leaf.children.is_empty() || !self.is_foldable(&child.name) {
            return None;
        }

        Some(ChainData {
            name: entity.data.name.clone(),
            opcode: entity.data.opcode,
            length: leaf.data.length,
            access: leaf.data.access.clone(),
            clears: leaf.data.clears.clone(),
            data_net: leaf.data.data_net.as_ref().map(|net| net.prefixed(&child.name)),
            data_net2: leaf.data.data_net2.as_ref().map(|net| net.prefixed(&child.name)),
        })
    }

    /// Replace children that reference flatten targets with those targets' children
    fn inline_flatten_targets(&self, cache: &mut EntityCache, catalog: &Catalog, id: EntityId) -> usize {
        if cache.get(id).node.data.length > 0 {
            return 0;
        }

        let mut inlined = 0;
        let mut i = 0;
        while i < cache.get(id).node.children.len() {
            let replacement = self.flattened_children(cache, catalog, &cache.get(id).node.children[i]);
            match replacement {
                Some(children) => {
                    debug!(
                        "Inlining {} into {}",
                        cache.get(id).node.children[i].name,
                        cache.get(id).node.data.name
                    );
                    let count = children.len();
                    cache.get_mut(id).node.children.splice(i..=i, children);
                    i += count;
                    inlined += 1;
                }
                None => i += 1,
            }
        }
        inlined
    }

    fn flattened_children(
        &self,
        cache: &EntityCache,
        catalog: &Catalog,
        child: &SubChainInstance,
    ) -> Option<Vec<SubChainInstance>> {
        let Content::Entity(target) = child.content else {
            return None;
        };
        let target = cache.get(target);
        let inline = catalog.is_flatten_target(&target.key.cell)
            && self.is_foldable(&child.name)
            && target.node.data.length < 0
            && !target.node.children.is_empty();
        inline.then(|| target.node.children.clone())
    }
}

fn drop_pass_throughs(chains: &mut [ChainNode], cache: &mut EntityCache) -> usize {
    let mut removed = 0;
    for id in cache.ids().collect::<Vec<_>>() {
        removed += strip_pass_throughs(&mut cache.get_mut(id).node.children);
    }
    for chain in chains.iter_mut() {
        removed += strip_pass_throughs(&mut chain.children);
    }
    removed
}

fn strip_pass_throughs(children: &mut Vec<SubChainInstance>) -> usize {
    let before = children.len();
    children.retain(|child| !matches!(&child.content, Content::Owned(node) if node.is_pass_through()));
    let mut removed = before - children.len();

    for child in children.iter_mut() {
        if let Content::Owned(node) = &mut child.content {
            removed += strip_pass_throughs(&mut node.children);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scan::fixtures;

    fn reducer() -> Reducer {
        Reducer::new(".*?@.*", true).unwrap()
    }

    fn child_names(children: &[SubChainInstance]) -> Vec<&str> {
        children.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_pattern_must_match_whole_name() {
        let reducer = reducer();
        assert!(reducer.is_foldable("dff@0"));
        assert!(!reducer.is_foldable("q"));

        let strict = Reducer::new("dff", true).unwrap();
        assert!(strict.is_foldable("dff"));
        assert!(!strict.is_foldable("dff@0"));

        assert!(matches!(Reducer::new("(", true), Err(ScanChainError::Config(_))));
    }

    #[test]
    fn test_pass_throughs_are_dropped() {
        let mut run = fixtures::trace(fixtures::PASS_THROUGH);
        let before = run.chains[0].num_scan_elements(&run.cache);

        let stats = reducer().run(&mut run.chains, &mut run.cache, &run.catalog);

        assert_eq!(stats.removed, 1);
        assert_eq!(child_names(&run.chains[0].children), vec!["A", "C", "ctl"]);
        assert_eq!(run.chains[0].num_scan_elements(&run.cache), before);
    }

    /// Element count of every entity, then of every chain
    fn element_counts(chains: &[ChainNode], cache: &EntityCache) -> (Vec<usize>, Vec<usize>) {
        let entities = cache.ids().map(|id| cache.get(id).node.num_scan_elements(cache)).collect();
        let totals = chains.iter().map(|chain| chain.num_scan_elements(cache)).collect();
        (entities, totals)
    }

    #[test]
    fn test_pass_through_inside_entity_is_dropped_once() {
        let mut run = fixtures::trace(fixtures::PASS_IN_ENTITY);
        assert_eq!(run.cache.len(), 1);
        let seg = run.cache.ids().next().unwrap();
        assert_eq!(child_names(&run.cache.get(seg).node.children), vec!["a", "p", "b"]);

        let stats = reducer().run(&mut run.chains, &mut run.cache, &run.catalog);

        assert_eq!(stats.removed, 1);
        assert_eq!(stats.rounds, 2);
        assert_eq!(child_names(&run.cache.get(seg).node.children), vec!["a", "b"]);
        assert_eq!(run.chains[0].num_scan_elements(&run.cache), 4);
    }

    #[test]
    fn test_every_pass_keeps_element_counts() {
        let reducer = reducer();

        for cells in [fixtures::FLATTEN, fixtures::PASS_IN_ENTITY] {
            let mut run = fixtures::trace(cells);
            let before = element_counts(&run.chains, &run.cache);
            let mut rounds = 0;

            loop {
                rounds += 1;
                assert!(rounds < 10, "reduction did not settle");

                let removed = drop_pass_throughs(&mut run.chains, &mut run.cache);
                assert_eq!(element_counts(&run.chains, &run.cache), before, "round {} pass-throughs", rounds);

                let (folded, inlined) = reducer.fold_and_inline(&mut run.cache, &run.catalog);
                assert_eq!(element_counts(&run.chains, &run.cache), before, "round {} fold and inline", rounds);

                if removed + folded + inlined == 0 {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_fold_and_flatten() {
        let mut run = fixtures::trace(fixtures::FLATTEN);
        assert_eq!(run.chains[0].num_scan_elements(&run.cache), 3);

        let stats = reducer().run(&mut run.chains, &mut run.cache, &run.catalog);
        assert_eq!(stats.folded, 1);
        assert_eq!(stats.inlined, 1);
        assert_eq!(stats.rounds, 2);
        assert_eq!(run.chains[0].num_scan_elements(&run.cache), 3);

        let Content::Entity(wrap) = run.chains[0].children[0].content else {
            panic!("expected the wrap entity");
        };
        let wrap = &run.cache.get(wrap).node;
        assert_eq!(child_names(&wrap.children), vec!["bit@0", "bit@1", "q"]);

        let Content::Entity(bit) = wrap.children[0].content else {
            panic!("expected the bit entity");
        };
        let bit = &run.cache.get(bit).node;
        assert!(bit.children.is_empty());
        assert_eq!(bit.data.name, "work_bit");
        assert_eq!(bit.data.length, 1);
        assert_eq!(bit.data.access.as_deref(), Some("RW"));
        assert_eq!(bit.data.data_net.as_ref().unwrap().to_string(), "xscanDFF@0.dout(RW)");
    }

    #[test]
    fn test_reduction_is_idempotent() {
        let mut run = fixtures::trace(fixtures::FLATTEN);
        let reducer = reducer();
        reducer.run(&mut run.chains, &mut run.cache, &run.catalog);
        let chains = run.chains.clone();

        let again = reducer.run(&mut run.chains, &mut run.cache, &run.catalog);
        assert_eq!(again.changes(), 0);
        assert_eq!(again.rounds, 1);
        assert_eq!(run.chains, chains);
    }

    #[test]
    fn test_disabled_reduction_only_drops_pass_throughs() {
        let mut run = fixtures::trace(fixtures::FLATTEN);
        let stats = Reducer::new(".*?@.*", false)
            .unwrap()
            .run(&mut run.chains, &mut run.cache, &run.catalog);

        assert_eq!(stats.changes(), 0);
        let Content::Entity(wrap) = run.chains[0].children[0].content else {
            panic!("expected the wrap entity");
        };
        assert_eq!(child_names(&run.cache.get(wrap).node.children), vec!["pair@0", "q"]);
    }
}

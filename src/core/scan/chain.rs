// src/core/scan/chain.rs
use std::fmt;
use std::str::FromStr;

use crate::core::netlist::{InstanceRef, PortRef};
use crate::error::ScanChainError;
use super::entity_cache::{EntityCache, EntityId, EntityKey};

/// Name given to the sentinel that marks a chain returning to the controller
pub const TERMINAL_NAME: &str = "end:controller";

/// Read/write/invert options on a data net
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataNetOptions {
    pub readable: bool,
    pub writable: bool,
    pub inverted: bool,
}

impl DataNetOptions {
    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.inverted)
    }
}

/// A net that a scan element reads or writes, such as `dout(RW)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNetSpec {
    pub net: String,
    pub options: DataNetOptions,
}

impl DataNetSpec {
    pub fn new(net: impl Into<String>, options: DataNetOptions) -> Self {
        Self { net: net.into(), options }
    }

    /// Parse an optional configuration value; empty strings mean "no data net"
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>, ScanChainError> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some),
        }
    }

    /// Same options, net addressed through an instance
    pub fn prefixed(&self, instance: &str) -> Self {
        Self {
            net: format!("x{}.{}", instance, self.net),
            options: self.options,
        }
    }
}

impl FromStr for DataNetSpec {
    type Err = ScanChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(open) = s.find('(') else {
            return Ok(Self::new(s, DataNetOptions::default()));
        };
        let flags = s[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| ScanChainError::Config(format!("unterminated data net options in {:?}", s)))?;

        let mut options = DataNetOptions::default();
        for flag in flags.chars() {
            match flag {
                'R' => options.readable = true,
                'W' => options.writable = true,
                'I' => options.inverted = true,
                other => {
                    return Err(ScanChainError::Config(format!(
                        "unknown data net option '{}' in {:?}",
                        other, s
                    )))
                }
            }
        }
        Ok(Self::new(&s[..open], options))
    }
}

impl fmt::Display for DataNetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.net)?;
        if self.options.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        if self.options.readable {
            f.write_str("R")?;
        }
        if self.options.writable {
            f.write_str("W")?;
        }
        if self.options.inverted {
            f.write_str("I")?;
        }
        f.write_str(")")
    }
}

/// Fields shared by chains, sub-chains and entities
#[derive(Debug, Clone, PartialEq)]
pub struct ChainData {
    pub name: String,
    /// Only top-level chains carry an opcode
    pub opcode: Option<u32>,
    /// Storage bits of this node itself; zero or less means "not a register"
    pub length: i64,
    pub access: Option<String>,
    pub clears: Option<String>,
    pub data_net: Option<DataNetSpec>,
    pub data_net2: Option<DataNetSpec>,
}

impl ChainData {
    pub fn named(name: impl Into<String>, length: i64) -> Self {
        Self {
            name: name.into(),
            opcode: None,
            length,
            access: None,
            clears: None,
            data_net: None,
            data_net2: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A complete chain rooted at the controller or an export
    Chain,
    /// Part of a chain; pass-throughs carry no storage
    Sub { pass_through: bool },
    /// Cached description of a cell entered through one export
    Entity(EntityKey),
}

/// A traced chain, sub-chain or entity body
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
    pub kind: NodeKind,
    pub data: ChainData,
    pub children: Vec<SubChainInstance>,
}

/// What a sub-chain instance points at
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Owned(Box<ChainNode>),
    /// Shared cache entry
    Entity(EntityId),
    /// The chain reached the controller
    Terminal,
    /// Carries port bindings only, never placed in a chain
    Marker,
}

/// A sub-chain placed at an instance, with the ports it was entered and left through
#[derive(Debug, Clone, PartialEq)]
pub struct SubChainInstance {
    pub entry: Option<PortRef>,
    pub exit: Option<PortRef>,
    pub instance: Option<InstanceRef>,
    /// Instance name used when writing, bundle name for bundles
    pub name: String,
    pub content: Content,
}

/// Last sub-chain reached when walking down the final children
#[derive(Debug, Clone, Copy)]
pub enum LastSubChain<'a> {
    Terminal,
    Node(&'a ChainNode),
}

impl LastSubChain<'_> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LastSubChain::Terminal)
    }

    pub fn name(&self) -> &str {
        match self {
            LastSubChain::Terminal => TERMINAL_NAME,
            LastSubChain::Node(node) => &node.data.name,
        }
    }

    pub fn length(&self) -> i64 {
        match self {
            LastSubChain::Terminal => -1,
            LastSubChain::Node(node) => node.data.length,
        }
    }
}

impl ChainNode {
    pub fn chain(name: impl Into<String>, opcode: Option<u32>) -> Self {
        let mut data = ChainData::named(name, -1);
        data.opcode = opcode;
        Self { kind: NodeKind::Chain, data, children: Vec::new() }
    }

    pub fn sub(name: impl Into<String>, length: i64) -> Self {
        Self {
            kind: NodeKind::Sub { pass_through: false },
            data: ChainData::named(name, length),
            children: Vec::new(),
        }
    }

    pub fn pass_through(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Sub { pass_through: true },
            data: ChainData::named(name, -1),
            children: Vec::new(),
        }
    }

    pub fn entity(key: EntityKey, name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Entity(key),
            data: ChainData::named(name, -1),
            children: Vec::new(),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self.kind, NodeKind::Sub { pass_through: true })
    }

    /// XML tag used when this node is written inline
    pub fn tag(&self) -> &'static str {
        match self.kind {
            NodeKind::Chain => "chain",
            NodeKind::Sub { .. } | NodeKind::Entity(_) => "subchain",
        }
    }

    /// `max(length, 0)` plus the elements of every child
    pub fn num_scan_elements(&self, cache: &EntityCache) -> usize {
        let own = self.data.length.max(0) as usize;
        own + self
            .children
            .iter()
            .map(|child| child.content.num_scan_elements(cache))
            .sum::<usize>()
    }

    /// Follow the last child down until a node without children is found.
    /// A plain chain with no children has no last sub-chain.
    pub fn last_sub_chain<'a>(&'a self, cache: &'a EntityCache) -> Option<LastSubChain<'a>> {
        match self.children.last() {
            Some(last) => last.content.last_sub_chain(cache),
            None if self.kind == NodeKind::Chain => None,
            None => Some(LastSubChain::Node(self)),
        }
    }
}

impl Content {
    pub fn owned(node: ChainNode) -> Self {
        Content::Owned(Box::new(node))
    }

    /// The node behind this content, resolving cache references
    pub fn node<'a>(&'a self, cache: &'a EntityCache) -> Option<&'a ChainNode> {
        match self {
            Content::Owned(node) => Some(node.as_ref()),
            Content::Entity(id) => Some(&cache.get(*id).node),
            Content::Terminal | Content::Marker => None,
        }
    }

    pub fn num_scan_elements(&self, cache: &EntityCache) -> usize {
        self.node(cache).map_or(0, |node| node.num_scan_elements(cache))
    }

    /// Anything worth keeping in a chain: storage, structure, or a pass-through
    pub fn is_significant(&self, cache: &EntityCache) -> bool {
        match self.node(cache) {
            Some(node) => node.data.length > 0 || !node.children.is_empty() || node.is_pass_through(),
            None => false,
        }
    }

    fn last_sub_chain<'a>(&'a self, cache: &'a EntityCache) -> Option<LastSubChain<'a>> {
        match self {
            Content::Terminal => Some(LastSubChain::Terminal),
            Content::Marker => None,
            _ => self.node(cache).and_then(|node| node.last_sub_chain(cache)),
        }
    }
}

impl SubChainInstance {
    pub fn new(
        entry: Option<PortRef>,
        exit: Option<PortRef>,
        instance: Option<InstanceRef>,
        name: impl Into<String>,
        content: Content,
    ) -> Self {
        Self { entry, exit, instance, name: name.into(), content }
    }

    /// Placeholder that only tells the caller where to continue
    pub fn marker(exit: PortRef) -> Self {
        Self::new(None, Some(exit), None, "", Content::Marker)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.content, Content::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_net_parsing() {
        let net: DataNetSpec = "dout(RW)".parse().unwrap();
        assert_eq!(net.net, "dout");
        assert!(net.options.readable && net.options.writable && !net.options.inverted);
        assert_eq!(net.to_string(), "dout(RW)");

        let plain: DataNetSpec = "net26".parse().unwrap();
        assert!(plain.options.is_empty());
        assert_eq!(plain.to_string(), "net26");

        assert!("d(X)".parse::<DataNetSpec>().is_err());
        assert!("d(RW".parse::<DataNetSpec>().is_err());
        assert_eq!(DataNetSpec::parse_optional(Some("")).unwrap(), None);
        assert_eq!(DataNetSpec::parse_optional(None).unwrap(), None);
    }

    #[test]
    fn test_prefixed_data_net_keeps_options() {
        let net: DataNetSpec = "dout(WI)".parse().unwrap();
        assert_eq!(net.prefixed("dff@0").to_string(), "xdff@0.dout(WI)");
    }

    #[test]
    fn test_num_scan_elements_counts_own_length_and_children() {
        let cache = EntityCache::new();
        let mut chain = ChainNode::chain("c", Some(1));
        let mut group = ChainNode::sub("g", 0);
        group.children.push(SubChainInstance::new(None, None, None, "a", Content::owned(ChainNode::sub("a", 1))));
        group.children.push(SubChainInstance::new(None, None, None, "b", Content::owned(ChainNode::sub("b[0:3]", 4))));
        chain.children.push(SubChainInstance::new(None, None, None, "g", Content::owned(group)));
        chain.children.push(SubChainInstance::new(None, None, None, "p", Content::owned(ChainNode::pass_through("buf"))));
        chain.children.push(SubChainInstance::new(None, None, None, "", Content::Terminal));

        assert_eq!(chain.num_scan_elements(&cache), 5);
        assert!(chain.last_sub_chain(&cache).unwrap().is_terminal());
    }

    #[test]
    fn test_last_sub_chain_of_empty_chain() {
        let cache = EntityCache::new();
        let chain = ChainNode::chain("c", Some(1));
        assert!(chain.last_sub_chain(&cache).is_none());

        let leaf = ChainNode::sub("leaf", 1);
        let last = leaf.last_sub_chain(&cache).unwrap();
        assert_eq!(last.name(), "leaf");
        assert_eq!(last.length(), 1);
    }
}

// src/core/scan/writer.rs
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tera::{Context, Tera};
use tracing::debug;

use crate::error::Result;
use super::chain::{ChainNode, Content, SubChainInstance};
use super::entity_cache::{EntityCache, EntityId};

/// Document frame; everything inside `<chip>` is rendered by the writer
const FRAME: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
    "\n",
    "<!--\n",
    "    Document      : {{ document }}\n",
    "    Author        : automatically generated by scanchain\n",
    "    Description   : none\n",
    "-->\n",
    "\n",
    "{% if flat %}",
    "<!DOCTYPE ChainG SYSTEM \"file:./ChainG.dtd\">\n",
    "{% else %}",
    "<!DOCTYPE ChainG SYSTEM \"file:./ChainG.dtd\" [\n",
    "{% for definition in definitions %}{{ definition }}{% endfor %}",
    "]>\n",
    "{% endif %}",
    "\n",
    "<ChainG>\n",
    "\t<system>\n",
    "\t\t<chip name=\"{{ chip_name }}\" lengthIR=\"{{ length_ir }}\">\n",
    "{{ chains }}",
    "\t\t</chip>\n",
    "\t</system>\n",
    "</ChainG>\n",
);

#[derive(Debug, Serialize)]
struct Frame<'a> {
    document: &'a str,
    flat: bool,
    definitions: Vec<String>,
    chip_name: String,
    length_ir: u32,
    chains: String,
}

/// Escape text for use inside a double-quoted attribute. `%` is escaped too
/// since entity bodies treat it as a parameter reference.
pub fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '%' => escaped.push_str("&#37;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Writes chains as a ChainG XML document.
///
/// Entities used at two or more places are declared once in the DOCTYPE and
/// referenced by name; the rest are written inline. Flat mode inlines all of them.
pub struct DocumentWriter<'a> {
    cache: &'a EntityCache,
    chip_name: String,
    length_ir: u32,
    document_name: String,
    flat: bool,
    min_entity_elements: usize,
}

impl<'a> DocumentWriter<'a> {
    pub fn new(cache: &'a EntityCache, chip_name: impl Into<String>, length_ir: u32) -> Self {
        Self {
            cache,
            chip_name: chip_name.into(),
            length_ir,
            document_name: "stdout".to_string(),
            flat: false,
            min_entity_elements: 3,
        }
    }

    pub fn document_name(mut self, name: impl Into<String>) -> Self {
        self.document_name = name.into();
        self
    }

    pub fn flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }

    pub fn min_entity_elements(mut self, min: usize) -> Self {
        self.min_entity_elements = min;
        self
    }

    pub fn render(&self, chains: &[ChainNode]) -> Result<String> {
        let written: Vec<&ChainNode> = chains
            .iter()
            .filter(|chain| chain.num_scan_elements(self.cache) > 0)
            .collect();

        let shared = if self.flat { Vec::new() } else { self.shared_entities(&written) };
        let shared_set: HashSet<EntityId> = shared.iter().copied().collect();
        debug!("Declaring {} shared entities", shared.len());

        let definitions = shared
            .iter()
            .map(|&id| self.definition(id, &shared_set))
            .collect();

        let mut body = String::new();
        for chain in &written {
            self.write_node(&mut body, 3, chain, None, &shared_set);
        }

        let frame = Frame {
            document: &self.document_name,
            flat: self.flat,
            definitions,
            chip_name: escape_attr(&self.chip_name),
            length_ir: self.length_ir,
            chains: body,
        };
        let context = Context::from_serialize(&frame)?;
        Ok(Tera::one_off(FRAME, &context, false)?)
    }

    /// Entities worth declaring, dependencies before the entities using them
    fn shared_entities(&self, chains: &[&ChainNode]) -> Vec<EntityId> {
        let mut uses = HashMap::new();
        let mut order = Vec::new();
        for chain in chains {
            self.count_uses(&chain.children, &mut uses, &mut order);
        }

        order
            .into_iter()
            .filter(|id| uses.get(id).copied().unwrap_or(0) > 1 && self.is_declarable(*id))
            .collect()
    }

    fn count_uses(
        &self,
        children: &[SubChainInstance],
        uses: &mut HashMap<EntityId, usize>,
        order: &mut Vec<EntityId>,
    ) {
        for child in children {
            if child.content.num_scan_elements(self.cache) == 0 {
                continue;
            }
            match &child.content {
                Content::Owned(node) => self.count_uses(&node.children, uses, order),
                Content::Entity(id) => {
                    let count = uses.entry(*id).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        self.count_uses(&self.cache.get(*id).node.children, uses, order);
                        order.push(*id);
                    }
                }
                Content::Terminal | Content::Marker => {}
            }
        }
    }

    fn is_declarable(&self, id: EntityId) -> bool {
        let node = &self.cache.get(id).node;
        !node.children.is_empty() && node.num_scan_elements(self.cache) >= self.min_entity_elements
    }

    fn definition(&self, id: EntityId, shared: &HashSet<EntityId>) -> String {
        let entity = self.cache.get(id);
        let mut out = format!("<!ENTITY {} '\n", entity.document_key());
        self.write_children(&mut out, 1, &entity.node.children, shared);
        out.push_str("'>\n");
        out
    }

    fn write_node(
        &self,
        out: &mut String,
        depth: usize,
        node: &ChainNode,
        instance_name: Option<&str>,
        shared: &HashSet<EntityId>,
    ) {
        if node.num_scan_elements(self.cache) == 0 {
            return;
        }

        let indent = "\t".repeat(depth);
        let tag = node.tag();
        let name = instance_name.unwrap_or(&node.data.name);
        out.push_str(&format!("{}<{} name=\"{}\"", indent, tag, escape_attr(name)));

        let data = &node.data;
        if let Some(opcode) = data.opcode {
            out.push_str(&format!(" opcode=\"{:b}\"", opcode));
        }
        if data.length > 0 {
            out.push_str(&format!(" length=\"{}\"", data.length));
        }
        if let Some(access) = &data.access {
            out.push_str(&format!(" access=\"{}\"", escape_attr(access)));
        }
        if let Some(clears) = &data.clears {
            out.push_str(&format!(" clears=\"{}\"", escape_attr(clears)));
        }
        if let Some(net) = &data.data_net {
            out.push_str(&format!(" dataNet=\"{}\"", escape_attr(&net.to_string())));
        }
        if let Some(net) = &data.data_net2 {
            out.push_str(&format!(" dataNet2=\"{}\"", escape_attr(&net.to_string())));
        }

        if node.children.is_empty() {
            out.push_str(" />\n");
            return;
        }

        out.push_str(">\n");
        self.write_children(out, depth + 1, &node.children, shared);
        out.push_str(&format!("{}</{}>\n", indent, tag));
    }

    fn write_children(
        &self,
        out: &mut String,
        depth: usize,
        children: &[SubChainInstance],
        shared: &HashSet<EntityId>,
    ) {
        for child in children {
            match &child.content {
                Content::Owned(node) => self.write_node(out, depth, node, Some(&child.name), shared),
                Content::Entity(id) if shared.contains(id) => {
                    if child.content.num_scan_elements(self.cache) == 0 {
                        continue;
                    }
                    out.push_str(&format!(
                        "{}<subchain name=\"{}\"> &{}; </subchain>\n",
                        "\t".repeat(depth),
                        escape_attr(&child.name),
                        self.cache.get(*id).document_key()
                    ));
                }
                Content::Entity(id) => {
                    self.write_node(out, depth, &self.cache.get(*id).node, Some(&child.name), shared)
                }
                Content::Terminal | Content::Marker => {}
            }
        }
    }
}

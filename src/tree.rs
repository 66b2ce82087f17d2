/// The genome tree: names, parent/child relations, branch lengths.
///
/// Child order is load-bearing: the child slots of every bottom segment in
/// a parent are indexed by the position of each child in this order, so the
/// order is persisted and never reshuffled.
use crate::error::{HalError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct GenomeNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub branch_length: f64,
}

#[derive(Debug, Default, Clone)]
pub struct GenomeTree {
    nodes: Vec<GenomeNode>,
    by_name: IndexMap<String, usize>,
    root: Option<usize>,
}

impl GenomeTree {
    pub fn new() -> GenomeTree {
        GenomeTree::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn node(&self, id: usize) -> &GenomeNode {
        &self.nodes[id]
    }

    pub fn id_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn add_root(&mut self, name: &str) -> Result<usize> {
        if self.root.is_some() {
            return Err(HalError::PreconditionViolated(format!(
                "alignment already has a root; cannot add {name}"
            )));
        }
        let id = self.insert_node(name, None, 0.0)?;
        self.root = Some(id);
        Ok(id)
    }

    pub fn add_leaf(&mut self, name: &str, parent_name: &str, branch_length: f64) -> Result<usize> {
        let parent = self
            .id_by_name(parent_name)
            .ok_or_else(|| HalError::NotFound(format!("genome {parent_name}")))?;
        let id = self.insert_node(name, Some(parent), branch_length)?;
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    fn insert_node(&mut self, name: &str, parent: Option<usize>, branch_length: f64) -> Result<usize> {
        if name.is_empty() {
            return Err(HalError::PreconditionViolated("genome name is empty".into()));
        }
        if self.by_name.contains_key(name) {
            return Err(HalError::PreconditionViolated(format!(
                "genome {name} already exists"
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(GenomeNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            branch_length,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let id = self
            .id_by_name(old)
            .ok_or_else(|| HalError::NotFound(format!("genome {old}")))?;
        if self.by_name.contains_key(new) {
            return Err(HalError::PreconditionViolated(format!(
                "genome {new} already exists"
            )));
        }
        self.by_name.shift_remove(old);
        self.by_name.insert(new.to_string(), id);
        self.nodes[id].name = new.to_string();
        Ok(())
    }

    pub fn child_names(&self, name: &str) -> Result<Vec<String>> {
        let id = self
            .id_by_name(name)
            .ok_or_else(|| HalError::NotFound(format!("genome {name}")))?;
        Ok(self.nodes[id]
            .children
            .iter()
            .map(|&c| self.nodes[c].name.clone())
            .collect())
    }

    pub fn parent_name(&self, name: &str) -> Result<Option<String>> {
        let id = self
            .id_by_name(name)
            .ok_or_else(|| HalError::NotFound(format!("genome {name}")))?;
        Ok(self.nodes[id].parent.map(|p| self.nodes[p].name.clone()))
    }

    /// Position of `child_id` in its parent's child list.
    pub fn child_position(&self, parent_id: usize, child_id: usize) -> Option<usize> {
        self.nodes[parent_id].children.iter().position(|&c| c == child_id)
    }

    /// Render the tree as a newick string rooted at the alignment root.
    pub fn newick(&self) -> String {
        match self.root {
            Some(root) => {
                let mut out = String::new();
                self.render(root, &mut out);
                out.push(';');
                out
            }
            None => String::new(),
        }
    }

    fn render(&self, id: usize, out: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &c) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.render(c, out);
            }
            out.push(')');
        }
        out.push_str(&node.name);
        if node.parent.is_some() {
            out.push_str(&format!(":{}", node.branch_length));
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.nodes.len() as u32).unwrap();
        for node in &self.nodes {
            out.write_u16::<LittleEndian>(node.name.len() as u16).unwrap();
            out.extend_from_slice(node.name.as_bytes());
            out.write_i32::<LittleEndian>(node.parent.map_or(-1, |p| p as i32)).unwrap();
            out.write_f64::<LittleEndian>(node.branch_length).unwrap();
            out.write_u32::<LittleEndian>(node.children.len() as u32).unwrap();
            for &c in &node.children {
                out.write_u32::<LittleEndian>(c as u32).unwrap();
            }
        }
        out
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<GenomeTree> {
        let count = buf.read_u32::<LittleEndian>()? as usize;
        let mut tree = GenomeTree::new();
        for id in 0..count {
            let name_len = buf.read_u16::<LittleEndian>()? as usize;
            if buf.len() < name_len {
                return Err(HalError::BadFormat("truncated genome tree record".into()));
            }
            let name = std::str::from_utf8(&buf[..name_len])
                .map_err(|_| HalError::BadFormat("genome name is not UTF-8".into()))?
                .to_string();
            buf = &buf[name_len..];
            let parent = buf.read_i32::<LittleEndian>()?;
            let branch_length = buf.read_f64::<LittleEndian>()?;
            let num_children = buf.read_u32::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(num_children);
            for _ in 0..num_children {
                children.push(buf.read_u32::<LittleEndian>()? as usize);
            }
            let parent = if parent < 0 { None } else { Some(parent as usize) };
            if parent.is_none() {
                if tree.root.is_some() {
                    return Err(HalError::CorruptAlignment(
                        "genome tree has more than one root".into(),
                    ));
                }
                tree.root = Some(id);
            }
            tree.by_name.insert(name.clone(), id);
            tree.nodes.push(GenomeNode {
                name,
                parent,
                children,
                branch_length,
            });
        }
        // Validate the child back-links rather than trusting the file.
        for (id, node) in tree.nodes.iter().enumerate() {
            for &c in &node.children {
                if c >= tree.nodes.len() || tree.nodes[c].parent != Some(id) {
                    return Err(HalError::CorruptAlignment(format!(
                        "genome tree child link {id} -> {c} is not reciprocated"
                    )));
                }
            }
        }
        if !tree.nodes.is_empty() && tree.root.is_none() {
            return Err(HalError::CorruptAlignment("genome tree has no root".into()));
        }
        Ok(tree)
    }
}

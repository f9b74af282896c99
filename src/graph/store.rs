use std::collections::HashMap;
use std::path::Path;

use crate::error::{CodeIndexError, Result};

use super::node::{Edge, Node};
use super::persist;

/// Immutable, validated program graph.
///
/// Nodes are stored in load order; children keep the order in which they were
/// loaded, which is the extraction order of the build.
#[derive(Debug, Clone)]
pub struct ProgramGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    parent: Vec<Option<usize>>,
    edges: Vec<Edge>,
    edges_by_src: HashMap<String, Vec<usize>>,
    root: usize,
}

impl ProgramGraph {
    /// Validates and indexes a node and edge list.
    ///
    /// Fails on duplicate ids, parent references to unknown nodes, and when the
    /// number of parentless nodes is not exactly one.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.node_id.clone(), i).is_some() {
                return Err(CodeIndexError::DuplicateNode {
                    node_id: node.node_id.clone(),
                });
            }
        }

        let mut children = vec![Vec::new(); nodes.len()];
        let mut parent = vec![None; nodes.len()];
        let mut roots = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            match &node.parent_id {
                Some(parent_id) => {
                    let p = *index.get(parent_id).ok_or_else(|| CodeIndexError::DanglingParent {
                        node_id: node.node_id.clone(),
                        parent_id: parent_id.clone(),
                    })?;
                    children[p].push(i);
                    parent[i] = Some(p);
                }
                None => roots.push(i),
            }
        }
        if roots.len() != 1 {
            return Err(CodeIndexError::MissingRoot { found: roots.len() });
        }
        let root = roots[0];

        // A single root plus resolvable parents still allows a cycle detached
        // from the root; every node must be reachable from it.
        let reachable = Self::count_reachable(root, &children);
        if reachable != nodes.len() {
            let orphan = (0..nodes.len())
                .find(|&i| !Self::reaches_root(i, root, &parent, nodes.len()))
                .unwrap_or(root);
            return Err(CodeIndexError::DanglingParent {
                node_id: nodes[orphan].node_id.clone(),
                parent_id: nodes[orphan].parent_id.clone().unwrap_or_default(),
            });
        }

        let mut edges_by_src: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            edges_by_src.entry(edge.src.clone()).or_default().push(i);
        }

        Ok(Self {
            nodes,
            index,
            children,
            parent,
            edges,
            edges_by_src,
            root,
        })
    }

    /// Loads `nodes.jsonl` and `edges.jsonl` from an index directory.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let nodes = persist::read_nodes(&index_dir.join(persist::NODES_FILE))?;
        let edges_path = index_dir.join(persist::EDGES_FILE);
        let edges = if edges_path.exists() {
            persist::read_edges(&edges_path)?
        } else {
            Vec::new()
        };
        Self::from_parts(nodes, edges)
    }

    fn count_reachable(root: usize, children: &[Vec<usize>]) -> usize {
        let mut stack = vec![root];
        let mut seen = vec![false; children.len()];
        let mut count = 0;
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            count += 1;
            stack.extend(children[i].iter().copied());
        }
        count
    }

    fn reaches_root(mut i: usize, root: usize, parent: &[Option<usize>], limit: usize) -> bool {
        for _ in 0..=limit {
            if i == root {
                return true;
            }
            match parent[i] {
                Some(p) => i = p,
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[self.root]
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn parent(&self, node_id: &str) -> Option<&Node> {
        let i = *self.index.get(node_id)?;
        self.parent[i].map(|p| &self.nodes[p])
    }

    /// Direct children in load order. Unknown ids have no children.
    pub fn children(&self, node_id: &str) -> Vec<&Node> {
        match self.index.get(node_id) {
            Some(&i) => self.children[i].iter().map(|&c| &self.nodes[c]).collect(),
            None => Vec::new(),
        }
    }

    /// All transitive descendants in pre-order, excluding the node itself.
    pub fn descendants(&self, node_id: &str) -> Vec<&Node> {
        let Some(&start) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.children[start].iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            out.push(&self.nodes[i]);
            stack.extend(self.children[i].iter().rev().copied());
        }
        out
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, node_id: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let Some(&start) = self.index.get(node_id) else {
            return out;
        };
        let mut cur = self.parent[start];
        while let Some(p) = cur {
            out.push(&self.nodes[p]);
            cur = self.parent[p];
        }
        out
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_from(&self, node_id: &str) -> Vec<&Edge> {
        self.edges_by_src
            .get(node_id)
            .map(|ids| ids.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }
}

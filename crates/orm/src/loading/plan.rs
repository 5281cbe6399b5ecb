//! Load plans - the tree of associations to hydrate after a root query

use crate::conditions::WhereClause;

/// Tree of association names; siblings at one level load one after another
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPlan {
    nodes: Vec<LoadNode>,
}

/// One association to hydrate, with call-site conditions and nested loads
#[derive(Debug, Clone, PartialEq)]
pub struct LoadNode {
    pub name: String,
    pub clause: WhereClause,
    pub children: LoadPlan,
}

impl LoadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dot separated path, e.g. `"posts.comments"`
    pub fn load(mut self, path: &str) -> Self {
        self.add(path, WhereClause::new());
        self
    }

    /// Add a path with conditions on its last association
    pub fn load_where(mut self, path: &str, clause: WhereClause) -> Self {
        self.add(path, clause);
        self
    }

    /// Merge a path into the tree. Repeated paths share nodes and their
    /// conditions are ANDed.
    pub fn add(&mut self, path: &str, clause: WhereClause) {
        let segments: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut level = self;
        for segment in parents {
            level = &mut level.node_mut(segment).children;
        }
        let node = level.node_mut(last);
        node.clause = std::mem::take(&mut node.clause).merge(clause);
    }

    fn node_mut(&mut self, name: &str) -> &mut LoadNode {
        let index = match self.nodes.iter().position(|node| node.name == name) {
            Some(index) => index,
            None => {
                self.nodes.push(LoadNode {
                    name: name.to_string(),
                    clause: WhereClause::new(),
                    children: LoadPlan::new(),
                });
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[index]
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[LoadNode] {
        &self.nodes
    }
}

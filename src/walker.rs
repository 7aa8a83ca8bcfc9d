use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{DatasetRecord, SampleCode, SampleTree};
use crate::error::KiraError;
use crate::metadata::MetadataClient;

/// A sample reached from a root identifier, with the datasets it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredSample {
    pub code: String,
    pub type_code: String,
    pub root: SampleCode,
    pub datasets: Vec<DatasetRecord>,
}

/// Samples reached from one identifier, not yet recorded as visited.
#[derive(Debug, Clone, Default)]
pub struct RootWalk {
    pub samples: Vec<DiscoveredSample>,
    expanded: HashSet<String>,
}

/// Depth-first walk over sample trees. One walker owns one visited-set for a
/// whole batch of root identifiers, so a descendant shared between roots is
/// expanded only once. A walk joins the visited-set only when committed.
pub struct GraphWalker<'a, M: MetadataClient> {
    client: &'a M,
    visited: HashSet<String>,
}

impl<'a, M: MetadataClient> GraphWalker<'a, M> {
    pub fn new(client: &'a M) -> Self {
        Self {
            client,
            visited: HashSet::new(),
        }
    }

    /// Queries one root identifier and walks everything below it that is not
    /// visited yet. Service errors are returned as-is; nothing is retried here.
    pub fn explore(&self, root: &SampleCode) -> Result<RootWalk, KiraError> {
        let tree = self.client.search_samples_by_code(root)?;
        if tree.roots().is_empty() {
            tracing::warn!(sample = %root, "no samples match identifier");
            return Ok(RootWalk::default());
        }
        let walk = self.explore_tree(root, &tree);
        tracing::info!(
            sample = %root,
            samples = walk.samples.len(),
            datasets = walk.samples.iter().map(|s| s.datasets.len()).sum::<usize>(),
            "discovered"
        );
        Ok(walk)
    }

    pub fn explore_tree(&self, root: &SampleCode, tree: &SampleTree) -> RootWalk {
        let mut walk = RootWalk::default();
        let mut stack: Vec<usize> = tree.roots().iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let Some(node) = tree.node(index) else {
                continue;
            };
            if self.visited.contains(&node.code) || !walk.expanded.insert(node.code.clone()) {
                continue;
            }
            walk.samples.push(DiscoveredSample {
                code: node.code.clone(),
                type_code: node.type_code.clone(),
                root: root.clone(),
                datasets: node.datasets.clone(),
            });
            stack.extend(node.children.iter().rev().copied());
        }
        walk
    }

    pub fn commit(&mut self, walk: &RootWalk) {
        self.visited.extend(walk.expanded.iter().cloned());
    }

    /// `explore` followed by `commit`.
    pub fn walk_root(&mut self, root: &SampleCode) -> Result<Vec<DiscoveredSample>, KiraError> {
        let walk = self.explore(root)?;
        self.commit(&walk);
        Ok(walk.samples)
    }

    pub fn walk_tree(&mut self, root: &SampleCode, tree: &SampleTree) -> Vec<DiscoveredSample> {
        let walk = self.explore_tree(root, tree);
        self.commit(&walk);
        walk.samples
    }

    /// Walks every root, stopping at the first error.
    pub fn discover(&mut self, roots: &[SampleCode]) -> Result<Vec<DiscoveredSample>, KiraError> {
        let mut samples = Vec::new();
        for root in roots {
            samples.extend(self.walk_root(root)?);
        }
        Ok(samples)
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }
}

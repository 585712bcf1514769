use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{AppError, Result};
use crate::models::Node;

/// Flat id-indexed store of the workspace nodes. Parent links are plain ids,
/// so a parent that no longer exists is representable and simply fails to
/// resolve.
#[derive(Debug, Default, Clone)]
pub struct NodeTree {
    nodes: HashMap<String, Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let mut tree = Self::new();
        for node in nodes {
            tree.add(node).map_err(|e| AppError::State(e.to_string()))?;
        }
        Ok(tree)
    }

    pub fn add(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(AppError::Conflict(format!("node id {} already exists", node.id)));
        }
        if let Some(existing) = self.find_by_path(&node.path) {
            return Err(AppError::Conflict(format!(
                "path {} is already used by node {}",
                node.path, existing.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn require(&self, id: &str) -> Result<&Node> {
        self.get(id)
            .ok_or_else(|| AppError::NotFound(format!("node {id}")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Node> {
        let needle = normalize_path(path);
        self.nodes.values().find(|n| normalize_path(&n.path) == needle)
    }

    /// All nodes, oldest first.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        nodes
    }

    pub fn children_of(&self, id: &str) -> Vec<&Node> {
        let mut children: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// Parent chain of `id`, nearest first. Stops at the first parent id that
    /// does not resolve.
    pub fn ancestors_of(&self, id: &str) -> Vec<&Node> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());
        let mut current = self.get(id).and_then(|n| n.parent_id.as_deref());
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.to_string()) {
                break;
            }
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            chain.push(parent);
            current = parent.parent_id.as_deref();
        }
        chain
    }

    /// Ids of `id` and all of its descendants, every node listed after all of
    /// its own descendants.
    pub fn subtree_leaves_first(&self, id: &str) -> Result<Vec<String>> {
        self.require(id)?;
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id.to_string());
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.children_of(&current) {
                queue.push_back(child.id.clone());
            }
            order.push(current);
        }
        order.reverse();
        Ok(order)
    }

    /// Remove `id` with its whole subtree, returning the removed nodes
    /// leaves-first.
    pub fn remove_subtree(&mut self, id: &str) -> Result<Vec<Node>> {
        let order = self.subtree_leaves_first(id)?;
        Ok(self.remove_nodes(&order))
    }

    pub fn remove_nodes(&mut self, ids: &[String]) -> Vec<Node> {
        ids.iter().filter_map(|id| self.nodes.remove(id)).collect()
    }
}

/// Case- and separator-insensitive form used for path identity.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .trim_start_matches("\\\\?\\")
        .replace('/', "\\")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::NodeStatus;

    fn node(id: &str, parent: Option<&str>, age: i64) -> Node {
        Node {
            id: id.into(),
            parent_id: parent.map(Into::into),
            name: id.into(),
            path: format!("C:\\ws\\{id}.vhdx"),
            bcd_guid: None,
            desc: None,
            created_at: Utc::now() - Duration::seconds(100 - age),
            status: NodeStatus::Normal,
            boot_files_ready: false,
        }
    }

    fn sample() -> NodeTree {
        // base -> a -> a1
        //      -> b
        // other
        NodeTree::from_nodes(vec![
            node("base", None, 0),
            node("a", Some("base"), 1),
            node("b", Some("base"), 2),
            node("a1", Some("a"), 3),
            node("other", None, 4),
        ])
        .unwrap()
    }

    #[test]
    fn add_rejects_duplicate_id_and_path() {
        let mut tree = sample();
        let err = tree.add(node("a", None, 9)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let mut same_path = node("fresh", None, 9);
        same_path.path = "c:/WS/a.vhdx".into();
        let err = tree.add(same_path).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn add_tolerates_dangling_parent() {
        let mut tree = NodeTree::new();
        tree.add(node("orphan", Some("gone"), 0)).unwrap();
        assert!(tree.ancestors_of("orphan").is_empty());
    }

    #[test]
    fn duplicate_rows_on_load_are_state_errors() {
        let err = NodeTree::from_nodes(vec![node("x", None, 0), node("x", None, 1)]).unwrap_err();
        assert!(matches!(err, AppError::State(_)));
    }

    #[test]
    fn subtree_lists_every_node_after_its_descendants() {
        let tree = sample();
        let order = tree.subtree_leaves_first("base").unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a1") < pos("a"));
        assert!(pos("a") < pos("base"));
        assert!(pos("b") < pos("base"));
        assert!(!order.contains(&"other".to_string()));
    }

    #[test]
    fn remove_subtree_leaves_no_orphans() {
        let mut tree = sample();
        let removed = tree.remove_subtree("a").unwrap();
        let ids: Vec<_> = removed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a"]);
        for n in tree.nodes() {
            if let Some(parent) = &n.parent_id {
                assert!(tree.contains(parent), "{} lost its parent", n.id);
            }
        }
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn remove_subtree_of_unknown_node_is_not_found() {
        let mut tree = sample();
        assert!(matches!(
            tree.remove_subtree("nope"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let tree = sample();
        let chain: Vec<_> = tree.ancestors_of("a1").iter().map(|n| n.id.clone()).collect();
        assert_eq!(chain, vec!["a", "base"]);
        let children: Vec<_> = tree.children_of("base").iter().map(|n| n.id.clone()).collect();
        assert_eq!(children, vec!["a", "b"]);
    }

    #[test]
    fn ancestors_terminate_on_a_cycle() {
        let mut tree = NodeTree::new();
        tree.add(node("x", Some("y"), 0)).unwrap();
        tree.add(node("y", Some("x"), 1)).unwrap();
        let chain: Vec<_> = tree.ancestors_of("x").iter().map(|n| n.id.clone()).collect();
        assert_eq!(chain, vec!["y"]);
    }
}

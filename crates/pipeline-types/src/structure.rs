//! Folder/file tree snapshot of a container's keys.

use serde::{Deserialize, Serialize};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// A node in the container structure tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Folder,
            children: Some(Vec::new()),
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            children: None,
        }
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children
            .as_ref()
            .and_then(|children| children.iter().find(|c| c.name == name))
    }

    /// Count file nodes below (and including) this node.
    pub fn file_count(&self) -> usize {
        match (&self.kind, &self.children) {
            (NodeKind::File, _) => 1,
            (NodeKind::Folder, Some(children)) => children.iter().map(TreeNode::file_count).sum(),
            (NodeKind::Folder, None) => 0,
        }
    }

    fn insert_path(&mut self, path: &str) {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let ends_with_slash = path.ends_with('/');
        let mut current = self;

        for (i, part) in parts.iter().enumerate() {
            let is_file = i == parts.len() - 1 && !ends_with_slash;
            let children = current.children.get_or_insert_with(Vec::new);
            let position = match children.iter().position(|c| c.name == *part) {
                Some(pos) => pos,
                None => {
                    children.push(if is_file {
                        TreeNode::file(*part)
                    } else {
                        TreeNode::folder(*part)
                    });
                    children.len() - 1
                }
            };
            current = &mut children[position];
        }
    }
}

/// Build a tree from `/`-separated object keys under a named root folder.
///
/// Keys ending in `/` produce folders. Children keep first-seen order.
pub fn build_tree<I, S>(root_name: &str, keys: I) -> TreeNode
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut root = TreeNode::folder(root_name);
    for key in keys {
        root.insert_path(key.as_ref());
    }
    root
}

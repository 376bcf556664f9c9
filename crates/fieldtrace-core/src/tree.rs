//! Folding path-addressed fragments into a single response tree.
//!
//! Children are matched by segment equality with a linear scan, so each
//! operation costs depth × branching. Nothing here is synchronized; callers
//! own the tree exclusively while folding.

use crate::path::Path;
use crate::trace::Node;
use serde::{Deserialize, Serialize};

/// Scalar data reported for one resolved field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub original_field_name: String,
    pub field_type: String,
    pub parent_type: String,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
}

impl NodeData {
    fn apply_to(&self, node: &mut Node) {
        node.original_field_name.clone_from(&self.original_field_name);
        node.field_type.clone_from(&self.field_type);
        node.parent_type.clone_from(&self.parent_type);
        node.start_time_ns = self.start_time_ns;
        node.end_time_ns = self.end_time_ns;
    }
}

/// Returns the node at `path`, creating any missing nodes along the way.
///
/// Created nodes carry only their segment; scalar fields stay empty until a
/// [`merge`] fills them in.
pub fn locate<'a>(root: &'a mut Node, path: &Path) -> &'a mut Node {
    let mut node = root;
    for segment in path.segments() {
        let position = node
            .children
            .iter()
            .position(|c| c.id.as_ref() == Some(segment));
        let idx = match position {
            Some(idx) => idx,
            None => {
                node.children.push(Node::with_id(segment.clone()));
                node.children.len() - 1
            }
        };
        node = &mut node.children[idx];
    }
    node
}

/// Copies `data` into the node at `path`, keeping its children and errors.
pub fn merge(root: &mut Node, path: &Path, data: &NodeData) {
    data.apply_to(locate(root, path));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Segment;
    use crate::trace::NodeError;

    fn data(name: &str, start: u64) -> NodeData {
        NodeData {
            original_field_name: name.to_string(),
            field_type: "Int!".to_string(),
            parent_type: "User".to_string(),
            start_time_ns: start,
            end_time_ns: start + 10,
        }
    }

    #[test]
    fn test_locate_creates_one_level_per_segment() {
        let mut root = Node::root();
        let path = Path::root().field("a").index(0).field("b").index(7);

        locate(&mut root, &path);

        let mut node = &root;
        for segment in path.segments() {
            assert_eq!(node.children.len(), 1);
            node = &node.children[0];
            assert_eq!(node.id.as_ref(), Some(segment));
        }
        assert!(node.children.is_empty());
        assert_eq!(root.descendant_count(), 4);
    }

    #[test]
    fn test_locate_root_path_returns_root() {
        let mut root = Node::root();
        locate(&mut root, &Path::root()).errors.push(NodeError {
            message: "boom".into(),
            ..Default::default()
        });
        assert_eq!(root.errors.len(), 1);
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_index_and_field_never_cross_match() {
        let mut root = Node::root();
        locate(&mut root, &Path::new(vec![Segment::Field("0".into())]));
        locate(&mut root, &Path::new(vec![Segment::Index(0)]));

        assert_eq!(root.children.len(), 2);
        assert!(root.child(&Segment::Field("0".into())).is_some());
        assert!(root.child(&Segment::Index(0)).is_some());
    }

    #[test]
    fn test_merge_preserves_children_and_errors() {
        let mut root = Node::root();
        let users = Path::root().field("users");

        locate(&mut root, &users).errors.push(NodeError {
            message: "partial".into(),
            ..Default::default()
        });
        merge(&mut root, &users.clone().index(0).field("id"), &data("id", 5));
        merge(&mut root, &users, &data("users", 1));

        let node = root.descend(&users).unwrap();
        assert_eq!(node.original_field_name, "users");
        assert_eq!(node.start_time_ns, 1);
        assert_eq!(node.errors.len(), 1);
        assert_eq!(node.children.len(), 1);
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_second_merge_wins_without_duplicating() {
        let mut root = Node::root();
        let path = Path::root().field("echo");

        merge(&mut root, &path, &data("echo", 1));
        merge(&mut root, &path, &data("echo", 42));

        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].start_time_ns, 42);
    }
}

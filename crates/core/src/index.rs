//! Line-offset index of a text file.
//!
//! While a file is scanned chunk by chunk, the start of the last line seen in
//! each chunk is appended to a [`NodeChain`]. Once the scan is done the chain
//! is turned into a balanced binary search tree keyed by line number with
//! [`chain_to_bst`], so that the nearest indexed line at or before any target
//! line is found in `O(log(chunk count))`.

use std::cmp::Ordering;

/// A known `(line, byte offset)` pair.
///
/// While part of a chain only `right` is used, as the link to the next node.
/// After [`chain_to_bst`] `left` and `right` are the tree children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub line: u64,
    pub offset: u64,
    left: Option<Box<IndexNode>>,
    right: Option<Box<IndexNode>>,
}

impl IndexNode {
    pub fn new(line: u64, offset: u64) -> Self {
        Self {
            line,
            offset,
            left: None,
            right: None,
        }
    }

    pub fn left(&self) -> Option<&IndexNode> {
        self.left.as_deref()
    }

    pub fn right(&self) -> Option<&IndexNode> {
        self.right.as_deref()
    }
}

/// The growing chain of index nodes, with strictly increasing lines.
///
/// Nodes are collected in scan order and linked through `right` when the chain
/// is handed over with [`NodeChain::into_head`].
#[derive(Debug)]
pub struct NodeChain {
    nodes: Vec<IndexNode>,
}

impl NodeChain {
    /// Starts a chain with the implicit first line of every file, `(0, 0)`.
    pub fn new() -> Self {
        Self {
            nodes: vec![IndexNode::new(0, 0)],
        }
    }

    /// Appends a node unless it repeats the line of the last node.
    ///
    /// A single line spanning several chunks reports the same start for each of
    /// them; only the first report is kept. Returns whether a node was added.
    pub fn push(&mut self, line: u64, offset: u64) -> bool {
        if line <= self.tail_line() {
            return false;
        }

        self.nodes.push(IndexNode::new(line, offset));
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tail_line(&self) -> u64 {
        self.nodes.last().map_or(0, |node| node.line)
    }

    /// Links the nodes into a list through `right` and returns its head.
    pub fn into_head(self) -> Option<Box<IndexNode>> {
        self.nodes.into_iter().rev().fold(None, |next, mut node| {
            node.right = next;
            Some(Box::new(node))
        })
    }
}

impl Default for NodeChain {
    fn default() -> Self {
        Self::new()
    }
}

fn chain_len(mut node: Option<&IndexNode>) -> usize {
    let mut len = 0;
    while let Some(current) = node {
        len += 1;
        node = current.right.as_deref();
    }
    len
}

/// Converts a chain linked through `right` into a balanced search tree.
///
/// The middle node of the chain becomes the root, the part before it is split
/// the same way into the left subtree and the part after it into the right
/// subtree. The resulting depth is `ceil(log2(len + 1))`.
pub fn chain_to_bst(head: Option<Box<IndexNode>>) -> Option<Box<IndexNode>> {
    let len = chain_len(head.as_deref());
    split_middle(head, len)
}

/// Detaches and returns everything after the first `count` nodes.
fn detach_after(head: &mut IndexNode, count: usize) -> Option<Box<IndexNode>> {
    let mut node = head;
    for _ in 1..count {
        node = node.right.as_deref_mut()?;
    }
    node.right.take()
}

fn split_middle(head: Option<Box<IndexNode>>, len: usize) -> Option<Box<IndexNode>> {
    let mut head = head?;
    if len <= 1 {
        head.right = None;
        return Some(head);
    }

    let middle_at = len / 2;
    let Some(mut middle) = detach_after(&mut head, middle_at) else {
        return Some(head);
    };
    let after_middle = middle.right.take();

    middle.left = split_middle(Some(head), middle_at);
    middle.right = split_middle(after_middle, len - middle_at - 1);
    Some(middle)
}

/// The installed index of one file.
#[derive(Debug)]
pub struct LineIndex {
    root: Box<IndexNode>,
    node_count: usize,
    total_lines: u64,
}

impl LineIndex {
    /// Builds the search tree from a finished chain.
    pub fn from_chain(chain: NodeChain, total_lines: u64) -> Self {
        let node_count = chain.len();
        let root = chain_to_bst(chain.into_head())
            .unwrap_or_else(|| Box::new(IndexNode::new(0, 0)));

        Self {
            root,
            node_count,
            total_lines,
        }
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn root(&self) -> &IndexNode {
        &self.root
    }

    /// Finds the indexed node with the greatest line not after `line`.
    ///
    /// The first line is always indexed, so a node is always found.
    pub fn floor(&self, line: u64) -> &IndexNode {
        let mut best: Option<&IndexNode> = None;
        let mut node = Some(self.root.as_ref());

        while let Some(current) = node {
            match current.line.cmp(&line) {
                Ordering::Equal => return current,
                Ordering::Less => {
                    best = Some(current);
                    node = current.right();
                }
                Ordering::Greater => node = current.left(),
            }
        }

        best.unwrap_or_else(|| self.first())
    }

    fn first(&self) -> &IndexNode {
        let mut node = self.root.as_ref();
        while let Some(left) = node.left() {
            node = left;
        }
        node
    }

    /// All nodes as `(line, offset)` in increasing line order.
    pub fn nodes(&self) -> Vec<(u64, u64)> {
        let mut nodes = Vec::with_capacity(self.node_count);
        let mut stack: Vec<&IndexNode> = Vec::new();
        let mut node = Some(self.root.as_ref());

        while node.is_some() || !stack.is_empty() {
            while let Some(current) = node {
                stack.push(current);
                node = current.left();
            }
            if let Some(current) = stack.pop() {
                nodes.push((current.line, current.offset));
                node = current.right();
            }
        }

        nodes
    }

    /// Number of levels of the tree.
    pub fn depth(&self) -> usize {
        fn depth_of(node: Option<&IndexNode>) -> usize {
            match node {
                None => 0,
                Some(node) => 1 + depth_of(node.left()).max(depth_of(node.right())),
            }
        }
        depth_of(Some(&self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(lines: &[(u64, u64)]) -> NodeChain {
        let mut chain = NodeChain::new();
        for &(line, offset) in lines {
            chain.push(line, offset);
        }
        chain
    }

    #[test]
    fn test_chain_starts_with_first_line() {
        let chain = NodeChain::new();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tail_line(), 0);
    }

    #[test]
    fn test_chain_skips_repeated_line() {
        let mut chain = NodeChain::new();
        assert!(chain.push(10, 100));
        assert!(!chain.push(10, 100));
        assert!(!chain.push(3, 30));
        assert!(chain.push(11, 200));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_chain_to_bst_single_node() {
        let root = chain_to_bst(NodeChain::new().into_head()).unwrap();
        assert_eq!((root.line, root.offset), (0, 0));
        assert!(root.left().is_none());
        assert!(root.right().is_none());
    }

    #[test]
    fn test_chain_to_bst_empty() {
        assert!(chain_to_bst(None).is_none());
    }

    #[test]
    fn test_chain_to_bst_three_nodes_is_balanced() {
        let chain = chain_of(&[(5, 50), (9, 90)]);
        let root = chain_to_bst(chain.into_head()).unwrap();
        assert_eq!(root.line, 5);
        assert_eq!(root.left().unwrap().line, 0);
        assert_eq!(root.right().unwrap().line, 9);
    }

    #[test]
    fn test_bst_in_order_and_depth() {
        for count in 1..200u64 {
            let lines: Vec<(u64, u64)> = (1..count).map(|i| (i * 7, i * 700)).collect();
            let index = LineIndex::from_chain(chain_of(&lines), count * 7);

            let mut expected = vec![(0, 0)];
            expected.extend(lines.iter().copied());
            assert_eq!(index.nodes(), expected);

            let n = usize::try_from(count).unwrap();
            let max_depth = (usize::BITS - n.leading_zeros()) as usize;
            assert!(
                index.depth() <= max_depth,
                "{count} nodes gave depth {}",
                index.depth()
            );
        }
    }

    #[test]
    fn test_floor_exact_and_between() {
        let index = LineIndex::from_chain(chain_of(&[(10, 100), (20, 250), (30, 400)]), 35);

        assert_eq!(index.floor(0).offset, 0);
        assert_eq!(index.floor(9).line, 0);
        assert_eq!(index.floor(10).offset, 100);
        assert_eq!(index.floor(19).line, 10);
        assert_eq!(index.floor(20).offset, 250);
        assert_eq!(index.floor(34).line, 30);
        assert_eq!(index.floor(1_000).line, 30);
    }

    #[test]
    fn test_floor_is_independent_of_query_order() {
        let lines: Vec<(u64, u64)> = (1..64u64).map(|i| (i * 3, i * 1_000)).collect();
        let index = LineIndex::from_chain(chain_of(&lines), 200);

        for &(line, offset) in lines.iter().rev() {
            assert_eq!(index.floor(line).offset, offset);
        }
        for &(line, offset) in &lines {
            assert_eq!(index.floor(line).offset, offset);
            assert_eq!(index.floor(line + 1).offset, offset);
        }
    }
}

//! Control-flow graph of a feed-forward classifier.
//!
//! The graph is a single chain: an entry node, then alternating affine
//! layers and activation nodes, ending at the output layer. Every node has at
//! most one predecessor and one successor, which is all the forward and
//! backward walks need. Construction goes through [`CfgBuilder`] in execution
//! order; node ids are dense indices into that order.

use core_expr::{LinExpr, Variable};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Entry,
    /// One affine layer: simultaneous assignments whose left-hand variables
    /// never occur on the right-hand side of the same node.
    Assign(Vec<(Variable, LinExpr)>),
    /// One ReLU activation with its statement variable.
    Relu(Variable),
}

#[derive(Clone, Debug)]
pub struct Cfg {
    kinds: Vec<NodeKind>,
}

impl Cfg {
    pub fn node(&self, id: NodeId) -> &NodeKind {
        &self.kinds[id.0]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn entry(&self) -> NodeId {
        NodeId(0)
    }

    pub fn out_node(&self) -> NodeId {
        NodeId(self.kinds.len() - 1)
    }

    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        (id.0 > 0).then(|| NodeId(id.0 - 1))
    }

    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        (id.0 + 1 < self.kinds.len()).then(|| NodeId(id.0 + 1))
    }

    /// Ids in execution order, entry first.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.kinds.len()).map(NodeId)
    }

    pub fn relu_nodes(&self) -> BTreeSet<NodeId> {
        self.ids()
            .filter(|id| matches!(self.node(*id), NodeKind::Relu(_)))
            .collect()
    }
}

#[derive(Debug)]
pub struct CfgBuilder {
    kinds: Vec<NodeKind>,
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CfgBuilder {
    pub fn new() -> Self {
        Self {
            kinds: vec![NodeKind::Entry],
        }
    }

    pub fn assign(&mut self, stmts: Vec<(Variable, LinExpr)>) -> NodeId {
        debug_assert!(
            stmts
                .iter()
                .all(|(lhs, _)| stmts.iter().all(|(_, rhs)| rhs.coefficient(lhs) == 0.0)),
            "layer outputs must not feed the same layer"
        );
        self.push(NodeKind::Assign(stmts))
    }

    pub fn relu(&mut self, var: Variable) -> NodeId {
        self.push(NodeKind::Relu(var))
    }

    pub fn build(self) -> Cfg {
        Cfg { kinds: self.kinds }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.kinds.len());
        self.kinds.push(kind);
        id
    }
}

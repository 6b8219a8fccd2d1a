use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ExecutorError;

use super::handler::NodeHandler;
use super::state::WorkflowState;

/// Pure, synchronous test over the current state.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&WorkflowState) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, state: &WorkflowState) -> bool {
        (self.0)(state)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Start,
    End,
    Task,
    /// Branch point; outgoing conditional edges decide where to go.
    Condition,
    /// Runs every branch concurrently on its own state copy, then continues
    /// at `join` once all of them reached it.
    ParallelSplit { branches: Vec<String>, join: String },
    /// Entering the node counts one iteration; entry number
    /// `max_iterations + 1` fails the run. When `condition` holds after the
    /// handler, the node is re-entered directly.
    Loop {
        max_iterations: u32,
        condition: Option<Predicate>,
    },
    /// Nested graph run on the current state; its changes merge back.
    Subgraph(Arc<WorkflowGraph>),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Task => "task",
            Self::Condition => "condition",
            Self::ParallelSplit { .. } => "parallel_split",
            Self::Loop { .. } => "loop",
            Self::Subgraph(_) => "subgraph",
        }
    }
}

#[derive(Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub handler: Option<Arc<dyn NodeHandler>>,
    /// Opaque per-node settings, handed to the handler.
    pub config: BTreeMap<String, Value>,
    pub timeout: Option<Duration>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            handler: None,
            config: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::End)
    }

    pub fn task(id: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        Self::new(id, NodeKind::Task).with_handler(handler)
    }

    pub fn condition(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Condition)
    }

    pub fn parallel<I, S>(id: impl Into<String>, branches: I, join: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            id,
            NodeKind::ParallelSplit {
                branches: branches.into_iter().map(Into::into).collect(),
                join: join.into(),
            },
        )
    }

    pub fn looping(id: impl Into<String>, max_iterations: u32, condition: Option<Predicate>) -> Self {
        Self::new(
            id,
            NodeKind::Loop {
                max_iterations,
                condition,
            },
        )
    }

    pub fn subgraph(id: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self::new(id, NodeKind::Subgraph(Arc::new(graph)))
    }

    pub fn with_handler(mut self, handler: Arc<dyn NodeHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_handler", &self.handler.is_some())
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Normal,
    /// Followed only when the predicate holds.
    Conditional,
    /// Back-edge into a loop node; the predicate, if any, gates it.
    LoopBack,
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub predicate: Option<Predicate>,
    pub label: Option<String>,
}

impl GraphEdge {
    pub fn normal(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Normal,
            predicate: None,
            label: None,
        }
    }

    pub fn conditional(from: impl Into<String>, to: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            kind: EdgeKind::Conditional,
            predicate: Some(predicate),
            ..Self::normal(from, to)
        }
    }

    pub fn loop_back(from: impl Into<String>, to: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            kind: EdgeKind::LoopBack,
            predicate,
            ..Self::normal(from, to)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether a walk standing on `from` takes this edge.
    pub fn is_taken(&self, state: &WorkflowState) -> bool {
        match (self.kind, &self.predicate) {
            (EdgeKind::Normal, _) => true,
            (_, Some(predicate)) => predicate.evaluate(state),
            (EdgeKind::LoopBack, None) => true,
            (EdgeKind::Conditional, None) => false,
        }
    }
}

/// Non-fatal findings from [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A non-branching node has several unconditional successors; the walk
    /// will fork into all of them.
    AmbiguousNormalEdges { node_id: String, targets: Vec<String> },
    UnreachableNode { node_id: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousNormalEdges { node_id, targets } => write!(
                f,
                "node '{}' has {} unconditional successors: {}",
                node_id,
                targets.len(),
                targets.join(", ")
            ),
            Self::UnreachableNode { node_id } => {
                write!(f, "node '{node_id}' is not reachable from the start node")
            }
        }
    }
}

/// Declared workflow: nodes plus edges, walked by the graph runner.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    name: String,
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(mut self, node: GraphNode) -> Self {
        self.index.entry(node.id.clone()).or_insert(self.nodes.len());
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, edge: GraphEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.add_edge(GraphEdge::normal(from, to))
    }

    pub fn conditional_edge(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        self.add_edge(GraphEdge::conditional(from, to, predicate))
    }

    pub fn loop_back(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        predicate: Option<Predicate>,
    ) -> Self {
        self.add_edge(GraphEdge::loop_back(from, to, predicate))
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn start_node(&self) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| matches!(n.kind, NodeKind::Start))
    }

    /// Successors of `node` for the given state, in edge declaration order.
    ///
    /// A loop node whose condition holds re-enters itself instead of following
    /// its edges. Parallel splits are handled by the runner, not here.
    pub fn next_nodes(&self, node: &GraphNode, state: &WorkflowState) -> Vec<String> {
        if let NodeKind::Loop {
            condition: Some(condition),
            ..
        } = &node.kind
        {
            if condition.evaluate(state) {
                return vec![node.id.clone()];
            }
        }

        let mut next: Vec<String> = Vec::new();
        for edge in self.outgoing(&node.id) {
            if edge.is_taken(state) && !next.contains(&edge.to) {
                next.push(edge.to.clone());
            }
        }
        next
    }

    /// Structural checks; errors make the graph unrunnable, warnings do not.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ExecutorError> {
        let invalid = |msg: String| ExecutorError::InvalidGraph(format!("{}: {}", self.name, msg));

        if self.index.len() != self.nodes.len() {
            let mut seen = HashSet::new();
            for node in &self.nodes {
                if !seen.insert(node.id.as_str()) {
                    return Err(invalid(format!("duplicate node id '{}'", node.id)));
                }
            }
        }

        let starts: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Start))
            .map(|n| n.id.as_str())
            .collect();
        let start = match starts.as_slice() {
            [only] => *only,
            [] => return Err(invalid("no start node".into())),
            many => return Err(invalid(format!("multiple start nodes: {}", many.join(", ")))),
        };

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if self.get(endpoint).is_none() {
                    return Err(invalid(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.from, edge.to, endpoint
                    )));
                }
            }
            match edge.kind {
                EdgeKind::Conditional if edge.predicate.is_none() => {
                    return Err(invalid(format!(
                        "conditional edge {} -> {} has no predicate",
                        edge.from, edge.to
                    )));
                }
                EdgeKind::LoopBack => {
                    let target = self.get(&edge.to).map(|n| &n.kind);
                    if !matches!(target, Some(NodeKind::Loop { .. })) {
                        return Err(invalid(format!(
                            "loop-back edge {} -> {} must target a loop node",
                            edge.from, edge.to
                        )));
                    }
                }
                _ => {}
            }
        }

        for node in &self.nodes {
            match &node.kind {
                NodeKind::ParallelSplit { branches, join } => {
                    if branches.is_empty() {
                        return Err(invalid(format!("parallel split '{}' has no branches", node.id)));
                    }
                    for id in branches.iter().chain(std::iter::once(join)) {
                        if self.get(id).is_none() {
                            return Err(invalid(format!(
                                "parallel split '{}' references unknown node '{}'",
                                node.id, id
                            )));
                        }
                    }
                }
                NodeKind::Loop { max_iterations: 0, .. } => {
                    return Err(invalid(format!("loop '{}' allows zero iterations", node.id)));
                }
                NodeKind::Subgraph(inner) => {
                    inner.validate().map_err(|e| match e {
                        ExecutorError::InvalidGraph(msg) => {
                            invalid(format!("subgraph '{}': {}", node.id, msg))
                        }
                        other => other,
                    })?;
                }
                _ => {}
            }
        }

        let reachable = self.reachable_from(start);
        let reaches_end = self
            .nodes
            .iter()
            .any(|n| matches!(n.kind, NodeKind::End) && reachable.contains(n.id.as_str()));
        if !reaches_end {
            return Err(invalid("no end node is reachable from the start node".into()));
        }

        let mut warnings = Vec::new();
        for node in &self.nodes {
            if !reachable.contains(node.id.as_str()) {
                warnings.push(ValidationWarning::UnreachableNode {
                    node_id: node.id.clone(),
                });
            }
            if matches!(node.kind, NodeKind::Condition | NodeKind::ParallelSplit { .. }) {
                continue;
            }
            let targets: Vec<String> = self
                .outgoing(&node.id)
                .filter(|e| e.kind == EdgeKind::Normal)
                .map(|e| e.to.clone())
                .collect();
            if targets.len() > 1 {
                warnings.push(ValidationWarning::AmbiguousNormalEdges {
                    node_id: node.id.clone(),
                    targets,
                });
            }
        }

        Ok(warnings)
    }

    fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.outgoing(id) {
                queue.push_back(edge.to.as_str());
            }
            if let Some(NodeKind::ParallelSplit { branches, join }) = self.get(id).map(|n| &n.kind) {
                queue.extend(branches.iter().map(String::as_str));
                queue.push_back(join.as_str());
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::handler::handler_fn;
    use crate::workflow::state::HandlerOutput;

    fn noop() -> Arc<dyn NodeHandler> {
        handler_fn(|_state| async { Ok(HandlerOutput::Unchanged) })
    }

    fn linear() -> WorkflowGraph {
        WorkflowGraph::new("linear")
            .add_node(GraphNode::start("start"))
            .add_node(GraphNode::task("work", noop()))
            .add_node(GraphNode::end("end"))
            .edge("start", "work")
            .edge("work", "end")
    }

    fn message(err: ExecutorError) -> String {
        match err {
            ExecutorError::InvalidGraph(msg) => msg,
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn valid_linear_graph_has_no_warnings() {
        assert_eq!(linear().validate().unwrap(), vec![]);
    }

    #[test]
    fn missing_start_is_rejected() {
        let graph = WorkflowGraph::new("g").add_node(GraphNode::end("end"));
        assert!(message(graph.validate().unwrap_err()).contains("no start node"));
    }

    #[test]
    fn duplicate_start_is_rejected() {
        let graph = linear().add_node(GraphNode::start("start2")).edge("start2", "end");
        assert!(message(graph.validate().unwrap_err()).contains("multiple start nodes"));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let graph = linear().add_node(GraphNode::task("work", noop()));
        assert!(message(graph.validate().unwrap_err()).contains("duplicate node id 'work'"));
    }

    #[test]
    fn unreachable_end_is_rejected() {
        let graph = WorkflowGraph::new("g")
            .add_node(GraphNode::start("start"))
            .add_node(GraphNode::task("work", noop()))
            .add_node(GraphNode::end("end"))
            .edge("start", "work");
        assert!(message(graph.validate().unwrap_err()).contains("no end node is reachable"));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let graph = linear().edge("work", "ghost");
        assert!(message(graph.validate().unwrap_err()).contains("unknown node 'ghost'"));
    }

    #[test]
    fn loop_back_must_target_loop() {
        let graph = linear().loop_back("work", "start", None);
        assert!(message(graph.validate().unwrap_err()).contains("must target a loop node"));
    }

    #[test]
    fn conditional_edge_needs_predicate() {
        let mut edge = GraphEdge::conditional("work", "end", Predicate::new(|_| true));
        edge.predicate = None;
        let graph = linear().add_edge(edge);
        assert!(message(graph.validate().unwrap_err()).contains("has no predicate"));
    }

    #[test]
    fn multiple_normal_edges_warn() {
        let graph = linear()
            .add_node(GraphNode::task("other", noop()))
            .edge("work", "other")
            .edge("other", "end");
        let warnings = graph.validate().unwrap();
        assert_eq!(
            warnings,
            vec![ValidationWarning::AmbiguousNormalEdges {
                node_id: "work".into(),
                targets: vec!["end".into(), "other".into()],
            }]
        );
    }

    #[test]
    fn unreachable_node_warns() {
        let graph = linear().add_node(GraphNode::task("orphan", noop()));
        assert_eq!(
            graph.validate().unwrap(),
            vec![ValidationWarning::UnreachableNode {
                node_id: "orphan".into()
            }]
        );
    }

    #[test]
    fn parallel_split_references_are_checked() {
        let graph = linear().add_node(GraphNode::parallel("fork", ["work", "missing"], "end"));
        assert!(message(graph.validate().unwrap_err()).contains("unknown node 'missing'"));
    }

    #[test]
    fn next_nodes_follow_predicates_in_declaration_order() {
        let graph = WorkflowGraph::new("g")
            .add_node(GraphNode::start("start"))
            .add_node(GraphNode::condition("check"))
            .add_node(GraphNode::end("hi"))
            .add_node(GraphNode::end("lo"))
            .edge("start", "check")
            .conditional_edge("check", "hi", Predicate::new(|s| s.get_as::<i64>("x").unwrap_or(0) > 5))
            .conditional_edge("check", "lo", Predicate::new(|s| s.get_as::<i64>("x").unwrap_or(0) <= 5));

        let check = graph.get("check").unwrap();
        let high = WorkflowState::from_values([("x", serde_json::json!(9))]);
        let low = WorkflowState::from_values([("x", serde_json::json!(1))]);
        assert_eq!(graph.next_nodes(check, &high), vec!["hi"]);
        assert_eq!(graph.next_nodes(check, &low), vec!["lo"]);
    }

    #[test]
    fn invalid_subgraph_is_reported_with_context() {
        let inner = WorkflowGraph::new("inner").add_node(GraphNode::end("end"));
        let graph = WorkflowGraph::new("outer")
            .add_node(GraphNode::start("start"))
            .add_node(GraphNode::subgraph("nested", inner))
            .add_node(GraphNode::end("end"))
            .edge("start", "nested")
            .edge("nested", "end");
        let msg = message(graph.validate().unwrap_err());
        assert!(msg.contains("subgraph 'nested'"));
        assert!(msg.contains("no start node"));
    }
}

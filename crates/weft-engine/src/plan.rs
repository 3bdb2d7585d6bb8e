use std::collections::{HashMap, VecDeque};

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{WorkflowDefinition, START_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Taken,
    Pruned,
}

/// Readiness bookkeeping for one run of one definition.
///
/// Every node waits for all of its incoming edges to be resolved. It becomes
/// ready when at least one of them was taken, and unreachable otherwise.
/// Unreachable nodes prune their own outgoing edges, so pruning flows
/// transitively down a dead branch without dispatching anything.
///
/// The start node is queued up front and never waits: edges into it are
/// resolved like any other edge but do not count towards its readiness.
#[derive(Debug)]
pub struct ExecutionPlan {
    start: usize,
    node_ids: Vec<String>,
    index: HashMap<String, usize>,
    /// (source, target) per edge, by edge position.
    edges: Vec<(usize, usize)>,
    /// Routing tag per edge, by edge position.
    tags: Vec<Option<bool>>,
    outgoing: Vec<Vec<usize>>,
    pending: Vec<usize>,
    taken_in: Vec<usize>,
    edge_state: Vec<EdgeState>,
    ready: VecDeque<usize>,
    skipped: VecDeque<usize>,
}

impl ExecutionPlan {
    /// Validate `definition` and index it. The start node is queued.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self> {
        definition.validate()?;

        let node_ids: Vec<String> = definition.nodes.iter().map(|n| n.id.clone()).collect();
        let index: HashMap<String, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let start = definition
            .nodes
            .iter()
            .position(|n| n.node_type == START_TYPE)
            .ok_or_else(|| WeftError::Definition("no start node".into()))?;

        let mut outgoing = vec![Vec::new(); node_ids.len()];
        let mut pending = vec![0usize; node_ids.len()];
        let mut edges = Vec::with_capacity(definition.edges.len());
        let mut tags = Vec::with_capacity(definition.edges.len());

        for (position, edge) in definition.edges.iter().enumerate() {
            let (source, target) = match (index.get(&edge.source), index.get(&edge.target)) {
                (Some(s), Some(t)) => (*s, *t),
                _ => {
                    return Err(WeftError::Definition(format!(
                        "edge '{}' references an unknown node",
                        edge.id
                    )))
                }
            };
            outgoing[source].push(position);
            if target != start {
                pending[target] += 1;
            }
            edges.push((source, target));
            tags.push(edge.condition_tag());
        }

        let mut plan = Self {
            start,
            taken_in: vec![0; node_ids.len()],
            edge_state: vec![EdgeState::Pending; edges.len()],
            ready: VecDeque::from([start]),
            skipped: VecDeque::new(),
            node_ids,
            index,
            edges,
            tags,
            outgoing,
            pending,
        };

        // Nodes nothing points at can never run.
        let orphans: Vec<usize> = (0..plan.node_ids.len())
            .filter(|&i| i != start && plan.pending[i] == 0)
            .collect();
        for node in orphans {
            plan.mark_unreachable(node);
        }

        Ok(plan)
    }

    /// Next node to dispatch, in readiness order.
    pub fn next_ready(&mut self) -> Option<&str> {
        let node = self.ready.pop_front()?;
        Some(&self.node_ids[node])
    }

    /// Resolve the outgoing edges of a finished node.
    ///
    /// `branch` is the boolean result of a successful condition node; edges
    /// are then taken only when their tag matches it. With `None` every
    /// outgoing edge is taken.
    pub fn resolve(&mut self, node_id: &str, branch: Option<bool>) {
        let Some(&node) = self.index.get(node_id) else {
            return;
        };
        for position in self.outgoing[node].clone() {
            let taken = match branch {
                Some(result) => self.tags[position] == Some(result),
                None => true,
            };
            self.settle_edge(position, taken);
        }
    }

    /// Nodes found unreachable since the last call, in discovery order.
    pub fn drain_skipped(&mut self) -> Vec<String> {
        self.skipped
            .drain(..)
            .map(|i| self.node_ids[i].clone())
            .collect()
    }

    /// Whether nothing is left to dispatch.
    pub fn is_drained(&self) -> bool {
        self.ready.is_empty()
    }

    fn settle_edge(&mut self, position: usize, taken: bool) {
        if self.edge_state[position] != EdgeState::Pending {
            return;
        }
        self.edge_state[position] = if taken {
            EdgeState::Taken
        } else {
            EdgeState::Pruned
        };

        let target = self.edges[position].1;
        if target == self.start {
            return;
        }
        self.pending[target] -= 1;
        if taken {
            self.taken_in[target] += 1;
        }
        if self.pending[target] == 0 {
            if self.taken_in[target] > 0 {
                self.ready.push_back(target);
            } else {
                self.mark_unreachable(target);
            }
        }
    }

    fn mark_unreachable(&mut self, node: usize) {
        let mut work = vec![node];
        while let Some(current) = work.pop() {
            self.skipped.push_back(current);
            for &position in &self.outgoing[current] {
                if self.edge_state[position] != EdgeState::Pending {
                    continue;
                }
                self.edge_state[position] = EdgeState::Pruned;
                let target = self.edges[position].1;
                if target == self.start {
                    continue;
                }
                self.pending[target] -= 1;
                if self.pending[target] == 0 {
                    if self.taken_in[target] > 0 {
                        self.ready.push_back(target);
                    } else {
                        work.push(target);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::workflow::{Edge, Node};

    fn definition(nodes: &[(&str, &str)], edges: Vec<Edge>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf", "Test");
        def.nodes = nodes.iter().map(|(id, ty)| Node::new(*id, *ty)).collect();
        def.edges = edges;
        def
    }

    fn drive(plan: &mut ExecutionPlan, branches: &HashMap<&str, bool>) -> (Vec<String>, Vec<String>) {
        let mut ran = Vec::new();
        let mut skipped = plan.drain_skipped();
        while let Some(id) = plan.next_ready().map(str::to_string) {
            plan.resolve(&id, branches.get(id.as_str()).copied());
            skipped.extend(plan.drain_skipped());
            ran.push(id);
        }
        (ran, skipped)
    }

    #[test]
    fn test_linear_order() {
        let def = definition(
            &[("s", "start"), ("a", "variable_set"), ("e", "end")],
            vec![Edge::new("s", "a"), Edge::new("a", "e")],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::new());
        assert_eq!(ran, vec!["s", "a", "e"]);
        assert!(skipped.is_empty());
        assert!(plan.is_drained());
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let def = definition(&[("a", "variable_set"), ("e", "end")], vec![Edge::new("a", "e")]);
        assert!(matches!(
            ExecutionPlan::build(&def).unwrap_err(),
            WeftError::Definition(_)
        ));
    }

    #[test]
    fn test_condition_prunes_other_branch_and_join_runs() {
        // s → c → (true) a → j → e
        //       → (false) b → j
        let def = definition(
            &[
                ("s", "start"),
                ("c", "condition"),
                ("a", "variable_set"),
                ("b", "variable_set"),
                ("j", "variable_set"),
                ("e", "end"),
            ],
            vec![
                Edge::new("s", "c"),
                Edge::conditional("c", "a", true),
                Edge::conditional("c", "b", false),
                Edge::new("a", "j"),
                Edge::new("b", "j"),
                Edge::new("j", "e"),
            ],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::from([("c", true)]));
        assert_eq!(ran, vec!["s", "c", "a", "j", "e"]);
        assert_eq!(skipped, vec!["b"]);
    }

    #[test]
    fn test_pruning_is_transitive() {
        // s → c → (false) x → y → e2
        //       → (true) e
        let def = definition(
            &[
                ("s", "start"),
                ("c", "condition"),
                ("x", "variable_set"),
                ("y", "variable_set"),
                ("e", "end"),
                ("e2", "end"),
            ],
            vec![
                Edge::new("s", "c"),
                Edge::conditional("c", "x", false),
                Edge::new("x", "y"),
                Edge::new("y", "e2"),
                Edge::conditional("c", "e", true),
            ],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, mut skipped) = drive(&mut plan, &HashMap::from([("c", true)]));
        assert_eq!(ran, vec!["s", "c", "e"]);
        skipped.sort();
        assert_eq!(skipped, vec!["e2", "x", "y"]);
    }

    #[test]
    fn test_untagged_edge_after_condition_is_pruned() {
        let def = definition(
            &[("s", "start"), ("c", "condition"), ("a", "variable_set"), ("e", "end")],
            vec![
                Edge::new("s", "c"),
                Edge::new("c", "a"),
                Edge::conditional("c", "e", false),
            ],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::from([("c", false)]));
        assert_eq!(ran, vec!["s", "c", "e"]);
        assert_eq!(skipped, vec!["a"]);
    }

    #[test]
    fn test_failed_condition_takes_every_edge() {
        let def = definition(
            &[("s", "start"), ("c", "condition"), ("a", "variable_set"), ("b", "variable_set"), ("e", "end")],
            vec![
                Edge::new("s", "c"),
                Edge::conditional("c", "a", true),
                Edge::conditional("c", "b", false),
                Edge::new("a", "e"),
                Edge::new("b", "e"),
            ],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::new());
        assert_eq!(ran, vec!["s", "c", "a", "b", "e"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_orphans_are_skipped_up_front() {
        let def = definition(
            &[("s", "start"), ("o", "variable_set"), ("e", "end")],
            vec![Edge::new("s", "e"), Edge::new("o", "e")],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::new());
        assert_eq!(skipped, vec!["o"]);
        assert_eq!(ran, vec!["s", "e"]);
    }

    #[test]
    fn test_edge_into_start_does_not_hold_it_back() {
        // o → s → a → e, with o an orphan
        let def = definition(
            &[("s", "start"), ("a", "variable_set"), ("e", "end"), ("o", "variable_set")],
            vec![Edge::new("s", "a"), Edge::new("a", "e"), Edge::new("o", "s")],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, skipped) = drive(&mut plan, &HashMap::new());
        assert_eq!(ran, vec!["s", "a", "e"]);
        assert_eq!(skipped, vec!["o"]);
    }

    #[test]
    fn test_fan_out_runs_in_edge_order() {
        let def = definition(
            &[("s", "start"), ("a", "variable_set"), ("b", "variable_set"), ("e", "end")],
            vec![
                Edge::new("s", "a"),
                Edge::new("s", "b"),
                Edge::new("a", "e"),
                Edge::new("b", "e"),
            ],
        );
        let mut plan = ExecutionPlan::build(&def).unwrap();
        let (ran, _) = drive(&mut plan, &HashMap::new());
        assert_eq!(ran, vec!["s", "a", "b", "e"]);
    }
}

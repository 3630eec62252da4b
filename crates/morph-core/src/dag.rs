use crate::error::ValidationError;
use crate::types::StepId;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Dependency graph over the steps of one plan
///
/// Edges run from a dependency to its dependent, so a topological order is
/// a valid execution order.
#[derive(Debug, Clone)]
pub struct StepGraph {
    ids: Vec<StepId>,
    index: HashMap<StepId, usize>,
    inner: DiGraphMap<usize, ()>,
}

impl StepGraph {
    /// Build and validate the graph from `(step, depends_on)` pairs
    ///
    /// # Errors
    /// Duplicate ids, unknown dependencies, self-dependencies and cycles are
    /// all rejected.
    pub fn build<'a, I>(steps: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a StepId, &'a BTreeSet<StepId>)>,
    {
        let steps: Vec<(&StepId, &BTreeSet<StepId>)> = steps.into_iter().collect();
        let mut ids = Vec::with_capacity(steps.len());
        let mut index = HashMap::with_capacity(steps.len());
        let mut inner = DiGraphMap::new();

        for (id, _) in &steps {
            if index.insert((*id).clone(), ids.len()).is_some() {
                return Err(ValidationError::DuplicateStep((*id).clone()));
            }
            inner.add_node(ids.len());
            ids.push((*id).clone());
        }

        for (id, depends_on) in &steps {
            let to = index[*id];
            for dependency in depends_on.iter() {
                if dependency == *id {
                    return Err(ValidationError::SelfDependency((*id).clone()));
                }
                let from = *index.get(dependency).ok_or_else(|| {
                    ValidationError::UnknownDependency {
                        step: (*id).clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                inner.add_edge(from, to, ());
            }
        }

        let graph = Self { ids, index, inner };
        graph.topological_order()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Steps in a valid execution order
    pub fn topological_order(&self) -> Result<Vec<StepId>, ValidationError> {
        toposort(&self.inner, None)
            .map(|order| order.into_iter().map(|i| self.ids[i].clone()).collect())
            .map_err(|cycle| ValidationError::CycleDetected(self.ids[cycle.node_id()].clone()))
    }

    /// Steps that directly depend on `step`
    pub fn dependents(&self, step: &StepId) -> Vec<StepId> {
        self.neighbors(step, Direction::Outgoing)
    }

    /// Steps `step` directly depends on
    pub fn dependencies(&self, step: &StepId) -> Vec<StepId> {
        self.neighbors(step, Direction::Incoming)
    }

    /// Steps with no dependencies
    pub fn entry_steps(&self) -> Vec<StepId> {
        self.inner
            .nodes()
            .filter(|n| {
                self.inner
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.ids[n].clone())
            .collect()
    }

    fn neighbors(&self, step: &StepId, direction: Direction) -> Vec<StepId> {
        let Some(&node) = self.index.get(step) else {
            return Vec::new();
        };
        self.inner
            .neighbors_directed(node, direction)
            .map(|n| self.ids[n].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[&str]) -> BTreeSet<StepId> {
        ids.iter().map(|s| StepId::new(*s)).collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let a = StepId::new("a");
        let b = StepId::new("b");
        let c = StepId::new("c");
        let (da, db, dc) = (deps(&[]), deps(&["a"]), deps(&["a", "b"]));
        let graph = StepGraph::build([(&c, &dc), (&b, &db), (&a, &da)]).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |s: &StepId| order.iter().position(|x| x == s).unwrap();
        assert!(pos(&a) < pos(&b));
        assert!(pos(&b) < pos(&c));
        assert_eq!(graph.entry_steps(), vec![a.clone()]);
        assert_eq!(graph.dependents(&a).len(), 2);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn rejects_two_step_cycle() {
        let s1 = StepId::new("step1");
        let s2 = StepId::new("step2");
        let (d1, d2) = (deps(&["step2"]), deps(&["step1"]));
        let err = StepGraph::build([(&s1, &d1), (&s2, &d2)]).unwrap_err();
        assert!(matches!(err, ValidationError::CycleDetected(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let s1 = StepId::new("step1");
        let d1 = deps(&["ghost"]);
        assert!(matches!(
            StepGraph::build([(&s1, &d1)]),
            Err(ValidationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_self_dependency() {
        let s1 = StepId::new("step1");
        let d1 = deps(&["step1"]);
        assert_eq!(
            StepGraph::build([(&s1, &d1)]).unwrap_err(),
            ValidationError::SelfDependency(s1.clone())
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let s1 = StepId::new("step1");
        let d = deps(&[]);
        assert!(matches!(
            StepGraph::build([(&s1, &d), (&s1, &d)]),
            Err(ValidationError::DuplicateStep(_))
        ));
    }
}

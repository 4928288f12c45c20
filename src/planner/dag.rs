use crate::error::PlanValidationError;
use crate::planner::PlanStep;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Validated dependency graph over a plan's steps.
///
/// Nodes are addressed by declaration index so that every ordering the graph
/// produces is reproducible from the plan alone.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(steps: &[PlanStep]) -> Result<Self, PlanValidationError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(PlanValidationError::EmptyStepId);
            }
            if index.insert(step.id.clone(), position).is_some() {
                return Err(PlanValidationError::DuplicateStepId(step.id.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); steps.len()];
        let mut dependents = vec![Vec::new(); steps.len()];
        for (position, step) in steps.iter().enumerate() {
            let mut seen = BTreeSet::new();
            for dependency in &step.depends_on {
                let Some(&from) = index.get(dependency) else {
                    return Err(PlanValidationError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if !seen.insert(from) {
                    return Err(PlanValidationError::Malformed(format!(
                        "duplicate dependency: {} -> {}",
                        dependency, step.id
                    )));
                }
                dependencies[position].push(from);
                dependents[from].push(position);
            }
        }

        for list in &mut dependents {
            list.sort_unstable();
        }

        let graph = Self {
            ids: steps.iter().map(|step| step.id.clone()).collect(),
            index,
            dependencies,
            dependents,
        };

        let members = graph.cycle_members();
        if !members.is_empty() {
            return Err(PlanValidationError::Cycle {
                members: members.into_iter().map(|node| graph.ids[node].clone()).collect(),
            });
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Groups steps into levels by repeated removal of steps whose
    /// dependencies are resolved (Kahn's algorithm). Level order within a
    /// level follows declaration order.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut remaining = self
            .dependencies
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>();
        let mut current = (0..self.ids.len())
            .filter(|&node| remaining[node] == 0)
            .collect::<Vec<_>>();

        let mut levels = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &node in &current {
                for &dependent in &self.dependents[node] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            levels.push(current.iter().map(|&node| self.ids[node].clone()).collect());
            current = next;
        }

        levels
    }

    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&node| {
            self.dependencies[node]
                .iter()
                .map(|&dep| self.ids[dep].as_str())
                .collect()
        })
    }

    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&node| {
            self.dependents[node]
                .iter()
                .map(|&dep| self.ids[dep].as_str())
                .collect()
        })
    }

    /// Every step reachable downstream of `id`, in declaration order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let Some(&root) = self.index.get(id) else {
            return Vec::new();
        };

        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            for &dependent in &self.dependents[node] {
                if reached.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        reached
            .into_iter()
            .map(|node| self.ids[node].clone())
            .collect()
    }

    /// Nodes that sit on at least one cycle: members of a strongly connected
    /// component with more than one node, or nodes depending on themselves.
    fn cycle_members(&self) -> Vec<usize> {
        let mut search = Tarjan::new(&self.dependents);
        for node in 0..self.ids.len() {
            if search.index[node].is_none() {
                search.visit(node);
            }
        }

        let mut members = search
            .components
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&node| self.dependents[node].contains(&node))
            })
            .flatten()
            .collect::<Vec<_>>();
        members.sort_unstable();
        members
    }
}

struct Tarjan<'a> {
    adjacency: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(adjacency: &'a [Vec<usize>]) -> Self {
        let len = adjacency.len();
        Self {
            adjacency,
            index: vec![None; len],
            lowlink: vec![0; len],
            on_stack: vec![false; len],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.next_index);
        self.lowlink[node] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let adjacency = self.adjacency;
        for &neighbor in &adjacency[node] {
            match self.index[neighbor] {
                None => {
                    self.visit(neighbor);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[neighbor]);
                }
                Some(neighbor_index) if self.on_stack[neighbor] => {
                    self.lowlink[node] = self.lowlink[node].min(neighbor_index);
                }
                Some(_) => {}
            }
        }

        if self.index[node] == Some(self.lowlink[node]) {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

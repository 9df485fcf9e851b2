use std::collections::HashMap;

use crate::domain::magnet::Calculation;
use crate::engine::expression::Expression;
use crate::errors::EngineError;

/// Identity and outgoing references of one calculation, as seen by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalculationNode<'a> {
    pub id: &'a str,
    pub depends_on: Vec<&'a str>,
    /// Every identifier in the formula; names that are not calculation ids are inputs.
    pub references: Vec<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Clone, Debug, Default)]
pub struct DependencyScheduler;

impl DependencyScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Orders calculations so every calculation follows the ones it references.
    pub fn order(&self, calculations: &[Calculation]) -> Result<Vec<Calculation>, EngineError> {
        let expressions = calculations
            .iter()
            .map(|calculation| Expression::formula(&calculation.formula))
            .collect::<Result<Vec<_>, _>>()?;
        let nodes = calculations
            .iter()
            .zip(&expressions)
            .map(|(calculation, expression)| CalculationNode {
                id: &calculation.id,
                depends_on: calculation.depends_on.iter().map(String::as_str).collect(),
                references: expression.references(),
            })
            .collect::<Vec<_>>();

        Ok(self
            .order_nodes(&nodes)?
            .into_iter()
            .map(|index| calculations[index].clone())
            .collect())
    }

    /// Depth-first topological sort returning node indices.
    ///
    /// Roots are visited in declaration order and edges in `depends_on`-then-formula order, so
    /// independent calculations keep their declared relative order and the result is identical
    /// for identical input.
    pub fn order_nodes(&self, nodes: &[CalculationNode<'_>]) -> Result<Vec<usize>, EngineError> {
        let index_by_id =
            nodes.iter().enumerate().map(|(index, node)| (node.id, index)).collect::<HashMap<_, _>>();

        let mut edges = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut targets: Vec<usize> = Vec::new();
            for dependency in &node.depends_on {
                let Some(&target) = index_by_id.get(dependency) else {
                    return Err(EngineError::UnknownDependency {
                        calculation: node.id.to_string(),
                        dependency: dependency.to_string(),
                    });
                };
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            for reference in &node.references {
                if let Some(&target) = index_by_id.get(reference) {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
            }
            edges.push(targets);
        }

        let mut marks = vec![Mark::Unvisited; nodes.len()];
        let mut ordered = Vec::with_capacity(nodes.len());
        let mut path = Vec::new();
        for root in 0..nodes.len() {
            visit(root, nodes, &edges, &mut marks, &mut path, &mut ordered)?;
        }
        Ok(ordered)
    }
}

fn visit(
    index: usize,
    nodes: &[CalculationNode<'_>],
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    ordered: &mut Vec<usize>,
) -> Result<(), EngineError> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            // Back edge: the cycle is the path suffix starting at the revisited node.
            let start = path.iter().position(|&entry| entry == index).unwrap_or(0);
            let mut ids =
                path[start..].iter().map(|&entry| nodes[entry].id.to_string()).collect::<Vec<_>>();
            ids.push(nodes[index].id.to_string());
            return Err(EngineError::CyclicDependency { ids });
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::InProgress;
    path.push(index);
    for &target in &edges[index] {
        visit(target, nodes, edges, marks, path, ordered)?;
    }
    path.pop();
    marks[index] = Mark::Done;
    ordered.push(index);
    Ok(())
}

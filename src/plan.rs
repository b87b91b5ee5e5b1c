//! Plan module: compile the sorted graph into executable steps.
//!
//! Singleton groups become block-wise steps. A feedback group becomes one
//! step whose units are advanced a sample at a time, in a fixed order, with
//! every input inside the loop reading the previous sample.

use crate::graph::{Graph, NodeKey};
use crate::invariant_ppt::{check_invariant, FEEDBACK_SAMPLE_MODE, PLAN_SOUNDNESS};
use crate::port::Mode;
use crate::rack::Vertex;
use serde::{Deserialize, Serialize};

/// How inputs inside a feedback loop are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPolicy {
    /// Loop inputs switch to sample mode; the loop is advanced per sample.
    #[default]
    SampleAccurate,
    /// Loop inputs stay in block mode; feedback arrives one block late.
    BlockDelayed,
}

/// One execution step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Process the whole block in one call.
    Single(NodeKey),
    /// Advance every member one sample at a time.
    Group(Vec<NodeKey>),
}

/// The compiled plan: steps in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Compile a plan from the graph's current sort, updating input modes.
    pub fn build(graph: &mut Graph<Vertex>, policy: FeedbackPolicy) -> Self {
        let groups = graph.sort().to_vec();
        let mut steps = Vec::with_capacity(groups.len());

        for group in &groups {
            let feedback = group.len() > 1;
            let mode = if feedback && policy == FeedbackPolicy::SampleAccurate {
                Mode::Sample
            } else {
                Mode::Block
            };

            let mut units = Vec::new();
            for &key in group {
                match graph.get(key) {
                    Some(Vertex::Unit { unit, .. }) if unit.is_schedulable() => units.push(key),
                    Some(&Vertex::Input { owner, index }) => {
                        if let Some(input) = Vertex::input_mut(graph, owner, index) {
                            input.set_mode(mode);
                        }
                    }
                    _ => {}
                }
            }

            match units.len() {
                0 => {}
                1 if !feedback || mode == Mode::Block => steps.push(Step::Single(units[0])),
                _ if mode == Mode::Block => steps.extend(units.into_iter().map(Step::Single)),
                _ => steps.push(Step::Group(units)),
            }
        }

        check_invariant(
            FEEDBACK_SAMPLE_MODE,
            policy == FeedbackPolicy::BlockDelayed
                || groups.iter().filter(|g| g.len() > 1).all(|g| {
                    g.iter().all(|&k| match graph.get(k) {
                        Some(&Vertex::Input { owner, index }) => {
                            Vertex::input(graph, owner, index).map(|i| i.mode()) == Some(Mode::Sample)
                        }
                        _ => true,
                    })
                }),
            "Inputs inside a feedback loop read the previous sample",
        );
        check_invariant(
            PLAN_SOUNDNESS,
            steps.iter().all(|s| match s {
                Step::Single(_) => true,
                Step::Group(members) => !members.is_empty(),
            }),
            "Plan steps are non-empty",
        );

        Self { steps }
    }

    /// The steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step against one block.
    pub fn execute(&self, graph: &mut Graph<Vertex>, block_size: usize) {
        for step in &self.steps {
            match step {
                Step::Single(key) => {
                    if let Some(Vertex::Unit { unit, .. }) = graph.get_mut(*key) {
                        unit.process_block(block_size);
                    }
                }
                Step::Group(members) => {
                    for i in 0..block_size {
                        for &key in members {
                            if let Some(Vertex::Unit { unit, .. }) = graph.get_mut(key) {
                                unit.process_sample(i);
                            }
                        }
                    }
                }
            }
        }
    }
}

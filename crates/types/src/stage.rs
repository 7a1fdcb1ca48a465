use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named step in an operation's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Validation,
    Preparation,
    CampaignCreation,
    AdGroupCreation,
    KeywordCreation,
    AdCreation,
    Verification,
    Completion,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Validation,
        Stage::Preparation,
        Stage::CampaignCreation,
        Stage::AdGroupCreation,
        Stage::KeywordCreation,
        Stage::AdCreation,
        Stage::Verification,
        Stage::Completion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "VALIDATION",
            Stage::Preparation => "PREPARATION",
            Stage::CampaignCreation => "CAMPAIGN_CREATION",
            Stage::AdGroupCreation => "AD_GROUP_CREATION",
            Stage::KeywordCreation => "KEYWORD_CREATION",
            Stage::AdCreation => "AD_CREATION",
            Stage::Verification => "VERIFICATION",
            Stage::Completion => "COMPLETION",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Fixed forward order of stages for one operation type.
///
/// Stages are kept in topological order; `edges` lists the allowed forward
/// transitions. A linear graph only allows stepping to the next stage, extra
/// edges turn it into a DAG that can skip optional stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StageGraphRepr", into = "StageGraphRepr")]
pub struct StageGraph {
    stages: Vec<Stage>,
    edges: HashSet<(Stage, Stage)>,
}

/// Wire form of a [`StageGraph`]; decoding re-runs the graph checks
#[derive(Serialize, Deserialize)]
struct StageGraphRepr {
    stages: Vec<Stage>,
    edges: Vec<(Stage, Stage)>,
}

impl TryFrom<StageGraphRepr> for StageGraph {
    type Error = StageGraphError;

    fn try_from(repr: StageGraphRepr) -> Result<Self, Self::Error> {
        let mut graph = StageGraph::linear(repr.stages)?;
        graph.edges.clear();
        repr.edges
            .into_iter()
            .try_fold(graph, |graph, (from, to)| graph.with_edge(from, to))
    }
}

impl From<StageGraph> for StageGraphRepr {
    fn from(graph: StageGraph) -> Self {
        let mut edges: Vec<_> = graph.edges.into_iter().collect();
        edges.sort();
        Self {
            stages: graph.stages,
            edges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageGraphError {
    #[error("stage graph must contain at least one stage")]
    Empty,

    #[error("stage {0} appears more than once")]
    Duplicate(Stage),

    #[error("edge {from} -> {to} references a stage outside the graph")]
    UnknownStage { from: Stage, to: Stage },

    #[error("edge {from} -> {to} does not point forward")]
    BackwardEdge { from: Stage, to: Stage },
}

impl StageGraph {
    /// Build a chain where each stage may only advance to the next one
    pub fn linear(stages: impl IntoIterator<Item = Stage>) -> Result<Self, StageGraphError> {
        let stages: Vec<Stage> = stages.into_iter().collect();
        if stages.is_empty() {
            return Err(StageGraphError::Empty);
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(*stage) {
                return Err(StageGraphError::Duplicate(*stage));
            }
        }

        let edges = stages.windows(2).map(|w| (w[0], w[1])).collect();
        Ok(Self { stages, edges })
    }

    /// Allow an additional forward transition
    pub fn with_edge(mut self, from: Stage, to: Stage) -> Result<Self, StageGraphError> {
        match (self.position(from), self.position(to)) {
            (Some(a), Some(b)) if a < b => {
                self.edges.insert((from, to));
                Ok(self)
            }
            (Some(_), Some(_)) => Err(StageGraphError::BackwardEdge { from, to }),
            _ => Err(StageGraphError::UnknownStage { from, to }),
        }
    }

    /// The full campaign-clone lifecycle
    pub fn campaign_clone() -> Self {
        Self {
            edges: Stage::ALL.windows(2).map(|w| (w[0], w[1])).collect(),
            stages: Stage::ALL.to_vec(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn first(&self) -> Stage {
        self.stages[0]
    }

    pub fn last(&self) -> Stage {
        self.stages[self.stages.len() - 1]
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn position(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|s| *s == stage)
    }

    pub fn is_adjacent(&self, from: Stage, to: Stage) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn is_terminal(&self, stage: Stage) -> bool {
        self.contains(stage) && !self.edges.iter().any(|(from, _)| *from == stage)
    }

    /// True when `a` comes strictly before `b` in the graph order
    pub fn precedes(&self, a: Stage, b: Stage) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::campaign_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_graph_adjacency() {
        let graph = StageGraph::linear([Stage::Validation, Stage::Preparation, Stage::Completion])
            .unwrap();

        assert_eq!(graph.first(), Stage::Validation);
        assert_eq!(graph.last(), Stage::Completion);
        assert!(graph.is_adjacent(Stage::Validation, Stage::Preparation));
        assert!(!graph.is_adjacent(Stage::Validation, Stage::Completion));
        assert!(!graph.is_adjacent(Stage::Preparation, Stage::Validation));
        assert!(graph.is_terminal(Stage::Completion));
        assert!(!graph.is_terminal(Stage::Validation));
    }

    #[test]
    fn test_dag_edge_allows_skip() {
        let graph = StageGraph::linear([Stage::Validation, Stage::Preparation, Stage::Completion])
            .unwrap()
            .with_edge(Stage::Validation, Stage::Completion)
            .unwrap();

        assert!(graph.is_adjacent(Stage::Validation, Stage::Completion));
        assert!(graph.is_adjacent(Stage::Validation, Stage::Preparation));
    }

    #[test]
    fn test_graph_rejects_backward_and_unknown_edges() {
        let graph = StageGraph::linear([Stage::Validation, Stage::Completion]).unwrap();

        assert_eq!(
            graph.clone().with_edge(Stage::Completion, Stage::Validation),
            Err(StageGraphError::BackwardEdge {
                from: Stage::Completion,
                to: Stage::Validation
            })
        );
        assert!(matches!(
            graph.with_edge(Stage::Validation, Stage::AdCreation),
            Err(StageGraphError::UnknownStage { .. })
        ));
    }

    #[test]
    fn test_graph_rejects_empty_and_duplicates() {
        assert_eq!(
            StageGraph::linear(Vec::<Stage>::new()),
            Err(StageGraphError::Empty)
        );
        assert_eq!(
            StageGraph::linear([Stage::Validation, Stage::Validation]),
            Err(StageGraphError::Duplicate(Stage::Validation))
        );
    }

    #[test]
    fn test_deserialize_validates_graph() {
        let graph = StageGraph::linear([Stage::Validation, Stage::Preparation, Stage::Completion])
            .unwrap()
            .with_edge(Stage::Validation, Stage::Completion)
            .unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        assert_eq!(serde_json::from_str::<StageGraph>(&json).unwrap(), graph);

        let empty = r#"{"stages":[],"edges":[]}"#;
        assert!(serde_json::from_str::<StageGraph>(empty).is_err());

        let backward = r#"{"stages":["VALIDATION","COMPLETION"],"edges":[["COMPLETION","VALIDATION"]]}"#;
        assert!(serde_json::from_str::<StageGraph>(backward).is_err());

        let duplicate = r#"{"stages":["VALIDATION","VALIDATION"],"edges":[]}"#;
        assert!(serde_json::from_str::<StageGraph>(duplicate).is_err());
    }

    #[test]
    fn test_stage_string_round_trip() {
        assert_eq!(Stage::AdGroupCreation.to_string(), "AD_GROUP_CREATION");
        assert_eq!("ad_group_creation".parse::<Stage>().unwrap(), Stage::AdGroupCreation);
        assert!("LAUNCH".parse::<Stage>().is_err());
    }

    #[test]
    fn test_campaign_clone_order() {
        let graph = StageGraph::campaign_clone();
        assert!(graph.precedes(Stage::CampaignCreation, Stage::KeywordCreation));
        assert!(!graph.precedes(Stage::Completion, Stage::Validation));
        assert_eq!(graph.stages().len(), 8);
    }
}

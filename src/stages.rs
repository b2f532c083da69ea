use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// One discrete unit of simulated work in the cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    pub simulated_duration: Duration,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, simulated_duration: Duration) -> Self {
        Self {
            name: name.into(),
            simulated_duration,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Stage definition table is empty")]
    EmptyStageTable,
    #[error("Stage at position {index} has a blank name")]
    BlankStageName { index: usize },
    #[error("Stage name '{name}' appears more than once")]
    DuplicateStageName { name: String },
}

/// Ordered, read-only stage sequence. Once built it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTable {
    stages: Vec<StageDescriptor>,
}

impl StageTable {
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::EmptyStageTable);
        }

        let mut seen = HashSet::new();
        for (index, stage) in stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(ConfigurationError::BlankStageName { index });
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigurationError::DuplicateStageName {
                    name: stage.name.clone(),
                });
            }
        }

        Ok(Self { stages })
    }

    /// The five-step hybrid manufacturing cell: transport, position, print, transfer, machine
    pub fn hybrid_cell() -> Self {
        Self {
            stages: vec![
                StageDescriptor::new("transport", Duration::from_secs(2)),
                StageDescriptor::new("position", Duration::from_secs(1)),
                StageDescriptor::new("print", Duration::from_secs(5)),
                StageDescriptor::new("transfer", Duration::from_secs(2)),
                StageDescriptor::new("machine", Duration::from_secs(4)),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a constructed table, kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StageDescriptor> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.simulated_duration).sum()
    }
}

impl<'a> IntoIterator for &'a StageTable {
    type Item = &'a StageDescriptor;
    type IntoIter = std::slice::Iter<'a, StageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_rejected() {
        assert_eq!(
            StageTable::new(Vec::new()),
            Err(ConfigurationError::EmptyStageTable)
        );
    }

    #[test]
    fn test_blank_and_duplicate_names_rejected() {
        let blank = StageTable::new(vec![
            StageDescriptor::new("transport", Duration::from_secs(1)),
            StageDescriptor::new("  ", Duration::from_secs(1)),
        ]);
        assert_eq!(blank, Err(ConfigurationError::BlankStageName { index: 1 }));

        let duplicate = StageTable::new(vec![
            StageDescriptor::new("print", Duration::from_secs(1)),
            StageDescriptor::new("print", Duration::from_secs(2)),
        ]);
        assert_eq!(
            duplicate,
            Err(ConfigurationError::DuplicateStageName {
                name: "print".to_string()
            })
        );
    }

    #[test]
    fn test_identical_input_gives_identical_table() {
        let build = || {
            StageTable::new(StageTable::hybrid_cell().iter().cloned().collect()).unwrap()
        };
        let first = build();
        let second = build();

        assert_eq!(first, second);
        assert_eq!(first.names(), second.names());
        let durations = |t: &StageTable| t.iter().map(|s| s.simulated_duration).collect::<Vec<_>>();
        assert_eq!(durations(&first), durations(&second));
    }

    #[test]
    fn test_hybrid_cell_order() {
        let table = StageTable::hybrid_cell();
        assert_eq!(
            table.names(),
            vec!["transport", "position", "print", "transfer", "machine"]
        );
        assert_eq!(table.total_duration(), Duration::from_secs(14));
        assert_eq!(table.get(2).map(|s| s.name.as_str()), Some("print"));
        assert!(table.get(5).is_none());
    }
}

//! Resolution of condition labels into a two-group cell assignment

use std::fmt;

use crate::data::CellMetadata;
use crate::error::InputError;

/// Sentinel for "every cell not in condition A"
pub const COMPLEMENT_SENTINEL: &str = "rest";

/// One side of the comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    A,
    B,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::A => write!(f, "A"),
            Group::B => write!(f, "B"),
        }
    }
}

/// The B side of the comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionB {
    /// All cells that are not labelled A
    Rest,
    /// Cells carrying any of these labels
    Labels(Vec<String>),
}

impl ConditionB {
    /// Parse `rest` or a comma separated label list
    ///
    /// Blank entries are dropped; an all-blank input yields an empty label list.
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == COMPLEMENT_SENTINEL {
            return ConditionB::Rest;
        }
        ConditionB::Labels(
            raw.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            ConditionB::Rest => true,
            ConditionB::Labels(labels) => labels.iter().any(|l| l == value),
        }
    }
}

impl fmt::Display for ConditionB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionB::Rest => write!(f, "{}", COMPLEMENT_SENTINEL),
            ConditionB::Labels(labels) => write!(f, "{}", labels.join(",")),
        }
    }
}

/// Participating cells and their group tags
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionAssignment {
    /// Column indices into the dataset matrix, in dataset order
    cells: Vec<usize>,
    /// Group tag for each entry of `cells`
    groups: Vec<Group>,
}

impl ConditionAssignment {
    /// Build an assignment from parallel vectors
    pub fn new(cells: Vec<usize>, groups: Vec<Group>) -> Result<Self, InputError> {
        if cells.len() != groups.len() {
            return Err(InputError::InvalidArgument {
                name: "groups".to_string(),
                reason: format!("{} cells but {} group tags", cells.len(), groups.len()),
            });
        }
        for group in [Group::A, Group::B] {
            if !groups.contains(&group) {
                return Err(InputError::EmptyGroup {
                    group: group.to_string(),
                });
            }
        }
        Ok(Self { cells, groups })
    }

    /// Dataset column indices of the participating cells
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    /// Group tag per participating cell
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Positions (within the assignment) of the cells in `group`
    pub fn positions(&self, group: Group) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == group)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn group_size(&self, group: Group) -> usize {
        self.groups.iter().filter(|&&g| g == group).count()
    }
}

/// Assign cells to groups A and B from a metadata column
pub fn resolve_conditions(
    cell_metadata: &CellMetadata,
    column: &str,
    label_a: &str,
    condition_b: &ConditionB,
) -> Result<ConditionAssignment, InputError> {
    let values = cell_metadata.column(column)?;

    let mut cells = Vec::new();
    let mut groups = Vec::new();
    for (idx, value) in values.iter().enumerate() {
        if value == label_a {
            cells.push(idx);
            groups.push(Group::A);
        } else if condition_b.matches(value) {
            cells.push(idx);
            groups.push(Group::B);
        }
    }

    let assignment = ConditionAssignment::new(cells, groups)?;
    log::info!(
        "Resolved '{}': {} cells in A ({}), {} cells in B ({})",
        column,
        assignment.group_size(Group::A),
        label_a,
        assignment.group_size(Group::B),
        condition_b
    );
    Ok(assignment)
}

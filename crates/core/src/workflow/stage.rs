use serde::{Deserialize, Serialize};

use crate::permissions::Domain;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Happycall,
    Measure,
    Drawing,
    Confirm,
    Production,
    Construction,
    Cs,
    Completed,
    As,
}

/// Fulfillment sequence. `As` sits outside it as a side branch.
pub const MAIN_LINE: [Stage; 9] = [
    Stage::Received,
    Stage::Happycall,
    Stage::Measure,
    Stage::Drawing,
    Stage::Confirm,
    Stage::Production,
    Stage::Construction,
    Stage::Cs,
    Stage::Completed,
];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Happycall => "HAPPYCALL",
            Self::Measure => "MEASURE",
            Self::Drawing => "DRAWING",
            Self::Confirm => "CONFIRM",
            Self::Production => "PRODUCTION",
            Self::Construction => "CONSTRUCTION",
            Self::Cs => "CS",
            Self::Completed => "COMPLETED",
            Self::As => "AS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Some(Self::Received),
            "HAPPYCALL" => Some(Self::Happycall),
            "MEASURE" => Some(Self::Measure),
            "DRAWING" => Some(Self::Drawing),
            "CONFIRM" => Some(Self::Confirm),
            "PRODUCTION" => Some(Self::Production),
            "CONSTRUCTION" => Some(Self::Construction),
            "CS" => Some(Self::Cs),
            "COMPLETED" => Some(Self::Completed),
            "AS" => Some(Self::As),
            _ => None,
        }
    }

    /// Index on the main line; `None` for the AS branch.
    pub fn position(&self) -> Option<usize> {
        MAIN_LINE.iter().position(|stage| stage == self)
    }

    pub fn next(&self) -> Option<Stage> {
        self.position().and_then(|index| MAIN_LINE.get(index + 1).copied())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Domain whose members may move an order out of this stage.
    pub fn domain(&self) -> Domain {
        match self {
            Self::Received | Self::Confirm => Domain::Sales,
            Self::Happycall | Self::Cs | Self::Completed => Domain::Cs,
            Self::Measure => Domain::Measurement,
            Self::Drawing => Domain::Drawing,
            Self::Production => Domain::Production,
            Self::Construction => Domain::Construction,
            Self::As => Domain::As,
        }
    }

    /// True when the order has moved strictly beyond `other` on the main line.
    pub fn is_past(&self, other: Stage) -> bool {
        match (self.position(), other.position()) {
            (Some(current), Some(reference)) => current > reference,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Advance,
    Skip,
    Rollback,
    EnterAs,
    ExitAs,
}

impl TransitionKind {
    /// Whether the move may happen without a manager forcing it.
    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Advance | Self::EnterAs | Self::ExitAs)
    }

    /// Whether the current stage's quest must be complete for a regular move.
    /// Entering AS counts: leaving an unfinished quest behind needs force.
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::Advance | Self::EnterAs | Self::ExitAs)
    }
}

/// Classifies a stage move, or `None` when the pair is not connected.
pub fn classify(from: Stage, to: Stage) -> Option<TransitionKind> {
    if from == to {
        return None;
    }

    if to == Stage::As {
        return matches!(from, Stage::Construction | Stage::Cs | Stage::Completed)
            .then_some(TransitionKind::EnterAs);
    }

    if from == Stage::As {
        return matches!(to, Stage::Cs | Stage::Completed).then_some(TransitionKind::ExitAs);
    }

    let (from_index, to_index) = (from.position()?, to.position()?);
    let kind = if to_index == from_index + 1 {
        TransitionKind::Advance
    } else if to_index > from_index {
        TransitionKind::Skip
    } else {
        TransitionKind::Rollback
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::{classify, Stage, TransitionKind, MAIN_LINE};
    use crate::permissions::Domain;

    #[test]
    fn main_line_advances_one_step_at_a_time() {
        assert_eq!(Stage::Received.next(), Some(Stage::Happycall));
        assert_eq!(Stage::Cs.next(), Some(Stage::Completed));
        assert_eq!(Stage::Completed.next(), None);
        assert_eq!(Stage::As.next(), None);
        assert_eq!(MAIN_LINE.len(), 9);
    }

    #[test]
    fn classify_distinguishes_advance_skip_and_rollback() {
        assert_eq!(classify(Stage::Measure, Stage::Drawing), Some(TransitionKind::Advance));
        assert_eq!(classify(Stage::Measure, Stage::Production), Some(TransitionKind::Skip));
        assert_eq!(classify(Stage::Confirm, Stage::Measure), Some(TransitionKind::Rollback));
        assert_eq!(classify(Stage::Confirm, Stage::Confirm), None);
    }

    #[test]
    fn as_branch_has_restricted_entry_and_exit() {
        assert_eq!(classify(Stage::Construction, Stage::As), Some(TransitionKind::EnterAs));
        assert_eq!(classify(Stage::Completed, Stage::As), Some(TransitionKind::EnterAs));
        assert_eq!(classify(Stage::Drawing, Stage::As), None);
        assert_eq!(classify(Stage::As, Stage::Completed), Some(TransitionKind::ExitAs));
        assert_eq!(classify(Stage::As, Stage::Measure), None);
    }

    #[test]
    fn only_skip_and_rollback_escape_the_quest_gate() {
        assert!(TransitionKind::EnterAs.is_gated());
        assert!(TransitionKind::ExitAs.is_gated());
        assert!(TransitionKind::Advance.is_gated());
        assert!(!TransitionKind::Skip.is_regular());
        assert!(!TransitionKind::Rollback.is_regular());
    }

    #[test]
    fn completed_is_the_only_terminal_stage() {
        assert!(Stage::Completed.is_terminal());
        assert!(!Stage::As.is_terminal());
        assert!(!Stage::Cs.is_terminal());
    }

    #[test]
    fn stages_map_to_owning_domains() {
        assert_eq!(Stage::Drawing.domain(), Domain::Drawing);
        assert_eq!(Stage::Confirm.domain(), Domain::Sales);
        assert_eq!(Stage::As.domain(), Domain::As);
    }

    #[test]
    fn stage_parses_storage_codes() {
        assert_eq!(Stage::parse("happycall"), Some(Stage::Happycall));
        assert_eq!(Stage::parse("AS"), Some(Stage::As));
        assert_eq!(Stage::parse("SHIPPED"), None);
        assert!(Stage::As.is_past(Stage::Construction));
        assert!(!Stage::Measure.is_past(Stage::Measure));
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::{Team, UserId};
use crate::workflow::engine::WorkflowError;
use crate::workflow::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestStatus {
    Open,
    Completed,
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Teams,
    Assignee,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneePolicy {
    Any,
    All,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamApproval {
    #[serde(default)]
    pub approved: bool,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeMark {
    pub user_id: UserId,
    pub approved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub by: UserId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeApproval {
    pub policy: AssigneePolicy,
    #[serde(default)]
    pub assignee_ids: Vec<UserId>,
    #[serde(default)]
    pub approvals: Vec<AssigneeMark>,
    pub emergency_override: Option<EmergencyOverride>,
}

impl AssigneeApproval {
    fn has_approved(&self, user_id: UserId) -> bool {
        self.approvals.iter().any(|mark| mark.user_id == user_id)
    }

    fn missing(&self) -> Vec<UserId> {
        self.assignee_ids.iter().copied().filter(|id| !self.has_approved(*id)).collect()
    }

    fn satisfied(&self) -> bool {
        if self.emergency_override.is_some() {
            return true;
        }
        if self.assignee_ids.is_empty() {
            return false;
        }
        match self.policy {
            AssigneePolicy::Any => self.assignee_ids.iter().any(|id| self.has_approved(*id)),
            AssigneePolicy::All => self.missing().is_empty(),
        }
    }
}

/// Per-stage approval checklist stored in the order document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub stage: Stage,
    pub title: String,
    pub status: QuestStatus,
    pub mode: ApprovalMode,
    #[serde(default)]
    pub required_approvals: Vec<Team>,
    #[serde(default)]
    pub team_approvals: BTreeMap<Team, TeamApproval>,
    pub assignee_approval: Option<AssigneeApproval>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestEvaluation {
    pub all_approved: bool,
    pub missing_teams: Vec<Team>,
    pub missing_assignees: Vec<UserId>,
    pub overridden: bool,
    /// Assignee quest with nobody assigned; only an override can clear it.
    pub unassigned: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuestTemplate {
    pub stage: Stage,
    pub title: &'static str,
    pub mode: ApprovalMode,
    pub required_teams: &'static [Team],
    pub assignee_policy: AssigneePolicy,
}

const fn teams(stage: Stage, title: &'static str, required_teams: &'static [Team]) -> QuestTemplate {
    QuestTemplate {
        stage,
        title,
        mode: ApprovalMode::Teams,
        required_teams,
        assignee_policy: AssigneePolicy::All,
    }
}

const fn assignees(stage: Stage, title: &'static str, policy: AssigneePolicy) -> QuestTemplate {
    QuestTemplate { stage, title, mode: ApprovalMode::Assignee, required_teams: &[], assignee_policy: policy }
}

const TEMPLATES: [QuestTemplate; 9] = [
    teams(Stage::Received, "Order intake review", &[Team::Sales]),
    teams(Stage::Happycall, "Happy call with customer", &[Team::Cs]),
    assignees(Stage::Measure, "Site measurement done", AssigneePolicy::Any),
    assignees(Stage::Drawing, "Drawing signed off", AssigneePolicy::All),
    teams(Stage::Confirm, "Customer confirmation", &[Team::Sales, Team::Drawing]),
    teams(Stage::Production, "Production released", &[Team::Production]),
    assignees(Stage::Construction, "Installation finished", AssigneePolicy::Any),
    teams(Stage::Cs, "Post-install check", &[Team::Cs]),
    teams(Stage::As, "After-service resolved", &[Team::As, Team::Cs]),
];

pub fn template_for(stage: Stage) -> Option<&'static QuestTemplate> {
    TEMPLATES.iter().find(|template| template.stage == stage)
}

impl Quest {
    pub fn from_template(template: &QuestTemplate, assignee_ids: &[UserId], now: DateTime<Utc>) -> Self {
        let team_approvals =
            template.required_teams.iter().map(|team| (*team, TeamApproval::default())).collect();
        let assignee_approval = (template.mode == ApprovalMode::Assignee).then(|| AssigneeApproval {
            policy: template.assignee_policy,
            assignee_ids: assignee_ids.to_vec(),
            approvals: Vec::new(),
            emergency_override: None,
        });

        Self {
            id: Uuid::new_v4().to_string(),
            stage: template.stage,
            title: template.title.to_string(),
            status: QuestStatus::Open,
            mode: template.mode,
            required_approvals: template.required_teams.to_vec(),
            team_approvals,
            assignee_approval,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == QuestStatus::Open
    }

    pub fn evaluate(&self) -> QuestEvaluation {
        match self.mode {
            ApprovalMode::Teams => {
                let missing_teams: Vec<Team> = self
                    .required_approvals
                    .iter()
                    .copied()
                    .filter(|team| !self.team_approvals.get(team).is_some_and(|entry| entry.approved))
                    .collect();
                QuestEvaluation {
                    all_approved: missing_teams.is_empty(),
                    missing_teams,
                    missing_assignees: Vec::new(),
                    overridden: false,
                    unassigned: false,
                }
            }
            ApprovalMode::Assignee => {
                let Some(approval) = &self.assignee_approval else {
                    return QuestEvaluation {
                        all_approved: false,
                        missing_teams: Vec::new(),
                        missing_assignees: Vec::new(),
                        overridden: false,
                        unassigned: true,
                    };
                };
                let satisfied = approval.satisfied();
                QuestEvaluation {
                    all_approved: satisfied,
                    missing_teams: Vec::new(),
                    missing_assignees: if satisfied { Vec::new() } else { approval.missing() },
                    overridden: approval.emergency_override.is_some(),
                    unassigned: approval.assignee_ids.is_empty(),
                }
            }
        }
    }

    /// Records a team sign-off. Returns whether this completed the quest.
    pub fn approve_team(
        &mut self,
        team: Team,
        by: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        self.require_mode(ApprovalMode::Teams)?;
        if !self.required_approvals.contains(&team) {
            return Err(WorkflowError::TeamNotRequired { stage: self.stage, team });
        }

        let entry = self.team_approvals.entry(team).or_default();
        if entry.approved {
            return Err(WorkflowError::AlreadyApproved { stage: self.stage });
        }
        entry.approved = true;
        entry.approved_by = Some(by);
        entry.approved_at = Some(now);

        Ok(self.complete_if_satisfied(now))
    }

    /// Withdraws a team sign-off, reopening the quest if it had completed.
    pub fn revoke_team(&mut self, team: Team) -> Result<(), WorkflowError> {
        if self.status == QuestStatus::Skipped {
            return Err(WorkflowError::QuestClosed { stage: self.stage });
        }
        if self.mode != ApprovalMode::Teams {
            return Err(WorkflowError::WrongApprovalMode { stage: self.stage, mode: self.mode });
        }
        let approved = self.team_approvals.get(&team).is_some_and(|entry| entry.approved);
        if !approved {
            return Err(WorkflowError::NotApproved { stage: self.stage, team });
        }

        self.team_approvals.insert(team, TeamApproval::default());
        self.status = QuestStatus::Open;
        self.completed_at = None;
        Ok(())
    }

    pub fn approve_assignee(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, WorkflowError> {
        self.require_mode(ApprovalMode::Assignee)?;
        let stage = self.stage;
        let approval = self.assignee_approval.as_mut().ok_or(WorkflowError::NotAssignee { user_id, stage })?;
        if !approval.assignee_ids.contains(&user_id) {
            return Err(WorkflowError::NotAssignee { user_id, stage });
        }
        if approval.has_approved(user_id) {
            return Err(WorkflowError::AlreadyApproved { stage });
        }
        approval.approvals.push(AssigneeMark { user_id, approved_at: now });

        Ok(self.complete_if_satisfied(now))
    }

    pub fn emergency_override(
        &mut self,
        by: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_mode(ApprovalMode::Assignee)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::ReasonRequired { operation: "emergency_override" });
        }

        let approval = self.assignee_approval.get_or_insert_with(|| AssigneeApproval {
            policy: AssigneePolicy::Any,
            assignee_ids: Vec::new(),
            approvals: Vec::new(),
            emergency_override: None,
        });
        approval.emergency_override = Some(EmergencyOverride { by, reason: reason.to_string(), at: now });
        self.status = QuestStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Replaces the assignee snapshot, dropping marks from removed users.
    /// Returns whether the new snapshot completed the quest.
    pub fn refresh_assignees(&mut self, assignee_ids: &[UserId], now: DateTime<Utc>) -> bool {
        let Some(approval) = self.assignee_approval.as_mut() else {
            return false;
        };
        if approval.assignee_ids == assignee_ids {
            return false;
        }
        approval.assignee_ids = assignee_ids.to_vec();
        approval.approvals.retain(|mark| assignee_ids.contains(&mark.user_id));

        self.is_open() && self.complete_if_satisfied(now)
    }

    fn require_mode(&self, mode: ApprovalMode) -> Result<(), WorkflowError> {
        if !self.is_open() {
            return Err(WorkflowError::QuestClosed { stage: self.stage });
        }
        if self.mode != mode {
            return Err(WorkflowError::WrongApprovalMode { stage: self.stage, mode: self.mode });
        }
        Ok(())
    }

    fn complete_if_satisfied(&mut self, now: DateTime<Utc>) -> bool {
        if self.evaluate().all_approved {
            self.status = QuestStatus::Completed;
            self.completed_at = Some(now);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{template_for, ApprovalMode, Quest, QuestStatus};
    use crate::domain::user::{Team, UserId};
    use crate::workflow::engine::WorkflowError;
    use crate::workflow::stage::Stage;

    fn quest(stage: Stage, assignees: &[UserId]) -> Quest {
        Quest::from_template(template_for(stage).expect("template"), assignees, Utc::now())
    }

    #[test]
    fn one_of_two_required_teams_leaves_the_other_missing() {
        let mut quest = quest(Stage::Confirm, &[]);
        let completed = quest.approve_team(Team::Sales, UserId(1), Utc::now()).expect("approve");

        let evaluation = quest.evaluate();
        assert!(!completed);
        assert!(!evaluation.all_approved);
        assert_eq!(evaluation.missing_teams, vec![Team::Drawing]);
        assert_eq!(quest.status, QuestStatus::Open);
    }

    #[test]
    fn last_team_approval_completes_the_quest() {
        let mut quest = quest(Stage::Confirm, &[]);
        quest.approve_team(Team::Sales, UserId(1), Utc::now()).expect("sales");
        let completed = quest.approve_team(Team::Drawing, UserId(2), Utc::now()).expect("drawing");

        assert!(completed);
        assert_eq!(quest.status, QuestStatus::Completed);
        assert!(quest.completed_at.is_some());
    }

    #[test]
    fn unrequired_team_cannot_approve() {
        let mut quest = quest(Stage::Production, &[]);
        let error = quest.approve_team(Team::Cs, UserId(1), Utc::now()).expect_err("not required");
        assert_eq!(error, WorkflowError::TeamNotRequired { stage: Stage::Production, team: Team::Cs });
    }

    #[test]
    fn revoking_reopens_a_completed_quest() {
        let mut quest = quest(Stage::Production, &[]);
        quest.approve_team(Team::Production, UserId(1), Utc::now()).expect("approve");
        assert_eq!(quest.status, QuestStatus::Completed);

        quest.revoke_team(Team::Production).expect("revoke");
        assert_eq!(quest.evaluate().missing_teams, vec![Team::Production]);
        assert!(quest.completed_at.is_none());
        assert_eq!(quest.status, QuestStatus::Open);
    }

    #[test]
    fn any_policy_completes_on_first_assignee() {
        let mut quest = quest(Stage::Measure, &[UserId(10), UserId(11)]);
        assert_eq!(quest.mode, ApprovalMode::Assignee);

        let completed = quest.approve_assignee(UserId(11), Utc::now()).expect("approve");
        assert!(completed);
    }

    #[test]
    fn all_policy_waits_for_every_assignee() {
        let mut quest = quest(Stage::Drawing, &[UserId(10), UserId(11)]);
        assert!(!quest.approve_assignee(UserId(10), Utc::now()).expect("first"));
        assert_eq!(quest.evaluate().missing_assignees, vec![UserId(11)]);

        let error = quest.approve_assignee(UserId(12), Utc::now()).expect_err("outsider");
        assert_eq!(error, WorkflowError::NotAssignee { user_id: UserId(12), stage: Stage::Drawing });

        assert!(quest.approve_assignee(UserId(11), Utc::now()).expect("second"));
    }

    #[test]
    fn unassigned_quest_only_clears_by_override() {
        let mut quest = quest(Stage::Construction, &[]);
        let evaluation = quest.evaluate();
        assert!(evaluation.unassigned);
        assert!(!evaluation.all_approved);

        let error = quest.emergency_override(UserId(1), "   ", Utc::now()).expect_err("blank reason");
        assert!(matches!(error, WorkflowError::ReasonRequired { .. }));

        quest.emergency_override(UserId(1), "installer on leave", Utc::now()).expect("override");
        let evaluation = quest.evaluate();
        assert!(evaluation.all_approved);
        assert!(evaluation.overridden);
        assert_eq!(quest.status, QuestStatus::Completed);
    }

    #[test]
    fn refreshing_assignees_drops_stale_marks() {
        let mut quest = quest(Stage::Drawing, &[UserId(10), UserId(11)]);
        quest.approve_assignee(UserId(10), Utc::now()).expect("approve");

        assert!(!quest.refresh_assignees(&[UserId(11), UserId(12)], Utc::now()));
        assert_eq!(quest.evaluate().missing_assignees, vec![UserId(11), UserId(12)]);
    }

    #[test]
    fn shrinking_assignees_can_complete_an_all_policy_quest() {
        let mut quest = quest(Stage::Drawing, &[UserId(10), UserId(11)]);
        quest.approve_assignee(UserId(10), Utc::now()).expect("approve");

        assert!(quest.refresh_assignees(&[UserId(10)], Utc::now()));
        assert_eq!(quest.status, QuestStatus::Completed);
    }

    #[test]
    fn completed_stage_has_no_template() {
        assert!(template_for(Stage::Completed).is_none());
        assert!(template_for(Stage::As).is_some());
    }
}

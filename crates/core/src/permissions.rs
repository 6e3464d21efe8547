use serde::{Deserialize, Serialize};

use crate::domain::order::Order;
use crate::domain::user::{Role, Team, User};

/// Permission scope over one slice of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "SALES_DOMAIN")]
    Sales,
    #[serde(rename = "MEASUREMENT_DOMAIN")]
    Measurement,
    #[serde(rename = "DRAWING_DOMAIN")]
    Drawing,
    #[serde(rename = "PRODUCTION_DOMAIN")]
    Production,
    #[serde(rename = "CONSTRUCTION_DOMAIN")]
    Construction,
    #[serde(rename = "CS_DOMAIN")]
    Cs,
    #[serde(rename = "AS_DOMAIN")]
    As,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "SALES_DOMAIN",
            Self::Measurement => "MEASUREMENT_DOMAIN",
            Self::Drawing => "DRAWING_DOMAIN",
            Self::Production => "PRODUCTION_DOMAIN",
            Self::Construction => "CONSTRUCTION_DOMAIN",
            Self::Cs => "CS_DOMAIN",
            Self::As => "AS_DOMAIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        let code = normalized.strip_suffix("_DOMAIN").unwrap_or(&normalized);
        match code {
            "SALES" => Some(Self::Sales),
            "MEASUREMENT" | "MEASURE" => Some(Self::Measurement),
            "DRAWING" => Some(Self::Drawing),
            "PRODUCTION" => Some(Self::Production),
            "CONSTRUCTION" => Some(Self::Construction),
            "CS" => Some(Self::Cs),
            "AS" => Some(Self::As),
            _ => None,
        }
    }

    pub fn owner_team(&self) -> Team {
        match self {
            Self::Sales => Team::Sales,
            Self::Measurement => Team::Measure,
            Self::Drawing => Team::Drawing,
            Self::Production => Team::Production,
            Self::Construction => Team::Construction,
            Self::Cs => Team::Cs,
            Self::As => Team::As,
        }
    }

    /// Dotted document path of this domain's assignee list.
    pub fn assignment_path(&self) -> String {
        format!("assignments.{}", self.as_str())
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessGrant {
    Manager,
    Assignee,
    LegacyManagerName,
    OwningTeam,
}

/// Resolves why `user` may modify `domain` on `order`, if at all.
///
/// Explicit assignee lists win. Only when a domain has no assignees does the
/// legacy rule apply: the order's flat `manager_name` column, then team
/// ownership of the domain.
pub fn resolve_access(user: &User, order: &Order, domain: Domain) -> Option<AccessGrant> {
    if !user.active || user.role == Role::Viewer {
        return None;
    }

    if user.is_manager() {
        return Some(AccessGrant::Manager);
    }

    let assignees = order.structured_data.assignees(domain);
    if !assignees.is_empty() {
        return assignees.contains(&user.id).then_some(AccessGrant::Assignee);
    }

    let legacy_match = order
        .manager_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .is_some_and(|name| name == user.name.trim());
    if legacy_match {
        return Some(AccessGrant::LegacyManagerName);
    }

    user.belongs_to(domain.owner_team()).then_some(AccessGrant::OwningTeam)
}

pub fn can_modify_domain(user: &User, order: &Order, domain: Domain) -> bool {
    resolve_access(user, order, domain).is_some()
}

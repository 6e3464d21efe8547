use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Staff,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Manager => "MANAGER",
            Self::Staff => "STAFF",
            Self::Viewer => "VIEWER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "MANAGER" => Some(Self::Manager),
            "STAFF" => Some(Self::Staff),
            "VIEWER" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// Team codes used in quest approvals and task ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Team {
    Cs,
    Sales,
    Measure,
    Drawing,
    Production,
    Construction,
    As,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cs => "CS",
            Self::Sales => "SALES",
            Self::Measure => "MEASURE",
            Self::Drawing => "DRAWING",
            Self::Production => "PRODUCTION",
            Self::Construction => "CONSTRUCTION",
            Self::As => "AS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CS" => Some(Self::Cs),
            "SALES" => Some(Self::Sales),
            "MEASURE" => Some(Self::Measure),
            "DRAWING" => Some(Self::Drawing),
            "PRODUCTION" => Some(Self::Production),
            "CONSTRUCTION" => Some(Self::Construction),
            "AS" => Some(Self::As),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub team: Option<Team>,
    pub active: bool,
}

impl User {
    pub fn is_manager(&self) -> bool {
        self.active && matches!(self.role, Role::Admin | Role::Manager)
    }

    pub fn belongs_to(&self, team: Team) -> bool {
        self.team == Some(team)
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, Team, User, UserId};

    #[test]
    fn team_codes_parse_case_insensitively() {
        assert_eq!(Team::parse("drawing"), Some(Team::Drawing));
        assert_eq!(Team::parse(" AS "), Some(Team::As));
        assert_eq!(Team::parse("warehouse"), None);
    }

    #[test]
    fn inactive_manager_loses_manager_privileges() {
        let user = User {
            id: UserId(7),
            name: "Kim".to_string(),
            role: Role::Manager,
            team: Some(Team::Sales),
            active: false,
        };

        assert!(!user.is_manager());
        assert!(user.belongs_to(Team::Sales));
    }

    #[test]
    fn team_serializes_as_code() {
        let encoded = serde_json::to_string(&Team::Construction).expect("encode team");
        assert_eq!(encoded, "\"CONSTRUCTION\"");
    }
}

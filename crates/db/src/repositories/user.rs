use sqlx::sqlite::SqliteRow;

use foms_core::domain::user::{Role, Team, User, UserId};

use super::{column, decode_code, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role: String = column(row, "role")?;
    let team: Option<String> = column(row, "team")?;
    let active: i64 = column(row, "active")?;

    Ok(User {
        id: UserId(column(row, "id")?),
        name: column(row, "name")?,
        role: decode_code("role", &role, Role::parse)?,
        team: team.as_deref().map(|team| decode_code("team", team, Team::parse)).transpose()?,
        active: active != 0,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, role, team, active FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn save(&self, user: User) -> Result<User, RepositoryError> {
        let team = user.team.map(|team| team.as_str());
        if user.id.0 == 0 {
            let result =
                sqlx::query("INSERT INTO users (name, role, team, active) VALUES (?, ?, ?, ?)")
                    .bind(&user.name)
                    .bind(user.role.as_str())
                    .bind(team)
                    .bind(user.active)
                    .execute(&self.pool)
                    .await?;
            return Ok(User { id: UserId(result.last_insert_rowid()), ..user });
        }

        sqlx::query(
            "INSERT INTO users (id, name, role, team, active) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 role = excluded.role,
                 team = excluded.team,
                 active = excluded.active",
        )
        .bind(user.id.0)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(team)
        .bind(user.active)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, role, team, active FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_user).collect()
    }
}

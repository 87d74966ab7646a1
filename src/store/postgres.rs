//! Postgres-backed [`ProjectStore`], written in the runtime-query style
//! so the crate builds without a live database.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use super::ProjectStore;
use crate::error::{AppError, AppResult};
use crate::projects::models::{
    NewProject, NewShare, Project, ProjectStatus, ProjectUpdate, ShareRecord, StatusHistory,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Config(format!("migration failed: {}", e)))?;
        Ok(Self::new(pool))
    }
}

// Status lives in a TEXT column; rows carry it as a string and are
// converted at the edge.

#[derive(FromRow)]
struct ProjectRow {
    id: i64,
    title: String,
    description: String,
    artist_wallet: String,
    presenter_wallet: Option<String>,
    deadline: DateTime<Utc>,
    share_price: i64,
    min_shares: Option<i64>,
    max_shares: Option<i64>,
    royalty_pct: i16,
    status: String,
    created_on: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = AppError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            title: row.title,
            description: row.description,
            artist_wallet: row.artist_wallet,
            presenter_wallet: row.presenter_wallet,
            deadline: row.deadline,
            share_price: row.share_price,
            min_shares: row.min_shares,
            max_shares: row.max_shares,
            royalty_pct: row.royalty_pct,
            status: ProjectStatus::from_str(&row.status)?,
            created_on: row.created_on,
        })
    }
}

#[derive(FromRow)]
struct ShareRow {
    id: i64,
    project_id: i64,
    patron_wallet: String,
    quantity: i64,
    purchased_on: DateTime<Utc>,
    ophash: String,
}

impl From<ShareRow> for ShareRecord {
    fn from(row: ShareRow) -> Self {
        ShareRecord {
            id: row.id,
            project_id: row.project_id,
            patron_wallet: row.patron_wallet,
            quantity: row.quantity,
            purchased_on: row.purchased_on,
            ophash: row.ophash,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: i64,
    project_id: i64,
    status: String,
    acting_user: String,
    updated_on: DateTime<Utc>,
}

#[derive(FromRow)]
struct UpdateRow {
    id: i64,
    project_id: i64,
    author_wallet: String,
    description: String,
    created_on: DateTime<Utc>,
}

const PROJECT_COLUMNS: &str = "id, title, description, artist_wallet, presenter_wallet, \
     deadline, share_price, min_shares, max_shares, royalty_pct, status, created_on";

#[async_trait]
impl ProjectStore for PgStore {
    async fn insert_project(&self, new: NewProject) -> AppResult<Project> {
        new.validate()?;
        let creator = new
            .presenter_wallet
            .clone()
            .unwrap_or_else(|| new.artist_wallet.clone());
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "INSERT INTO projects \
             (title, description, artist_wallet, presenter_wallet, deadline, \
              share_price, min_shares, max_shares, royalty_pct, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'new') \
             RETURNING {}",
            PROJECT_COLUMNS
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.artist_wallet)
        .bind(&new.presenter_wallet)
        .bind(new.deadline)
        .bind(new.share_price)
        .bind(new.min_shares)
        .bind(new.max_shares)
        .bind(new.royalty_pct)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO status_history (project_id, status, acting_user) VALUES ($1, 'new', $2)",
        )
        .bind(row.id)
        .bind(&creator)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Project::try_from(row)
    }

    async fn get_project(&self, id: i64) -> AppResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn set_status(&self, id: i64, status: ProjectStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE projects SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("project {}", id)));
        }
        Ok(())
    }

    async fn append_status_history(
        &self,
        project_id: i64,
        status: ProjectStatus,
        acting_user: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO status_history (project_id, status, acting_user) VALUES ($1, $2, $3)",
        )
        .bind(project_id)
        .bind(status.as_str())
        .bind(acting_user)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn status_history(&self, project_id: i64) -> AppResult<Vec<StatusHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, project_id, status, acting_user, updated_on \
             FROM status_history WHERE project_id = $1 ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StatusHistory {
                    id: row.id,
                    project_id: row.project_id,
                    status: ProjectStatus::from_str(&row.status)?,
                    acting_user: row.acting_user,
                    updated_on: row.updated_on,
                })
            })
            .collect()
    }

    async fn insert_share(&self, share: NewShare) -> AppResult<ShareRecord> {
        let row = sqlx::query_as::<_, ShareRow>(
            "INSERT INTO shares (project_id, patron_wallet, quantity, ophash) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, project_id, patron_wallet, quantity, purchased_on, ophash",
        )
        .bind(share.project_id)
        .bind(&share.patron_wallet)
        .bind(share.quantity)
        .bind(&share.ophash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn share_by_ophash(&self, ophash: &str) -> AppResult<Option<ShareRecord>> {
        let row = sqlx::query_as::<_, ShareRow>(
            "SELECT id, project_id, patron_wallet, quantity, purchased_on, ophash \
             FROM shares WHERE ophash = $1",
        )
        .bind(ophash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ShareRecord::from))
    }

    async fn shares_for_project(&self, project_id: i64) -> AppResult<Vec<ShareRecord>> {
        let rows = sqlx::query_as::<_, ShareRow>(
            "SELECT id, project_id, patron_wallet, quantity, purchased_on, ophash \
             FROM shares WHERE project_id = $1 ORDER BY purchased_on DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ShareRecord::from).collect())
    }

    async fn delete_shares(&self, project_id: i64, wallets: &[String]) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM shares WHERE project_id = $1 AND patron_wallet = ANY($2)",
        )
        .bind(project_id)
        .bind(wallets)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn open_projects(&self) -> AppResult<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE status = 'open'",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Project::try_from).collect()
    }

    async fn insert_update(
        &self,
        project_id: i64,
        author_wallet: &str,
        description: &str,
    ) -> AppResult<ProjectUpdate> {
        let row = sqlx::query_as::<_, UpdateRow>(
            "INSERT INTO project_updates (project_id, author_wallet, description) \
             VALUES ($1, $2, $3) \
             RETURNING id, project_id, author_wallet, description, created_on",
        )
        .bind(project_id)
        .bind(author_wallet)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProjectUpdate {
            id: row.id,
            project_id: row.project_id,
            author_wallet: row.author_wallet,
            description: row.description,
            created_on: row.created_on,
        })
    }

    async fn updates_for_project(&self, project_id: i64) -> AppResult<Vec<ProjectUpdate>> {
        let rows = sqlx::query_as::<_, UpdateRow>(
            "SELECT id, project_id, author_wallet, description, created_on \
             FROM project_updates WHERE project_id = $1 ORDER BY created_on DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ProjectUpdate {
                id: row.id,
                project_id: row.project_id,
                author_wallet: row.author_wallet,
                description: row.description,
                created_on: row.created_on,
            })
            .collect())
    }
}

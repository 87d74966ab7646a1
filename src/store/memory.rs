//! In-memory [`ProjectStore`] used by the test suite and local
//! development without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::ProjectStore;
use crate::error::{AppError, AppResult};
use crate::projects::models::{
    NewProject, NewShare, Project, ProjectStatus, ProjectUpdate, ShareRecord, StatusHistory,
};

#[derive(Default)]
struct Inner {
    projects: HashMap<i64, Project>,
    shares: Vec<ShareRecord>,
    history: Vec<StatusHistory>,
    updates: Vec<ProjectUpdate>,
    next_project_id: i64,
    next_row_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn next_project_id(&mut self) -> i64 {
        self.next_project_id += 1;
        self.next_project_id
    }

    fn next_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn insert_project(&self, new: NewProject) -> AppResult<Project> {
        new.validate()?;
        let mut inner = self.inner.write();
        let id = inner.next_project_id();
        let creator = new
            .presenter_wallet
            .clone()
            .unwrap_or_else(|| new.artist_wallet.clone());
        let project = Project {
            id,
            title: new.title,
            description: new.description,
            artist_wallet: new.artist_wallet,
            presenter_wallet: new.presenter_wallet,
            deadline: new.deadline,
            share_price: new.share_price,
            min_shares: new.min_shares,
            max_shares: new.max_shares,
            royalty_pct: new.royalty_pct,
            status: ProjectStatus::New,
            created_on: Utc::now(),
        };
        inner.projects.insert(id, project.clone());
        let row_id = inner.next_row_id();
        inner.history.push(StatusHistory {
            id: row_id,
            project_id: id,
            status: ProjectStatus::New,
            acting_user: creator,
            updated_on: Utc::now(),
        });
        Ok(project)
    }

    async fn get_project(&self, id: i64) -> AppResult<Option<Project>> {
        Ok(self.inner.read().projects.get(&id).cloned())
    }

    async fn set_status(&self, id: i64, status: ProjectStatus) -> AppResult<()> {
        let mut inner = self.inner.write();
        let project = inner
            .projects
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))?;
        project.status = status;
        Ok(())
    }

    async fn append_status_history(
        &self,
        project_id: i64,
        status: ProjectStatus,
        acting_user: &str,
    ) -> AppResult<()> {
        let mut inner = self.inner.write();
        let id = inner.next_row_id();
        inner.history.push(StatusHistory {
            id,
            project_id,
            status,
            acting_user: acting_user.to_string(),
            updated_on: Utc::now(),
        });
        Ok(())
    }

    async fn status_history(&self, project_id: i64) -> AppResult<Vec<StatusHistory>> {
        Ok(self
            .inner
            .read()
            .history
            .iter()
            .filter(|h| h.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_share(&self, share: NewShare) -> AppResult<ShareRecord> {
        let mut inner = self.inner.write();
        if inner.shares.iter().any(|s| s.ophash == share.ophash) {
            return Err(AppError::InvalidInput(format!(
                "duplicate ophash {}",
                share.ophash
            )));
        }
        let id = inner.next_row_id();
        let record = ShareRecord {
            id,
            project_id: share.project_id,
            patron_wallet: share.patron_wallet,
            quantity: share.quantity,
            purchased_on: Utc::now(),
            ophash: share.ophash,
        };
        inner.shares.push(record.clone());
        Ok(record)
    }

    async fn share_by_ophash(&self, ophash: &str) -> AppResult<Option<ShareRecord>> {
        Ok(self
            .inner
            .read()
            .shares
            .iter()
            .find(|s| s.ophash == ophash)
            .cloned())
    }

    async fn shares_for_project(&self, project_id: i64) -> AppResult<Vec<ShareRecord>> {
        Ok(self
            .inner
            .read()
            .shares
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_shares(&self, project_id: i64, wallets: &[String]) -> AppResult<u64> {
        let mut inner = self.inner.write();
        let before = inner.shares.len();
        inner
            .shares
            .retain(|s| s.project_id != project_id || !wallets.contains(&s.patron_wallet));
        Ok((before - inner.shares.len()) as u64)
    }

    async fn open_projects(&self) -> AppResult<Vec<Project>> {
        Ok(self
            .inner
            .read()
            .projects
            .values()
            .filter(|p| p.status == ProjectStatus::Open)
            .cloned()
            .collect())
    }

    async fn insert_update(
        &self,
        project_id: i64,
        author_wallet: &str,
        description: &str,
    ) -> AppResult<ProjectUpdate> {
        let mut inner = self.inner.write();
        if !inner.projects.contains_key(&project_id) {
            return Err(AppError::NotFound(format!("project {}", project_id)));
        }
        let id = inner.next_row_id();
        let update = ProjectUpdate {
            id,
            project_id,
            author_wallet: author_wallet.to_string(),
            description: description.to_string(),
            created_on: Utc::now(),
        };
        inner.updates.push(update.clone());
        Ok(update)
    }

    async fn updates_for_project(&self, project_id: i64) -> AppResult<Vec<ProjectUpdate>> {
        Ok(self
            .inner
            .read()
            .updates
            .iter()
            .filter(|u| u.project_id == project_id)
            .cloned()
            .collect())
    }
}

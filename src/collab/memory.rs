use crate::collab::backend::{
    CoordinationBackend, CoordinationError, CoordinationResult, CoordinationSession, GroupId,
    MemberId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct MemoryState {
    groups: HashMap<GroupId, BTreeSet<MemberId>>,
    available: bool,
}

/// In-process coordination backend.
///
/// Clones share the same groups, so several membership clients created from
/// clones of one backend see each other like processes sharing a real backend.
/// Used for single instance deployments (`memory://`) and in tests.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                groups: HashMap::new(),
                available: true,
            })),
        }
    }
}

impl InMemoryBackend {
    /// Simulates an outage: every call fails with `ConnectionFailed` until the
    /// backend is made available again.
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// Drops a group and all of its members.
    pub async fn delete_group(&self, group_id: &str) {
        self.state.lock().await.groups.remove(group_id);
    }
}

impl CoordinationBackend for InMemoryBackend {
    type Session = InMemorySession;

    async fn connect(&self, member_id: &str) -> CoordinationResult<InMemorySession> {
        if !self.state.lock().await.available {
            return Err(CoordinationError::ConnectionFailed(
                "in-memory backend unavailable".to_string(),
            ));
        }

        Ok(InMemorySession {
            member_id: member_id.to_string(),
            state: self.state.clone(),
        })
    }
}

pub struct InMemorySession {
    member_id: MemberId,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemorySession {
    async fn lock_available(&self) -> CoordinationResult<tokio::sync::MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().await;

        if !state.available {
            return Err(CoordinationError::ConnectionFailed(
                "in-memory backend unavailable".to_string(),
            ));
        }

        Ok(state)
    }
}

impl CoordinationSession for InMemorySession {
    async fn heartbeat(&self) -> CoordinationResult<()> {
        self.lock_available().await?;

        Ok(())
    }

    async fn create_group(&self, group_id: &str) -> CoordinationResult<()> {
        let mut state = self.lock_available().await?;

        if state.groups.contains_key(group_id) {
            return Err(CoordinationError::GroupExists(group_id.to_string()));
        }

        state.groups.insert(group_id.to_string(), BTreeSet::new());

        Ok(())
    }

    async fn join_group(&self, group_id: &str) -> CoordinationResult<()> {
        let mut state = self.lock_available().await?;

        let members = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CoordinationError::GroupNotFound(group_id.to_string()))?;

        if !members.insert(self.member_id.clone()) {
            return Err(CoordinationError::MemberExists {
                group: group_id.to_string(),
                member: self.member_id.clone(),
            });
        }

        Ok(())
    }

    async fn leave_group(&self, group_id: &str) -> CoordinationResult<()> {
        let mut state = self.lock_available().await?;

        let members = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CoordinationError::GroupNotFound(group_id.to_string()))?;

        members.remove(&self.member_id);

        Ok(())
    }

    async fn get_members(&self, group_id: &str) -> CoordinationResult<BTreeSet<MemberId>> {
        let state = self.lock_available().await?;

        state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| CoordinationError::GroupNotFound(group_id.to_string()))
    }

    async fn stop(&self) -> CoordinationResult<()> {
        Ok(())
    }
}

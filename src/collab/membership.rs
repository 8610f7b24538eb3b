use crate::collab::backend::{
    CoordinationBackend, CoordinationError, CoordinationSession, GroupId, MemberId,
};
use log::{debug, error, info, warn};
use rand::{Rng, rng};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Attempts at joining a group (including creating it) before giving up.
pub const JOIN_ATTEMPTS: u32 = 3;
/// Attempts at reading a group's members, re-joining on `GroupNotFound`.
pub const MEMBERSHIP_READ_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined { group: GroupId, member: MemberId },
    Left { group: GroupId, member: MemberId },
}

pub type WatchCallback = Box<dyn Fn(&MembershipEvent) + Send + Sync>;

#[derive(Default)]
struct GroupWatch {
    callbacks: Vec<WatchCallback>,
    last_seen: Option<BTreeSet<MemberId>>,
}

/// Group membership on top of a [`CoordinationBackend`].
///
/// No method ever returns a backend error: failures are logged and turned into
/// a safe answer (`false`, `None`, no-op). A lost connection is re-established
/// by the next [`MembershipClient::heartbeat`].
pub struct MembershipClient<B: CoordinationBackend> {
    backend: B,
    member_id: MemberId,
    session: RwLock<Option<Arc<B::Session>>>,
    // Serializes reconnect attempts
    reconnect_lock: Mutex<()>,
    groups: Mutex<BTreeSet<GroupId>>,
    watchers: Mutex<HashMap<GroupId, GroupWatch>>,
}

async fn retry_backoff(attempt: u32) {
    let jitter = rng().random_range(0..RETRY_BASE_DELAY.as_millis() as u64);
    tokio::time::sleep(RETRY_BASE_DELAY * attempt + Duration::from_millis(jitter)).await;
}

impl<B: CoordinationBackend> MembershipClient<B> {
    pub fn new(backend: B, member_id: impl Into<MemberId>) -> Self {
        Self {
            backend,
            member_id: member_id.into(),
            session: RwLock::new(None),
            reconnect_lock: Mutex::new(()),
            groups: Mutex::new(BTreeSet::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Connects to the backend. Returns whether a session is established.
    pub async fn start(&self) -> bool {
        self.connect().await.is_some()
    }

    pub async fn is_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn is_member(&self, group_id: &str) -> bool {
        self.groups.lock().await.contains(group_id)
    }

    pub async fn joined_groups(&self) -> BTreeSet<GroupId> {
        self.groups.lock().await.clone()
    }

    async fn current_session(&self) -> Option<Arc<B::Session>> {
        self.session.read().await.clone()
    }

    async fn connect(&self) -> Option<Arc<B::Session>> {
        let _guard = self.reconnect_lock.lock().await;

        // Another caller may have reconnected while we were waiting
        if let Some(session) = self.current_session().await {
            return Some(session);
        }

        match self.backend.connect(&self.member_id).await {
            Ok(session) => {
                let session = Arc::new(session);
                *self.session.write().await = Some(session.clone());
                info!("Coordination backend started successfully");
                Some(session)
            }
            Err(e) => {
                error!("error connecting to coordination backend: {e}");
                None
            }
        }
    }

    /// Forgets `session` if it is still the current one.
    async fn drop_session(&self, session: &Arc<B::Session>) {
        let mut current = self.session.write().await;

        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
            *current = None;
            warn!("Dropped coordination session, will reconnect on next heartbeat");
        }
    }

    async fn handle_error(&self, session: &Arc<B::Session>, error: &CoordinationError) {
        if matches!(error, CoordinationError::ConnectionFailed(_)) {
            self.drop_session(session).await;
        }
    }

    /// Sends a liveness signal, reconnecting (and re-joining groups) first if
    /// the client is disconnected.
    pub async fn heartbeat(&self) {
        let session = match self.current_session().await {
            Some(session) => session,
            None => {
                let Some(session) = self.connect().await else {
                    return;
                };
                self.rejoin_groups(&session).await;
                session
            }
        };

        if let Err(e) = session.heartbeat().await {
            error!("error sending a heartbeat to coordination backend: {e}");
            self.handle_error(&session, &e).await;
        }
    }

    async fn rejoin_groups(&self, session: &Arc<B::Session>) {
        let groups = self.joined_groups().await;

        for group_id in groups {
            if !self.join_with(session, &group_id).await {
                warn!("failed to re-join group {group_id} after reconnect");
            }
        }
    }

    async fn join_with(&self, session: &Arc<B::Session>, group_id: &str) -> bool {
        for attempt in 1..=JOIN_ATTEMPTS {
            if attempt > 1 {
                retry_backoff(attempt).await;
            }

            match session.join_group(group_id).await {
                Ok(()) => {
                    info!("Joined partitioning group {group_id}");
                    return true;
                }
                Err(CoordinationError::MemberExists { .. }) => return true,
                Err(CoordinationError::GroupNotFound(_)) => {
                    match session.create_group(group_id).await {
                        Ok(()) => debug!("Created partitioning group {group_id}"),
                        Err(CoordinationError::GroupExists(_)) => {}
                        Err(e) => {
                            error!("error creating group {group_id}: {e}");
                            self.handle_error(session, &e).await;
                            return false;
                        }
                    }
                }
                Err(e) => {
                    error!("error joining group {group_id}: {e}");
                    self.handle_error(session, &e).await;
                    return false;
                }
            }
        }

        error!("giving up joining group {group_id} after {JOIN_ATTEMPTS} attempts");
        false
    }

    /// Joins `group_id`, creating it if needed. Joining a group twice is a
    /// success.
    pub async fn join_group(&self, group_id: &str) -> bool {
        if group_id.is_empty() {
            return false;
        }

        let Some(session) = self.current_session().await else {
            warn!("cannot join group {group_id}: not connected to coordination backend");
            return false;
        };

        if !self.join_with(&session, group_id).await {
            return false;
        }

        self.groups.lock().await.insert(group_id.to_string());
        true
    }

    pub async fn leave_group(&self, group_id: &str) {
        if !self.groups.lock().await.remove(group_id) {
            return;
        }

        let Some(session) = self.current_session().await else {
            return;
        };

        match session.leave_group(group_id).await {
            Ok(()) => info!("Left partitioning group {group_id}"),
            Err(e) => {
                error!("error leaving group {group_id}: {e}");
                self.handle_error(&session, &e).await;
            }
        }
    }

    /// Current members of `group_id`.
    ///
    /// `None` means the membership could not be read (disconnected, backend
    /// error), which is different from `Some` of an empty set.
    pub async fn get_members(&self, group_id: &str) -> Option<BTreeSet<MemberId>> {
        let Some(session) = self.current_session().await else {
            error!("cannot read members of group {group_id}: not connected");
            return None;
        };

        for attempt in 1..=MEMBERSHIP_READ_ATTEMPTS {
            match session.get_members(group_id).await {
                Ok(members) => return Some(members),
                Err(CoordinationError::GroupNotFound(_)) => {
                    warn!("group {group_id} not found (attempt {attempt}), re-joining");
                    self.join_group(group_id).await;
                }
                Err(e) => {
                    error!("error reading members of group {group_id}: {e}");
                    self.handle_error(&session, &e).await;
                    return None;
                }
            }
        }

        error!(
            "giving up reading members of group {group_id} after {MEMBERSHIP_READ_ATTEMPTS} attempts"
        );
        None
    }

    /// Registers `callback` for join/leave events of `group_id`, delivered by
    /// [`MembershipClient::run_watchers`].
    pub async fn watch_group<F>(&self, group_id: &str, callback: F)
    where
        F: Fn(&MembershipEvent) + Send + Sync + 'static,
    {
        self.watchers
            .lock()
            .await
            .entry(group_id.to_string())
            .or_default()
            .callbacks
            .push(Box::new(callback));
    }

    /// Diffs every watched group against its last observed members and fires
    /// the callbacks. The first run only records a baseline.
    pub async fn run_watchers(&self) {
        let Some(session) = self.current_session().await else {
            return;
        };

        let mut watchers = self.watchers.lock().await;

        for (group_id, watch) in watchers.iter_mut() {
            let members = match session.get_members(group_id).await {
                Ok(members) => members,
                Err(e) => {
                    debug!("skipping watchers of group {group_id}: {e}");
                    continue;
                }
            };

            if let Some(previous) = &watch.last_seen {
                let joined = members.difference(previous).map(|member| MembershipEvent::Joined {
                    group: group_id.clone(),
                    member: member.clone(),
                });
                let left = previous.difference(&members).map(|member| MembershipEvent::Left {
                    group: group_id.clone(),
                    member: member.clone(),
                });

                for event in joined.chain(left) {
                    for callback in &watch.callbacks {
                        callback(&event);
                    }
                }
            }

            watch.last_seen = Some(members);
        }
    }

    /// Leaves every joined group, then releases the session.
    pub async fn stop(&self) {
        for group_id in self.joined_groups().await {
            self.leave_group(&group_id).await;
        }

        let Some(session) = self.session.write().await.take() else {
            return;
        };

        if let Err(e) = session.stop().await {
            error!("error stopping coordination session: {e}");
        }

        info!("Coordination backend stopped");
    }
}

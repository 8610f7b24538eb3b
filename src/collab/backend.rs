use std::collections::BTreeSet;
use thiserror::Error;

pub type MemberId = String;
pub type GroupId = String;

/// Every failure a coordination backend may report.
///
/// Backend specific errors (driver errors, timeouts, ...) are collapsed into
/// [`CoordinationError::ConnectionFailed`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("coordination backend unreachable: {0}")]
    ConnectionFailed(String),
    #[error("group '{0}' does not exist")]
    GroupNotFound(GroupId),
    #[error("member '{member}' already joined group '{group}'")]
    MemberExists { group: GroupId, member: MemberId },
    #[error("group '{0}' already exists")]
    GroupExists(GroupId),
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Factory for coordination sessions.
pub trait CoordinationBackend: Send + Sync + 'static {
    type Session: CoordinationSession + 'static;

    fn connect(
        &self,
        member_id: &str,
    ) -> impl Future<Output = CoordinationResult<Self::Session>> + Send;
}

/// A live session with a coordination backend, bound to one member id.
pub trait CoordinationSession: Send + Sync {
    fn heartbeat(&self) -> impl Future<Output = CoordinationResult<()>> + Send;

    fn create_group(&self, group_id: &str) -> impl Future<Output = CoordinationResult<()>> + Send;

    fn join_group(&self, group_id: &str) -> impl Future<Output = CoordinationResult<()>> + Send;

    fn leave_group(&self, group_id: &str) -> impl Future<Output = CoordinationResult<()>> + Send;

    fn get_members(
        &self,
        group_id: &str,
    ) -> impl Future<Output = CoordinationResult<BTreeSet<MemberId>>> + Send;

    fn stop(&self) -> impl Future<Output = CoordinationResult<()>> + Send;
}

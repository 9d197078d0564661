//! Mutation requests and their optimistic bookkeeping
//!
//! A request bundles the remote call with everything the cache needs to make
//! it look instantaneous: predicted entry values, an optional idempotence
//! guard and the keys to refetch once the backend confirms.

use crate::error::{MutationError, RemoteError, RemoteErrorKind, ValidationError};
use crate::keys::{CacheKey, KeySelector};
use crate::notify::NotifyLevel;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// User actions that change backend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Like,
    Delete,
    Follow,
    Unfollow,
    SendFriendRequest,
    AcceptFriendRequest,
    DeclineFriendRequest,
    Unfriend,
    Comment,
    SendMessage,
    UploadVideo,
    SaveProfile,
}

impl MutationKind {
    /// Metrics label
    pub fn label(self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Delete => "delete",
            MutationKind::Follow => "follow",
            MutationKind::Unfollow => "unfollow",
            MutationKind::SendFriendRequest => "send_friend_request",
            MutationKind::AcceptFriendRequest => "accept_friend_request",
            MutationKind::DeclineFriendRequest => "decline_friend_request",
            MutationKind::Unfriend => "unfriend",
            MutationKind::Comment => "comment",
            MutationKind::SendMessage => "send_message",
            MutationKind::UploadVideo => "upload_video",
            MutationKind::SaveProfile => "save_profile",
        }
    }

    /// Verb phrase used in user-facing messages
    pub fn action(self) -> &'static str {
        match self {
            MutationKind::Like => "like video",
            MutationKind::Delete => "delete video",
            MutationKind::Follow => "follow user",
            MutationKind::Unfollow => "unfollow user",
            MutationKind::SendFriendRequest => "send friend request",
            MutationKind::AcceptFriendRequest => "accept friend request",
            MutationKind::DeclineFriendRequest => "decline friend request",
            MutationKind::Unfriend => "remove friend",
            MutationKind::Comment => "post comment",
            MutationKind::SendMessage => "send message",
            MutationKind::UploadVideo => "upload video",
            MutationKind::SaveProfile => "update profile",
        }
    }

    pub fn success_message(self) -> Option<&'static str> {
        match self {
            MutationKind::Delete => Some("Video deleted successfully"),
            MutationKind::Follow => Some("Following successfully"),
            MutationKind::Unfollow => Some("Unfollowed successfully"),
            MutationKind::SendFriendRequest => Some("Friend request sent"),
            MutationKind::AcceptFriendRequest => Some("Friend request accepted"),
            MutationKind::Comment => Some("Comment posted!"),
            MutationKind::UploadVideo => Some("Video uploaded successfully!"),
            MutationKind::SaveProfile => Some("Profile updated successfully!"),
            MutationKind::Like
            | MutationKind::DeclineFriendRequest
            | MutationKind::Unfriend
            | MutationKind::SendMessage => None,
        }
    }

    /// Message for an action the backend (or the local guard) says is already done
    pub fn already_applied_message(self) -> &'static str {
        match self {
            MutationKind::Like => "You already liked this video",
            MutationKind::Follow => "You are already following this user",
            MutationKind::Unfollow => "You are not following this user",
            MutationKind::SendFriendRequest => "Friend request already sent",
            MutationKind::AcceptFriendRequest | MutationKind::DeclineFriendRequest => {
                "Friend request already handled"
            }
            MutationKind::Unfriend => "You are not friends with this user",
            MutationKind::Delete => "Video already deleted",
            MutationKind::Comment | MutationKind::SendMessage => "Already sent",
            MutationKind::UploadVideo => "Video already uploaded",
            MutationKind::SaveProfile => "Profile already up to date",
        }
    }

    /// Level and text to show for a failed mutation
    pub fn failure_notice(self, err: &MutationError) -> (NotifyLevel, String) {
        match err {
            MutationError::Rejected(ValidationError::AlreadyApplied { .. }) => {
                (NotifyLevel::Info, self.already_applied_message().to_string())
            }
            MutationError::Rejected(ValidationError::InvalidPayload(reason)) => {
                (NotifyLevel::Error, reason.clone())
            }
            MutationError::Rejected(ValidationError::UpdateRejected { .. }) => {
                (NotifyLevel::Error, format!("Failed to {}", self.action()))
            }
            MutationError::Remote { source, .. } => match source.kind {
                RemoteErrorKind::Conflict => {
                    (NotifyLevel::Info, self.already_applied_message().to_string())
                }
                RemoteErrorKind::Unauthorized => {
                    (NotifyLevel::Error, format!("Please login to {}", self.action()))
                }
                RemoteErrorKind::Unavailable
                | RemoteErrorKind::Timeout
                | RemoteErrorKind::NotFound
                | RemoteErrorKind::Rejected => {
                    (NotifyLevel::Error, format!("Failed to {}", self.action()))
                }
            },
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of one mutation
///
/// `Idle -> OptimisticallyApplied -> Confirmed | RolledBack`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    OptimisticallyApplied,
    Confirmed,
    RolledBack,
}

impl MutationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Confirmed | MutationState::RolledBack)
    }

    pub fn can_advance_to(self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (MutationState::Idle, MutationState::OptimisticallyApplied)
                | (MutationState::OptimisticallyApplied, MutationState::Confirmed)
                | (MutationState::OptimisticallyApplied, MutationState::RolledBack)
        )
    }
}

/// Local idempotence bookkeeping: a predicted boolean per `(scope, target)`.
///
/// The request is rejected when the prediction already equals `state`,
/// e.g. a second like of the same video, or following a user that is already
/// predicted as followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub scope: &'static str,
    pub target: String,
    pub state: bool,
}

impl Guard {
    /// At most one application per target until rolled back
    pub fn once(scope: &'static str, target: impl Into<String>) -> Self {
        Self {
            scope,
            target: target.into(),
            state: true,
        }
    }

    /// Mutually exclusive predicted state (follow/unfollow)
    pub fn set(scope: &'static str, target: impl Into<String>, state: bool) -> Self {
        Self {
            scope,
            target: target.into(),
            state,
        }
    }
}

type UpdateFn<V> = Arc<dyn Fn(&V) -> Result<Option<V>, String> + Send + Sync>;

/// Predicted new value for every cached entry matching `selector`.
///
/// The function returns `Ok(None)` to leave an entry untouched and `Err` to
/// reject the whole mutation before anything is applied.
pub struct OptimisticUpdate<V> {
    pub selector: KeySelector,
    apply: UpdateFn<V>,
}

impl<V> OptimisticUpdate<V> {
    pub fn new<F>(selector: KeySelector, f: F) -> Self
    where
        F: Fn(&V) -> Option<V> + Send + Sync + 'static,
    {
        Self {
            selector,
            apply: Arc::new(move |v| Ok(f(v))),
        }
    }

    pub fn try_new<F>(selector: KeySelector, f: F) -> Self
    where
        F: Fn(&V) -> Result<Option<V>, String> + Send + Sync + 'static,
    {
        Self {
            selector,
            apply: Arc::new(f),
        }
    }

    pub(crate) fn compute(&self, key: &CacheKey, current: &V) -> Result<Option<V>, ValidationError> {
        (self.apply)(current).map_err(|reason| ValidationError::UpdateRejected {
            key: key.clone(),
            reason,
        })
    }
}

impl<V> fmt::Debug for OptimisticUpdate<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Deferred remote operation, invoked at most once
pub type RemoteCall = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RemoteError>> + Send>;

pub struct MutationRequest<V> {
    pub kind: MutationKind,
    /// Identity of the affected record (video id, user id, ...)
    pub target: String,
    pub(crate) updates: Vec<OptimisticUpdate<V>>,
    pub(crate) guard: Option<Guard>,
    pub(crate) invalidates: Vec<KeySelector>,
    pub(crate) remote: RemoteCall,
}

impl<V> MutationRequest<V> {
    pub fn new<F, Fut>(kind: MutationKind, target: impl Into<String>, remote: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
    {
        Self {
            kind,
            target: target.into(),
            updates: Vec::new(),
            guard: None,
            invalidates: Vec::new(),
            remote: Box::new(move || remote().boxed()),
        }
    }

    pub fn optimistic(mut self, update: OptimisticUpdate<V>) -> Self {
        self.updates.push(update);
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Add a selector to the invalidation set
    pub fn invalidate(mut self, selector: KeySelector) -> Self {
        self.invalidates.push(selector);
        self
    }

    pub fn invalidation_set(&self) -> &[KeySelector] {
        &self.invalidates
    }

    pub fn has_optimistic_update(&self) -> bool {
        !self.updates.is_empty()
    }
}

impl<V> fmt::Debug for MutationRequest<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRequest")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("updates", &self.updates)
            .field("guard", &self.guard)
            .field("invalidates", &self.invalidates)
            .finish_non_exhaustive()
    }
}

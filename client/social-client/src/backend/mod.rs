//! Remote operation interface
//!
//! Every call may fail with a [`RemoteError`]; the caller identity is owned by
//! the implementation and never passed per call.

mod memory;

pub use memory::InMemoryBackend;

use crate::domain::{
    Comment, FriendRequest, Message, NewVideo, ProfileDraft, UserId, UserProfile, UserSummary,
    Video, VideoId,
};
use async_trait::async_trait;
use query_cache::RemoteError;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialBackend: Send + Sync {
    // Profiles
    async fn caller_profile(&self) -> RemoteResult<Option<UserProfile>>;
    async fn user_profile(&self, user: &UserId) -> RemoteResult<Option<UserProfile>>;
    async fn save_profile(&self, profile: ProfileDraft) -> RemoteResult<()>;
    async fn search_users(&self, term: &str) -> RemoteResult<Vec<UserSummary>>;

    // Videos
    async fn most_liked_videos(&self) -> RemoteResult<Vec<Video>>;
    async fn user_videos(&self, user: &UserId) -> RemoteResult<Vec<Video>>;
    async fn video(&self, id: VideoId) -> RemoteResult<Option<Video>>;
    async fn upload_video(&self, video: NewVideo) -> RemoteResult<VideoId>;
    async fn delete_video(&self, id: VideoId) -> RemoteResult<()>;
    async fn like_video(&self, id: VideoId) -> RemoteResult<()>;
    async fn video_comments(&self, id: VideoId) -> RemoteResult<Vec<Comment>>;
    async fn comment_on_video(&self, id: VideoId, text: String) -> RemoteResult<()>;

    // Follow graph
    async fn follow_user(&self, target: &UserId) -> RemoteResult<()>;
    async fn unfollow_user(&self, target: &UserId) -> RemoteResult<()>;

    // Messaging
    async fn messages_with(&self, other: &UserId) -> RemoteResult<Vec<Message>>;
    async fn send_message(
        &self,
        recipient: &UserId,
        content: String,
        video_link: Option<String>,
    ) -> RemoteResult<()>;
    async fn conversation_partners(&self) -> RemoteResult<Vec<UserId>>;

    // Friends
    async fn friend_requests(&self) -> RemoteResult<Vec<FriendRequest>>;
    async fn friends(&self) -> RemoteResult<Vec<UserSummary>>;
    async fn send_friend_request(&self, target: &UserId) -> RemoteResult<()>;
    async fn accept_friend_request(&self, from: &UserId) -> RemoteResult<()>;
    async fn decline_friend_request(&self, from: &UserId) -> RemoteResult<()>;
    async fn unfriend(&self, friend: &UserId) -> RemoteResult<()>;
}

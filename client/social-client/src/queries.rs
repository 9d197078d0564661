//! Query catalogue
//!
//! Every read the client performs is one [`Query`] variant with a fixed
//! cache key. Results are stored as [`QueryData`], one tagged variant per
//! result shape.

use crate::backend::SocialBackend;
use crate::domain::{
    Comment, ContentType, FriendRequest, Message, UserId, UserProfile, UserSummary, Video,
    VideoId,
};
use async_trait::async_trait;
use query_cache::{CacheKey, KeySegment, QueryFetcher, RemoteError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How often open conversations are refreshed
pub const CHAT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub mod keys {
    pub const CURRENT_USER_PROFILE: &str = "currentUserProfile";
    pub const USER_PROFILE: &str = "userProfile";
    pub const VIDEOS: &str = "videos";
    pub const MOST_LIKED: &str = "mostLiked";
    pub const VIDLES: &str = "vidles";
    pub const USER_VIDEOS: &str = "userVideos";
    pub const VIDEO: &str = "video";
    pub const COMMENTS: &str = "comments";
    pub const MESSAGES: &str = "messages";
    pub const CONVERSATION_PARTNERS: &str = "conversationPartners";
    pub const FRIEND_REQUESTS: &str = "friendRequests";
    pub const FRIENDS: &str = "friends";
    pub const SEARCH_USERS: &str = "searchUsers";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    CurrentUserProfile,
    UserProfile(UserId),
    MostLikedVideos,
    /// Most-liked videos restricted to Vidles
    Vidles,
    UserVideos(UserId),
    Video(VideoId),
    Comments(VideoId),
    Messages(UserId),
    ConversationPartners,
    FriendRequests,
    Friends,
    SearchUsers(String),
}

impl Query {
    pub fn key(&self) -> CacheKey {
        match self {
            Query::CurrentUserProfile => CacheKey::root(keys::CURRENT_USER_PROFILE),
            Query::UserProfile(user) => CacheKey::root(keys::USER_PROFILE).push(user),
            Query::MostLikedVideos => CacheKey::root(keys::VIDEOS).push(keys::MOST_LIKED),
            Query::Vidles => CacheKey::root(keys::VIDEOS).push(keys::VIDLES),
            Query::UserVideos(user) => CacheKey::root(keys::USER_VIDEOS).push(user),
            Query::Video(id) => CacheKey::root(keys::VIDEO).push(*id),
            Query::Comments(id) => CacheKey::root(keys::COMMENTS).push(*id),
            Query::Messages(user) => CacheKey::root(keys::MESSAGES).push(user),
            Query::ConversationPartners => CacheKey::root(keys::CONVERSATION_PARTNERS),
            Query::FriendRequests => CacheKey::root(keys::FRIEND_REQUESTS),
            Query::Friends => CacheKey::root(keys::FRIENDS),
            Query::SearchUsers(term) => CacheKey::root(keys::SEARCH_USERS).push(term.as_str()),
        }
    }

    /// Polling period for queries kept live while shown
    pub fn refetch_interval(&self) -> Option<Duration> {
        match self {
            Query::Messages(_) | Query::ConversationPartners => Some(CHAT_POLL_INTERVAL),
            _ => None,
        }
    }

    /// Inverse of [`key`](Self::key)
    pub fn from_key(key: &CacheKey) -> Option<Query> {
        use KeySegment::{Num, Str};

        let query = match key.segments() {
            [Str(root)] => match root.as_str() {
                keys::CURRENT_USER_PROFILE => Query::CurrentUserProfile,
                keys::CONVERSATION_PARTNERS => Query::ConversationPartners,
                keys::FRIEND_REQUESTS => Query::FriendRequests,
                keys::FRIENDS => Query::Friends,
                _ => return None,
            },
            [Str(root), Str(arg)] => match (root.as_str(), arg.as_str()) {
                (keys::VIDEOS, keys::MOST_LIKED) => Query::MostLikedVideos,
                (keys::VIDEOS, keys::VIDLES) => Query::Vidles,
                (keys::USER_PROFILE, user) => Query::UserProfile(UserId::from(user)),
                (keys::USER_VIDEOS, user) => Query::UserVideos(UserId::from(user)),
                (keys::MESSAGES, user) => Query::Messages(UserId::from(user)),
                (keys::SEARCH_USERS, term) => Query::SearchUsers(term.to_string()),
                _ => return None,
            },
            [Str(root), Num(id)] => match root.as_str() {
                keys::VIDEO => Query::Video(VideoId(*id)),
                keys::COMMENTS => Query::Comments(VideoId(*id)),
                _ => return None,
            },
            _ => return None,
        };
        Some(query)
    }
}

/// Cached query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QueryData {
    Profile(Option<UserProfile>),
    Videos(Vec<Video>),
    Video(Option<Video>),
    Comments(Vec<Comment>),
    Messages(Vec<Message>),
    Users(Vec<UserId>),
    FriendRequests(Vec<FriendRequest>),
    UserSummaries(Vec<UserSummary>),
}

impl QueryData {
    pub fn shape(&self) -> &'static str {
        match self {
            QueryData::Profile(_) => "profile",
            QueryData::Videos(_) => "videos",
            QueryData::Video(_) => "video",
            QueryData::Comments(_) => "comments",
            QueryData::Messages(_) => "messages",
            QueryData::Users(_) => "users",
            QueryData::FriendRequests(_) => "friend_requests",
            QueryData::UserSummaries(_) => "user_summaries",
        }
    }
}

/// Binds cache fetches to the backend
pub struct BackendFetcher {
    backend: Arc<dyn SocialBackend>,
}

impl BackendFetcher {
    pub fn new(backend: Arc<dyn SocialBackend>) -> Self {
        Self { backend }
    }

    pub async fn run(&self, query: &Query) -> Result<QueryData, RemoteError> {
        let backend = &self.backend;
        Ok(match query {
            Query::CurrentUserProfile => QueryData::Profile(backend.caller_profile().await?),
            Query::UserProfile(user) => QueryData::Profile(backend.user_profile(user).await?),
            Query::MostLikedVideos => QueryData::Videos(backend.most_liked_videos().await?),
            Query::Vidles => QueryData::Videos(
                backend
                    .most_liked_videos()
                    .await?
                    .into_iter()
                    .filter(|v| v.content_type == ContentType::Vidle)
                    .collect(),
            ),
            Query::UserVideos(user) => QueryData::Videos(backend.user_videos(user).await?),
            Query::Video(id) => QueryData::Video(backend.video(*id).await?),
            Query::Comments(id) => QueryData::Comments(backend.video_comments(*id).await?),
            Query::Messages(user) => QueryData::Messages(backend.messages_with(user).await?),
            Query::ConversationPartners => {
                QueryData::Users(backend.conversation_partners().await?)
            }
            Query::FriendRequests => QueryData::FriendRequests(backend.friend_requests().await?),
            Query::Friends => QueryData::UserSummaries(backend.friends().await?),
            Query::SearchUsers(term) => {
                QueryData::UserSummaries(backend.search_users(term).await?)
            }
        })
    }
}

#[async_trait]
impl QueryFetcher<QueryData> for BackendFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<QueryData, RemoteError> {
        let query = Query::from_key(key)
            .ok_or_else(|| RemoteError::not_found(format!("No query registered for {}", key)))?;
        self.run(&query).await
    }
}

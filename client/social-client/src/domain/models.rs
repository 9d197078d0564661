use chrono::{DateTime, Utc};
use query_cache::KeySegment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Principal of a registered user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&UserId> for KeySegment {
    fn from(id: &UserId) -> Self {
        KeySegment::Str(id.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub u64);

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<VideoId> for KeySegment {
    fn from(id: VideoId) -> Self {
        KeySegment::Num(id.0)
    }
}

/// Regular video or short portrait clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Vidle,
}

/// Video entity - media itself is an opaque blob reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub blob_url: String,
    pub likes: u64,
    pub uploader: UserId,
    pub upload_time: DateTime<Utc>,
    pub content_type: ContentType,
    pub duration_secs: u32,
    /// width / height
    pub aspect_ratio: f32,
}

/// Validated upload payload sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub blob_url: String,
    pub content_type: ContentType,
    pub duration_secs: u32,
    pub aspect_ratio: f32,
}

/// Comment entity - text comment on a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Direct message, optionally sharing a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: UserId,
    pub recipient: UserId,
    pub content: String,
    pub video_link: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub bio: String,
    pub followers: u64,
    pub following: u64,
    pub profile_picture: Option<String>,
}

/// Editable part of a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub username: String,
    pub bio: String,
    pub profile_picture: Option<String>,
}

/// Pending friend request addressed to `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub from: UserId,
    pub from_username: String,
    pub to: UserId,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

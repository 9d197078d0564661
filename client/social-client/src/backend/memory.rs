//! In-process backend
//!
//! Holds the durable social state in memory. Used by the demo binary and by
//! tests, which can count calls per operation and inject failures.

use super::{RemoteResult, SocialBackend};
use crate::domain::{
    Comment, ContentType, FriendRequest, Message, NewVideo, ProfileDraft, UserId, UserProfile,
    UserSummary, Video, VideoId,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use query_cache::RemoteError;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Store {
    profiles: HashMap<UserId, ProfileDraft>,
    videos: BTreeMap<u64, Video>,
    next_video_id: u64,
    likes: BTreeSet<(UserId, VideoId)>,
    comments: HashMap<VideoId, Vec<Comment>>,
    /// (follower, followee)
    follows: BTreeSet<(UserId, UserId)>,
    messages: Vec<Message>,
    friend_requests: Vec<FriendRequest>,
    /// Stored with the smaller id first
    friendships: BTreeSet<(UserId, UserId)>,
}

impl Store {
    fn profile(&self, user: &UserId) -> Option<UserProfile> {
        let draft = self.profiles.get(user)?;
        Some(UserProfile {
            username: draft.username.clone(),
            bio: draft.bio.clone(),
            followers: self.follows.iter().filter(|(_, to)| to == user).count() as u64,
            following: self.follows.iter().filter(|(from, _)| from == user).count() as u64,
            profile_picture: draft.profile_picture.clone(),
        })
    }

    fn summary(&self, user: &UserId) -> UserSummary {
        UserSummary {
            id: user.clone(),
            username: self
                .profiles
                .get(user)
                .map(|p| p.username.clone())
                .unwrap_or_else(|| user.to_string()),
        }
    }

    fn friendship(a: &UserId, b: &UserId) -> (UserId, UserId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}

pub struct InMemoryBackend {
    caller: Option<UserId>,
    store: Mutex<Store>,
    calls: Mutex<HashMap<&'static str, u32>>,
    failures: Mutex<HashMap<&'static str, VecDeque<RemoteError>>>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    /// Backend seen by an authenticated caller
    pub fn new(caller: UserId) -> Self {
        Self::build(Some(caller))
    }

    /// Backend seen by an anonymous caller; every write is unauthorized
    pub fn anonymous() -> Self {
        Self::build(None)
    }

    fn build(caller: Option<UserId>) -> Self {
        Self {
            caller,
            store: Mutex::new(Store {
                next_video_id: 1,
                ..Default::default()
            }),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Delay every call, e.g. to observe optimistic state or shared fetches
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn register(&self, user: &UserId, username: &str, bio: &str) {
        self.store.lock().profiles.insert(
            user.clone(),
            ProfileDraft {
                username: username.to_string(),
                bio: bio.to_string(),
                profile_picture: None,
            },
        );
    }

    /// Insert a video directly, bypassing upload validation
    pub fn seed_video(
        &self,
        uploader: &UserId,
        title: &str,
        likes: u64,
        content_type: ContentType,
    ) -> VideoId {
        let mut store = self.store.lock();
        let id = VideoId(store.next_video_id);
        store.next_video_id += 1;
        let (duration_secs, aspect_ratio) = match content_type {
            ContentType::Video => (120, 16.0 / 9.0),
            ContentType::Vidle => (30, 9.0 / 16.0),
        };
        store.videos.insert(
            id.0,
            Video {
                id,
                title: title.to_string(),
                description: String::new(),
                tags: Vec::new(),
                blob_url: format!("blob://videos/{}", id),
                likes,
                uploader: uploader.clone(),
                upload_time: Utc::now(),
                content_type,
                duration_secs,
                aspect_ratio,
            },
        );
        id
    }

    pub fn follow_between(&self, follower: &UserId, followee: &UserId) {
        self.store
            .lock()
            .follows
            .insert((follower.clone(), followee.clone()));
    }

    pub fn request_friendship(&self, from: &UserId, to: &UserId) {
        let mut store = self.store.lock();
        let from_username = store.summary(from).username;
        store.friend_requests.push(FriendRequest {
            from: from.clone(),
            from_username,
            to: to.clone(),
            sent_at: Utc::now(),
        });
    }

    /// Store a message sent by another user, as if it arrived from elsewhere
    pub fn deliver_message(&self, from: &UserId, to: &UserId, content: &str) {
        self.store.lock().messages.push(Message {
            sender: from.clone(),
            recipient: to.clone(),
            content: content.to_string(),
            video_link: None,
            timestamp: Utc::now(),
        });
    }

    /// Number of times `op` was invoked
    pub fn calls(&self, op: &str) -> u32 {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Fail the next invocation of `op` with `err`; repeated calls queue up
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    pub fn likes(&self, id: VideoId) -> Option<u64> {
        self.store.lock().videos.get(&id.0).map(|v| v.likes)
    }

    pub fn is_following(&self, follower: &UserId, followee: &UserId) -> bool {
        self.store
            .lock()
            .follows
            .contains(&(follower.clone(), followee.clone()))
    }

    async fn enter(&self, op: &'static str) -> RemoteResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        debug!(op, "Backend call");

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self.failures.lock().get_mut(op).and_then(|q| q.pop_front());
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn caller(&self) -> RemoteResult<&UserId> {
        self.caller
            .as_ref()
            .ok_or_else(|| RemoteError::unauthorized("Anonymous caller"))
    }
}

#[async_trait]
impl SocialBackend for InMemoryBackend {
    async fn caller_profile(&self) -> RemoteResult<Option<UserProfile>> {
        self.enter("caller_profile").await?;
        let Some(caller) = self.caller.as_ref() else {
            return Ok(None);
        };
        Ok(self.store.lock().profile(caller))
    }

    async fn user_profile(&self, user: &UserId) -> RemoteResult<Option<UserProfile>> {
        self.enter("user_profile").await?;
        Ok(self.store.lock().profile(user))
    }

    async fn save_profile(&self, profile: ProfileDraft) -> RemoteResult<()> {
        self.enter("save_profile").await?;
        let caller = self.caller()?.clone();
        if profile.username.trim().is_empty() {
            return Err(RemoteError::rejected("Username cannot be empty"));
        }
        self.store.lock().profiles.insert(caller, profile);
        Ok(())
    }

    async fn search_users(&self, term: &str) -> RemoteResult<Vec<UserSummary>> {
        self.enter("search_users").await?;
        let needle = term.trim().to_lowercase();
        let store = self.store.lock();
        let mut found: Vec<UserSummary> = store
            .profiles
            .iter()
            .filter(|(id, _)| Some(*id) != self.caller.as_ref())
            .filter(|(_, p)| p.username.to_lowercase().contains(&needle))
            .map(|(id, _)| store.summary(id))
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found)
    }

    async fn most_liked_videos(&self) -> RemoteResult<Vec<Video>> {
        self.enter("most_liked_videos").await?;
        let mut videos: Vec<Video> = self.store.lock().videos.values().cloned().collect();
        videos.sort_by(|a, b| b.likes.cmp(&a.likes).then(a.id.cmp(&b.id)));
        Ok(videos)
    }

    async fn user_videos(&self, user: &UserId) -> RemoteResult<Vec<Video>> {
        self.enter("user_videos").await?;
        Ok(self
            .store
            .lock()
            .videos
            .values()
            .filter(|v| &v.uploader == user)
            .cloned()
            .collect())
    }

    async fn video(&self, id: VideoId) -> RemoteResult<Option<Video>> {
        self.enter("video").await?;
        Ok(self.store.lock().videos.get(&id.0).cloned())
    }

    async fn upload_video(&self, video: NewVideo) -> RemoteResult<VideoId> {
        self.enter("upload_video").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        let id = VideoId(store.next_video_id);
        store.next_video_id += 1;
        store.videos.insert(
            id.0,
            Video {
                id,
                title: video.title,
                description: video.description,
                tags: video.tags,
                blob_url: video.blob_url,
                likes: 0,
                uploader: caller,
                upload_time: Utc::now(),
                content_type: video.content_type,
                duration_secs: video.duration_secs,
                aspect_ratio: video.aspect_ratio,
            },
        );
        Ok(id)
    }

    async fn delete_video(&self, id: VideoId) -> RemoteResult<()> {
        self.enter("delete_video").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        let video = store
            .videos
            .get(&id.0)
            .ok_or_else(|| RemoteError::not_found(format!("Video {} not found", id)))?;
        if video.uploader != caller {
            return Err(RemoteError::rejected("Only the uploader can delete a video"));
        }
        store.videos.remove(&id.0);
        store.comments.remove(&id);
        store.likes.retain(|(_, v)| *v != id);
        Ok(())
    }

    async fn like_video(&self, id: VideoId) -> RemoteResult<()> {
        self.enter("like_video").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        if !store.videos.contains_key(&id.0) {
            return Err(RemoteError::not_found(format!("Video {} not found", id)));
        }
        if !store.likes.insert((caller, id)) {
            return Err(RemoteError::conflict("Already liked"));
        }
        if let Some(video) = store.videos.get_mut(&id.0) {
            video.likes += 1;
        }
        Ok(())
    }

    async fn video_comments(&self, id: VideoId) -> RemoteResult<Vec<Comment>> {
        self.enter("video_comments").await?;
        Ok(self
            .store
            .lock()
            .comments
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn comment_on_video(&self, id: VideoId, text: String) -> RemoteResult<()> {
        self.enter("comment_on_video").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        if !store.videos.contains_key(&id.0) {
            return Err(RemoteError::not_found(format!("Video {} not found", id)));
        }
        store.comments.entry(id).or_default().push(Comment {
            author: caller,
            text,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn follow_user(&self, target: &UserId) -> RemoteResult<()> {
        self.enter("follow_user").await?;
        let caller = self.caller()?.clone();
        if &caller == target {
            return Err(RemoteError::rejected("Cannot follow yourself"));
        }
        if !self.store.lock().follows.insert((caller, target.clone())) {
            return Err(RemoteError::conflict("Already following"));
        }
        Ok(())
    }

    async fn unfollow_user(&self, target: &UserId) -> RemoteResult<()> {
        self.enter("unfollow_user").await?;
        let caller = self.caller()?.clone();
        if !self.store.lock().follows.remove(&(caller, target.clone())) {
            return Err(RemoteError::conflict("Not following"));
        }
        Ok(())
    }

    async fn messages_with(&self, other: &UserId) -> RemoteResult<Vec<Message>> {
        self.enter("messages_with").await?;
        let caller = self.caller()?.clone();
        let mut messages: Vec<Message> = self
            .store
            .lock()
            .messages
            .iter()
            .filter(|m| {
                (m.sender == caller && &m.recipient == other)
                    || (&m.sender == other && m.recipient == caller)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn send_message(
        &self,
        recipient: &UserId,
        content: String,
        video_link: Option<String>,
    ) -> RemoteResult<()> {
        self.enter("send_message").await?;
        let caller = self.caller()?.clone();
        self.store.lock().messages.push(Message {
            sender: caller,
            recipient: recipient.clone(),
            content,
            video_link,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn conversation_partners(&self) -> RemoteResult<Vec<UserId>> {
        self.enter("conversation_partners").await?;
        let caller = self.caller()?.clone();
        let partners: BTreeSet<UserId> = self
            .store
            .lock()
            .messages
            .iter()
            .filter_map(|m| {
                if m.sender == caller {
                    Some(m.recipient.clone())
                } else if m.recipient == caller {
                    Some(m.sender.clone())
                } else {
                    None
                }
            })
            .collect();
        Ok(partners.into_iter().collect())
    }

    async fn friend_requests(&self) -> RemoteResult<Vec<FriendRequest>> {
        self.enter("friend_requests").await?;
        let caller = self.caller()?.clone();
        Ok(self
            .store
            .lock()
            .friend_requests
            .iter()
            .filter(|r| r.to == caller)
            .cloned()
            .collect())
    }

    async fn friends(&self) -> RemoteResult<Vec<UserSummary>> {
        self.enter("friends").await?;
        let caller = self.caller()?.clone();
        let store = self.store.lock();
        Ok(store
            .friendships
            .iter()
            .filter_map(|(a, b)| {
                if a == &caller {
                    Some(store.summary(b))
                } else if b == &caller {
                    Some(store.summary(a))
                } else {
                    None
                }
            })
            .collect())
    }

    async fn send_friend_request(&self, target: &UserId) -> RemoteResult<()> {
        self.enter("send_friend_request").await?;
        let caller = self.caller()?.clone();
        if &caller == target {
            return Err(RemoteError::rejected("Cannot send a friend request to yourself"));
        }
        let mut store = self.store.lock();
        if store
            .friendships
            .contains(&Store::friendship(&caller, target))
        {
            return Err(RemoteError::conflict("Already friends"));
        }
        if store
            .friend_requests
            .iter()
            .any(|r| r.from == caller && &r.to == target)
        {
            return Err(RemoteError::conflict("Friend request already sent"));
        }
        let from_username = store.summary(&caller).username;
        store.friend_requests.push(FriendRequest {
            from: caller,
            from_username,
            to: target.clone(),
            sent_at: Utc::now(),
        });
        Ok(())
    }

    async fn accept_friend_request(&self, from: &UserId) -> RemoteResult<()> {
        self.enter("accept_friend_request").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        let before = store.friend_requests.len();
        store
            .friend_requests
            .retain(|r| !(&r.from == from && r.to == caller));
        if store.friend_requests.len() == before {
            return Err(RemoteError::not_found("No pending friend request"));
        }
        store.friendships.insert(Store::friendship(&caller, from));
        Ok(())
    }

    async fn decline_friend_request(&self, from: &UserId) -> RemoteResult<()> {
        self.enter("decline_friend_request").await?;
        let caller = self.caller()?.clone();
        let mut store = self.store.lock();
        let before = store.friend_requests.len();
        store
            .friend_requests
            .retain(|r| !(&r.from == from && r.to == caller));
        if store.friend_requests.len() == before {
            return Err(RemoteError::not_found("No pending friend request"));
        }
        Ok(())
    }

    async fn unfriend(&self, friend: &UserId) -> RemoteResult<()> {
        self.enter("unfriend").await?;
        let caller = self.caller()?.clone();
        if !self
            .store
            .lock()
            .friendships
            .remove(&Store::friendship(&caller, friend))
        {
            return Err(RemoteError::conflict("Not friends"));
        }
        Ok(())
    }
}

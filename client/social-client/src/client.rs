//! Typed client facade over the query cache
//!
//! Reads go through the cache by [`Query`]; writes are built by
//! [`Mutations`] and executed optimistically.

use crate::backend::SocialBackend;
use crate::domain::{
    Comment, FriendRequest, Message, ProfileDraft, UserId, UserProfile, UserSummary, Video,
    VideoId,
};
use crate::error::{ClientError, ClientResult};
use crate::mutations::{scopes, BuildResult, Mutations};
use crate::queries::{BackendFetcher, Query, QueryData};
use crate::validation::UploadRequest;
use query_cache::{CacheConfig, MutationError, MutationKind, NotificationSink, QueryCache};
use std::sync::Arc;
use tracing::info;

pub struct SocialClient {
    cache: QueryCache<QueryData>,
    mutations: Mutations,
    sink: Arc<dyn NotificationSink>,
}

impl SocialClient {
    pub fn new(
        backend: Arc<dyn SocialBackend>,
        identity: UserId,
        config: CacheConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let fetcher = Arc::new(BackendFetcher::new(backend.clone()));
        Self {
            cache: QueryCache::new(config, fetcher, sink.clone()),
            mutations: Mutations::new(backend, identity),
            sink,
        }
    }

    pub fn cache(&self) -> &QueryCache<QueryData> {
        &self.cache
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn identity(&self) -> &UserId {
        self.mutations.identity()
    }

    // ============= Queries =============

    async fn load(&self, query: Query) -> ClientResult<(Query, QueryData)> {
        let key = query.key();
        let entry = self.cache.query(&key).await?;
        if let Some(every) = query.refetch_interval() {
            self.cache.poll(&key, every);
        }
        match entry.value {
            Some(data) => Ok((query, data)),
            None => Err(ClientError::UnexpectedShape {
                key,
                found: "nothing",
            }),
        }
    }

    fn unexpected<T>(query: &Query, data: &QueryData) -> ClientResult<T> {
        Err(ClientError::UnexpectedShape {
            key: query.key(),
            found: data.shape(),
        })
    }

    async fn profile(&self, query: Query) -> ClientResult<Option<UserProfile>> {
        match self.load(query).await? {
            (_, QueryData::Profile(profile)) => Ok(profile),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    async fn videos(&self, query: Query) -> ClientResult<Vec<Video>> {
        match self.load(query).await? {
            (_, QueryData::Videos(videos)) => Ok(videos),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    async fn summaries(&self, query: Query) -> ClientResult<Vec<UserSummary>> {
        match self.load(query).await? {
            (_, QueryData::UserSummaries(users)) => Ok(users),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn current_user_profile(&self) -> ClientResult<Option<UserProfile>> {
        self.profile(Query::CurrentUserProfile).await
    }

    pub async fn user_profile(&self, user: &UserId) -> ClientResult<Option<UserProfile>> {
        self.profile(Query::UserProfile(user.clone())).await
    }

    pub async fn most_liked_videos(&self) -> ClientResult<Vec<Video>> {
        self.videos(Query::MostLikedVideos).await
    }

    pub async fn vidles(&self) -> ClientResult<Vec<Video>> {
        self.videos(Query::Vidles).await
    }

    pub async fn user_videos(&self, user: &UserId) -> ClientResult<Vec<Video>> {
        self.videos(Query::UserVideos(user.clone())).await
    }

    pub async fn video(&self, id: VideoId) -> ClientResult<Option<Video>> {
        match self.load(Query::Video(id)).await? {
            (_, QueryData::Video(video)) => Ok(video),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn comments(&self, id: VideoId) -> ClientResult<Vec<Comment>> {
        match self.load(Query::Comments(id)).await? {
            (_, QueryData::Comments(comments)) => Ok(comments),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn messages(&self, user: &UserId) -> ClientResult<Vec<Message>> {
        match self.load(Query::Messages(user.clone())).await? {
            (_, QueryData::Messages(messages)) => Ok(messages),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn conversation_partners(&self) -> ClientResult<Vec<UserId>> {
        match self.load(Query::ConversationPartners).await? {
            (_, QueryData::Users(users)) => Ok(users),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn friend_requests(&self) -> ClientResult<Vec<FriendRequest>> {
        match self.load(Query::FriendRequests).await? {
            (_, QueryData::FriendRequests(requests)) => Ok(requests),
            (query, other) => Self::unexpected(&query, &other),
        }
    }

    pub async fn friends(&self) -> ClientResult<Vec<UserSummary>> {
        self.summaries(Query::Friends).await
    }

    pub async fn search_users(&self, term: &str) -> ClientResult<Vec<UserSummary>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.summaries(Query::SearchUsers(term.to_string())).await
    }

    // ============= Guard predictions =============

    pub fn has_liked(&self, id: VideoId) -> bool {
        self.cache.flag(scopes::LIKED, &id.to_string()) == Some(true)
    }

    /// Predicted follow state; `None` until seeded or a follow action ran
    pub fn is_following(&self, user: &UserId) -> Option<bool> {
        self.cache.flag(scopes::FOLLOWING, user.as_str())
    }

    /// Seed the follow prediction from server-provided state
    pub fn seed_following(&self, user: &UserId, following: bool) {
        self.cache
            .set_flag(scopes::FOLLOWING, user.as_str(), following);
    }

    // ============= Mutations =============

    async fn run(&self, kind: MutationKind, built: BuildResult) -> ClientResult<()> {
        let request = match built {
            Ok(request) => request,
            Err(e) => {
                let err = MutationError::Rejected(e);
                let (level, message) = kind.failure_notice(&err);
                self.sink.notify(level, &message);
                return Err(err.into());
            }
        };
        self.cache.mutate(request).await?;
        Ok(())
    }

    pub async fn like_video(&self, id: VideoId) -> ClientResult<()> {
        self.run(MutationKind::Like, Ok(self.mutations.like(id))).await
    }

    pub async fn delete_video(&self, id: VideoId) -> ClientResult<()> {
        self.run(MutationKind::Delete, Ok(self.mutations.delete(id)))
            .await
    }

    pub async fn follow(&self, user: &UserId) -> ClientResult<()> {
        self.run(MutationKind::Follow, self.mutations.follow(user))
            .await
    }

    pub async fn unfollow(&self, user: &UserId) -> ClientResult<()> {
        self.run(MutationKind::Unfollow, self.mutations.unfollow(user))
            .await
    }

    pub async fn send_friend_request(&self, user: &UserId) -> ClientResult<()> {
        self.run(
            MutationKind::SendFriendRequest,
            self.mutations.send_friend_request(user),
        )
        .await
    }

    pub async fn accept_friend_request(&self, request: &FriendRequest) -> ClientResult<()> {
        self.run(
            MutationKind::AcceptFriendRequest,
            Ok(self.mutations.accept_friend_request(request)),
        )
        .await
    }

    pub async fn decline_friend_request(&self, from: &UserId) -> ClientResult<()> {
        self.run(
            MutationKind::DeclineFriendRequest,
            Ok(self.mutations.decline_friend_request(from)),
        )
        .await
    }

    pub async fn unfriend(&self, friend: &UserId) -> ClientResult<()> {
        self.run(MutationKind::Unfriend, Ok(self.mutations.unfriend(friend)))
            .await
    }

    pub async fn comment(&self, id: VideoId, text: &str) -> ClientResult<()> {
        self.run(MutationKind::Comment, self.mutations.comment(id, text))
            .await
    }

    pub async fn send_message(
        &self,
        recipient: &UserId,
        content: &str,
        video_link: Option<&str>,
    ) -> ClientResult<()> {
        self.run(
            MutationKind::SendMessage,
            self.mutations.send_message(recipient, content, video_link),
        )
        .await
    }

    pub async fn upload_video(&self, upload: UploadRequest) -> ClientResult<()> {
        self.run(MutationKind::UploadVideo, self.mutations.upload(upload))
            .await
    }

    pub async fn save_profile(&self, draft: ProfileDraft) -> ClientResult<()> {
        self.run(MutationKind::SaveProfile, self.mutations.save_profile(draft))
            .await
    }

    // ============= Session =============

    /// Forget every cached query and guard prediction
    pub fn logout(&self) {
        self.cache.clear();
        info!(identity = %self.identity(), "Logged out, cache cleared");
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

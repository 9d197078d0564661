//! Mutation catalogue
//!
//! Builds one [`MutationRequest`] per user action: the remote call, the
//! predicted cache changes, the idempotence guard and the keys to refetch
//! once the backend confirms.

use crate::backend::SocialBackend;
use crate::domain::{
    Comment, FriendRequest, Message, ProfileDraft, UserId, UserProfile, UserSummary, Video,
    VideoId,
};
use crate::queries::{keys, Query, QueryData};
use crate::validation::{self, UploadRequest};
use chrono::Utc;
use query_cache::{
    CacheKey, Guard, KeySelector, MutationKind, MutationRequest, OptimisticUpdate,
    ValidationError,
};
use std::sync::Arc;

/// Guard scopes
pub mod scopes {
    pub const LIKED: &str = "liked";
    pub const FOLLOWING: &str = "following";
    pub const FRIEND_REQUEST_SENT: &str = "friend_request_sent";
    pub const FRIEND_REQUEST_HANDLED: &str = "friend_request_handled";
}

pub type Request = MutationRequest<QueryData>;
pub type BuildResult = Result<Request, ValidationError>;

fn exact(query: Query) -> KeySelector {
    KeySelector::Exact(query.key())
}

fn prefix(root: &str) -> KeySelector {
    KeySelector::Prefix(CacheKey::root(root))
}

fn video_lists() -> [KeySelector; 2] {
    [prefix(keys::VIDEOS), prefix(keys::USER_VIDEOS)]
}

fn shape_error(expected: &str, found: &QueryData) -> String {
    format!("expected {}, found {}", expected, found.shape())
}

/// Apply `f` to the video `id` inside every cached video list containing it
fn update_listed_video(
    selector: KeySelector,
    id: VideoId,
    f: fn(&mut Video),
) -> OptimisticUpdate<QueryData> {
    OptimisticUpdate::try_new(selector, move |data: &QueryData| match data {
        QueryData::Videos(videos) if videos.iter().any(|v| v.id == id) => {
            let mut videos = videos.clone();
            videos.iter_mut().filter(|v| v.id == id).for_each(f);
            Ok(Some(QueryData::Videos(videos)))
        }
        QueryData::Videos(_) => Ok(None),
        other => Err(shape_error("videos", other)),
    })
}

fn drop_listed_video(selector: KeySelector, id: VideoId) -> OptimisticUpdate<QueryData> {
    OptimisticUpdate::try_new(selector, move |data: &QueryData| match data {
        QueryData::Videos(videos) if videos.iter().any(|v| v.id == id) => Ok(Some(
            QueryData::Videos(videos.iter().filter(|v| v.id != id).cloned().collect()),
        )),
        QueryData::Videos(_) => Ok(None),
        other => Err(shape_error("videos", other)),
    })
}

fn update_profile(query: Query, f: fn(&mut UserProfile)) -> OptimisticUpdate<QueryData> {
    OptimisticUpdate::try_new(exact(query), move |data: &QueryData| match data {
        QueryData::Profile(Some(profile)) => {
            let mut profile = profile.clone();
            f(&mut profile);
            Ok(Some(QueryData::Profile(Some(profile))))
        }
        QueryData::Profile(None) => Ok(None),
        other => Err(shape_error("profile", other)),
    })
}

fn drop_friend_request(from: UserId) -> OptimisticUpdate<QueryData> {
    OptimisticUpdate::try_new(exact(Query::FriendRequests), move |data: &QueryData| match data {
        QueryData::FriendRequests(requests) => Ok(Some(QueryData::FriendRequests(
            requests.iter().filter(|r| r.from != from).cloned().collect(),
        ))),
        other => Err(shape_error("friend requests", other)),
    })
}

/// Builds mutation requests for one signed-in identity
#[derive(Clone)]
pub struct Mutations {
    backend: Arc<dyn SocialBackend>,
    identity: UserId,
}

impl Mutations {
    pub fn new(backend: Arc<dyn SocialBackend>, identity: UserId) -> Self {
        Self { backend, identity }
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn like(&self, id: VideoId) -> Request {
        let backend = self.backend.clone();
        let [videos, user_videos] = video_lists();

        Request::new(MutationKind::Like, id.to_string(), move || async move {
            backend.like_video(id).await
        })
        .guard(Guard::once(scopes::LIKED, id.to_string()))
        .optimistic(OptimisticUpdate::try_new(
            exact(Query::Video(id)),
            |data: &QueryData| match data {
                QueryData::Video(Some(video)) => {
                    let mut video = video.clone();
                    video.likes += 1;
                    Ok(Some(QueryData::Video(Some(video))))
                }
                QueryData::Video(None) => Ok(None),
                other => Err(shape_error("video", other)),
            },
        ))
        .optimistic(update_listed_video(videos.clone(), id, |v| v.likes += 1))
        .optimistic(update_listed_video(user_videos.clone(), id, |v| v.likes += 1))
        .invalidate(videos)
        .invalidate(user_videos)
        .invalidate(exact(Query::Video(id)))
    }

    pub fn delete(&self, id: VideoId) -> Request {
        let backend = self.backend.clone();
        let [videos, user_videos] = video_lists();

        Request::new(MutationKind::Delete, id.to_string(), move || async move {
            backend.delete_video(id).await
        })
        .optimistic(drop_listed_video(videos.clone(), id))
        .optimistic(drop_listed_video(user_videos.clone(), id))
        .invalidate(videos)
        .invalidate(user_videos)
    }

    pub fn follow(&self, target: &UserId) -> BuildResult {
        if target == &self.identity {
            return Err(ValidationError::InvalidPayload(
                "You cannot follow yourself".to_string(),
            ));
        }
        let backend = self.backend.clone();
        let user = target.clone();

        Ok(
            Request::new(MutationKind::Follow, target.to_string(), move || async move {
                backend.follow_user(&user).await
            })
            .guard(Guard::set(scopes::FOLLOWING, target.to_string(), true))
            .optimistic(update_profile(Query::UserProfile(target.clone()), |p| {
                p.followers += 1
            }))
            .optimistic(update_profile(Query::CurrentUserProfile, |p| p.following += 1))
            .invalidate(exact(Query::UserProfile(target.clone())))
            .invalidate(exact(Query::CurrentUserProfile)),
        )
    }

    pub fn unfollow(&self, target: &UserId) -> BuildResult {
        if target == &self.identity {
            return Err(ValidationError::InvalidPayload(
                "You cannot unfollow yourself".to_string(),
            ));
        }
        let backend = self.backend.clone();
        let user = target.clone();

        Ok(Request::new(
            MutationKind::Unfollow,
            target.to_string(),
            move || async move { backend.unfollow_user(&user).await },
        )
        .guard(Guard::set(scopes::FOLLOWING, target.to_string(), false))
        .optimistic(update_profile(Query::UserProfile(target.clone()), |p| {
            p.followers = p.followers.saturating_sub(1)
        }))
        .optimistic(update_profile(Query::CurrentUserProfile, |p| {
            p.following = p.following.saturating_sub(1)
        }))
        .invalidate(exact(Query::UserProfile(target.clone())))
        .invalidate(exact(Query::CurrentUserProfile)))
    }

    pub fn send_friend_request(&self, target: &UserId) -> BuildResult {
        if target == &self.identity {
            return Err(ValidationError::InvalidPayload(
                "You cannot send a friend request to yourself".to_string(),
            ));
        }
        let backend = self.backend.clone();
        let user = target.clone();

        Ok(Request::new(
            MutationKind::SendFriendRequest,
            target.to_string(),
            move || async move { backend.send_friend_request(&user).await },
        )
        .guard(Guard::once(scopes::FRIEND_REQUEST_SENT, target.to_string()))
        .invalidate(exact(Query::FriendRequests)))
    }

    pub fn accept_friend_request(&self, request: &FriendRequest) -> Request {
        let backend = self.backend.clone();
        let from = request.from.clone();
        let friend = UserSummary {
            id: request.from.clone(),
            username: request.from_username.clone(),
        };

        Request::new(
            MutationKind::AcceptFriendRequest,
            request.from.to_string(),
            move || async move { backend.accept_friend_request(&from).await },
        )
        .guard(Guard::once(
            scopes::FRIEND_REQUEST_HANDLED,
            request.from.to_string(),
        ))
        .optimistic(drop_friend_request(request.from.clone()))
        .optimistic(OptimisticUpdate::try_new(
            exact(Query::Friends),
            move |data: &QueryData| match data {
                QueryData::UserSummaries(friends) if friends.iter().any(|f| f.id == friend.id) => {
                    Ok(None)
                }
                QueryData::UserSummaries(friends) => {
                    let mut friends = friends.clone();
                    friends.push(friend.clone());
                    Ok(Some(QueryData::UserSummaries(friends)))
                }
                other => Err(shape_error("user summaries", other)),
            },
        ))
        .invalidate(exact(Query::FriendRequests))
        .invalidate(exact(Query::Friends))
    }

    pub fn decline_friend_request(&self, from: &UserId) -> Request {
        let backend = self.backend.clone();
        let user = from.clone();

        Request::new(
            MutationKind::DeclineFriendRequest,
            from.to_string(),
            move || async move { backend.decline_friend_request(&user).await },
        )
        .guard(Guard::once(scopes::FRIEND_REQUEST_HANDLED, from.to_string()))
        .optimistic(drop_friend_request(from.clone()))
        .invalidate(exact(Query::FriendRequests))
    }

    pub fn unfriend(&self, friend: &UserId) -> Request {
        let backend = self.backend.clone();
        let user = friend.clone();
        let removed = friend.clone();

        Request::new(MutationKind::Unfriend, friend.to_string(), move || async move {
            backend.unfriend(&user).await
        })
        .optimistic(OptimisticUpdate::try_new(
            exact(Query::Friends),
            move |data: &QueryData| match data {
                QueryData::UserSummaries(friends) => Ok(Some(QueryData::UserSummaries(
                    friends.iter().filter(|f| f.id != removed).cloned().collect(),
                ))),
                other => Err(shape_error("user summaries", other)),
            },
        ))
        .invalidate(exact(Query::Friends))
    }

    pub fn comment(&self, id: VideoId, text: &str) -> BuildResult {
        let text = validation::comment_text(text)?;
        let backend = self.backend.clone();
        let pending = Comment {
            author: self.identity.clone(),
            text: text.clone(),
            timestamp: Utc::now(),
        };

        Ok(
            Request::new(MutationKind::Comment, id.to_string(), move || async move {
                backend.comment_on_video(id, text).await
            })
            .optimistic(OptimisticUpdate::try_new(
                exact(Query::Comments(id)),
                move |data: &QueryData| match data {
                    QueryData::Comments(comments) => {
                        let mut comments = comments.clone();
                        comments.push(pending.clone());
                        Ok(Some(QueryData::Comments(comments)))
                    }
                    other => Err(shape_error("comments", other)),
                },
            ))
            .invalidate(exact(Query::Comments(id))),
        )
    }

    pub fn send_message(
        &self,
        recipient: &UserId,
        content: &str,
        video_link: Option<&str>,
    ) -> BuildResult {
        let (content, video_link) = validation::message_content(content, video_link)?;
        let backend = self.backend.clone();
        let user = recipient.clone();
        let pending = Message {
            sender: self.identity.clone(),
            recipient: recipient.clone(),
            content: content.clone(),
            video_link: video_link.clone(),
            timestamp: Utc::now(),
        };

        Ok(Request::new(
            MutationKind::SendMessage,
            recipient.to_string(),
            move || async move { backend.send_message(&user, content, video_link).await },
        )
        .optimistic(OptimisticUpdate::try_new(
            exact(Query::Messages(recipient.clone())),
            move |data: &QueryData| match data {
                QueryData::Messages(messages) => {
                    let mut messages = messages.clone();
                    messages.push(pending.clone());
                    Ok(Some(QueryData::Messages(messages)))
                }
                other => Err(shape_error("messages", other)),
            },
        ))
        .invalidate(exact(Query::Messages(recipient.clone())))
        .invalidate(exact(Query::ConversationPartners)))
    }

    pub fn upload(&self, upload: UploadRequest) -> BuildResult {
        let video = upload.into_new_video()?;
        let backend = self.backend.clone();
        let title = video.title.clone();
        let [videos, user_videos] = video_lists();

        Ok(
            Request::new(MutationKind::UploadVideo, title, move || async move {
                backend.upload_video(video).await.map(|_| ())
            })
            .invalidate(videos)
            .invalidate(user_videos),
        )
    }

    pub fn save_profile(&self, draft: ProfileDraft) -> BuildResult {
        let draft = validation::profile_draft(draft)?;
        let backend = self.backend.clone();
        let payload = draft.clone();

        Ok(Request::new(
            MutationKind::SaveProfile,
            self.identity.to_string(),
            move || async move { backend.save_profile(payload).await },
        )
        .optimistic(OptimisticUpdate::try_new(
            exact(Query::CurrentUserProfile),
            move |data: &QueryData| match data {
                QueryData::Profile(current) => {
                    let (followers, following) = current
                        .as_ref()
                        .map(|p| (p.followers, p.following))
                        .unwrap_or_default();
                    Ok(Some(QueryData::Profile(Some(UserProfile {
                        username: draft.username.clone(),
                        bio: draft.bio.clone(),
                        followers,
                        following,
                        profile_picture: draft.profile_picture.clone(),
                    }))))
                }
                other => Err(shape_error("profile", other)),
            },
        ))
        .invalidate(exact(Query::CurrentUserProfile)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSocialBackend;
    use query_cache::RemoteError;

    fn mutations(backend: MockSocialBackend) -> Mutations {
        Mutations::new(Arc::new(backend), UserId::from("alice"))
    }

    #[test]
    fn test_like_invalidation_set() {
        let request = mutations(MockSocialBackend::new()).like(VideoId(4));
        let set = request.invalidation_set();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&KeySelector::Prefix(CacheKey::root("videos"))));
        assert!(set.contains(&KeySelector::Prefix(CacheKey::root("userVideos"))));
        assert!(set.contains(&KeySelector::Exact(Query::Video(VideoId(4)).key())));
        assert!(request.has_optimistic_update());
    }

    #[test]
    fn test_self_targeted_actions_are_rejected() {
        let m = mutations(MockSocialBackend::new());
        let me = UserId::from("alice");
        assert!(matches!(m.follow(&me), Err(ValidationError::InvalidPayload(_))));
        assert!(m.send_friend_request(&me).is_err());
        assert!(m.comment(VideoId(1), "   ").is_err());
        assert!(m.send_message(&UserId::from("bob"), "", None).is_err());
    }

    #[test]
    fn test_upload_has_no_optimistic_update() {
        let request = mutations(MockSocialBackend::new())
            .upload(UploadRequest {
                title: "Trick".to_string(),
                description: String::new(),
                tags: "skate".to_string(),
                media_type: "video/webm".to_string(),
                blob_url: "blob://1".to_string(),
                content_type: crate::domain::ContentType::Vidle,
                duration_secs: 15,
                width: 720,
                height: 1280,
            })
            .unwrap();
        assert!(!request.has_optimistic_update());
        assert_eq!(request.invalidation_set().len(), 2);
    }

    #[tokio::test]
    async fn test_follow_invokes_backend_once() {
        let mut backend = MockSocialBackend::new();
        backend
            .expect_follow_user()
            .withf(|user| user.as_str() == "bob")
            .times(1)
            .returning(|_| Err(RemoteError::unavailable("connection reset")));

        let cache = query_cache::QueryCache::new(
            query_cache::CacheConfig::default(),
            Arc::new(crate::queries::BackendFetcher::new(Arc::new(
                MockSocialBackend::new(),
            ))),
            Arc::new(query_cache::NotificationQueue::new()),
        );
        let request = mutations(backend).follow(&UserId::from("bob")).unwrap();
        let err = cache.mutate(request).await.unwrap_err();
        assert_eq!(
            err.remote_kind(),
            Some(query_cache::RemoteErrorKind::Unavailable)
        );
        assert_eq!(cache.flag(scopes::FOLLOWING, "bob"), None);
    }
}

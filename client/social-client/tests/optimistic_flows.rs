//! End-to-end flows through the social client, the query cache and the
//! in-memory backend.

use query_cache::{
    CacheConfig, MutationError, NotificationQueue, NotifyLevel, RemoteError, RemoteErrorKind,
    Retries, RetryConfig, ValidationError,
};
use social_client::domain::{ContentType, UserId, VideoId};
use social_client::queries::CHAT_POLL_INTERVAL;
use social_client::validation::UploadRequest;
use social_client::{ClientError, InMemoryBackend, Query, QueryData, SocialClient};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn alice() -> UserId {
    UserId::from("alice")
}

fn bob() -> UserId {
    UserId::from("bob")
}

fn fast_retry() -> CacheConfig {
    CacheConfig::default().with_query_retry(RetryConfig::new(Retries::Once, Duration::ZERO))
}

struct Harness {
    backend: Arc<InMemoryBackend>,
    client: SocialClient,
    notifications: NotificationQueue,
}

fn harness_with(backend: InMemoryBackend) -> Harness {
    let backend = Arc::new(backend);
    backend.register(&alice(), "alice", "");
    backend.register(&bob(), "bob", "skater");
    let notifications = NotificationQueue::new();
    let client = SocialClient::new(
        backend.clone(),
        alice(),
        fast_retry(),
        Arc::new(notifications.clone()),
    );
    Harness {
        backend,
        client,
        notifications,
    }
}

fn harness() -> Harness {
    harness_with(InMemoryBackend::new(alice()))
}

fn cached_likes(client: &SocialClient, id: VideoId) -> Option<u64> {
    match client.cache().peek(&Query::Video(id).key())?.value? {
        QueryData::Video(Some(video)) => Some(video.likes),
        _ => None,
    }
}

fn cached_list_len(client: &SocialClient, query: Query) -> Option<usize> {
    match client.cache().peek(&query.key())?.value? {
        QueryData::Videos(videos) => Some(videos.len()),
        _ => None,
    }
}

#[tokio::test]
async fn test_failed_like_rolls_back_with_one_notification() {
    let h = harness();
    let id = h.backend.seed_video(&bob(), "Sunset", 10, ContentType::Video);
    assert_eq!(h.client.video(id).await.unwrap().unwrap().likes, 10);

    h.backend
        .fail_next("like_video", RemoteError::unavailable("connection refused"));
    let pending = h.client.cache().begin(h.client.mutations().like(id)).unwrap();
    assert_eq!(cached_likes(&h.client, id), Some(11));
    assert!(h.client.has_liked(id));

    let err = pending.settle().await.unwrap_err();
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Unavailable));
    assert_eq!(cached_likes(&h.client, id), Some(10));
    assert!(!h.client.has_liked(id));

    let notifications = h.notifications.drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotifyLevel::Error);
    assert_eq!(notifications[0].message, "Failed to like video");
}

#[tokio::test]
async fn test_like_is_applied_at_most_once() {
    let h = harness();
    let id = h.backend.seed_video(&bob(), "Sunset", 10, ContentType::Video);
    h.client.video(id).await.unwrap();

    let first = h.client.cache().begin(h.client.mutations().like(id)).unwrap();
    let second = h.client.like_video(id).await;
    assert!(matches!(
        second,
        Err(ClientError::Mutation(MutationError::Rejected(
            ValidationError::AlreadyApplied { .. }
        )))
    ));
    assert_eq!(cached_likes(&h.client, id), Some(11));

    assert_ok!(first.settle().await);
    h.client.cache().wait_for_fetches().await;
    assert_eq!(h.backend.calls("like_video"), 1);
    assert_eq!(h.backend.likes(id), Some(11));
    assert_eq!(
        h.notifications.drain()[0].message,
        "You already liked this video"
    );
}

#[tokio::test]
async fn test_confirmed_like_round_trips_to_server_value() {
    let h = harness();
    let id = h.backend.seed_video(&bob(), "Sunset", 10, ContentType::Video);
    h.client.video(id).await.unwrap();
    h.client.most_liked_videos().await.unwrap();
    assert_eq!(h.backend.calls("video"), 1);
    assert_eq!(h.backend.calls("most_liked_videos"), 1);

    assert_ok!(h.client.like_video(id).await);
    h.client.cache().wait_for_fetches().await;

    // Each invalidated entry is refetched exactly once
    assert_eq!(h.backend.calls("video"), 2);
    assert_eq!(h.backend.calls("most_liked_videos"), 2);

    let entry = h.client.cache().peek(&Query::Video(id).key()).unwrap();
    assert!(!entry.stale);
    assert_eq!(cached_likes(&h.client, id), h.backend.likes(id));
    assert!(h.notifications.is_empty());
}

#[tokio::test]
async fn test_delete_removes_video_from_every_list() {
    let h = harness();
    let a = h.backend.seed_video(&alice(), "One", 3, ContentType::Video);
    let b = h.backend.seed_video(&alice(), "Two", 2, ContentType::Vidle);
    h.backend.seed_video(&alice(), "Three", 1, ContentType::Video);

    h.client.most_liked_videos().await.unwrap();
    h.client.user_videos(&alice()).await.unwrap();
    h.client.vidles().await.unwrap();

    let pending = h.client.cache().begin(h.client.mutations().delete(b)).unwrap();
    assert_eq!(cached_list_len(&h.client, Query::MostLikedVideos), Some(2));
    assert_eq!(cached_list_len(&h.client, Query::UserVideos(alice())), Some(2));
    assert_eq!(cached_list_len(&h.client, Query::Vidles), Some(0));

    assert_ok!(pending.settle().await);
    h.client.cache().wait_for_fetches().await;
    assert_eq!(h.client.most_liked_videos().await.unwrap().len(), 2);
    assert_eq!(
        h.notifications.drain()[0].message,
        "Video deleted successfully"
    );

    // Single-item list goes to empty
    let only = h.client.user_videos(&alice()).await.unwrap();
    assert!(only.iter().any(|v| v.id == a));
    assert_ok!(h.client.delete_video(a).await);
    let pending = h
        .client
        .cache()
        .begin(h.client.mutations().delete(VideoId(3)))
        .unwrap();
    assert_eq!(
        cached_list_len(&h.client, Query::UserVideos(alice())),
        Some(0)
    );
    assert_ok!(pending.settle().await);
}

#[tokio::test]
async fn test_failed_delete_restores_lists() {
    let h = harness();
    h.backend.seed_video(&alice(), "One", 3, ContentType::Video);
    let b = h.backend.seed_video(&bob(), "Two", 2, ContentType::Video);
    h.client.most_liked_videos().await.unwrap();

    // Not the uploader: the backend refuses
    let err = h.client.delete_video(b).await.unwrap_err();
    assert!(matches!(err, ClientError::Mutation(MutationError::Remote { .. })));
    assert_eq!(cached_list_len(&h.client, Query::MostLikedVideos), Some(2));
    assert_eq!(h.notifications.drain()[0].message, "Failed to delete video");
}

#[tokio::test]
async fn test_sequential_follow_then_unfollow_ends_not_following() {
    let h = harness();
    h.client.user_profile(&bob()).await.unwrap();
    h.client.current_user_profile().await.unwrap();

    assert_ok!(h.client.follow(&bob()).await);
    assert_eq!(h.client.is_following(&bob()), Some(true));
    assert_ok!(h.client.unfollow(&bob()).await);
    assert_eq!(h.client.is_following(&bob()), Some(false));

    h.client.cache().wait_for_fetches().await;
    assert!(!h.backend.is_following(&alice(), &bob()));
    let profile = h.client.user_profile(&bob()).await.unwrap().unwrap();
    assert_eq!(profile.followers, 0);

    let messages: Vec<String> = h
        .notifications
        .drain()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert_eq!(
        messages,
        vec!["Following successfully", "Unfollowed successfully"]
    );
}

#[tokio::test]
async fn test_follow_and_unfollow_issued_together_end_not_following() {
    let h = harness_with(InMemoryBackend::new(alice()).with_latency(Duration::from_millis(20)));
    h.client.user_profile(&bob()).await.unwrap();
    h.client.current_user_profile().await.unwrap();

    // Both are applied optimistically before either backend call resolves
    let bob_id = bob();
    let (follow, unfollow) = tokio::join!(h.client.follow(&bob_id), h.client.unfollow(&bob_id));
    assert_ok!(follow);
    assert_ok!(unfollow);
    assert_eq!(h.client.is_following(&bob()), Some(false));

    h.client.cache().wait_for_fetches().await;
    assert!(!h.backend.is_following(&alice(), &bob()));
    let profile = h.client.user_profile(&bob()).await.unwrap().unwrap();
    assert_eq!(profile.followers, 0);
}

#[tokio::test]
async fn test_follow_updates_counts_optimistically() {
    let h = harness();
    h.client.user_profile(&bob()).await.unwrap();
    h.client.current_user_profile().await.unwrap();

    let pending = h
        .client
        .cache()
        .begin(h.client.mutations().follow(&bob()).unwrap())
        .unwrap();
    let followers = match h
        .client
        .cache()
        .peek(&Query::UserProfile(bob()).key())
        .and_then(|e| e.value)
    {
        Some(QueryData::Profile(Some(p))) => p.followers,
        other => panic!("unexpected entry {:?}", other),
    };
    assert_eq!(followers, 1);

    // Following twice is rejected while the first is predicted
    assert_err!(h.client.follow(&bob()).await);
    assert_ok!(pending.settle().await);
}

#[tokio::test]
async fn test_anonymous_follow_asks_to_login() {
    let h = harness_with(InMemoryBackend::anonymous());
    let err = h.client.follow(&bob()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Mutation(MutationError::Remote { .. })
    ));
    assert_eq!(h.client.is_following(&bob()), None);
    assert_eq!(
        h.notifications.drain()[0].message,
        "Please login to follow user"
    );
}

#[tokio::test]
async fn test_concurrent_queries_share_one_backend_call() {
    let h = harness_with(InMemoryBackend::new(alice()).with_latency(Duration::from_millis(20)));
    h.backend.seed_video(&bob(), "Sunset", 1, ContentType::Video);

    let (a, b, c) = tokio::join!(
        h.client.most_liked_videos(),
        h.client.most_liked_videos(),
        h.client.most_liked_videos()
    );
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);
    assert_eq!(c.unwrap().len(), 1);
    assert_eq!(h.backend.calls("most_liked_videos"), 1);
}

#[tokio::test]
async fn test_query_retries_once_then_keeps_previous_value() {
    let h = harness();
    h.backend.seed_video(&bob(), "Sunset", 1, ContentType::Video);

    h.backend
        .fail_next("most_liked_videos", RemoteError::unavailable("reset"));
    assert_eq!(h.client.most_liked_videos().await.unwrap().len(), 1);
    assert_eq!(h.backend.calls("most_liked_videos"), 2);

    h.client
        .cache()
        .invalidate(&query_cache::KeySelector::Exact(Query::MostLikedVideos.key()));
    h.backend
        .fail_next("most_liked_videos", RemoteError::unavailable("down"));
    h.backend
        .fail_next("most_liked_videos", RemoteError::unavailable("still down"));
    h.client.cache().wait_for_fetches().await;

    let entry = h
        .client
        .cache()
        .peek(&Query::MostLikedVideos.key())
        .unwrap();
    assert!(entry.stale);
    assert_eq!(cached_list_len(&h.client, Query::MostLikedVideos), Some(1));
    assert_eq!(h.backend.calls("most_liked_videos"), 4);
}

#[tokio::test]
async fn test_invalid_payloads_leave_cache_untouched() {
    let h = harness();
    let id = h.backend.seed_video(&bob(), "Sunset", 1, ContentType::Video);
    assert!(h.client.comments(id).await.unwrap().is_empty());

    let err = h.client.comment(id, "   ").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Mutation(MutationError::Rejected(ValidationError::InvalidPayload(_)))
    ));
    assert!(h.client.comments(id).await.unwrap().is_empty());
    assert_eq!(h.backend.calls("comment_on_video"), 0);
    assert_eq!(h.notifications.drain()[0].message, "Comment cannot be empty");

    let upload = UploadRequest {
        title: "Long clip".to_string(),
        description: String::new(),
        tags: String::new(),
        media_type: "video/mp4".to_string(),
        blob_url: "blob://upload".to_string(),
        content_type: ContentType::Vidle,
        duration_secs: 90,
        width: 720,
        height: 1280,
    };
    assert_err!(h.client.upload_video(upload).await);
    assert_eq!(h.backend.calls("upload_video"), 0);
}

#[tokio::test]
async fn test_comment_and_message_append_then_refetch() {
    let h = harness();
    let id = h.backend.seed_video(&bob(), "Sunset", 1, ContentType::Video);
    h.client.comments(id).await.unwrap();
    h.client.messages(&bob()).await.unwrap();

    assert_ok!(h.client.comment(id, " Clean landing! ").await);
    assert_ok!(h
        .client
        .send_message(&bob(), "", Some("/video/1"))
        .await);
    h.client.cache().wait_for_fetches().await;

    let comments = h.client.comments(id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].text, "Clean landing!");

    let messages = h.client.messages(&bob()).await.unwrap();
    assert_eq!(messages[0].content, "Shared a video");
    assert_eq!(h.client.conversation_partners().await.unwrap(), vec![bob()]);
    assert_eq!(h.notifications.drain()[0].message, "Comment posted!");
}

#[tokio::test]
async fn test_friend_request_flow() {
    let h = harness();
    h.backend.request_friendship(&bob(), &alice());
    let requests = h.client.friend_requests().await.unwrap();
    assert!(h.client.friends().await.unwrap().is_empty());

    let pending = h
        .client
        .cache()
        .begin(h.client.mutations().accept_friend_request(&requests[0]))
        .unwrap();
    assert_eq!(
        h.client
            .cache()
            .peek(&Query::Friends.key())
            .and_then(|e| e.value),
        Some(QueryData::UserSummaries(vec![social_client::domain::UserSummary {
            id: bob(),
            username: "bob".to_string(),
        }]))
    );
    assert_ok!(pending.settle().await);
    h.client.cache().wait_for_fetches().await;
    assert!(h.client.friend_requests().await.unwrap().is_empty());

    assert_ok!(h.client.unfriend(&bob()).await);
    h.client.cache().wait_for_fetches().await;
    assert!(h.client.friends().await.unwrap().is_empty());

    assert_ok!(h.client.send_friend_request(&bob()).await);
    assert_err!(h.client.send_friend_request(&bob()).await);
    assert_eq!(h.backend.calls("send_friend_request"), 1);
}

#[tokio::test]
async fn test_profile_save_and_logout() {
    let h = harness();
    h.client.current_user_profile().await.unwrap();

    let draft = social_client::domain::ProfileDraft {
        username: " alice2 ".to_string(),
        bio: "new bio".to_string(),
        profile_picture: None,
    };
    assert_ok!(h.client.save_profile(draft).await);
    h.client.cache().wait_for_fetches().await;
    let profile = h.client.current_user_profile().await.unwrap().unwrap();
    assert_eq!(profile.username, "alice2");

    h.client.logout();
    assert!(h
        .client
        .cache()
        .peek(&Query::CurrentUserProfile.key())
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_open_conversation_polls_for_new_messages() {
    let h = harness();
    assert!(h.client.messages(&bob()).await.unwrap().is_empty());
    let key = Query::Messages(bob()).key();
    assert!(h.client.cache().is_polling(&key));

    h.backend.deliver_message(&bob(), &alice(), "ready to skate?");
    tokio::time::sleep(CHAT_POLL_INTERVAL + Duration::from_millis(100)).await;
    h.client.cache().wait_for_fetches().await;

    match h.client.cache().peek(&key).and_then(|e| e.value) {
        Some(QueryData::Messages(messages)) => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].content, "ready to skate?");
        }
        other => panic!("unexpected entry {:?}", other),
    }
    assert_eq!(h.backend.calls("messages_with"), 2);

    h.client.shutdown();
    tokio::time::sleep(CHAT_POLL_INTERVAL * 3).await;
    assert_eq!(h.backend.calls("messages_with"), 2);
}

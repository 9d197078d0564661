//! Payload checks run before any cache change
//!
//! Everything here is pure; a failure becomes
//! [`ValidationError::InvalidPayload`] carrying the user-facing message.

use crate::domain::{ContentType, NewVideo, ProfileDraft};
use query_cache::ValidationError;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Longest Vidle accepted
pub const VIDLE_MAX_SECS: u32 = 60;
/// Vidles must be portrait: width / height at most this
pub const VIDLE_MAX_ASPECT: f32 = 0.8;

const SHARED_VIDEO_TEXT: &str = "Shared a video";

/// Upload form as submitted
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadRequest {
    #[validate(length(max = 200, message = "Title is too long"))]
    pub title: String,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: String,
    /// Raw comma-separated tag input
    pub tags: String,
    /// MIME type of the selected file
    pub media_type: String,
    pub blob_url: String,
    pub content_type: ContentType,
    #[validate(range(min = 1, message = "Video duration must be positive"))]
    pub duration_secs: u32,
    #[validate(range(min = 1, message = "Video width must be positive"))]
    pub width: u32,
    #[validate(range(min = 1, message = "Video height must be positive"))]
    pub height: u32,
}

impl UploadRequest {
    pub fn into_new_video(self) -> Result<NewVideo, ValidationError> {
        if self.title.trim().is_empty() {
            return Err(invalid("Please enter a title"));
        }
        if !self.media_type.starts_with("video/") {
            return Err(invalid("Please select a valid video file"));
        }
        self.validate()
            .map_err(|e| invalid(format!("Invalid upload: {}", e)))?;

        let aspect_ratio = self.width as f32 / self.height as f32;
        if self.content_type == ContentType::Vidle {
            if self.duration_secs > VIDLE_MAX_SECS {
                return Err(invalid(format!(
                    "Vidles must be {} seconds or shorter",
                    VIDLE_MAX_SECS
                )));
            }
            if aspect_ratio > VIDLE_MAX_ASPECT {
                return Err(invalid("Vidles must be in portrait orientation"));
            }
        }

        Ok(NewVideo {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            tags: parse_tags(&self.tags),
            blob_url: self.blob_url,
            content_type: self.content_type,
            duration_secs: self.duration_secs,
            aspect_ratio,
        })
    }
}

/// Split comma-separated tag input, trimming and dropping empties
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn comment_text(text: &str) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid("Comment cannot be empty"));
    }
    Ok(text.to_string())
}

/// Message body; an empty body is allowed when a video is shared
pub fn message_content(
    content: &str,
    video_link: Option<&str>,
) -> Result<(String, Option<String>), ValidationError> {
    let content = content.trim();
    let link = video_link.map(str::trim).filter(|l| !l.is_empty());
    match (content.is_empty(), link) {
        (true, None) => Err(invalid("Message cannot be empty")),
        (true, Some(link)) => Ok((SHARED_VIDEO_TEXT.to_string(), Some(link.to_string()))),
        (false, link) => Ok((content.to_string(), link.map(str::to_string))),
    }
}

pub fn profile_draft(draft: ProfileDraft) -> Result<ProfileDraft, ValidationError> {
    let username = draft.username.trim();
    if username.is_empty() {
        return Err(invalid("Username cannot be empty"));
    }
    Ok(ProfileDraft {
        username: username.to_string(),
        bio: draft.bio.trim().to_string(),
        profile_picture: draft.profile_picture,
    })
}

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidPayload(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: ContentType, duration_secs: u32, width: u32, height: u32) -> UploadRequest {
        UploadRequest {
            title: " Skate park ".to_string(),
            description: "first try".to_string(),
            tags: "skate, , park ,".to_string(),
            media_type: "video/mp4".to_string(),
            blob_url: "blob://upload/1".to_string(),
            content_type,
            duration_secs,
            width,
            height,
        }
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags(" , ").is_empty());
    }

    #[test]
    fn test_upload_normalizes_fields() {
        let video = upload(ContentType::Video, 300, 1920, 1080)
            .into_new_video()
            .unwrap();
        assert_eq!(video.title, "Skate park");
        assert_eq!(video.tags, vec!["skate", "park"]);
        assert!(video.aspect_ratio > 1.0);
    }

    #[test]
    fn test_upload_rejections() {
        let mut missing_title = upload(ContentType::Video, 10, 1920, 1080);
        missing_title.title = "   ".to_string();
        assert_eq!(
            missing_title.into_new_video(),
            Err(ValidationError::InvalidPayload("Please enter a title".to_string()))
        );

        let mut not_video = upload(ContentType::Video, 10, 1920, 1080);
        not_video.media_type = "image/png".to_string();
        assert!(not_video.into_new_video().is_err());

        assert!(upload(ContentType::Video, 0, 1920, 1080).into_new_video().is_err());
        assert!(upload(ContentType::Vidle, 61, 1080, 1920).into_new_video().is_err());
        assert!(upload(ContentType::Vidle, 30, 1080, 1080).into_new_video().is_err());
        assert!(upload(ContentType::Vidle, 60, 1080, 1920).into_new_video().is_ok());
    }

    #[test]
    fn test_message_content() {
        assert!(message_content("  ", None).is_err());
        assert_eq!(
            message_content("", Some("/video/3")).unwrap(),
            ("Shared a video".to_string(), Some("/video/3".to_string()))
        );
        assert_eq!(message_content(" hi ", Some(" ")).unwrap(), ("hi".to_string(), None));
    }

    #[test]
    fn test_comment_and_profile() {
        assert!(comment_text("\n").is_err());
        assert_eq!(comment_text(" nice ").unwrap(), "nice");

        let draft = ProfileDraft {
            username: "  ".to_string(),
            bio: String::new(),
            profile_picture: None,
        };
        assert!(profile_draft(draft).is_err());
    }
}

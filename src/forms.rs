//! Form binding and validation for everything users submit.
//!
//! A form either cleans into a typed value ready to persist, or comes back
//! with per-field error messages and the raw input so the page can be
//! re-rendered as the user left it.

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use axum::Form;
use image::ImageFormat;
use serde::Deserialize;

use crate::db::models::{Group, Post};
use crate::error::AppError;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

// -- Post form --

/// Raw post fields, from either an urlencoded or a multipart body.
#[derive(Debug, Default, Clone)]
pub struct PostSubmission {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<UploadedImage>,
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct PostInput {
    #[serde(default)]
    text: String,
    group: Option<String>,
}

impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("multipart/form-data"))
            .unwrap_or(false);

        if !is_multipart {
            let Form(input) = Form::<PostInput>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return Ok(PostSubmission {
                text: input.text,
                group: input.group,
                image: None,
            });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let mut submission = PostSubmission::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "text" => {
                    submission.text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                }
                "group" => {
                    submission.group = Some(
                        field
                            .text()
                            .await
                            .map_err(|e| AppError::BadRequest(e.body_text()))?,
                    );
                }
                "image" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    // Browsers send an empty part when no file was picked
                    if !file_name.is_empty() || !bytes.is_empty() {
                        submission.image = Some(UploadedImage {
                            file_name,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(submission)
    }
}

/// A post submission that passed validation.
#[derive(Debug, Clone)]
pub struct CleanPost {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<UploadedImage>,
    pub image_ext: Option<&'static str>,
}

/// The create/edit form as the template sees it.
#[derive(Debug, Clone, Default)]
pub struct PostForm {
    pub text: String,
    pub group: String,
    pub text_errors: Vec<String>,
    pub group_errors: Vec<String>,
    pub image_errors: Vec<String>,
}

/// One `<option>` of the group picker.
#[derive(Debug, Clone)]
pub struct GroupChoice {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

impl PostForm {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Form pre-filled from an existing post, for editing.
    pub fn from_post(post: &Post) -> Self {
        Self {
            text: post.text.clone(),
            group: post.group_id.map(|id| id.to_string()).unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !(self.text_errors.is_empty() && self.group_errors.is_empty() && self.image_errors.is_empty())
    }

    pub fn group_choices(&self, groups: &[Group]) -> Vec<GroupChoice> {
        groups
            .iter()
            .map(|g| GroupChoice {
                id: g.id,
                title: g.title.clone(),
                selected: self.group == g.id.to_string(),
            })
            .collect()
    }

    /// Validate a submission against the available groups.
    pub fn validate(submission: PostSubmission, groups: &[Group]) -> Result<CleanPost, PostForm> {
        let mut form = PostForm {
            text: submission.text.clone(),
            group: submission.group.clone().unwrap_or_default().trim().to_string(),
            ..PostForm::default()
        };

        let text = submission.text.trim().to_string();
        if text.is_empty() {
            form.text_errors.push(REQUIRED.to_string());
        }

        let group_id = if form.group.is_empty() {
            None
        } else {
            match form.group.parse::<i64>() {
                Ok(id) if groups.iter().any(|g| g.id == id) => Some(id),
                _ => {
                    form.group_errors.push(INVALID_CHOICE.to_string());
                    None
                }
            }
        };

        let image_ext = match &submission.image {
            Some(image) => {
                let ext = detect_image(&image.bytes);
                if ext.is_none() {
                    form.image_errors.push(INVALID_IMAGE.to_string());
                }
                ext
            }
            None => None,
        };

        if form.has_errors() {
            return Err(form);
        }

        Ok(CleanPost {
            text,
            group_id,
            image: submission.image,
            image_ext,
        })
    }
}

/// Decode an upload and return the extension it is stored under.
///
/// The format comes from the content, never from the client's file name.
/// Only GIF, PNG, JPEG and WebP that decode completely are accepted.
pub fn detect_image(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    let ext = match format {
        ImageFormat::Gif => "gif",
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        _ => return None,
    };
    image::load_from_memory_with_format(bytes, format).ok()?;
    Some(ext)
}

// -- Comment form --

#[derive(Debug, Default, Deserialize)]
pub struct CommentInput {
    #[serde(default)]
    pub text: String,
}

impl CommentInput {
    /// Trimmed comment text, or `None` when there is nothing to save.
    pub fn clean(&self) -> Option<String> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

// -- Auth forms --

#[derive(Debug, Default, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignupInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanSignup {
    pub username: String,
    pub display_name: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub username: String,
    pub display_name: String,
    pub username_errors: Vec<String>,
    pub password_errors: Vec<String>,
}

pub const MAX_USERNAME_LEN: usize = 150;
pub const MIN_PASSWORD_LEN: usize = 8;

fn valid_username_char(c: char) -> bool {
    c.is_alphanumeric() || "@.+-_".contains(c)
}

impl SignupForm {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !(self.username_errors.is_empty() && self.password_errors.is_empty())
    }

    pub fn validate(input: SignupInput, username_taken: bool) -> Result<CleanSignup, SignupForm> {
        let username = input.username.trim().to_string();
        let display_name = input.display_name.trim().to_string();
        let mut form = SignupForm {
            username: username.clone(),
            display_name: display_name.clone(),
            ..SignupForm::default()
        };

        if username.is_empty() {
            form.username_errors.push(REQUIRED.to_string());
        } else if username.chars().count() > MAX_USERNAME_LEN {
            form.username_errors.push(format!(
                "Ensure this value has at most {} characters.",
                MAX_USERNAME_LEN
            ));
        } else if !username.chars().all(valid_username_char) {
            form.username_errors.push(
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                    .to_string(),
            );
        } else if username_taken {
            form.username_errors
                .push("A user with that username already exists.".to_string());
        }

        if input.password1.is_empty() {
            form.password_errors.push(REQUIRED.to_string());
        } else if input.password1.chars().count() < MIN_PASSWORD_LEN {
            form.password_errors.push(format!(
                "This password is too short. It must contain at least {} characters.",
                MIN_PASSWORD_LEN
            ));
        } else if input.password1 != input.password2 {
            form.password_errors
                .push("The two password fields didn't match.".to_string());
        }

        if form.has_errors() {
            return Err(form);
        }

        Ok(CleanSignup {
            username,
            display_name: Some(display_name).filter(|name| !name.is_empty()),
            password: input.password1,
        })
    }
}

/// Only same-site absolute paths are followed after login.
pub fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xFF\xFF\xFF\x21\xF9\x04\x00\x00\x00\x00\x00\x2C\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0C\x0A\x00\x3B";

    fn groups() -> Vec<Group> {
        vec![Group {
            id: 3,
            title: "Cats".into(),
            slug: "cats".into(),
            description: String::new(),
        }]
    }

    fn submission(text: &str, group: Option<&str>) -> PostSubmission {
        PostSubmission {
            text: text.to_string(),
            group: group.map(str::to_string),
            image: None,
        }
    }

    #[test]
    fn valid_post_is_trimmed() {
        let clean = PostForm::validate(submission("  hello  ", Some("3")), &groups()).unwrap();
        assert_eq!(clean.text, "hello");
        assert_eq!(clean.group_id, Some(3));
        assert!(clean.image.is_none());
    }

    #[test]
    fn empty_group_means_no_group() {
        let clean = PostForm::validate(submission("hello", Some("")), &groups()).unwrap();
        assert_eq!(clean.group_id, None);
    }

    #[test]
    fn blank_text_is_rejected() {
        let form = PostForm::validate(submission("   ", None), &groups()).unwrap_err();
        assert_eq!(form.text_errors, vec![REQUIRED.to_string()]);
        assert!(form.group_errors.is_empty());
    }

    #[test]
    fn unknown_group_is_rejected() {
        let form = PostForm::validate(submission("hello", Some("99")), &groups()).unwrap_err();
        assert_eq!(form.group_errors, vec![INVALID_CHOICE.to_string()]);
        let form = PostForm::validate(submission("hello", Some("cats")), &groups()).unwrap_err();
        assert_eq!(form.group, "cats");
        assert!(form.has_errors());
    }

    #[test]
    fn image_must_look_like_an_image() {
        let mut sub = submission("hello", None);
        sub.image = Some(UploadedImage {
            file_name: "notes.txt".into(),
            bytes: b"plain text".to_vec(),
        });
        let form = PostForm::validate(sub.clone(), &groups()).unwrap_err();
        assert_eq!(form.image_errors, vec![INVALID_IMAGE.to_string()]);

        sub.image = Some(UploadedImage {
            file_name: "small.gif".into(),
            bytes: SMALL_GIF.to_vec(),
        });
        let clean = PostForm::validate(sub, &groups()).unwrap();
        assert_eq!(clean.image_ext, Some("gif"));
    }

    fn encoded(format: image::ImageOutputFormat) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(4, 3);
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn detects_decodable_formats() {
        assert_eq!(detect_image(SMALL_GIF), Some("gif"));
        assert_eq!(
            detect_image(&encoded(image::ImageOutputFormat::Png)),
            Some("png")
        );
        assert_eq!(
            detect_image(&encoded(image::ImageOutputFormat::Jpeg(80))),
            Some("jpg")
        );
        assert_eq!(detect_image(b""), None);
    }

    #[test]
    fn magic_bytes_alone_are_not_an_image() {
        assert_eq!(detect_image(b"GIF89a<script>alert(1)</script>"), None);
        assert_eq!(detect_image(b"\x89PNG\r\n\x1a\ngarbage"), None);
        assert_eq!(detect_image(&[0xFF, 0xD8, 0xFF, 0xE0]), None);
        assert_eq!(detect_image(&SMALL_GIF[..20]), None);
    }

    #[test]
    fn unsupported_formats_are_refused() {
        assert_eq!(detect_image(&encoded(image::ImageOutputFormat::Bmp)), None);
    }

    #[test]
    fn group_choices_mark_selection() {
        let form = PostForm {
            group: "3".into(),
            ..PostForm::default()
        };
        let choices = form.group_choices(&groups());
        assert!(choices[0].selected);
        assert!(!PostForm::empty().group_choices(&groups())[0].selected);
    }

    #[test]
    fn comment_must_have_text() {
        assert_eq!(CommentInput { text: "  ".into() }.clean(), None);
        assert_eq!(
            CommentInput { text: " hi ".into() }.clean().as_deref(),
            Some("hi")
        );
    }

    fn signup(username: &str, p1: &str, p2: &str) -> SignupInput {
        SignupInput {
            username: username.into(),
            display_name: String::new(),
            password1: p1.into(),
            password2: p2.into(),
        }
    }

    #[test]
    fn signup_accepts_good_input() {
        let clean = SignupForm::validate(signup("leo.t", "war&peace1869", "war&peace1869"), false)
            .unwrap();
        assert_eq!(clean.username, "leo.t");
        assert_eq!(clean.display_name, None);
    }

    #[test]
    fn signup_rejects_bad_input() {
        let form = SignupForm::validate(signup("", "short", "short"), false).unwrap_err();
        assert_eq!(form.username_errors, vec![REQUIRED.to_string()]);
        assert_eq!(form.password_errors.len(), 1);

        let form = SignupForm::validate(signup("bad name", "longenough", "different1"), false)
            .unwrap_err();
        assert_eq!(form.username_errors.len(), 1);
        assert_eq!(form.password_errors.len(), 1);

        let form =
            SignupForm::validate(signup("leo", "longenough", "longenough"), true).unwrap_err();
        assert!(form.username_errors[0].contains("already exists"));
    }

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/create/")), "/create/");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(None), "/");
    }
}

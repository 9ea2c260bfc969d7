//! Uploaded post images on disk.

use std::path::{Component, Path, PathBuf};

use rusqlite::Connection;

use crate::db::posts;
use crate::error::AppResult;
use crate::forms::UploadedImage;

/// Directory under the media root that holds post images.
pub const POSTS_DIR: &str = "posts";

/// Reduce a client-supplied file name to a safe, flat stem and append the
/// extension of the detected image format. The client's extension is dropped.
pub fn sanitize_file_name(raw: &str, ext: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let raw_stem = match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    };

    let stem: String = raw_stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let stem = stem.trim_matches('.');
    let stem = if stem.is_empty() { "image" } else { stem };

    format!("{}.{}", stem, ext)
}

fn with_random_suffix(name: &str) -> String {
    let suffix: String = uuid::Uuid::now_v7()
        .simple()
        .to_string()
        .chars()
        .rev()
        .take(7)
        .collect();
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", name, suffix),
    }
}

/// Write an upload under `<media>/posts/` and return its path relative to
/// the media root. Taken names get a random suffix on the stem.
pub fn store_image(
    media_root: &Path,
    conn: &Connection,
    image: &UploadedImage,
    ext: &str,
) -> AppResult<String> {
    let dir = media_root.join(POSTS_DIR);
    std::fs::create_dir_all(&dir)?;

    let original = sanitize_file_name(&image.file_name, ext);
    let mut name = original.clone();
    while dir.join(&name).exists() || posts::image_in_use(conn, &relative(&name))? {
        name = with_random_suffix(&original);
    }

    std::fs::write(dir.join(&name), &image.bytes)?;
    tracing::info!("Stored upload {}", relative(&name));
    Ok(relative(&name))
}

fn relative(name: &str) -> String {
    format!("{}/{}", POSTS_DIR, name)
}

/// Resolve a request path inside the media root, refusing anything that
/// could step outside it.
pub fn resolve(media_root: &Path, requested: &str) -> Option<PathBuf> {
    let requested = Path::new(requested);
    let plain = requested
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if plain && !requested.as_os_str().is_empty() {
        Some(media_root.join(requested))
    } else {
        None
    }
}

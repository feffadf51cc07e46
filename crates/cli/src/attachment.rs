//! Converts local image files to inline attachments and back.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use proto::{Attachment, MessageId};
use tracing::debug;

/// Maps a file extension to an image mime type.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Maps an image mime type back to a file extension.
fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "image/heif" => "heif",
        _ => "png",
    }
}

/// Reads an image file and encodes it as an inline attachment.
pub fn encode_file(path: &Path) -> anyhow::Result<Attachment> {
    let Some(mime_type) = mime_from_extension(path) else {
        bail!(
            "unsupported image type: {} (expected png, jpg, gif, webp, heic)",
            path.display()
        );
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    debug!(path = %path.display(), mime_type, size = bytes.len(), "Attachment encoded");
    Ok(Attachment::new(mime_type, STANDARD.encode(bytes)))
}

/// Decodes a generated image data URI and writes it under `dir`.
///
/// The file is named after the message id so repeated saves overwrite.
pub fn save_data_uri(dir: &Path, id: &MessageId, data_uri: &str) -> anyhow::Result<PathBuf> {
    let attachment = Attachment::parse_data_uri(data_uri)?;
    let bytes = STANDARD
        .decode(attachment.data.as_bytes())
        .context("generated image is not valid base64")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!(
        "{}.{}",
        id.as_str(),
        extension_for_mime(&attachment.mime_type)
    ));
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Generated image saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_extension_is_case_insensitive() {
        assert_eq!(mime_from_extension(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(mime_from_extension(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("a.Jpg")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("a.heif")), Some("image/heif"));
        assert_eq!(mime_from_extension(Path::new("a.txt")), None);
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }

    #[test]
    fn encode_file_reads_and_base64_encodes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("cat.png");
        std::fs::write(&path, b"foo").expect("write");

        let attachment = encode_file(&path).expect("encode");
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.data, "Zm9v");
    }

    #[test]
    fn encode_file_rejects_unsupported_and_missing_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let text = tmp.path().join("notes.txt");
        std::fs::write(&text, b"hello").expect("write");
        let err = encode_file(&text).expect_err("txt is not an image");
        assert!(err.to_string().contains("unsupported image type"));

        let missing = tmp.path().join("missing.png");
        let err = encode_file(&missing).expect_err("missing file");
        assert!(err.to_string().contains("failed to read"));

        let empty = tmp.path().join("empty.gif");
        std::fs::write(&empty, b"").expect("write");
        assert!(encode_file(&empty).is_err());
    }

    #[test]
    fn save_data_uri_writes_decoded_bytes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("images");
        let id = MessageId::from("msg-1");

        let path = save_data_uri(&dir, &id, "data:image/jpeg;base64,Zm9v").expect("save");
        assert_eq!(path, dir.join("msg-1.jpg"));
        assert_eq!(std::fs::read(&path).expect("read back"), b"foo");
    }

    #[test]
    fn save_data_uri_rejects_malformed_uri() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let id = MessageId::from("msg-2");
        assert!(save_data_uri(tmp.path(), &id, "not a data uri").is_err());
        assert!(save_data_uri(tmp.path(), &id, "data:image/png;base64,@@@").is_err());
    }
}

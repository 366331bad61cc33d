use std::path::{Path, PathBuf};

use crate::logging;
use crate::models::Attachment;
use crate::redmine::{RedmineClient, RedmineError};

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error(transparent)]
    Redmine(#[from] RedmineError),
    #[error("failed to write attachment to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Downloads attachment content into a local directory, one subdirectory
/// per attachment id so equal filenames never collide.
#[derive(Debug, Clone)]
pub struct AttachmentManager {
    download_dir: PathBuf,
}

impl AttachmentManager {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn local_path(&self, attachment: &Attachment) -> PathBuf {
        self.download_dir
            .join(attachment.id.to_string())
            .join(sanitize_filename(&attachment.filename))
    }

    pub fn is_downloaded(&self, attachment: &Attachment) -> bool {
        std::fs::metadata(self.local_path(attachment))
            .map(|meta| meta.is_file() && (attachment.filesize == 0 || meta.len() == attachment.filesize))
            .unwrap_or(false)
    }

    /// Local path of the attachment, fetching it first unless already present.
    pub fn fetch(
        &self,
        client: &RedmineClient,
        attachment: &Attachment,
    ) -> Result<PathBuf, AttachmentError> {
        let path = self.local_path(attachment);
        if self.is_downloaded(attachment) {
            logging::debug(format!("attachment {} already at {}", attachment.id, path.display()));
            return Ok(path);
        }

        let bytes = client.download(&attachment.content_url)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AttachmentError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, &bytes).map_err(|source| AttachmentError::Write {
            path: path.clone(),
            source,
        })?;
        logging::info(format!(
            "downloaded attachment {} ({} bytes) to {}",
            attachment.id,
            bytes.len(),
            path.display()
        ));
        Ok(path)
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redmine::Credentials;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    fn attachment(content_url: String) -> Attachment {
        Attachment {
            id: 9,
            filename: "../notes.txt".to_string(),
            filesize: 5,
            content_type: Some("text/plain".to_string()),
            content_url,
            description: None,
            author: None,
            created_on: None,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facets-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_filename("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_filename("  "), "attachment");
        assert_eq!(sanitize_filename("shot.png"), "shot.png");
    }

    #[test]
    fn downloads_once_then_reuses_local_copy() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/attachments/download/9/notes.txt");
            then.status(200).body("hello");
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::default()).expect("client");
        let manager = AttachmentManager::new(temp_dir("download"));
        let att = attachment(server.url("/attachments/download/9/notes.txt"));

        let path = manager.fetch(&client, &att).expect("download");
        assert_eq!(std::fs::read(&path).expect("read back"), b"hello");
        assert!(path.starts_with(manager.download_dir()));

        let again = manager.fetch(&client, &att).expect("cached");
        assert_eq!(again, path);
        mock.assert_hits(1);

        let _ = std::fs::remove_dir_all(manager.download_dir());
    }
}

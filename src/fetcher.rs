use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::FetchError;
use crate::notification::MediaCategory;

/// How many `name (n).ext` variants to try before giving up.
const MAX_NAME_SUFFIX: u32 = 999;

/// Streams remote media into `vault_root/<destination>/<category>/`.
#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    vault_root: PathBuf,
}

impl MediaFetcher {
    pub fn new(client: reqwest::Client, vault_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            vault_root: vault_root.into(),
        }
    }

    /// Download `remote_url` into the vault and return the path written.
    ///
    /// The body is streamed into a hidden `.part` file next to the target and
    /// only linked under its real name once complete. Existing files are never
    /// replaced: a taken name gets a ` (n)` suffix instead. The `.part` file is
    /// removed on every exit, including cancellation.
    pub async fn fetch(
        &self,
        remote_url: &str,
        destination: &Path,
        category: MediaCategory,
        file_name: &str,
    ) -> Result<PathBuf, FetchError> {
        let file_name = sanitize_file_name(file_name)?;

        let dir = self.vault_root.join(destination).join(category.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FetchError::io(&dir, e))?;

        let part = PartFile::create(dir.join(format!(
            ".{}.{}.part",
            file_name,
            Uuid::new_v4()
        )))?;

        let bytes = self.download(remote_url, &part).await?;
        debug!("Downloaded {} bytes from {}", bytes, remote_url);

        link_unique(&part.path, &dir, file_name).await
    }

    async fn download(&self, url: &str, part: &PartFile) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let path = part.path.as_path();
        let mut file = tokio::fs::File::from_std(
            part.file.try_clone().map_err(|e| FetchError::io(path, e))?,
        );

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(path, e))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| FetchError::io(path, e))?;
        file.sync_all().await.map_err(|e| FetchError::io(path, e))?;

        Ok(written)
    }
}

/// Hidden download target, removed when dropped. Dropping covers every exit
/// from `fetch`, including the task being aborted mid-download.
struct PartFile {
    path: PathBuf,
    file: std::fs::File,
}

impl PartFile {
    /// Created synchronously so the file exists before the guard can be
    /// dropped at any await point.
    fn create(path: PathBuf) -> Result<Self, FetchError> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| FetchError::io(&path, e))?;
        Ok(Self { path, file })
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove partial file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Keep only the last path component of a remote file name.
fn sanitize_file_name(raw: &str) -> Result<&str, FetchError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(FetchError::InvalidFileName(raw.to_string()));
    }
    Ok(name)
}

/// Hard-link `part` under the first free name in `dir`. Linking fails if the
/// name exists, so two concurrent writers never land on the same file.
async fn link_unique(part: &Path, dir: &Path, file_name: &str) -> Result<PathBuf, FetchError> {
    for n in 0..=MAX_NAME_SUFFIX {
        let candidate = dir.join(numbered_name(file_name, n));
        match tokio::fs::hard_link(part, &candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(FetchError::io(&candidate, e)),
        }
    }

    Err(FetchError::NameExhausted {
        path: dir.join(file_name),
    })
}

/// `pic.jpg` -> `pic (n).jpg`; `n == 0` keeps the name as is.
fn numbered_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }

    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{stem} ({n}).{ext}"),
        _ => format!("{file_name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use axum::body::{Body, Bytes};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    const PIC: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg";

    async fn media_server() -> SocketAddr {
        let app = Router::new()
            .route("/pic.jpg", get(|| async { PIC }))
            .route("/big.bin", get(|| async { vec![7u8; 1 << 20] }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/stalled", get(|| async { testutil::stalled_body() }))
            .route(
                "/broken",
                get(|| async {
                    Body::from_stream(futures::stream::iter(vec![
                        Ok::<_, std::io::Error>(Bytes::from_static(b"partial content")),
                        Err(std::io::Error::other("connection dropped")),
                    ]))
                }),
            );
        testutil::serve(app).await
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_fetch_writes_served_content() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        let path = fetcher
            .fetch(
                &format!("http://{addr}/pic.jpg"),
                Path::new("alice-folder"),
                MediaCategory::Image,
                "pic.jpg",
            )
            .await
            .unwrap();

        assert_eq!(path, vault.path().join("alice-folder/image/pic.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), PIC);
        assert_eq!(
            dir_entries(&vault.path().join("alice-folder/image")),
            vec!["pic.jpg"]
        );
    }

    #[tokio::test]
    async fn test_fetch_streams_large_body() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        let path = fetcher
            .fetch(
                &format!("http://{addr}/big.bin"),
                Path::new("bob"),
                MediaCategory::Video,
                "clip.mp4",
            )
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1 << 20);
    }

    #[tokio::test]
    async fn test_fetch_never_overwrites() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());
        let image_dir = vault.path().join("alice/image");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join("pic.jpg"), b"older picture").unwrap();

        let url = format!("http://{addr}/pic.jpg");
        let first = fetcher
            .fetch(&url, Path::new("alice"), MediaCategory::Image, "pic.jpg")
            .await
            .unwrap();
        let second = fetcher
            .fetch(&url, Path::new("alice"), MediaCategory::Image, "pic.jpg")
            .await
            .unwrap();

        assert_eq!(first, image_dir.join("pic (1).jpg"));
        assert_eq!(second, image_dir.join("pic (2).jpg"));
        assert_eq!(
            std::fs::read(image_dir.join("pic.jpg")).unwrap(),
            b"older picture"
        );
        assert_eq!(
            dir_entries(&image_dir),
            vec!["pic (1).jpg", "pic (2).jpg", "pic.jpg"]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_status_leaves_no_file() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        let err = fetcher
            .fetch(
                &format!("http://{addr}/missing"),
                Path::new("alice"),
                MediaCategory::Image,
                "pic.jpg",
            )
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, .. } => assert_eq!(status.as_u16(), 404),
            other => panic!("expected status error, got {other:?}"),
        }
        assert!(dir_entries(&vault.path().join("alice/image")).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_interrupted_body_leaves_no_file() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        let err = fetcher
            .fetch(
                &format!("http://{addr}/broken"),
                Path::new("alice"),
                MediaCategory::Document,
                "report.pdf",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
        assert!(dir_entries(&vault.path().join("alice/document")).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_no_file() {
        let addr = media_server().await;
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());
        let image_dir = vault.path().join("alice/image");

        let url = format!("http://{addr}/stalled");
        let task = tokio::spawn(async move {
            fetcher
                .fetch(&url, Path::new("alice"), MediaCategory::Image, "pic.jpg")
                .await
        });

        for _ in 0..100 {
            if !dir_entries(&image_dir).is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let in_progress = dir_entries(&image_dir);
        assert_eq!(in_progress.len(), 1);
        assert!(in_progress[0].ends_with(".part"));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(dir_entries(&image_dir).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        let err = fetcher
            .fetch(
                "http://127.0.0.1:1/pic.jpg",
                Path::new("alice"),
                MediaCategory::Image,
                "pic.jpg",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
        assert!(dir_entries(&vault.path().join("alice/image")).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_file_names() {
        let vault = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(reqwest::Client::new(), vault.path());

        for name in ["", "..", "dir/", "  "] {
            let err = fetcher
                .fetch(
                    "http://127.0.0.1:1/x",
                    Path::new("alice"),
                    MediaCategory::Image,
                    name,
                )
                .await
                .unwrap_err();
            assert!(
                matches!(err, FetchError::InvalidFileName(_)),
                "name {name:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_sanitize_file_name_strips_directories() {
        assert_eq!(sanitize_file_name("pic.jpg").unwrap(), "pic.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\a.txt").unwrap(), "a.txt");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("pic.jpg", 0), "pic.jpg");
        assert_eq!(numbered_name("pic.jpg", 3), "pic (3).jpg");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(numbered_name("README", 2), "README (2)");
    }
}

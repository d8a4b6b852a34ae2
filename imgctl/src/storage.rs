//! Local filesystem storage for job-scoped images.
//!
//! Every path the service reads, writes or deletes is derived through [`Storage`]. Caller
//! supplied job ids and URL paths are `/`-separated and normalized lexically (`.` dropped, `..`
//! pops a segment); the result must be a strict descendant of the root, otherwise the input is
//! rejected with [`StorageError::InvalidPath`]. Writes and deletes additionally canonicalize the
//! directory they operate in, so a symlink planted inside the root cannot redirect them.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/<job id>/<millis><ext>
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error as ThisError;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Successive millisecond stems tried before giving up on finding a free file name.
const MAX_NAME_ATTEMPTS: usize = 64;

#[derive(ThisError, Debug)]
pub enum StorageError {
    /// Empty, absolute, or normalizes to somewhere that is not strictly below the root
    #[error("path {0:?} does not resolve inside the storage root")]
    InvalidPath(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// An image persisted by [`Storage::store_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Normalized job id, `/`-separated
    pub job_id: String,
    pub filename: String,
    pub path: PathBuf,
}

impl StoredImage {
    /// Path segments below the storage root, in URL order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.job_id.split('/').chain(std::iter::once(self.filename.as_str()))
    }
}

/// Handle on the storage root. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open the storage root, creating it if needed.
    ///
    /// The root is kept in canonical form so containment checks compare symlink-free absolute
    /// paths.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        debug!(root = %root.display(), "Opened storage root");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a `/`-separated relative path to a filesystem path strictly below the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let segments = normalize(relative).ok_or_else(|| StorageError::InvalidPath(relative.to_string()))?;
        Ok(segments.iter().fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    /// Persist `data` as a new file `<millis><extension>` inside the job's directory.
    ///
    /// The file is created exclusively. When the name is taken the millisecond stem is bumped, so
    /// two uploads landing in the same millisecond never overwrite each other. A failed write
    /// removes the partial file.
    #[instrument(skip(self, data), fields(bytes = data.len()), err)]
    pub async fn store_image(&self, job_id: &str, extension: &str, data: &[u8]) -> Result<StoredImage> {
        let segments = normalize(job_id).ok_or_else(|| StorageError::InvalidPath(job_id.to_string()))?;
        if extension.contains(['/', '\\', '\0']) {
            return Err(StorageError::InvalidPath(extension.to_string()));
        }
        let job_id = segments.join("/");

        let dir = self.root.join(&job_id);
        fs::create_dir_all(&dir).await?;
        let dir = self.contained(&dir, &job_id).await?;

        let mut stem = Utc::now().timestamp_millis();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = format!("{stem}{extension}");
            let path = dir.join(&filename);

            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(data).await?;
                        file.flush().await
                    }
                    .await;

                    if let Err(e) = written {
                        let _ = fs::remove_file(&path).await;
                        return Err(e.into());
                    }

                    debug!(path = %path.display(), "Stored image");
                    return Ok(StoredImage { job_id, filename, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(filename = %filename, "File name taken, bumping stem");
                    stem += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name in {job_id} after {MAX_NAME_ATTEMPTS} attempts"),
        )
        .into())
    }

    /// Remove a single stored file. Directories are never removed here and count as not found.
    #[instrument(skip(self), err)]
    pub async fn delete_image(&self, relative: &str) -> Result<()> {
        let Some(target) = self.locate(relative).await? else {
            return Err(StorageError::NotFound(relative.to_string()));
        };

        match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => return Err(StorageError::NotFound(relative.to_string())),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound(relative.to_string())),
            Err(e) => return Err(e.into()),
        }

        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            // Lost a race with another delete
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(relative.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a job directory and everything below it.
    ///
    /// Returns `false` when there was nothing to remove.
    #[instrument(skip(self), err)]
    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let Some(target) = self.locate(job_id).await? else {
            return Ok(false);
        };

        let meta = match fs::symlink_metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let removed = if meta.is_dir() {
            fs::remove_dir_all(&target).await
        } else {
            // A symlink or stray file: remove the entry itself, never what it points at
            fs::remove_file(&target).await
        };

        match removed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve `relative` and canonicalize its parent directory.
    ///
    /// Returns `None` when the parent does not exist. The final component is left unresolved so
    /// callers act on the entry itself rather than a symlink target.
    async fn locate(&self, relative: &str) -> Result<Option<PathBuf>> {
        let path = self.resolve(relative)?;
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidPath(relative.to_string()));
        };

        let parent = match fs::canonicalize(parent).await {
            Ok(parent) => parent,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !parent.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }

        Ok(Some(parent.join(name)))
    }

    /// Canonicalize an existing directory and check it is still inside the root.
    async fn contained(&self, dir: &Path, relative: &str) -> Result<PathBuf> {
        let canonical = fs::canonicalize(dir).await?;
        if canonical == self.root || !canonical.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        Ok(canonical)
    }
}

/// Lexically normalize a `/`-separated relative path.
///
/// Returns `None` for absolute paths, backslashes, NUL bytes, `..` climbing above the start, and
/// paths that normalize to nothing (which would name the root itself).
fn normalize(relative: &str) -> Option<Vec<&str>> {
    if relative.starts_with('/') || relative.contains(['\\', '\0']) {
        return None;
    }

    let mut segments = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }

    if segments.is_empty() { None } else { Some(segments) }
}

/// Extension of a client-supplied file name, dot included, case preserved.
///
/// Taken from the last `.` of the base name. Leading dots do not start an extension, so
/// `.profile` has none while `archive.` has `.`.
pub fn extension_of(file_name: &str) -> &str {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base[leading_dots..].rfind('.') {
        Some(idx) => &base[leading_dots + idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_rejects_escapes() {
        assert_eq!(normalize("job1"), Some(vec!["job1"]));
        assert_eq!(normalize("a/./b//c/"), Some(vec!["a", "b", "c"]));
        assert_eq!(normalize("a/../b"), Some(vec!["b"]));

        assert_eq!(normalize(""), None);
        assert_eq!(normalize("."), None);
        assert_eq!(normalize(".."), None);
        assert_eq!(normalize("a/.."), None);
        assert_eq!(normalize("../etc/passwd"), None);
        assert_eq!(normalize("job1/../../etc"), None);
        assert_eq!(normalize("/etc/passwd"), None);
        assert_eq!(normalize("..\\windows"), None);
        assert_eq!(normalize("a\0b"), None);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("cat.png"), ".png");
        assert_eq!(extension_of("CAT.JPEG"), ".JPEG");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of(""), "");
        assert_eq!(extension_of(".profile"), "");
        assert_eq!(extension_of(".hidden.gif"), ".gif");
        assert_eq!(extension_of("trailing."), ".");
        assert_eq!(extension_of("dir.d/photo"), "");
        assert_eq!(extension_of("C:\\Users\\me\\photo.webp"), ".webp");
    }

    #[test]
    fn test_resolve_stays_below_root() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let resolved = storage.resolve("job1/123.png").unwrap();
        assert_eq!(resolved, storage.root().join("job1").join("123.png"));

        assert!(matches!(storage.resolve("../outside"), Err(StorageError::InvalidPath(_))));
        assert!(matches!(storage.resolve("."), Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_open_creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("uploads");

        let storage = Storage::open(&root).unwrap();

        assert!(root.is_dir());
        assert!(storage.root().is_absolute());
    }

    #[tokio::test]
    async fn test_store_image_writes_bytes_under_job() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let stored = storage.store_image("job1", ".png", b"png-bytes").await.unwrap();

        assert_eq!(stored.job_id, "job1");
        assert!(stored.filename.ends_with(".png"));
        let stem = stored.filename.trim_end_matches(".png");
        assert!(stem.parse::<i64>().is_ok(), "stem should be a millisecond timestamp: {stem}");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"png-bytes");
        assert!(stored.path.starts_with(storage.root().join("job1")));
        assert_eq!(stored.segments().collect::<Vec<_>>(), vec!["job1", stored.filename.as_str()]);
    }

    #[tokio::test]
    async fn test_store_image_nested_job_is_normalized() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let stored = storage.store_image("batch/./7/", "", b"x").await.unwrap();

        assert_eq!(stored.job_id, "batch/7");
        assert!(storage.root().join("batch").join("7").join(&stored.filename).is_file());
    }

    #[tokio::test]
    async fn test_store_image_rejects_escaping_job() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("uploads");
        let storage = Storage::open(&root).unwrap();

        let result = storage.store_image("../escaped", ".png", b"x").await;

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(!dir.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn test_store_image_never_overwrites() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let mut names = std::collections::HashSet::new();
        for i in 0..20u8 {
            let stored = storage.store_image("burst", ".jpg", &[i]).await.unwrap();
            assert!(names.insert(stored.filename.clone()), "duplicate name {}", stored.filename);
            assert_eq!(std::fs::read(&stored.path).unwrap(), vec![i]);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_image_refuses_symlinked_job_dir() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        symlink(outside.path(), storage.root().join("evil")).unwrap();

        let result = storage.store_image("evil", ".png", b"x").await;

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert_eq!(std::fs::read_dir(outside.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_image() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let stored = storage.store_image("job1", ".png", b"x").await.unwrap();
        let relative = format!("job1/{}", stored.filename);

        storage.delete_image(&relative).await.unwrap();

        assert!(!stored.path.exists());
        // The job directory itself is left alone
        assert!(storage.root().join("job1").is_dir());
        assert!(matches!(storage.delete_image(&relative).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_image_missing_and_directories() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        std::fs::create_dir_all(storage.root().join("job1")).unwrap();

        assert!(matches!(storage.delete_image("nojob/1.png").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.delete_image("job1/1.png").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.delete_image("job1").await, Err(StorageError::NotFound(_))));
        assert!(storage.root().join("job1").is_dir());
    }

    #[tokio::test]
    async fn test_delete_image_rejects_traversal() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("uploads");
        let storage = Storage::open(&root).unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "keep me").unwrap();

        let result = storage.delete_image("job1/../../secret.txt").await;

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(secret.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_image_through_symlinked_dir_is_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "keep me").unwrap();
        let storage = Storage::open(dir.path().join("uploads")).unwrap();
        symlink(outside.path(), storage.root().join("evil")).unwrap();

        let result = storage.delete_image("evil/secret.txt").await;

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(secret.exists());
    }

    #[tokio::test]
    async fn test_delete_job() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.store_image("job1", ".png", b"a").await.unwrap();
        storage.store_image("job1/nested", ".png", b"b").await.unwrap();

        assert!(storage.delete_job("job1").await.unwrap());
        assert!(!storage.root().join("job1").exists());

        // Idempotent
        assert!(!storage.delete_job("job1").await.unwrap());
        assert!(!storage.delete_job("never/existed").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_job_rejects_root_and_escapes() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("uploads")).unwrap();
        storage.store_image("job1", ".png", b"a").await.unwrap();

        for job_id in [".", "", "..", "../uploads", "/tmp", "job1/../.."] {
            let result = storage.delete_job(job_id).await;
            assert!(matches!(result, Err(StorageError::InvalidPath(_))), "{job_id:?} should be rejected");
        }
        assert!(storage.root().join("job1").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_job_removes_symlink_not_target() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("keep.txt"), "keep").unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        symlink(outside.path(), storage.root().join("linked")).unwrap();

        assert!(storage.delete_job("linked").await.unwrap());

        assert!(!storage.root().join("linked").exists());
        assert!(outside.path().join("keep.txt").exists());
    }
}

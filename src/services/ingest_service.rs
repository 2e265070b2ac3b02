//! src/services/ingest_service.rs
//!
//! IngestService takes an already-authenticated avatar upload from the
//! wire to a validated file on disk, a metadata row in SQLite and an updated
//! session. Files land in one flat directory beneath `base_path` and are
//! served back under `public_prefix`.
//!
//! Whatever fails after bytes reach the disk, the file is deleted before the
//! error is returned. A session never points at a file that has not passed
//! validation.

use crate::{
    format::{self, ImageKind},
    models::{file_record::FileRecord, session::UploadSession},
    services::session_store::SessionStore,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Allowance for multipart boundaries and part headers on top of the file ceiling.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const MAX_BASENAME_LEN: usize = 64;
const NAME_ATTEMPTS: usize = 4;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file type `{0}` is not allowed, only JPEG, PNG and WebP are accepted")]
    UnsupportedType(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("request body too large: {0}")]
    BodyLimit(String),
    #[error("file contents are not a valid `{declared}` image")]
    SignatureMismatch { declared: String },
    #[error("file could not be read as an image: {0}")]
    Undecodable(String),
    #[error("no `avatar` file in the request")]
    MissingFile,
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("session ended before the upload completed")]
    SessionGone,
    #[error("could not find a free file name for `{0}`")]
    NameExhausted(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// What the client said about the file. Trusted only as a pre-filter.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub declared: ImageKind,
}

/// A fully written file under its final name.
#[derive(Debug, Clone)]
pub struct PersistedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Facts established by reading the persisted bytes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedImage {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: FileRecord,
    pub session: UploadSession,
}

/// Bytes received into a scratch file, not yet visible under a public name.
struct ReceivedFile {
    tmp: DiscardOnDrop,
    size_bytes: u64,
    checksum: String,
}

/// Removes its file when dropped, unless disarmed first.
///
/// The ingest future can be dropped at any await point; a file it created
/// goes with it.
#[derive(Debug)]
struct DiscardOnDrop {
    path: PathBuf,
    armed: bool,
}

impl DiscardOnDrop {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DiscardOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed rejected upload {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove rejected upload {}: {}", self.path.display(), err),
        }
    }
}

/// IngestService owns the avatar storage directory and the file metadata table.
#[derive(Clone)]
pub struct IngestService {
    /// Shared SQLite connection pool used for file records.
    pub db: Arc<SqlitePool>,

    /// Flat directory where avatars are written.
    pub base_path: PathBuf,

    /// URL prefix the storage directory is served under, without trailing slash.
    pub public_prefix: String,

    /// Ceiling on the file part, in bytes.
    pub max_bytes: u64,
}

impl IngestService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        max_bytes: u64,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_prefix: public_prefix.into(),
            max_bytes,
        }
    }

    /// Reject a declared type outside the allowlist before any byte is read.
    pub fn check_declared_type(declared: Option<&str>) -> IngestResult<ImageKind> {
        let declared = declared.unwrap_or("");
        ImageKind::from_mime(declared)
            .ok_or_else(|| IngestError::UnsupportedType(declared.to_string()))
    }

    /// Reject a request whose advertised length cannot possibly fit.
    pub fn check_content_length(&self, content_length: Option<u64>) -> IngestResult<()> {
        match content_length {
            Some(len) if len > self.max_bytes + MULTIPART_OVERHEAD => Err(IngestError::TooLarge {
                limit: self.max_bytes,
            }),
            _ => Ok(()),
        }
    }

    pub fn public_url(&self, filename: &str) -> String {
        format!("{}/{}", self.public_prefix, filename)
    }

    /// Run steps persist → validate → record → rebind session.
    ///
    /// Only the streaming step waits on the client. Once the body is on disk
    /// the remaining steps run on their own task, so a timed-out or
    /// disconnected request cannot stop them halfway. On any failure the file
    /// is deleted again, and a record inserted for it is removed, before the
    /// error is returned.
    pub async fn ingest<S, E>(
        &self,
        sessions: Arc<dyn SessionStore>,
        token: &str,
        user_id: &str,
        incoming: IncomingFile,
        stream: S,
    ) -> IngestResult<IngestOutcome>
    where
        S: Stream<Item = Result<Bytes, E>>,
        IngestError: From<E>,
    {
        let received = self.receive(stream).await?;

        let service = self.clone();
        let token = token.to_string();
        let user_id = user_id.to_string();
        let task = tokio::spawn(async move {
            service
                .store(sessions.as_ref(), &token, &user_id, &incoming, received)
                .await
        });
        match task.await {
            Ok(result) => result,
            Err(err) => Err(IngestError::Io(io::Error::other(err))),
        }
    }

    /// Stream the file part into a scratch file in `base_path`.
    ///
    /// - Counts bytes while streaming and stops at the ceiling.
    /// - Computes the MD5 checksum on the way through.
    /// - fsyncs before returning.
    ///
    /// The scratch file is removed if this future fails or is dropped.
    async fn receive<S, E>(&self, stream: S) -> IngestResult<ReceivedFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        IngestError: From<E>,
    {
        fs::create_dir_all(&self.base_path).await?;
        let tmp = DiscardOnDrop::new(self.base_path.join(format!(".tmp-{}", Uuid::new_v4())));
        let (size_bytes, checksum) = self.write_tmp(tmp.path(), stream).await?;
        Ok(ReceivedFile {
            tmp,
            size_bytes,
            checksum,
        })
    }

    /// Link the received file under its final name, then validate, record and
    /// rebind. The stored file stays only if every step succeeds.
    async fn store(
        &self,
        sessions: &dyn SessionStore,
        token: &str,
        user_id: &str,
        incoming: &IncomingFile,
        received: ReceivedFile,
    ) -> IngestResult<IngestOutcome> {
        let ReceivedFile {
            tmp,
            size_bytes,
            checksum,
        } = received;
        let base_name = stored_filename(
            Utc::now().timestamp_millis(),
            &incoming.original_name,
            incoming.declared,
        );
        let linked = self.link_unique(tmp.path(), &base_name).await;
        drop(tmp);
        let (path, filename) = linked?;
        let stored = DiscardOnDrop::new(path.clone());
        debug!("persisted {} ({} bytes)", path.display(), size_bytes);

        let persisted = PersistedFile {
            path,
            filename,
            size_bytes,
            checksum,
        };
        match self
            .finish(sessions, token, user_id, incoming, &persisted)
            .await
        {
            Ok(outcome) => {
                stored.disarm();
                info!(
                    user_id,
                    filename = %outcome.record.filename,
                    size = outcome.record.size_bytes,
                    "avatar ingested"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(filename = %persisted.filename, "ingest failed after write: {}", err);
                Err(err)
            }
        }
    }

    async fn finish(
        &self,
        sessions: &dyn SessionStore,
        token: &str,
        user_id: &str,
        incoming: &IncomingFile,
        persisted: &PersistedFile,
    ) -> IngestResult<IngestOutcome> {
        let validated = self.validate_persisted(persisted, incoming.declared).await?;
        let record = self
            .insert_record(user_id, incoming, persisted, &validated)
            .await?;

        match sessions.update_avatar(token, &record.public_url) {
            Some(session) => Ok(IngestOutcome { record, session }),
            None => {
                if let Err(err) = self.delete_record(record.id).await {
                    warn!("failed to remove record {} for dropped session: {}", record.id, err);
                }
                Err(IngestError::SessionGone)
            }
        }
    }

    async fn write_tmp<S, E>(&self, tmp_path: &Path, stream: S) -> IngestResult<(u64, String)>
    where
        S: Stream<Item = Result<Bytes, E>>,
        IngestError: From<E>,
    {
        let mut file = File::create(tmp_path).await?;
        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_bytes {
                return Err(IngestError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        if size_bytes == 0 {
            return Err(IngestError::MissingFile);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Hard-link the temp file under `base_name`, or a suffixed variant if the
    /// name is taken. Linking never overwrites, so two uploads in the same
    /// millisecond cannot clobber each other.
    async fn link_unique(&self, tmp_path: &Path, base_name: &str) -> IngestResult<(PathBuf, String)> {
        for attempt in 0..NAME_ATTEMPTS {
            let filename = if attempt == 0 {
                base_name.to_string()
            } else {
                with_suffix(base_name, &Uuid::new_v4().simple().to_string()[..8])
            };
            let path = self.base_path.join(&filename);
            match fs::hard_link(tmp_path, &path).await {
                Ok(()) => return Ok((path, filename)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!("name {} taken, retrying", filename);
                }
                Err(err) => return Err(IngestError::Io(err)),
            }
        }
        Err(IngestError::NameExhausted(base_name.to_string()))
    }

    /// Authoritative check against the bytes that are actually on disk.
    ///
    /// The signature must match the declared type, and the header must decode
    /// far enough to yield pixel dimensions.
    pub async fn validate_persisted(
        &self,
        persisted: &PersistedFile,
        declared: ImageKind,
    ) -> IngestResult<ValidatedImage> {
        let mut head = Vec::with_capacity(format::SNIFF_LEN);
        File::open(&persisted.path)
            .await?
            .take(format::SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .await?;

        if !format::matches_declared(declared.mime(), &head) {
            return Err(IngestError::SignatureMismatch {
                declared: declared.mime().to_string(),
            });
        }

        let path = persisted.path.clone();
        let dimensions = tokio::task::spawn_blocking(move || {
            image::ImageReader::open(&path)?
                .with_guessed_format()?
                .into_dimensions()
                .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
        })
        .await
        .map_err(|err| IngestError::Io(io::Error::other(err)))?;

        let (width, height) = dimensions.map_err(|err| IngestError::Undecodable(err.to_string()))?;
        Ok(ValidatedImage {
            kind: declared,
            width,
            height,
        })
    }

    async fn insert_record(
        &self,
        user_id: &str,
        incoming: &IncomingFile,
        persisted: &PersistedFile,
        validated: &ValidatedImage,
    ) -> IngestResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO file_records (
                id, user_id, filename, path, public_url, declared_mime, actual_mime,
                size_bytes, checksum, width, height, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, filename, path, public_url, declared_mime, actual_mime,
                      size_bytes, checksum, width, height, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&persisted.filename)
        .bind(persisted.path.to_string_lossy().into_owned())
        .bind(self.public_url(&persisted.filename))
        .bind(incoming.declared.mime())
        .bind(validated.kind.mime())
        .bind(persisted.size_bytes as i64)
        .bind(&persisted.checksum)
        .bind(validated.width as i64)
        .bind(validated.height as i64)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(record)
    }

    async fn delete_record(&self, id: Uuid) -> IngestResult<()> {
        sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Fetch a stored record by filename.
    pub async fn find_record(&self, filename: &str) -> IngestResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT id, user_id, filename, path, public_url, declared_mime, actual_mime,
                    size_bytes, checksum, width, height, created_at
             FROM file_records WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }
}

/// Build `{epoch-millis}_{sanitized-basename}{ext}`.
///
/// The basename is taken after the last `/` or `\`, reduced to ASCII
/// alphanumerics, `-` and `_`, and capped in length. The extension is kept
/// when it names the declared format, otherwise the format's canonical one
/// is used.
pub fn stored_filename(epoch_millis: i64, original_name: &str, declared: ImageKind) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (base, None),
    };

    let mut clean: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_BASENAME_LEN)
        .collect();
    if clean.trim_matches('_').is_empty() {
        clean = "avatar".into();
    }

    let ext = match ext {
        Some(ext) if ImageKind::from_extension(&format!(".{ext}")) == Some(declared) => {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => declared.extension().to_string(),
    };

    format!("{}_{}{}", epoch_millis, clean, ext)
}

fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}-{}.{}", stem, suffix, ext),
        None => format!("{}-{}", name, suffix),
    }
}

/// Apply the schema, one `;`-separated statement at a time.
pub async fn run_migrations(db: &SqlitePool) -> sqlx::Result<()> {
    let statements = include_str!("../../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

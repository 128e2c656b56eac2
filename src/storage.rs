use crate::db::StorageResult;
use crate::models::{FileRecord, OwnedFile};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

const FILE_COLUMNS: &str = "id, filename, original_name, blob_key, file_url, uploaded_by, \
     expiry_time, download_count, file_size, mime_type, created_at";

/// File metadata. Owner listings and expiry sweeps each have their own index.
#[derive(Clone)]
pub struct FileStorage {
    pool: SqlitePool,
}

impl FileStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_file(&self, file: FileRecord) -> StorageResult<FileRecord> {
        sqlx::query(
            "INSERT INTO files (id, filename, original_name, blob_key, file_url, uploaded_by, \
             expiry_time, download_count, file_size, mime_type, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.filename)
        .bind(&file.original_name)
        .bind(&file.blob_key)
        .bind(&file.file_url)
        .bind(&file.uploaded_by)
        .bind(file.expiry_time)
        .bind(file.download_count)
        .bind(file.file_size)
        .bind(&file.mime_type)
        .bind(file.created_at)
        .execute(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn get_file(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE id = ?",
            FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn get_file_with_owner(&self, id: &str) -> StorageResult<Option<OwnedFile>> {
        let file = sqlx::query_as::<_, OwnedFile>(
            "SELECT f.id, f.filename, f.original_name, f.blob_key, f.file_url, f.uploaded_by, \
             f.expiry_time, f.download_count, f.file_size, f.mime_type, f.created_at, \
             u.name AS owner_name \
             FROM files f JOIN users u ON u.id = f.uploaded_by \
             WHERE f.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Newest first.
    pub async fn get_user_files(&self, user_id: &str) -> StorageResult<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE uploaded_by = ? ORDER BY created_at DESC, id DESC",
            FILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// Bump the counter in a single statement and return the row as written.
    ///
    /// `None` means the row is gone, e.g. the reaper removed it after the caller looked it up.
    pub async fn record_download(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files SET download_count = download_count + 1 WHERE id = ? RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Records whose expiry lies strictly before `as_of`, oldest expiry first.
    pub async fn get_expired_files(&self, as_of: DateTime<Utc>) -> StorageResult<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE expiry_time < ? ORDER BY expiry_time ASC",
            FILE_COLUMNS
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// Returns whether a row was removed.
    pub async fn delete_file(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::StoredBlob;
    use crate::db;
    use crate::user_models::User;
    use crate::user_storage::UserStorage;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        files: FileStorage,
        users: UserStorage,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("files.db").display());
        let pool = db::connect(&url, 4).await.unwrap();
        Fixture {
            files: FileStorage::new(pool.clone()),
            users: UserStorage::new(pool),
            _dir: dir,
        }
    }

    async fn user(fx: &Fixture, name: &str) -> User {
        let email = format!("{}@example.com", name.to_lowercase());
        fx.users
            .create_user(User::new(name.into(), email, "hash".into()))
            .await
            .unwrap()
    }

    fn file(owner: &User, name: &str, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord::new(
            owner.id.clone(),
            name.into(),
            "text/plain".into(),
            3,
            StoredBlob {
                key: format!("file-sharing/{}", name),
                url: format!("http://localhost/blobs/file-sharing/{}", name),
            },
            created_at,
        )
    }

    #[tokio::test]
    async fn stores_and_reads_back_a_record() {
        let fx = fixture().await;
        let ada = user(&fx, "Ada").await;
        let created = fx.files.add_file(file(&ada, "a.txt", Utc::now())).await.unwrap();

        let loaded = fx.files.get_file(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.original_name, "a.txt");
        assert_eq!(loaded.expiry_time, created.expiry_time);
        assert_eq!(loaded.download_count, 0);

        let owned = fx.files.get_file_with_owner(&created.id).await.unwrap().unwrap();
        assert_eq!(owned.owner_name, "Ada");
        assert_eq!(owned.file.id, created.id);

        assert!(fx.files.get_file("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_records_for_unknown_owners() {
        let fx = fixture().await;
        let ghost = User::new("Ghost".into(), "ghost@example.com".into(), "h".into());
        assert!(fx.files.add_file(file(&ghost, "g.txt", Utc::now())).await.is_err());
    }

    #[tokio::test]
    async fn lists_only_the_owners_files_newest_first() {
        let fx = fixture().await;
        let ada = user(&fx, "Ada").await;
        let bob = user(&fx, "Bob").await;
        let base = Utc::now();

        fx.files.add_file(file(&ada, "old.txt", base - Duration::minutes(10))).await.unwrap();
        fx.files.add_file(file(&ada, "new.txt", base)).await.unwrap();
        fx.files.add_file(file(&ada, "mid.txt", base - Duration::minutes(5))).await.unwrap();
        fx.files.add_file(file(&bob, "bob.txt", base)).await.unwrap();

        let names: Vec<String> = fx
            .files
            .get_user_files(&ada.id)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.original_name)
            .collect();
        assert_eq!(names, vec!["new.txt", "mid.txt", "old.txt"]);

        let bobs = fx.files.get_user_files(&bob.id).await.unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].original_name, "bob.txt");
    }

    #[tokio::test]
    async fn record_download_increments_and_returns_new_count() {
        let fx = fixture().await;
        let ada = user(&fx, "Ada").await;
        let created = fx.files.add_file(file(&ada, "a.txt", Utc::now())).await.unwrap();

        let first = fx.files.record_download(&created.id).await.unwrap().unwrap();
        let second = fx.files.record_download(&created.id).await.unwrap().unwrap();
        assert_eq!(first.download_count, 1);
        assert_eq!(second.download_count, 2);

        assert!(fx.files.record_download("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_query_uses_a_strict_threshold() {
        let fx = fixture().await;
        let ada = user(&fx, "Ada").await;
        let now = Utc::now();

        let stale = fx
            .files
            .add_file(file(&ada, "stale.txt", now - Duration::hours(2)))
            .await
            .unwrap();
        let fresh = fx.files.add_file(file(&ada, "fresh.txt", now)).await.unwrap();

        let expired = fx.files.get_expired_files(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        // exactly at expiry is not yet "before" the threshold
        let at_expiry = fx.files.get_expired_files(fresh.expiry_time).await.unwrap();
        assert_eq!(at_expiry.len(), 1);

        let later = fresh.expiry_time + Duration::seconds(1);
        assert_eq!(fx.files.get_expired_files(later).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went_away() {
        let fx = fixture().await;
        let ada = user(&fx, "Ada").await;
        let created = fx.files.add_file(file(&ada, "a.txt", Utc::now())).await.unwrap();

        assert!(fx.files.delete_file(&created.id).await.unwrap());
        assert!(!fx.files.delete_file(&created.id).await.unwrap());
        assert!(fx.files.get_file(&created.id).await.unwrap().is_none());
    }
}

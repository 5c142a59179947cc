use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Creates the user on first login, refreshes the profile afterwards.
    /// An admin profile promotes the account; a non-admin one never demotes it.
    async fn upsert_google_user(&self, profile: OAuthProfile) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    /// Newest first.
    async fn list_threads(&self, offset: i64, limit: i64) -> RepoResult<Vec<Thread>>;
    async fn count_threads(&self) -> RepoResult<i64>;
    async fn get_thread(&self, id: Id) -> RepoResult<Thread>;
    async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread>;
    async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread>;
    /// Hard delete; the thread's comments go with it.
    async fn delete_thread(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Number of live top-level comments in the thread.
    async fn count_top_level(&self, thread_id: Id) -> RepoResult<i64>;
    /// Every comment reachable from the thread's live top-level comments,
    /// deleted replies included, ordered by (path, created_at) so that a
    /// parent always precedes its children.
    async fn comment_rows(&self, thread_id: Id) -> RepoResult<Vec<CommentRow>>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment>;
    async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment>;
    async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment>;
}

pub trait Repo: UserRepo + ThreadRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + ThreadRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Serialize, Deserialize};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::path::{PathBuf, Path};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users:    HashMap<Id, User>,
        threads:  HashMap<Id, Thread>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn author(&self, user_id: Id) -> Option<UserSummary> {
            self.users.get(&user_id).map(UserSummary::from)
        }

        fn thread_view(&self, t: &Thread) -> Thread {
            Thread { user: self.author(t.user_id), ..t.clone() }
        }

        fn row(&self, c: &Comment, depth: i32, path: Vec<Id>) -> CommentRow {
            let author = self.users.get(&c.user_id);
            CommentRow {
                id: c.id,
                thread_id: c.thread_id,
                user_id: c.user_id,
                parent_id: c.parent_id,
                content: c.content.clone(),
                attachments: c.attachments.clone(),
                is_deleted: c.is_deleted,
                created_at: c.created_at,
                updated_at: c.updated_at,
                author_id: author.map(|u| u.id),
                author_name: author.map(|u| u.name.clone()),
                author_email: author.and_then(|u| u.email.clone()),
                author_picture: author.and_then(|u| u.picture.clone()),
                depth,
                path,
            }
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("DISCUSS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("DISCUSS_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("no snapshot at '{}': {e}; starting empty", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let bytes = match self.state.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(_) => return,
            };
            if let Ok(bytes) = bytes {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path.as_path(), bytes) {
                    tracing::error!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        /// Snapshot-backed store rooted at `DISCUSS_DATA_DIR` (default `data/`).
        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(snapshot_path)),
            }
        }

        /// Purely in-memory store; nothing touches the filesystem.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn upsert_google_user(&self, profile: OAuthProfile) -> RepoResult<User> {
            let mut s = self.write()?;
            let existing = s.users.values().find(|u| u.google_id == profile.google_id).map(|u| u.id);
            let user = match existing {
                Some(id) => {
                    let u = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
                    u.name = profile.name;
                    u.email = profile.email;
                    u.picture = profile.picture;
                    if profile.admin { u.role = "admin".into(); }
                    u.clone()
                }
                None => {
                    let id = s.next_id();
                    let u = User {
                        id,
                        google_id: profile.google_id,
                        name: profile.name,
                        email: profile.email,
                        picture: profile.picture,
                        role: if profile.admin { "admin".into() } else { "user".into() },
                        created_at: Utc::now(),
                    };
                    s.users.insert(id, u.clone());
                    u
                }
            };
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn list_threads(&self, offset: i64, limit: i64) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.threads.values().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v.into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .map(|t| s.thread_view(t))
                .collect())
        }

        async fn count_threads(&self) -> RepoResult<i64> {
            Ok(self.read()?.threads.len() as i64)
        }

        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            let s = self.read()?;
            s.threads.get(&id).map(|t| s.thread_view(t)).ok_or(RepoError::NotFound)
        }

        async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            let now = Utc::now();
            let id = s.next_id();
            let thread = Thread {
                id,
                title: new.title,
                content: new.content,
                attachments: new.attachments,
                user_id: author,
                created_at: now,
                updated_at: now,
                user: None,
            };
            s.threads.insert(id, thread.clone());
            let view = s.thread_view(&thread);
            drop(s);
            self.persist();
            Ok(view)
        }

        async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            let thread = s.threads.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title { thread.title = title; }
            if let Some(content) = upd.content { thread.content = content; }
            thread.updated_at = Utc::now();
            let updated = thread.clone();
            let view = s.thread_view(&updated);
            drop(s);
            self.persist();
            Ok(view)
        }

        async fn delete_thread(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.threads.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            // cascade like the parent/thread foreign keys do in Postgres
            let mut doomed: HashSet<Id> = s.comments.values()
                .filter(|c| c.thread_id == id)
                .map(|c| c.id)
                .collect();
            loop {
                let more: Vec<Id> = s.comments.values()
                    .filter(|c| !doomed.contains(&c.id))
                    .filter(|c| c.parent_id.is_some_and(|p| doomed.contains(&p)))
                    .map(|c| c.id)
                    .collect();
                if more.is_empty() { break; }
                doomed.extend(more);
            }
            s.comments.retain(|cid, _| !doomed.contains(cid));
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn count_top_level(&self, thread_id: Id) -> RepoResult<i64> {
            let s = self.read()?;
            Ok(s.comments.values()
                .filter(|c| c.thread_id == thread_id && c.parent_id.is_none() && !c.is_deleted)
                .count() as i64)
        }

        async fn comment_rows(&self, thread_id: Id) -> RepoResult<Vec<CommentRow>> {
            let s = self.read()?;
            // children are matched on parent only, exactly like the recursive CTE
            let mut children: HashMap<Id, Vec<&Comment>> = HashMap::new();
            for c in s.comments.values() {
                if let Some(parent) = c.parent_id {
                    children.entry(parent).or_default().push(c);
                }
            }
            let mut queue: VecDeque<(&Comment, i32, Vec<Id>)> = s.comments.values()
                .filter(|c| c.thread_id == thread_id && c.parent_id.is_none() && !c.is_deleted)
                .map(|c| (c, 0, vec![c.id]))
                .collect();
            let mut rows = Vec::new();
            while let Some((c, depth, path)) = queue.pop_front() {
                for &child in children.get(&c.id).into_iter().flatten() {
                    let mut child_path = path.clone();
                    child_path.push(child.id);
                    queue.push_back((child, depth + 1, child_path));
                }
                rows.push(s.row(c, depth, path));
            }
            rows.sort_by(|a, b| a.path.cmp(&b.path).then(a.created_at.cmp(&b.created_at)));
            Ok(rows)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            self.read()?.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.threads.contains_key(&thread_id) { return Err(RepoError::NotFound); }
            if let Some(parent) = new.parent_id {
                if !s.comments.contains_key(&parent) { return Err(RepoError::NotFound); }
            }
            let now = Utc::now();
            let id = s.next_id();
            let comment = Comment {
                id,
                thread_id,
                user_id: author,
                parent_id: new.parent_id,
                content: new.content,
                attachments: new.attachments,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment> {
            let mut s = self.write()?;
            let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            c.content = content;
            c.updated_at = Utc::now();
            let updated = c.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment> {
            let mut s = self.write()?;
            let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            c.is_deleted = true;
            c.updated_at = Utc::now();
            let updated = c.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};

    impl From<sqlx::Error> for RepoError {
        fn from(e: sqlx::Error) -> Self {
            match e {
                sqlx::Error::RowNotFound => RepoError::NotFound,
                sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
                other => {
                    tracing::error!(error = %other, "postgres query failed");
                    RepoError::Internal(other.to_string())
                }
            }
        }
    }

    const THREAD_SELECT: &str = r#"
        SELECT t.id, t.title, t.content, t.attachments, t.user_id, t.created_at, t.updated_at,
               u.id AS author_id, u.name AS author_name, u.email AS author_email, u.picture AS author_picture
        FROM threads t
        LEFT JOIN users u ON u.id = t.user_id
    "#;

    const COMMENT_COLUMNS: &str =
        "id, thread_id, user_id, parent_id, content, attachments, is_deleted, created_at, updated_at";

    // Only the seed is filtered on is_deleted; replies are expanded whatever their state.
    const COMMENT_TREE: &str = r#"
        WITH RECURSIVE comment_tree AS (
            SELECT c.id, c.thread_id, c.user_id, c.parent_id, c.content, c.attachments,
                   c.is_deleted, c.created_at, c.updated_at,
                   0 AS depth, ARRAY[c.id] AS path
            FROM comments c
            WHERE c.thread_id = $1
              AND c.parent_id IS NULL
              AND c.is_deleted = FALSE

            UNION ALL

            SELECT c.id, c.thread_id, c.user_id, c.parent_id, c.content, c.attachments,
                   c.is_deleted, c.created_at, c.updated_at,
                   ct.depth + 1, ct.path || c.id
            FROM comments c
            INNER JOIN comment_tree ct ON c.parent_id = ct.id
        )
        SELECT ct.id, ct.thread_id, ct.user_id, ct.parent_id, ct.content, ct.attachments,
               ct.is_deleted, ct.created_at, ct.updated_at,
               u.id AS author_id, u.name AS author_name, u.email AS author_email, u.picture AS author_picture,
               ct.depth, ct.path
        FROM comment_tree ct
        LEFT JOIN users u ON u.id = ct.user_id
        ORDER BY ct.path, ct.created_at ASC
    "#;

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn upsert_google_user(&self, profile: OAuthProfile) -> RepoResult<User> {
            let role = if profile.admin { "admin" } else { "user" };
            let user = sqlx::query_as::<_, User>(r#"
                INSERT INTO users (google_id, name, email, picture, role)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (google_id) DO UPDATE
                   SET name = EXCLUDED.name,
                       email = EXCLUDED.email,
                       picture = EXCLUDED.picture,
                       role = CASE WHEN EXCLUDED.role = 'admin' THEN 'admin' ELSE users.role END
                RETURNING id, google_id, name, email, picture, role, created_at
            "#)
                .bind(&profile.google_id)
                .bind(&profile.name)
                .bind(profile.email.as_ref())
                .bind(profile.picture.as_ref())
                .bind(role)
                .fetch_one(&self.pool).await?;
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let user = sqlx::query_as::<_, User>(
                "SELECT id, google_id, name, email, picture, role, created_at FROM users WHERE id = $1"
            ).bind(id).fetch_one(&self.pool).await?;
            Ok(user)
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn list_threads(&self, offset: i64, limit: i64) -> RepoResult<Vec<Thread>> {
            let sql = format!("{THREAD_SELECT} ORDER BY t.created_at DESC, t.id DESC LIMIT $1 OFFSET $2");
            let rows = sqlx::query_as::<_, ThreadRow>(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool).await?;
            Ok(rows.into_iter().map(Thread::from).collect())
        }

        async fn count_threads(&self) -> RepoResult<i64> {
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM threads")
                .fetch_one(&self.pool).await?;
            Ok(n)
        }

        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            let sql = format!("{THREAD_SELECT} WHERE t.id = $1");
            let row = sqlx::query_as::<_, ThreadRow>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await?;
            Ok(row.into())
        }

        async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread> {
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO threads (title, content, attachments, user_id) VALUES ($1, $2, $3, $4) RETURNING id"
            )
                .bind(&new.title)
                .bind(&new.content)
                .bind(Json(&new.attachments))
                .bind(author)
                .fetch_one(&self.pool).await?;
            self.get_thread(id).await
        }

        async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread> {
            let id = sqlx::query_scalar::<_, Id>(
                "UPDATE threads SET title = COALESCE($2, title), content = COALESCE($3, content), updated_at = now() WHERE id = $1 RETURNING id"
            )
                .bind(id)
                .bind(upd.title.as_ref())
                .bind(upd.content.as_ref())
                .fetch_one(&self.pool).await?;
            self.get_thread(id).await
        }

        async fn delete_thread(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM threads WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn count_top_level(&self, thread_id: Id) -> RepoResult<i64> {
            let n = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM comments WHERE thread_id = $1 AND parent_id IS NULL AND is_deleted = FALSE"
            ).bind(thread_id).fetch_one(&self.pool).await?;
            Ok(n)
        }

        async fn comment_rows(&self, thread_id: Id) -> RepoResult<Vec<CommentRow>> {
            let rows = sqlx::query_as::<_, CommentRow>(COMMENT_TREE)
                .bind(thread_id)
                .fetch_all(&self.pool).await?;
            Ok(rows)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
            let c = sqlx::query_as::<_, Comment>(&sql).bind(id).fetch_one(&self.pool).await?;
            Ok(c)
        }

        async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment> {
            let sql = format!(
                "INSERT INTO comments (thread_id, user_id, parent_id, content, attachments) VALUES ($1, $2, $3, $4, $5) RETURNING {COMMENT_COLUMNS}"
            );
            let c = sqlx::query_as::<_, Comment>(&sql)
                .bind(thread_id)
                .bind(author)
                .bind(new.parent_id)
                .bind(&new.content)
                .bind(Json(&new.attachments))
                .fetch_one(&self.pool).await?;
            Ok(c)
        }

        async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment> {
            let sql = format!(
                "UPDATE comments SET content = $2, updated_at = now() WHERE id = $1 RETURNING {COMMENT_COLUMNS}"
            );
            let c = sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .bind(&content)
                .fetch_one(&self.pool).await?;
            Ok(c)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment> {
            let sql = format!(
                "UPDATE comments SET is_deleted = TRUE, updated_at = now() WHERE id = $1 RETURNING {COMMENT_COLUMNS}"
            );
            let c = sqlx::query_as::<_, Comment>(&sql).bind(id).fetch_one(&self.pool).await?;
            Ok(c)
        }
    }
}

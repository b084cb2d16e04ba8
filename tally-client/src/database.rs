use crate::domain::{Client, Project, RelatedData, Tag, Task, TimeEntry, Workspace};
use crate::error::EngineError;
use crate::session::Session;
use crate::settings::{Proxy, StoredSettings};
use futures_util::TryStreamExt;
use sql_builder::SqlBuilder;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use tally_common::domain::UpdateChannel;
use tracing::debug;
use uuid::Uuid;

const KV_API_TOKEN: &str = "api_token";
const KV_UPDATE_CHANNEL: &str = "update_channel";

// Row wrappers: the store schema is private, these map it onto the
// domain structs. Loaded rows come out clean (not dirty).

pub struct DbWorkspace(pub Workspace);

impl<'r> FromRow<'r, SqliteRow> for DbWorkspace {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self(Workspace {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            name: row.try_get("name")?,
            premium: row.try_get("premium")?,
            admin: row.try_get("admin")?,
            only_admins_may_create_projects: row.try_get("only_admins_may_create_projects")?,
            dirty: false,
        }))
    }
}

pub struct DbClient(pub Client);

impl<'r> FromRow<'r, SqliteRow> for DbClient {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self(Client {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            guid: row
                .try_get("guid")
                .map(|x: Option<&str>| x.map(|g| Uuid::parse_str(g).unwrap()))?,
            wid: row.try_get::<i64, _>("wid")? as u64,
            name: row.try_get("name")?,
            dirty: false,
        }))
    }
}

pub struct DbProject(pub Project);

impl<'r> FromRow<'r, SqliteRow> for DbProject {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self(Project {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            guid: row
                .try_get("guid")
                .map(|x: Option<&str>| x.map(|g| Uuid::parse_str(g).unwrap()))?,
            wid: row.try_get::<i64, _>("wid")? as u64,
            cid: row
                .try_get("cid")
                .map(|x: Option<i64>| x.map(|v| v as u64))?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            active: row.try_get("active")?,
            billable: row.try_get("billable")?,
            dirty: false,
        }))
    }
}

pub struct DbTask(pub Task);

impl<'r> FromRow<'r, SqliteRow> for DbTask {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self(Task {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            wid: row.try_get::<i64, _>("wid")? as u64,
            pid: row
                .try_get("pid")
                .map(|x: Option<i64>| x.map(|v| v as u64))?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            dirty: false,
        }))
    }
}

pub struct DbTag(pub Tag);

impl<'r> FromRow<'r, SqliteRow> for DbTag {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self(Tag {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            guid: row
                .try_get("guid")
                .map(|x: Option<&str>| x.map(|g| Uuid::parse_str(g).unwrap()))?,
            wid: row.try_get::<i64, _>("wid")? as u64,
            name: row.try_get("name")?,
            dirty: false,
        }))
    }
}

pub struct DbTimeEntry(pub TimeEntry);

impl<'r> FromRow<'r, SqliteRow> for DbTimeEntry {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let tags: String = row.try_get("tags")?;
        Ok(Self(TimeEntry {
            local_id: row.try_get("local_id")?,
            id: row.try_get::<i64, _>("id")? as u64,
            guid: row
                .try_get("guid")
                .map(|x: &str| Uuid::parse_str(x).unwrap())?,
            wid: row.try_get::<i64, _>("wid")? as u64,
            pid: row
                .try_get("pid")
                .map(|x: Option<i64>| x.map(|v| v as u64))?,
            tid: row
                .try_get("tid")
                .map(|x: Option<i64>| x.map(|v| v as u64))?,
            description: row.try_get("description")?,
            tags: tags
                .split(';')
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
            billable: row.try_get("billable")?,
            start: row.try_get("start")?,
            stop: row.try_get("stop")?,
            duration_in_seconds: row.try_get("duration")?,
            created_with: row.try_get("created_with")?,
            ui_modified_at: row.try_get::<i64, _>("ui_modified_at")? as u64,
            server_deleted_at: row.try_get("server_deleted_at")?,
            deleted_at: row.try_get("deleted_at")?,
            dirty: false,
            confirmed_deleted: false,
            validation_error: None,
        }))
    }
}

pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        debug!("opening database at {:?}", path);
        if !path.exists() {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs_err::create_dir_all(dir)
                        .map_err(|e| EngineError::Internal(e.to_string()))?;
                }
            }
        }
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or_default())
            .map_err(EngineError::Store)?
            .create_if_missing(true);
        // An in-memory database exists per connection; the pool must
        // not hand out a second one.
        let mut pool_options = SqlitePoolOptions::new();
        if path.to_str().map(|p| p.contains(":memory:")).unwrap_or(false) {
            pool_options = pool_options.max_connections(1);
        }
        let pool = pool_options.connect_with(options).await?;

        Self::setup_db(&pool).await?;

        Ok(Self { pool })
    }

    async fn setup_db(pool: &SqlitePool) -> Result<(), EngineError> {
        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(())
    }

    // Key/value corner.

    async fn kv_get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let row: Option<(String,)> = sqlx::query_as("select value from kv where key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        sqlx::query("insert into kv(key, value) values(?1, ?2) on conflict(key) do update set value = ?2")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn current_api_token(&self) -> Result<String, EngineError> {
        Ok(self.kv_get(KV_API_TOKEN).await?.unwrap_or_default())
    }

    pub async fn set_current_api_token(&self, token: &str) -> Result<(), EngineError> {
        self.kv_set(KV_API_TOKEN, token).await
    }

    pub async fn clear_current_api_token(&self) -> Result<(), EngineError> {
        sqlx::query("delete from kv where key = ?1")
            .bind(KV_API_TOKEN)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_update_channel(&self) -> Result<UpdateChannel, EngineError> {
        match self.kv_get(KV_UPDATE_CHANNEL).await? {
            Some(value) => UpdateChannel::from_str(&value).map_err(EngineError::Parse),
            None => Ok(UpdateChannel::default()),
        }
    }

    pub async fn save_update_channel(&self, channel: UpdateChannel) -> Result<(), EngineError> {
        self.kv_set(KV_UPDATE_CHANNEL, channel.as_str()).await
    }

    // Settings.

    pub async fn load_settings(&self) -> Result<StoredSettings, EngineError> {
        let row = sqlx::query("select * from settings where id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoredSettings {
            use_proxy: row.try_get("use_proxy")?,
            proxy: Proxy {
                host: row.try_get("proxy_host")?,
                port: row.try_get::<i64, _>("proxy_port")? as u16,
                username: row.try_get("proxy_username")?,
                password: row.try_get("proxy_password")?,
            },
            use_idle_detection: row.try_get("use_idle_detection")?,
        })
    }

    pub async fn save_settings(&self, settings: &StoredSettings) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            update settings set
                use_proxy = ?1,
                proxy_host = ?2,
                proxy_port = ?3,
                proxy_username = ?4,
                proxy_password = ?5,
                use_idle_detection = ?6
            where id = 1
            "#,
        )
        .bind(settings.use_proxy)
        .bind(settings.proxy.host.as_str())
        .bind(settings.proxy.port as i64)
        .bind(settings.proxy.username.as_str())
        .bind(settings.proxy.password.as_str())
        .bind(settings.use_idle_detection)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // User + related graph.

    fn apply_user_row(session: &mut Session, row: &SqliteRow) -> sqlx::Result<()> {
        session.local_id = row.try_get("local_id")?;
        session.id = row.try_get::<i64, _>("id")? as u64;
        session.api_token = row.try_get("api_token")?;
        session.email = row.try_get("email")?;
        session.fullname = row.try_get("fullname")?;
        session.default_wid = row.try_get::<i64, _>("default_wid")? as u64;
        session.since = row.try_get::<i64, _>("since")? as u64;
        session.record_timeline = row.try_get("record_timeline")?;
        session.store_start_and_stop_time = row.try_get("store_start_and_stop_time")?;
        session.dirty = false;
        Ok(())
    }

    /// Populate `session` with the user owning the stored api token.
    /// Returns false when nobody is logged in.
    pub async fn load_current_user(
        &self,
        session: &mut Session,
        with_related: bool,
    ) -> Result<bool, EngineError> {
        let token = self.current_api_token().await?;
        if token.is_empty() {
            return Ok(false);
        }
        let row = sqlx::query("select * from users where api_token = ?1")
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                Self::apply_user_row(session, &row)?;
                if with_related {
                    self.load_related(session).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn load_user_by_id(
        &self,
        id: u64,
        session: &mut Session,
        with_related: bool,
    ) -> Result<bool, EngineError> {
        let row = sqlx::query("select * from users where id = ?1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                Self::apply_user_row(session, &row)?;
                if with_related {
                    self.load_related(session).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_related(&self, session: &mut Session) -> Result<(), EngineError> {
        let uid = session.local_id;
        let mut related = RelatedData::default();

        related.workspaces = sqlx::query_as("select * from workspaces where user_local_id = ?1")
            .bind(uid)
            .fetch(&self.pool)
            .map_ok(|DbWorkspace(w)| w)
            .try_collect()
            .await?;
        related.clients = sqlx::query_as("select * from clients where user_local_id = ?1")
            .bind(uid)
            .fetch(&self.pool)
            .map_ok(|DbClient(c)| c)
            .try_collect()
            .await?;
        related.projects = sqlx::query_as("select * from projects where user_local_id = ?1")
            .bind(uid)
            .fetch(&self.pool)
            .map_ok(|DbProject(p)| p)
            .try_collect()
            .await?;
        related.tasks = sqlx::query_as("select * from tasks where user_local_id = ?1")
            .bind(uid)
            .fetch(&self.pool)
            .map_ok(|DbTask(t)| t)
            .try_collect()
            .await?;
        related.tags = sqlx::query_as("select * from tags where user_local_id = ?1")
            .bind(uid)
            .fetch(&self.pool)
            .map_ok(|DbTag(t)| t)
            .try_collect()
            .await?;
        related.time_entries =
            sqlx::query_as("select * from time_entries where user_local_id = ?1 order by start desc")
                .bind(uid)
                .fetch(&self.pool)
                .map_ok(|DbTimeEntry(te)| te)
                .try_collect()
                .await?;

        session.related = related;
        Ok(())
    }

    /// Persist the session in one transaction: the user row, every
    /// dirty entity, and the removal of server-confirmed deletes.
    /// Dirty flags are cleared only after the commit lands.
    pub async fn save_user(
        &self,
        session: &mut Session,
        with_related: bool,
    ) -> Result<(), EngineError> {
        debug!("saving user to database");
        let mut tx = self.pool.begin().await?;

        if session.local_id == 0 {
            sqlx::query(
                r#"
                insert into users(
                    id, api_token, email, fullname, default_wid, since,
                    record_timeline, store_start_and_stop_time
                ) values(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                on conflict(id) do update set
                    api_token = ?2, email = ?3, fullname = ?4, default_wid = ?5,
                    since = ?6, record_timeline = ?7, store_start_and_stop_time = ?8
                "#,
            )
            .bind(session.id as i64)
            .bind(session.api_token.as_str())
            .bind(session.email.as_str())
            .bind(session.fullname.as_str())
            .bind(session.default_wid as i64)
            .bind(session.since as i64)
            .bind(session.record_timeline)
            .bind(session.store_start_and_stop_time)
            .execute(&mut *tx)
            .await?;
            // last_insert_rowid is unreliable after an upsert-update;
            // resolve the local id by the unique remote id instead.
            let (local_id,): (i64,) = sqlx::query_as("select local_id from users where id = ?1")
                .bind(session.id as i64)
                .fetch_one(&mut *tx)
                .await?;
            session.local_id = local_id;
        } else {
            sqlx::query(
                r#"
                update users set
                    id = ?2, api_token = ?3, email = ?4, fullname = ?5,
                    default_wid = ?6, since = ?7, record_timeline = ?8,
                    store_start_and_stop_time = ?9
                where local_id = ?1
                "#,
            )
            .bind(session.local_id)
            .bind(session.id as i64)
            .bind(session.api_token.as_str())
            .bind(session.email.as_str())
            .bind(session.fullname.as_str())
            .bind(session.default_wid as i64)
            .bind(session.since as i64)
            .bind(session.record_timeline)
            .bind(session.store_start_and_stop_time)
            .execute(&mut *tx)
            .await?;
        }

        if with_related {
            let uid = session.local_id;
            for ws in &mut session.related.workspaces {
                if ws.dirty {
                    Self::save_workspace(&mut tx, uid, ws).await?;
                }
            }
            for client in &mut session.related.clients {
                if client.dirty {
                    Self::save_client(&mut tx, uid, client).await?;
                }
            }
            for project in &mut session.related.projects {
                if project.dirty {
                    Self::save_project(&mut tx, uid, project).await?;
                }
            }
            for task in &mut session.related.tasks {
                if task.dirty {
                    Self::save_task(&mut tx, uid, task).await?;
                }
            }
            for tag in &mut session.related.tags {
                if tag.dirty {
                    Self::save_tag(&mut tx, uid, tag).await?;
                }
            }
            for te in &mut session.related.time_entries {
                if te.confirmed_deleted {
                    if te.local_id != 0 {
                        sqlx::query("delete from time_entries where local_id = ?1")
                            .bind(te.local_id)
                            .execute(&mut *tx)
                            .await?;
                    }
                } else if te.dirty {
                    Self::save_time_entry(&mut tx, uid, te).await?;
                }
            }
        }

        tx.commit().await?;

        session.dirty = false;
        if with_related {
            let related = &mut session.related;
            related.workspaces.iter_mut().for_each(|w| w.dirty = false);
            related.clients.iter_mut().for_each(|c| c.dirty = false);
            related.projects.iter_mut().for_each(|p| p.dirty = false);
            related.tasks.iter_mut().for_each(|t| t.dirty = false);
            related.tags.iter_mut().for_each(|t| t.dirty = false);
            related.time_entries.retain(|te| !te.confirmed_deleted);
            related
                .time_entries
                .iter_mut()
                .for_each(|te| te.dirty = false);
        }
        Ok(())
    }

    async fn save_workspace(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        ws: &mut Workspace,
    ) -> sqlx::Result<()> {
        if ws.local_id == 0 {
            let res = sqlx::query(
                r#"
                insert into workspaces(user_local_id, id, name, premium, admin, only_admins_may_create_projects)
                values(?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(uid)
            .bind(ws.id as i64)
            .bind(ws.name.as_str())
            .bind(ws.premium)
            .bind(ws.admin)
            .bind(ws.only_admins_may_create_projects)
            .execute(&mut **tx)
            .await?;
            ws.local_id = res.last_insert_rowid();
        } else {
            sqlx::query(
                r#"
                update workspaces set id = ?2, name = ?3, premium = ?4, admin = ?5,
                    only_admins_may_create_projects = ?6
                where local_id = ?1
                "#,
            )
            .bind(ws.local_id)
            .bind(ws.id as i64)
            .bind(ws.name.as_str())
            .bind(ws.premium)
            .bind(ws.admin)
            .bind(ws.only_admins_may_create_projects)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn save_client(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        client: &mut Client,
    ) -> sqlx::Result<()> {
        if client.local_id == 0 {
            let res = sqlx::query(
                "insert into clients(user_local_id, id, guid, wid, name) values(?1, ?2, ?3, ?4, ?5)",
            )
            .bind(uid)
            .bind(client.id as i64)
            .bind(client.guid.map(|g| g.to_string()))
            .bind(client.wid as i64)
            .bind(client.name.as_str())
            .execute(&mut **tx)
            .await?;
            client.local_id = res.last_insert_rowid();
        } else {
            sqlx::query("update clients set id = ?2, guid = ?3, wid = ?4, name = ?5 where local_id = ?1")
                .bind(client.local_id)
                .bind(client.id as i64)
                .bind(client.guid.map(|g| g.to_string()))
                .bind(client.wid as i64)
                .bind(client.name.as_str())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn save_project(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        project: &mut Project,
    ) -> sqlx::Result<()> {
        if project.local_id == 0 {
            let res = sqlx::query(
                r#"
                insert into projects(user_local_id, id, guid, wid, cid, name, color, active, billable)
                values(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(uid)
            .bind(project.id as i64)
            .bind(project.guid.map(|g| g.to_string()))
            .bind(project.wid as i64)
            .bind(project.cid.map(|v| v as i64))
            .bind(project.name.as_str())
            .bind(project.color.as_str())
            .bind(project.active)
            .bind(project.billable)
            .execute(&mut **tx)
            .await?;
            project.local_id = res.last_insert_rowid();
        } else {
            sqlx::query(
                r#"
                update projects set id = ?2, guid = ?3, wid = ?4, cid = ?5, name = ?6,
                    color = ?7, active = ?8, billable = ?9
                where local_id = ?1
                "#,
            )
            .bind(project.local_id)
            .bind(project.id as i64)
            .bind(project.guid.map(|g| g.to_string()))
            .bind(project.wid as i64)
            .bind(project.cid.map(|v| v as i64))
            .bind(project.name.as_str())
            .bind(project.color.as_str())
            .bind(project.active)
            .bind(project.billable)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn save_task(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        task: &mut Task,
    ) -> sqlx::Result<()> {
        if task.local_id == 0 {
            let res = sqlx::query(
                "insert into tasks(user_local_id, id, wid, pid, name, active) values(?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(uid)
            .bind(task.id as i64)
            .bind(task.wid as i64)
            .bind(task.pid.map(|v| v as i64))
            .bind(task.name.as_str())
            .bind(task.active)
            .execute(&mut **tx)
            .await?;
            task.local_id = res.last_insert_rowid();
        } else {
            sqlx::query(
                "update tasks set id = ?2, wid = ?3, pid = ?4, name = ?5, active = ?6 where local_id = ?1",
            )
            .bind(task.local_id)
            .bind(task.id as i64)
            .bind(task.wid as i64)
            .bind(task.pid.map(|v| v as i64))
            .bind(task.name.as_str())
            .bind(task.active)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn save_tag(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        tag: &mut Tag,
    ) -> sqlx::Result<()> {
        if tag.local_id == 0 {
            let res = sqlx::query(
                "insert into tags(user_local_id, id, guid, wid, name) values(?1, ?2, ?3, ?4, ?5)",
            )
            .bind(uid)
            .bind(tag.id as i64)
            .bind(tag.guid.map(|g| g.to_string()))
            .bind(tag.wid as i64)
            .bind(tag.name.as_str())
            .execute(&mut **tx)
            .await?;
            tag.local_id = res.last_insert_rowid();
        } else {
            sqlx::query("update tags set id = ?2, guid = ?3, wid = ?4, name = ?5 where local_id = ?1")
                .bind(tag.local_id)
                .bind(tag.id as i64)
                .bind(tag.guid.map(|g| g.to_string()))
                .bind(tag.wid as i64)
                .bind(tag.name.as_str())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn save_time_entry(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        uid: i64,
        te: &mut TimeEntry,
    ) -> sqlx::Result<()> {
        if te.local_id == 0 {
            let res = sqlx::query(
                r#"
                insert into time_entries(
                    user_local_id, id, guid, wid, pid, tid, description, tags,
                    billable, start, stop, duration, created_with,
                    ui_modified_at, server_deleted_at, deleted_at
                ) values(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
            )
            .bind(uid)
            .bind(te.id as i64)
            .bind(te.guid.to_string())
            .bind(te.wid as i64)
            .bind(te.pid.map(|v| v as i64))
            .bind(te.tid.map(|v| v as i64))
            .bind(te.description.as_str())
            .bind(te.tags_string())
            .bind(te.billable)
            .bind(te.start)
            .bind(te.stop)
            .bind(te.duration_in_seconds)
            .bind(te.created_with.as_str())
            .bind(te.ui_modified_at as i64)
            .bind(te.server_deleted_at)
            .bind(te.deleted_at)
            .execute(&mut **tx)
            .await?;
            te.local_id = res.last_insert_rowid();
        } else {
            sqlx::query(
                r#"
                update time_entries set
                    id = ?2, guid = ?3, wid = ?4, pid = ?5, tid = ?6,
                    description = ?7, tags = ?8, billable = ?9, start = ?10,
                    stop = ?11, duration = ?12, created_with = ?13,
                    ui_modified_at = ?14, server_deleted_at = ?15, deleted_at = ?16
                where local_id = ?1
                "#,
            )
            .bind(te.local_id)
            .bind(te.id as i64)
            .bind(te.guid.to_string())
            .bind(te.wid as i64)
            .bind(te.pid.map(|v| v as i64))
            .bind(te.tid.map(|v| v as i64))
            .bind(te.description.as_str())
            .bind(te.tags_string())
            .bind(te.billable)
            .bind(te.start)
            .bind(te.stop)
            .bind(te.duration_in_seconds)
            .bind(te.created_with.as_str())
            .bind(te.ui_modified_at as i64)
            .bind(te.server_deleted_at)
            .bind(te.deleted_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Remove the user row and, with related, the whole graph. Used by
    /// the cache reset.
    pub async fn delete_user(
        &self,
        session: &Session,
        with_related: bool,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        if with_related {
            for table in [
                "workspaces",
                "clients",
                "projects",
                "tasks",
                "tags",
                "time_entries",
            ] {
                sqlx::query(&format!("delete from {table} where user_local_id = ?1"))
                    .bind(session.local_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        sqlx::query("delete from users where local_id = ?1")
            .bind(session.local_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Visible entries straight from the store, newest first. Lets the
    /// CLI list history without hydrating the whole graph.
    pub async fn list_time_entries(
        &self,
        user_local_id: i64,
        search: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TimeEntry>, EngineError> {
        let mut query = SqlBuilder::select_from("time_entries");
        query.field("*").order_desc("start");
        query.and_where_eq("user_local_id", user_local_id);
        query.and_where_is_null("deleted_at");
        query.and_where_is_null("server_deleted_at");
        if !search.is_empty() {
            query.and_where_like_any("description", search);
        }
        if let Some(limit) = limit {
            query.limit(limit);
        }

        let query = query
            .sql()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let res = sqlx::query_as(&query)
            .fetch(&self.pool)
            .map_ok(|DbTimeEntry(te)| te)
            .try_collect()
            .await?;

        Ok(res)
    }
}

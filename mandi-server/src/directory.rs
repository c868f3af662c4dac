//! Group Directory: catalogo dei gruppi con filtri e proiezione dell'ultimo messaggio.

use async_trait::async_trait;
use mandi_core::{new_id, now_timestamp, CreateGroupRequest, Group, GroupFilter, GroupIcon};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{bounded, ChatError, ChatResult};

pub const DEFAULT_FARMING_STYLE: &str = "Conventional";

/// Dati di un gruppo non ancora creato.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub location: String,
    pub crop: String,
    pub farming_style: String,
    pub members_count: i64,
    pub icon: GroupIcon,
}

impl NewGroup {
    pub fn new(name: &str, description: &str, location: &str, crop: &str) -> Self {
        NewGroup {
            name: name.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            crop: crop.to_string(),
            farming_style: DEFAULT_FARMING_STYLE.to_string(),
            members_count: 0,
            icon: GroupIcon::default(),
        }
    }

    pub fn farming_style(mut self, style: &str) -> Self {
        self.farming_style = style.to_string();
        self
    }

    pub fn members_count(mut self, count: i64) -> Self {
        self.members_count = count;
        self
    }

    pub fn icon(mut self, icon: GroupIcon) -> Self {
        self.icon = icon;
        self
    }

    fn validate(&self) -> ChatResult<()> {
        let mut missing = Vec::new();
        for (field, value) in [
            ("name", &self.name),
            ("description", &self.description),
            ("location", &self.location),
            ("crop", &self.crop),
        ] {
            if value.trim().is_empty() {
                missing.push(field);
            }
        }
        if !missing.is_empty() {
            return Err(ChatError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if self.members_count < 0 {
            return Err(ChatError::validation("membersCount must not be negative"));
        }
        Ok(())
    }
}

impl From<CreateGroupRequest> for NewGroup {
    fn from(req: CreateGroupRequest) -> Self {
        NewGroup {
            name: req.name.trim().to_string(),
            description: req.description,
            location: req.location,
            crop: req.crop,
            farming_style: req
                .farming_style
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FARMING_STYLE.to_string()),
            members_count: req.members_count.unwrap_or(0),
            icon: req.icon.unwrap_or_default(),
        }
    }
}

/// I quattro gruppi creati al primo `list` senza filtri su catalogo vuoto.
pub fn starter_groups() -> Vec<NewGroup> {
    vec![
        NewGroup::new(
            "Pune Wheat Farmers",
            "Discussion for wheat growers in Pune region.",
            "Pune",
            "Wheat",
        )
        .members_count(156)
        .icon(GroupIcon::Wheat),
        NewGroup::new(
            "Organic Tomato Punjab",
            "Exclusively for organic tomato cultivation in Punjab.",
            "Punjab",
            "Tomato",
        )
        .farming_style("Organic")
        .members_count(89)
        .icon(GroupIcon::Leaf),
        NewGroup::new(
            "Maharashtra Rice Experts",
            "Expert advice on rice farming in Maharashtra.",
            "Maharashtra",
            "Rice",
        )
        .members_count(210)
        .icon(GroupIcon::Water),
        NewGroup::new(
            "Hydroponics Hub India",
            "National group for hydroponic farming enthusiasts.",
            "National",
            "Various",
        )
        .farming_style("Hydroponic")
        .members_count(45)
        .icon(GroupIcon::Flask),
    ]
}

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Gruppi filtrati (match esatto sui campi presenti), ordinati per `last_message_time` decrescente.
    /// Senza filtri e con catalogo vuoto crea prima i gruppi iniziali.
    async fn list(&self, filter: &GroupFilter) -> ChatResult<Vec<Group>>;

    async fn create(&self, group: NewGroup) -> ChatResult<Group>;

    async fn get(&self, group_id: &str) -> ChatResult<Option<Group>>;

    /// Aggiorna la proiezione dell'ultimo messaggio. Un gruppo mancante viene solo loggato.
    async fn record_activity(&self, group_id: &str, text: &str, at: &str) -> ChatResult<()>;
}

pub struct SqliteGroupDirectory {
    pool: SqlitePool,
    timeout: Duration,
    /// Serializza il controllo "catalogo vuoto" + seeding.
    seed_lock: Mutex<()>,
}

impl SqliteGroupDirectory {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        SqliteGroupDirectory { pool, timeout, seed_lock: Mutex::new(()) }
    }

    /// Crea i gruppi iniziali se il catalogo è vuoto. Restituisce true se ha creato qualcosa.
    async fn seed_if_empty(&self) -> ChatResult<bool> {
        let _guard = self.seed_lock.lock().await;

        let mut tx = bounded(self.timeout, self.pool.begin()).await?;
        let existing: i64 = bounded(
            self.timeout,
            sqlx::query_scalar("SELECT COUNT(*) FROM groups").fetch_one(&mut *tx),
        )
        .await?;
        if existing > 0 {
            return Ok(false);
        }

        // stesso istante per tutti: l'ordine di inserimento fa da tie-break nel listing
        let now = now_timestamp();
        let seeds = starter_groups();
        for g in &seeds {
            bounded(self.timeout, insert_group(g, &new_id(), &now).execute(&mut *tx)).await?;
        }
        bounded(self.timeout, tx.commit()).await?;
        tracing::info!("seeded {} starter groups", seeds.len());
        Ok(true)
    }
}

fn insert_group<'q>(
    g: &'q NewGroup,
    id: &'q str,
    now: &'q str,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(
        r#"
        INSERT INTO groups (id, name, description, location, crop, farming_style,
                            members_count, icon, last_message, last_message_time, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&g.name)
    .bind(&g.description)
    .bind(&g.location)
    .bind(&g.crop)
    .bind(&g.farming_style)
    .bind(g.members_count)
    .bind(g.icon.as_str())
    .bind(now)
    .bind(now)
}

fn group_from_row(row: &SqliteRow) -> ChatResult<Group> {
    let icon: String = row.try_get("icon")?;
    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        crop: row.try_get("crop")?,
        farming_style: row.try_get("farming_style")?,
        members_count: row.try_get("members_count")?,
        icon: GroupIcon::from(icon.as_str()),
        last_message: row.try_get("last_message")?,
        last_message_time: row.try_get("last_message_time")?,
        created_at: row.try_get("created_at")?,
    })
}

const GROUP_COLUMNS: &str = "id, name, description, location, crop, farming_style, members_count, \
                             icon, last_message, last_message_time, created_at";

#[async_trait]
impl GroupDirectory for SqliteGroupDirectory {
    async fn list(&self, filter: &GroupFilter) -> ChatResult<Vec<Group>> {
        let filter = filter.clone().normalized();
        if filter.is_empty() {
            self.seed_if_empty().await?;
        }

        let sql = format!(
            r#"
            SELECT {GROUP_COLUMNS}
            FROM groups
            WHERE (? IS NULL OR location = ?)
              AND (? IS NULL OR crop = ?)
              AND (? IS NULL OR farming_style = ?)
            ORDER BY last_message_time DESC, rowid ASC
            "#
        );
        let rows = bounded(
            self.timeout,
            sqlx::query(&sql)
                .bind(&filter.location)
                .bind(&filter.location)
                .bind(&filter.crop)
                .bind(&filter.crop)
                .bind(&filter.farming_style)
                .bind(&filter.farming_style)
                .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    async fn create(&self, group: NewGroup) -> ChatResult<Group> {
        group.validate()?;
        let id = new_id();
        let now = now_timestamp();
        bounded(self.timeout, insert_group(&group, &id, &now).execute(&self.pool)).await?;
        tracing::info!(group_id = %id, name = %group.name, "group created");

        Ok(Group {
            id,
            name: group.name,
            description: group.description,
            location: group.location,
            crop: group.crop,
            farming_style: group.farming_style,
            members_count: group.members_count,
            icon: group.icon,
            last_message: None,
            last_message_time: now.clone(),
            created_at: now,
        })
    }

    async fn get(&self, group_id: &str) -> ChatResult<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?");
        let row = bounded(
            self.timeout,
            sqlx::query(&sql).bind(group_id).fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn record_activity(&self, group_id: &str, text: &str, at: &str) -> ChatResult<()> {
        let res = bounded(
            self.timeout,
            sqlx::query("UPDATE groups SET last_message = ?, last_message_time = ? WHERE id = ?")
                .bind(text)
                .bind(at)
                .bind(group_id)
                .execute(&self.pool),
        )
        .await?;
        if res.rows_affected() == 0 {
            tracing::warn!(group_id = %group_id, "record_activity on missing group ignored");
        }
        Ok(())
    }
}

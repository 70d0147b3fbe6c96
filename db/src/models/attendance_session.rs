use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, QueryFilter};

/// A time-boxed check-in window opened by a lecturer at a physical location.
///
/// The session's status is never stored: `Active`, `Expired` and `Archived`
/// are derived from `expires_at` and `archived_at` at read time.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub owner_id: i64,
    pub class_id: i64,
    /// Six-digit numeric check-in code. Not globally unique; uniqueness only
    /// matters among sessions that are simultaneously active.
    pub code: String,
    pub anchor_lat: f64,
    pub anchor_lon: f64,
    pub duration_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Derived lifecycle state of a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Archived,
}

impl Model {
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.archived_at.is_some() {
            SessionStatus::Archived
        } else if self.expires_at > now {
            SessionStatus::Active
        } else {
            SessionStatus::Expired
        }
    }

    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == SessionStatus::Active
    }

    /// Milliseconds until expiry, or `-1` once `now >= expires_at`.
    pub fn time_remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        let remaining = (self.expires_at - now).num_milliseconds();
        if remaining > 0 { remaining } else { -1 }
    }

    /// Resolves a submitted code to the session currently accepting it.
    ///
    /// The `expires_at > now` filter is what makes a non-unique code usable:
    /// terminated sessions have their expiry forced to the termination
    /// instant, so they can never shadow a live one.
    pub async fn find_active_by_code<C>(
        db: &C,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::Code.eq(code))
            .filter(Column::ExpiresAt.gt(now))
            .filter(Column::ArchivedAt.is_null())
            .one(db)
            .await
    }

    pub async fn find_by_id<C>(db: &C, id: i64) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id(id).one(db).await
    }

    /// The live session for an `(owner, class)` pair, if one exists.
    pub async fn find_active_for_class<C>(
        db: &C,
        owner_id: i64,
        class_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .filter(Column::ClassId.eq(class_id))
            .filter(Column::ExpiresAt.gt(now))
            .filter(Column::ArchivedAt.is_null())
            .one(db)
            .await
    }

    /// True if some other live session already answers to `code`.
    pub async fn code_in_use<C>(db: &C, code: &str, now: DateTime<Utc>) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        Ok(Self::find_active_by_code(db, code, now).await?.is_some())
    }
}

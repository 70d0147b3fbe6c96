use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, PaginatorTrait, QueryFilter};

/// One subject's confirmed presence in one session.
///
/// Rows are written once by the check-in validator and never mutated. The
/// storage-level unique index on `(session_id, subject_id)` is the only
/// duplicate-safety guarantee; callers must treat any pre-insert existence
/// check as an optimization.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub subject_id: i64,
    /// Great-circle distance from the session anchor, rounded to the meter.
    pub distance_meters: f64,
    pub signed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn exists_for<C>(db: &C, session_id: i64, subject_id: i64) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        Ok(Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::SubjectId.eq(subject_id))
            .one(db)
            .await?
            .is_some())
    }

    pub async fn find_for_session<C>(db: &C, session_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .all(db)
            .await
    }

    pub async fn count_for_session<C>(db: &C, session_id: i64) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .count(db)
            .await
    }
}

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

/// Best-effort copy of attendance records taken at session termination.
///
/// Lives outside the primary consistency path: a failed copy is logged by the
/// lifecycle controller and never blocks termination.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_audit")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub subject_id: i64,
    pub distance_meters: f64,
    pub signed_at: DateTime<Utc>,
    pub copied_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("No RelationDef implemented")
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn from_record(
        record: &super::attendance_record::Model,
        copied_at: DateTime<Utc>,
    ) -> ActiveModel {
        ActiveModel {
            session_id: Set(record.session_id),
            subject_id: Set(record.subject_id),
            distance_meters: Set(record.distance_meters),
            signed_at: Set(record.signed_at),
            copied_at: Set(copied_at),
            ..Default::default()
        }
    }
}

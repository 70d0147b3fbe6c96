//! Geofenced check-in verification.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, SqlErr};
use serde_json::json;
use std::sync::Arc;

use db::models::attendance_record::{ActiveModel, Model as AttendanceRecord};
use db::models::attendance_session::Model as Session;

use crate::geo;
use crate::notify::feed::{ChangeOp, InProcessFeed, RowChange};
use crate::service::AppError;

pub const RECORDS_TABLE: &str = "attendance_records";
pub const GEOFENCE_RADIUS_METERS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInStatus {
    Verified,
    OutOfRange,
    Duplicate,
    InvalidCode,
}

/// Outcome of a verification attempt. Every branch of the business logic is
/// a value here, not an error; `AppError` is reserved for infrastructure.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CheckInResult {
    pub status: CheckInStatus,
    /// Measured distance from the anchor, present for `Verified` (record
    /// keeping) and `OutOfRange` (so the subject can reposition).
    pub distance_meters: Option<f64>,
}

impl CheckInResult {
    fn verified(distance_meters: f64) -> Self {
        Self {
            status: CheckInStatus::Verified,
            distance_meters: Some(distance_meters),
        }
    }

    fn out_of_range(distance_meters: f64) -> Self {
        Self {
            status: CheckInStatus::OutOfRange,
            distance_meters: Some(distance_meters),
        }
    }

    fn duplicate() -> Self {
        Self {
            status: CheckInStatus::Duplicate,
            distance_meters: None,
        }
    }

    fn invalid_code() -> Self {
        Self {
            status: CheckInStatus::InvalidCode,
            distance_meters: None,
        }
    }
}

pub struct CheckInService {
    feed: Arc<InProcessFeed>,
}

impl CheckInService {
    pub fn new(feed: Arc<InProcessFeed>) -> Self {
        Self { feed }
    }

    /// Verifies a subject's presence against the session identified by `code`.
    ///
    /// The check order is deliberate: code validity, then distance, then
    /// duplicates. A subject outside the geofence never learns whether they
    /// had already checked in, and the unique-constraint race is the last
    /// possible failure, so at most one of two racing calls can succeed. An
    /// unknown and an expired code are indistinguishable to the caller.
    pub async fn verify(
        &self,
        db: &DatabaseConnection,
        code: &str,
        subject_id: i64,
        subject_lat: f64,
        subject_lon: f64,
        now: DateTime<Utc>,
    ) -> Result<CheckInResult, AppError> {
        let Some(session) = Session::find_active_by_code(db, code.trim(), now).await? else {
            return Ok(CheckInResult::invalid_code());
        };

        let distance = geo::haversine_meters(
            session.anchor_lat,
            session.anchor_lon,
            subject_lat,
            subject_lon,
        )
        .round();

        if distance > GEOFENCE_RADIUS_METERS {
            log::debug!(
                "subject {subject_id} out of range for session {}: {distance}m",
                session.id
            );
            return Ok(CheckInResult::out_of_range(distance));
        }

        // Optimization only: spares a doomed insert on the common repeat
        // attempt. The unique index on (session_id, subject_id) is what
        // actually guarantees one record per pair.
        if AttendanceRecord::exists_for(db, session.id, subject_id).await? {
            return Ok(CheckInResult::duplicate());
        }

        let inserted = ActiveModel {
            session_id: Set(session.id),
            subject_id: Set(subject_id),
            distance_meters: Set(distance),
            signed_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await;

        let record = match inserted {
            Ok(record) => record,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Ok(CheckInResult::duplicate());
            }
            Err(err) => return Err(AppError::from(err)),
        };

        log::info!(
            "subject {subject_id} verified for session {} at {distance}m",
            session.id
        );
        self.feed.publish(RowChange {
            table: RECORDS_TABLE.into(),
            op: ChangeOp::Insert,
            row: json!({
                "id": record.id,
                "session_id": record.session_id,
                "subject_id": record.subject_id,
                "distance_meters": record.distance_meters,
            }),
        });

        Ok(CheckInResult::verified(distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CreateSession, SessionService};
    use chrono::{Duration, TimeZone};
    use db::test_utils::setup_test_db;
    use sea_orm::{EntityTrait, PaginatorTrait};

    const ANCHOR: (f64, f64) = (6.5244, 3.3792);
    const NEARBY: (f64, f64) = (6.5245, 3.3790);
    const FAR_NORTH: (f64, f64) = (6.5334, 3.3792);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    async fn open_session(db: &DatabaseConnection) -> crate::session::Session {
        let feed = Arc::new(InProcessFeed::new());
        SessionService::new(feed)
            .create(
                db,
                CreateSession {
                    owner_id: 1,
                    class_id: 42,
                    duration_minutes: 5,
                    anchor_lat: ANCHOR.0,
                    anchor_lon: ANCHOR.1,
                },
                t0(),
            )
            .await
            .unwrap()
    }

    fn service() -> CheckInService {
        CheckInService::new(Arc::new(InProcessFeed::new()))
    }

    async fn record_count(db: &DatabaseConnection) -> u64 {
        db::models::attendance_record::Entity::find()
            .count(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let db = setup_test_db().await;
        let result = service()
            .verify(&db, "123456", 7, NEARBY.0, NEARBY.1, t0())
            .await
            .unwrap();
        assert_eq!(result.status, CheckInStatus::InvalidCode);
        assert_eq!(result.distance_meters, None);
    }

    #[tokio::test]
    async fn expired_code_is_indistinguishable_from_unknown() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;

        let late = t0() + Duration::seconds(301);
        let result = service()
            .verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, late)
            .await
            .unwrap();

        assert_eq!(result.status, CheckInStatus::InvalidCode);
        assert_eq!(record_count(&db).await, 0);
    }

    #[tokio::test]
    async fn nearby_subject_is_verified_with_distance() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;

        let result = service()
            .verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0())
            .await
            .unwrap();

        assert_eq!(result.status, CheckInStatus::Verified);
        assert_eq!(result.distance_meters, Some(25.0));

        let records = AttendanceRecord::find_for_session(&db, session.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_id, 7);
        assert_eq!(records[0].distance_meters, 25.0);
        assert_eq!(records[0].signed_at, t0());
    }

    #[tokio::test]
    async fn out_of_range_subject_is_told_the_distance_and_leaves_no_record() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;

        let result = service()
            .verify(&db, &session.code, 7, FAR_NORTH.0, FAR_NORTH.1, t0())
            .await
            .unwrap();

        assert_eq!(result.status, CheckInStatus::OutOfRange);
        let distance = result.distance_meters.unwrap();
        assert!((995.0..1006.0).contains(&distance), "got {distance}");
        assert_eq!(record_count(&db).await, 0);
    }

    #[tokio::test]
    async fn second_sequential_check_in_is_a_duplicate() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;
        let svc = service();

        let first = svc
            .verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0())
            .await
            .unwrap();
        assert_eq!(first.status, CheckInStatus::Verified);

        let second = svc
            .verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0())
            .await
            .unwrap();
        assert_eq!(second.status, CheckInStatus::Duplicate);
        assert_eq!(record_count(&db).await, 1);
    }

    #[tokio::test]
    async fn record_created_outside_the_service_still_reads_as_duplicate() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;

        // The pair already exists in storage; the service never wrote it.
        ActiveModel {
            session_id: Set(session.id),
            subject_id: Set(7),
            distance_meters: Set(10.0),
            signed_at: Set(t0()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let result = service()
            .verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0())
            .await
            .unwrap();
        assert_eq!(result, CheckInResult::duplicate());
    }

    #[tokio::test]
    async fn racing_check_ins_produce_one_verified_and_one_duplicate() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;
        let svc = service();

        let (a, b) = tokio::join!(
            svc.verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0()),
            svc.verify(&db, &session.code, 7, NEARBY.0, NEARBY.1, t0()),
        );
        let statuses = [a.unwrap().status, b.unwrap().status];

        let verified = statuses
            .iter()
            .filter(|s| **s == CheckInStatus::Verified)
            .count();
        let duplicates = statuses
            .iter()
            .filter(|s| **s == CheckInStatus::Duplicate)
            .count();
        assert_eq!((verified, duplicates), (1, 1), "got {statuses:?}");
        assert_eq!(record_count(&db).await, 1);
    }

    #[tokio::test]
    async fn distinct_subjects_both_verify() {
        let db = setup_test_db().await;
        let session = open_session(&db).await;
        let svc = service();

        for subject_id in [7, 8] {
            let result = svc
                .verify(&db, &session.code, subject_id, NEARBY.0, NEARBY.1, t0())
                .await
                .unwrap();
            assert_eq!(result.status, CheckInStatus::Verified);
        }
        assert_eq!(record_count(&db).await, 2);
    }
}

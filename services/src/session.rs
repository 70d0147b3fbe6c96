//! Session lifecycle: create, regenerate, terminate.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use common::format_validation_errors;
use db::models::attendance_audit;
use db::models::attendance_record::Model as AttendanceRecord;
use db::models::attendance_session::ActiveModel;

use crate::notify::feed::{ChangeOp, InProcessFeed, RowChange};
use crate::service::AppError;

pub use db::models::attendance_session::{Model as Session, SessionStatus};

pub const SESSIONS_TABLE: &str = "attendance_sessions";

const CODE_DIGITS: u32 = 6;
const CODE_RETRY_LIMIT: usize = 3;

/// A session that exists but has not been persisted yet.
#[derive(Debug, Clone, Validate)]
pub struct CreateSession {
    pub owner_id: i64,
    pub class_id: i64,
    #[validate(range(min = 1, max = 10, message = "duration must be between 1 and 10 minutes"))]
    pub duration_minutes: i32,
    pub anchor_lat: f64,
    pub anchor_lon: f64,
}

/// Owns the session state machine. Mutations publish a row change so open
/// dashboards converge without polling.
pub struct SessionService {
    feed: Arc<InProcessFeed>,
}

impl SessionService {
    pub fn new(feed: Arc<InProcessFeed>) -> Self {
        Self { feed }
    }

    pub async fn create(
        &self,
        db: &DatabaseConnection,
        params: CreateSession,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        params
            .validate()
            .map_err(|e| AppError::Validation(format_validation_errors(&e)))?;

        let code = Self::fresh_code(db, now).await?;
        let session = ActiveModel {
            owner_id: Set(params.owner_id),
            class_id: Set(params.class_id),
            code: Set(code),
            anchor_lat: Set(params.anchor_lat),
            anchor_lon: Set(params.anchor_lon),
            duration_minutes: Set(params.duration_minutes),
            created_at: Set(now),
            expires_at: Set(now + Duration::minutes(params.duration_minutes as i64)),
            archived_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;

        log::info!(
            "session {} opened for class {} until {}",
            session.id,
            session.class_id,
            session.expires_at
        );
        self.publish(ChangeOp::Insert, &session);
        Ok(session)
    }

    /// Issues a new code and a fresh expiry; anchor and identity stay as they
    /// are. Concurrent regenerates resolve last-write-wins in storage; the
    /// controller adds no locking of its own.
    pub async fn regenerate_code(
        &self,
        db: &DatabaseConnection,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let session = Self::require_mutable(db, session_id).await?;

        let duration = session.duration_minutes;
        let mut active = session.into_active_model();
        active.code = Set(Self::fresh_code(db, now).await?);
        active.expires_at = Set(now + Duration::minutes(duration as i64));
        let session = active.update(db).await?;

        log::info!("session {} code regenerated", session.id);
        self.publish(ChangeOp::Update, &session);
        Ok(session)
    }

    /// Ends a session now and freezes it.
    ///
    /// Expiry is forced first so in-flight verifications stop resolving the
    /// code before anything else happens; the audit copy in between is
    /// best-effort and never blocks archival.
    pub async fn terminate(
        &self,
        db: &DatabaseConnection,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let session = Self::require_mutable(db, session_id).await?;

        let mut active = session.into_active_model();
        active.expires_at = Set(now);
        let session = active.update(db).await?;

        if let Err(err) = Self::archive_records(db, session.id, now).await {
            log::warn!(
                "audit copy for session {} failed: {err}; terminating anyway",
                session.id
            );
        }

        let mut active = session.into_active_model();
        active.archived_at = Set(Some(now));
        let session = active.update(db).await?;

        log::info!("session {} terminated and archived", session.id);
        self.publish(ChangeOp::Update, &session);
        Ok(session)
    }

    pub async fn find(&self, db: &DatabaseConnection, session_id: i64) -> Result<Session, AppError> {
        Self::require(db, session_id).await
    }

    async fn require(db: &DatabaseConnection, session_id: i64) -> Result<Session, AppError> {
        Session::find_by_id(db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    async fn require_mutable(
        db: &DatabaseConnection,
        session_id: i64,
    ) -> Result<Session, AppError> {
        let session = Self::require(db, session_id).await?;
        if session.archived_at.is_some() {
            return Err(AppError::InvalidState(format!(
                "session {session_id} is archived"
            )));
        }
        Ok(session)
    }

    async fn archive_records(
        db: &DatabaseConnection,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sea_orm::DbErr> {
        let records = AttendanceRecord::find_for_session(db, session_id).await?;
        if records.is_empty() {
            return Ok(());
        }
        let copies = records
            .iter()
            .map(|record| attendance_audit::Model::from_record(record, now));
        attendance_audit::Entity::insert_many(copies).exec(db).await?;
        log::debug!("copied {} records of session {session_id} to audit", records.len());
        Ok(())
    }

    /// A code another live session is currently using would make lookups
    /// ambiguous; retry a few times before accepting the collision odds.
    async fn fresh_code(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<String, AppError> {
        for _ in 0..CODE_RETRY_LIMIT {
            let code = generate_code();
            if !Session::code_in_use(db, &code, now).await? {
                return Ok(code);
            }
            log::debug!("attendance code {code} already live, regenerating");
        }
        let code = generate_code();
        log::warn!("could not find an unused code in {CODE_RETRY_LIMIT} attempts; keeping {code}");
        Ok(code)
    }

    fn publish(&self, op: ChangeOp, session: &Session) {
        self.feed.publish(RowChange {
            table: SESSIONS_TABLE.into(),
            op,
            row: json!({
                "id": session.id,
                "owner_id": session.owner_id,
                "class_id": session.class_id,
                "expires_at": session.expires_at.to_rfc3339(),
                "archived": session.archived_at.is_some(),
            }),
        });
    }
}

fn generate_code() -> String {
    let modulus = 10u32.pow(CODE_DIGITS);
    let num = rand::thread_rng().gen_range(0..modulus);
    format!("{num:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use db::models::attendance_record::ActiveModel as RecordActiveModel;
    use db::test_utils::setup_test_db;
    use sea_orm::PaginatorTrait;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn params(duration_minutes: i32) -> CreateSession {
        CreateSession {
            owner_id: 1,
            class_id: 42,
            duration_minutes,
            anchor_lat: 6.5244,
            anchor_lon: 3.3792,
        }
    }

    fn service() -> SessionService {
        SessionService::new(Arc::new(InProcessFeed::new()))
    }

    #[test]
    fn generated_codes_are_six_numeric_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn create_returns_an_active_session() {
        let db = setup_test_db().await;
        let svc = service();

        let session = svc.create(&db, params(5), t0()).await.unwrap();

        assert_eq!(session.status(t0()), SessionStatus::Active);
        assert_eq!(session.expires_at, t0() + Duration::minutes(5));
        assert_eq!(session.code.len(), 6);
        assert!(session.archived_at.is_none());
    }

    #[tokio::test]
    async fn create_rejects_out_of_bound_durations() {
        let db = setup_test_db().await;
        let svc = service();

        for bad in [0, -3, 11] {
            let err = svc.create(&db, params(bad), t0()).await.unwrap_err();
            assert!(
                matches!(err, AppError::Validation(_)),
                "duration {bad} should be rejected, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn regenerate_swaps_code_and_resets_expiry_only() {
        let db = setup_test_db().await;
        let svc = service();

        let session = svc.create(&db, params(5), t0()).await.unwrap();
        let later = t0() + Duration::minutes(3);

        let regenerated = svc.regenerate_code(&db, session.id, later).await.unwrap();

        assert_eq!(regenerated.id, session.id);
        assert_ne!(regenerated.code, session.code);
        assert_eq!(regenerated.expires_at, later + Duration::minutes(5));
        assert_eq!(regenerated.anchor_lat, session.anchor_lat);
        assert_eq!(regenerated.anchor_lon, session.anchor_lon);
        assert_eq!(regenerated.created_at, session.created_at);
    }

    #[tokio::test]
    async fn regenerate_can_revive_an_expired_session() {
        let db = setup_test_db().await;
        let svc = service();

        let session = svc.create(&db, params(5), t0()).await.unwrap();
        let after_expiry = t0() + Duration::minutes(20);
        assert_eq!(
            svc.find(&db, session.id).await.unwrap().status(after_expiry),
            SessionStatus::Expired
        );

        let regenerated = svc
            .regenerate_code(&db, session.id, after_expiry)
            .await
            .unwrap();
        assert_eq!(regenerated.status(after_expiry), SessionStatus::Active);
    }

    #[tokio::test]
    async fn terminate_expires_archives_and_copies_audit() {
        let db = setup_test_db().await;
        let svc = service();

        let session = svc.create(&db, params(5), t0()).await.unwrap();
        for subject_id in [100, 101] {
            RecordActiveModel {
                session_id: Set(session.id),
                subject_id: Set(subject_id),
                distance_meters: Set(12.0),
                signed_at: Set(t0()),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
        }

        let ended_at = t0() + Duration::minutes(2);
        let archived = svc.terminate(&db, session.id, ended_at).await.unwrap();

        assert_eq!(archived.status(ended_at), SessionStatus::Archived);
        assert_eq!(archived.expires_at, ended_at);
        assert_eq!(archived.archived_at, Some(ended_at));

        let audit_count = attendance_audit::Entity::find().count(&db).await.unwrap();
        assert_eq!(audit_count, 2);
    }

    #[tokio::test]
    async fn archived_sessions_reject_further_mutation() {
        let db = setup_test_db().await;
        let svc = service();

        let session = svc.create(&db, params(5), t0()).await.unwrap();
        svc.terminate(&db, session.id, t0()).await.unwrap();

        let err = svc.terminate(&db, session.id, t0()).await.unwrap_err();
        assert!(err.is_invalid_state());

        let err = svc.regenerate_code(&db, session.id, t0()).await.unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn missing_sessions_yield_not_found() {
        let db = setup_test_db().await;
        let svc = service();

        assert!(svc.find(&db, 999).await.unwrap_err().is_not_found());
        assert!(
            svc.regenerate_code(&db, 999, t0())
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(svc.terminate(&db, 999, t0()).await.unwrap_err().is_not_found());
    }
}

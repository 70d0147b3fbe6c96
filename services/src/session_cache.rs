//! Dual-tier snapshot store for the owner's in-progress session.
//!
//! The ephemeral tier lives in process memory and is gone on restart; the
//! durable tier is a JSON file that survives one. Reads prefer the ephemeral
//! tier and re-seed it from the durable one after a restart, so a lecturer's
//! open session is still there when the dashboard comes back.
//!
//! The cache is constructed once with its storage path and handed to
//! consumers rather than imported as ambient global state.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use db::models::attendance_session::Model as Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Ephemeral,
    Durable,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CachedSessionSnapshot {
    pub session_id: i64,
    pub payload: Session,
    pub saved_at: DateTime<Utc>,
    /// Which tier this copy was written to.
    pub tier: CacheTier,
}

pub struct SessionCache {
    ephemeral: Mutex<Option<CachedSessionSnapshot>>,
    durable_path: PathBuf,
}

impl SessionCache {
    pub fn new(durable_path: impl Into<PathBuf>) -> Self {
        Self {
            ephemeral: Mutex::new(None),
            durable_path: durable_path.into(),
        }
    }

    /// Snapshots the session into both tiers. The durable write is
    /// best-effort: a failure is logged and the in-memory tier still holds
    /// the session.
    pub fn save(&self, session: &Session, now: DateTime<Utc>) {
        let snapshot = CachedSessionSnapshot {
            session_id: session.id,
            payload: session.clone(),
            saved_at: now,
            tier: CacheTier::Ephemeral,
        };

        self.write_durable(&CachedSessionSnapshot {
            tier: CacheTier::Durable,
            ..snapshot.clone()
        });
        *self.ephemeral.lock().expect("cache lock poisoned") = Some(snapshot);
    }

    /// Ephemeral tier first; falls back to the durable tier (a fresh process)
    /// and re-seeds the ephemeral tier from what it read.
    pub fn load(&self) -> Option<CachedSessionSnapshot> {
        let mut ephemeral = self.ephemeral.lock().expect("cache lock poisoned");
        if let Some(snapshot) = ephemeral.as_ref() {
            return Some(snapshot.clone());
        }

        let snapshot = self.read_durable()?;
        *ephemeral = Some(CachedSessionSnapshot {
            tier: CacheTier::Ephemeral,
            ..snapshot.clone()
        });
        Some(snapshot)
    }

    /// True iff a session is cached and not yet expired. The first call that
    /// observes expiry clears both tiers.
    pub fn has_valid_session(&self, now: DateTime<Utc>) -> bool {
        match self.load() {
            Some(snapshot) if snapshot.payload.is_active(now) => true,
            Some(snapshot) => {
                log::info!("cached session {} expired, clearing cache", snapshot.session_id);
                self.clear();
                false
            }
            None => false,
        }
    }

    /// Milliseconds until the cached session expires, or `-1` when nothing is
    /// cached or it has already expired.
    pub fn time_remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        self.load()
            .map(|snapshot| snapshot.payload.time_remaining_ms(now))
            .unwrap_or(-1)
    }

    /// Drops the snapshot from both tiers.
    pub fn clear(&self) {
        *self.ephemeral.lock().expect("cache lock poisoned") = None;
        if self.durable_path.exists() {
            if let Err(err) = fs::remove_file(&self.durable_path) {
                log::warn!("failed to clear durable session cache: {err}");
            }
        }
    }

    fn write_durable(&self, snapshot: &CachedSessionSnapshot) {
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("could not serialize session snapshot: {err}");
                return;
            }
        };
        if let Some(parent) = self.durable_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.durable_path, json) {
            log::warn!("durable session cache write failed: {err}");
        }
    }

    fn read_durable(&self) -> Option<CachedSessionSnapshot> {
        let raw = fs::read_to_string(&self.durable_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                // Malformed snapshots are rejected at the boundary, before
                // they can reach any session logic.
                log::warn!("discarding malformed durable session cache: {err}");
                None
            }
        }
    }
}

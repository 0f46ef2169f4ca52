use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::alerts::{self, AlertBook, AlertSettings, StudyHealth};
use crate::compliance;
use crate::models::StudyState;
use crate::rng;
use crate::tracker::ComplianceTracker;

/// Everything that survives between runs: studies keyed by id plus the alert book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tracker: ComplianceTracker,
    pub alerts: AlertBook,
}

impl Snapshot {
    /// Re-derives alerts for every study from freshly computed stats.
    ///
    /// A study whose state and settings are unchanged since its last
    /// assessment is skipped, so only real changes count toward an
    /// acknowledged alert's `clear_cycles`.
    pub fn refresh_alerts(&mut self, settings: &AlertSettings, now: DateTime<Utc>) {
        for study in self.tracker.studies() {
            let fingerprint = assessment_fingerprint(study, settings);
            if fingerprint.is_some() && fingerprint == self.alerts.last_assessed(&study.study_id) {
                debug!(study = %study.study_id, "study unchanged since last assessment");
                continue;
            }
            let stats = compliance::compute_stats(study);
            let readings = alerts::assess(&StudyHealth::new(study, &stats), settings);
            self.alerts.refresh(
                &study.study_id,
                &study.brand,
                &readings,
                settings.clear_cycles,
                now,
            );
            if let Some(fingerprint) = fingerprint {
                self.alerts.mark_assessed(&study.study_id, fingerprint);
            }
        }
    }

    /// Drops a study and every alert raised for it.
    pub fn remove_study(&mut self, study_id: &str) -> bool {
        let removed = self.tracker.remove_study(study_id).is_some();
        self.alerts.forget_study(study_id);
        removed
    }
}

fn assessment_fingerprint(study: &StudyState, settings: &AlertSettings) -> Option<u32> {
    serde_json::to_string(&(study, settings))
        .ok()
        .map(|raw| rng::hash_seed(&raw))
}

pub enum SnapshotStore {
    File(PathBuf),
    Postgres(PgPool),
}

impl SnapshotStore {
    pub async fn load(&self) -> anyhow::Result<Snapshot> {
        match self {
            SnapshotStore::File(path) => load_file(path),
            SnapshotStore::Postgres(pool) => load_db(pool).await,
        }
    }

    pub async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        match self {
            SnapshotStore::File(path) => save_file(path, snapshot),
            SnapshotStore::Postgres(pool) => save_db(pool, snapshot).await,
        }
    }
}

pub fn load_file(path: &Path) -> anyhow::Result<Snapshot> {
    if !path.exists() {
        debug!("no snapshot at {}, starting empty", path.display());
        return Ok(Snapshot::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("snapshot {} is not valid state", path.display()))
}

pub fn save_file(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(())
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn load_db(pool: &PgPool) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    let rows = sqlx::query("SELECT study_id, state FROM rebate_studies.study_snapshots ORDER BY study_id")
        .fetch_all(pool)
        .await
        .context("failed to load study snapshots")?;
    for row in rows {
        let Json(study): Json<StudyState> = row.try_get("state")?;
        snapshot.tracker.insert_study(study);
    }

    let book = sqlx::query("SELECT state FROM rebate_studies.alert_book WHERE id = 1")
        .fetch_optional(pool)
        .await
        .context("failed to load alert book")?;
    if let Some(row) = book {
        let Json(alerts): Json<AlertBook> = row.try_get("state")?;
        snapshot.alerts = alerts;
    }

    Ok(snapshot)
}

async fn save_db(pool: &PgPool, snapshot: &Snapshot) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    let ids: Vec<String> = snapshot
        .tracker
        .studies()
        .map(|study| study.study_id.clone())
        .collect();
    sqlx::query("DELETE FROM rebate_studies.study_snapshots WHERE NOT (study_id = ANY($1))")
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    for study in snapshot.tracker.studies() {
        sqlx::query(
            r#"
            INSERT INTO rebate_studies.study_snapshots (study_id, state, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (study_id) DO UPDATE
            SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&study.study_id)
        .bind(Json(study))
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO rebate_studies.alert_book (id, state, updated_at)
        VALUES (1, $1, now())
        ON CONFLICT (id) DO UPDATE
        SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(Json(&snapshot.alerts))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use crate::alerts::AlertCategory;
    use crate::config::{SimulationSettings, StudyComplianceConfig};
    use crate::generator::{generate_study, StudySeed};
    use crate::models::ShippingState;

    fn demo_snapshot() -> Snapshot {
        let seed = StudySeed {
            study_id: "study-recover".to_string(),
            brand: "Driftwell".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            duration_days: 21,
            cohorts: 2,
            participants_per_cohort: 5,
        };
        let mut snapshot = Snapshot::default();
        snapshot.tracker.insert_study(generate_study(
            &seed,
            &StudyComplianceConfig::default(),
            &SimulationSettings::default(),
        ));
        for _ in 0..5 {
            snapshot.tracker.simulate_day("study-recover");
        }
        snapshot
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("rebate-snapshot-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_snapshot_survives_a_round_trip() {
        let path = temp_path();
        let mut snapshot = demo_snapshot();
        snapshot.refresh_alerts(
            &AlertSettings::default(),
            Utc.with_ymd_and_hms(2026, 7, 6, 8, 0, 0).unwrap(),
        );

        save_file(&path, &snapshot).unwrap();
        let loaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, snapshot);
    }

    fn set_delayed_kits(snapshot: &mut Snapshot, delayed: u32) {
        let mut study = snapshot.tracker.study("study-recover").unwrap().clone();
        study.shipping = ShippingState {
            shipped: 10,
            delivered: 10 - delayed,
            delayed,
        };
        snapshot.tracker.insert_study(study);
    }

    fn shipping_alert(snapshot: &Snapshot) -> Option<&crate::AdminAlert> {
        snapshot
            .alerts
            .for_study("study-recover")
            .into_iter()
            .find(|alert| alert.category == AlertCategory::Shipping)
    }

    #[test]
    fn repeated_refreshes_of_unchanged_state_do_not_clear_acknowledged_alerts() {
        let settings = AlertSettings {
            clear_cycles: 2,
            ..AlertSettings::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 6, 8, 0, 0).unwrap();
        let mut snapshot = demo_snapshot();

        set_delayed_kits(&mut snapshot, 5);
        snapshot.refresh_alerts(&settings, now);
        let id = shipping_alert(&snapshot).unwrap().id;
        assert!(snapshot.alerts.acknowledge(id));

        set_delayed_kits(&mut snapshot, 0);
        for _ in 0..3 {
            snapshot.refresh_alerts(&settings, now);
        }
        let held = shipping_alert(&snapshot).unwrap();
        assert_eq!(held.id, id);
        assert!(held.acknowledged);

        snapshot.tracker.advance_day("study-recover");
        snapshot.refresh_alerts(&settings, now);
        assert!(shipping_alert(&snapshot).is_none());
    }

    #[test]
    fn removing_a_study_forgets_its_alerts() {
        let mut snapshot = demo_snapshot();
        set_delayed_kits(&mut snapshot, 5);
        snapshot.refresh_alerts(&AlertSettings::default(), Utc::now());
        assert!(shipping_alert(&snapshot).is_some());

        assert!(snapshot.remove_study("study-recover"));
        assert!(snapshot.tracker.study("study-recover").is_none());
        assert!(snapshot.alerts.for_study("study-recover").is_empty());
        assert_eq!(snapshot.alerts.last_assessed("study-recover"), None);
        assert!(!snapshot.remove_study("study-recover"));
    }

    #[test]
    fn missing_file_loads_empty_snapshot() {
        let loaded = load_file(&temp_path()).unwrap();
        assert_eq!(loaded, Snapshot::default());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let path = temp_path();
        std::fs::write(&path, "{ \"tracker\": 12 }").unwrap();
        let result = load_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn resumed_simulation_matches_uninterrupted_run() {
        let path = temp_path();
        let mut uninterrupted = demo_snapshot();

        save_file(&path, &uninterrupted).unwrap();
        let mut resumed = load_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        for _ in 0..5 {
            uninterrupted.tracker.simulate_day("study-recover");
            resumed.tracker.simulate_day("study-recover");
        }
        assert_eq!(resumed, uninterrupted);
    }
}

//! Seeded demo studies. The same study id always produces the same roster.

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::compliance;
use crate::config::{SimulationSettings, StudyComplianceConfig};
use crate::models::{ParticipantCompliance, RecruitmentState, ShippingState, StudyState};
use crate::rng::SeededRandom;

const FIRST_NAMES: &[&str] = &[
    "Avery", "Jules", "Kiara", "Mateo", "Priya", "Noah", "Imani", "Lena", "Omar", "Sasha", "Theo",
    "Yara",
];
const LAST_NAMES: &[&str] = &[
    "Lee", "Moreno", "Patel", "Okafor", "Nguyen", "Fischer", "Haddad", "Kowalski", "Silva", "Tanaka",
];

#[derive(Debug, Clone, PartialEq)]
pub struct StudySeed {
    pub study_id: String,
    pub brand: String,
    pub start_date: NaiveDate,
    pub duration_days: u32,
    pub cohorts: u32,
    pub participants_per_cohort: u32,
}

pub fn generate_study(
    seed: &StudySeed,
    config: &StudyComplianceConfig,
    simulation: &SimulationSettings,
) -> StudyState {
    let mut rng = SeededRandom::new(&format!("{}:roster", seed.study_id));
    let mut study = StudyState::new(
        &seed.study_id,
        &seed.brand,
        seed.start_date,
        seed.duration_days,
        config.clone(),
    );

    let mut number = 0u32;
    for cohort in 1..=seed.cohorts.max(1) {
        let offset = i64::from(cohort - 1) * i64::from(simulation.cohort_spacing_days);
        let enrolled_on = Duration::try_days(offset)
            .and_then(|delta| seed.start_date.checked_add_signed(delta))
            .unwrap_or(NaiveDate::MAX);
        for _ in 0..seed.participants_per_cohort {
            number += 1;
            let first = rng.pick(FIRST_NAMES).copied().unwrap_or("Avery");
            let last = rng.pick(LAST_NAMES).copied().unwrap_or("Lee");
            let engagement = rng.range(0.55, 0.98);
            let participant = ParticipantCompliance::enroll(
                &format!("P-{number:03}"),
                &format!("{first} {last}"),
                cohort,
                enrolled_on,
                &study.config,
                engagement,
            );
            if let Some(next) = compliance::enroll(&study, participant) {
                study = next;
            }
        }
    }

    let enrolled = number;
    let delayed = rng.next_below(enrolled / 5 + 1);
    study.shipping = ShippingState {
        shipped: enrolled,
        delivered: enrolled - delayed,
        delayed,
    };
    study.recruitment = RecruitmentState {
        target: enrolled + rng.next_below(enrolled / 2 + 1),
        enrolled,
        open: true,
    };

    debug!(
        study = %study.study_id,
        participants = enrolled,
        "generated demo study"
    );
    study
}

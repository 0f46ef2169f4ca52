use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rebate_study_sim::generator::{self, StudySeed};
use rebate_study_sim::store::{self, Snapshot, SnapshotStore};
use rebate_study_sim::{import, report, AppConfig, StudyComplianceConfig};

#[derive(Parser)]
#[command(name = "rebate-study-sim")]
#[command(about = "Compliance simulator for wellness rebate studies", long_about = None)]
struct Cli {
    /// Snapshot file, used when DATABASE_URL is not set
    #[arg(long, global = true, default_value = "rebate-studies.json")]
    state: PathBuf,
    /// JSON config; malformed input falls back to defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema
    InitDb,
    /// Generate a seeded demo study
    CreateStudy {
        #[arg(long)]
        study: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long, default_value_t = 30)]
        duration_days: u32,
        #[arg(long, default_value_t = 3)]
        cohorts: u32,
        #[arg(long, default_value_t = 8)]
        per_cohort: u32,
    },
    /// Enroll participants from a CSV roster
    Import {
        #[arg(long)]
        study: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Change lifeline thresholds; new totals apply to future enrollees only
    Configure {
        #[arg(long)]
        study: String,
        #[arg(long)]
        total_lifelines: Option<u32>,
        #[arg(long)]
        at_risk: Option<u32>,
        #[arg(long)]
        critical: Option<u32>,
        #[arg(long)]
        target: Option<f64>,
    },
    /// Record a check-in for today
    CheckIn {
        #[arg(long)]
        study: String,
        #[arg(long)]
        participant: String,
    },
    /// Record a missed day
    Miss {
        #[arg(long)]
        study: String,
        #[arg(long)]
        participant: String,
    },
    /// Close today, charging a miss to everyone without a check-in
    AdvanceDay {
        #[arg(long)]
        study: String,
    },
    /// Simulate check-ins from participant engagement and advance
    Simulate {
        #[arg(long)]
        study: String,
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
    /// Rewind a study to its first day
    Reset {
        #[arg(long)]
        study: String,
    },
    /// Delete a study and its alerts
    RemoveStudy {
        #[arg(long)]
        study: String,
    },
    /// Print study statistics
    Stats {
        #[arg(long)]
        study: String,
        #[arg(long)]
        json: bool,
    },
    /// List open alerts
    Alerts {
        #[arg(long)]
        study: Option<String>,
        /// Include acknowledged alerts
        #[arg(long)]
        all: bool,
    },
    /// Acknowledge an alert until its condition clears
    Ack {
        #[arg(long)]
        alert_id: Uuid,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        study: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn report_change(applied: bool, what: &str) {
    if applied {
        println!("{what}.");
    } else {
        println!("No change: unknown study or inactive participant.");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load_or_default(cli.config.as_deref());

    let snapshots = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await
                .context("failed to connect to Postgres")?;
            SnapshotStore::Postgres(pool)
        }
        Err(_) => SnapshotStore::File(cli.state.clone()),
    };

    if let Commands::InitDb = cli.command {
        let SnapshotStore::Postgres(pool) = &snapshots else {
            bail!("DATABASE_URL must be set to initialise the schema");
        };
        store::init_db(pool).await?;
        println!("Schema ready.");
        return Ok(());
    }

    let mut snapshot: Snapshot = snapshots.load().await?;
    let tracker = &mut snapshot.tracker;

    match cli.command {
        Commands::InitDb => {}
        Commands::CreateStudy {
            study,
            brand,
            start_date,
            duration_days,
            cohorts,
            per_cohort,
        } => {
            if tracker.study(&study).is_some() {
                bail!("study {study} already exists; use reset to start over");
            }
            let seed = StudySeed {
                study_id: study.clone(),
                brand,
                start_date,
                duration_days,
                cohorts,
                participants_per_cohort: per_cohort,
            };
            let generated = generator::generate_study(&seed, &config.compliance, &config.simulation);
            let count = generated.participants.len();
            tracker.insert_study(generated);
            println!("Created {study} with {count} participants.");
        }
        Commands::Import { study, csv } => {
            let inserted = import::import_roster(
                tracker,
                &study,
                &csv,
                config.simulation.default_engagement,
                &config.profile_questions,
            )?;
            println!("Enrolled {inserted} participants from {}.", csv.display());
        }
        Commands::Configure {
            study,
            total_lifelines,
            at_risk,
            critical,
            target,
        } => {
            let Some(current) = tracker.study(&study).map(|s| s.config.clone()) else {
                bail!("unknown study {study}");
            };
            let next = StudyComplianceConfig {
                total_lifelines: total_lifelines.unwrap_or(current.total_lifelines),
                at_risk_threshold: at_risk.unwrap_or(current.at_risk_threshold),
                critical_threshold: critical.unwrap_or(current.critical_threshold),
                target_compliance_percent: target.unwrap_or(current.target_compliance_percent),
            };
            tracker
                .configure(&study, next)
                .context("configuration rejected")?;
            println!("Configuration updated for {study}.");
        }
        Commands::CheckIn { study, participant } => {
            report_change(
                tracker.simulate_check_in(&study, &participant),
                &format!("Checked in {participant}"),
            );
        }
        Commands::Miss { study, participant } => {
            report_change(
                tracker.simulate_miss(&study, &participant),
                &format!("Recorded a missed day for {participant}"),
            );
        }
        Commands::AdvanceDay { study } => {
            report_change(tracker.advance_day(&study), "Advanced one day");
        }
        Commands::Simulate { study, days } => {
            let mut simulated = 0;
            for _ in 0..days {
                if !tracker.simulate_day(&study) {
                    break;
                }
                simulated += 1;
            }
            report_change(simulated > 0, &format!("Simulated {simulated} days"));
        }
        Commands::Reset { study } => {
            report_change(tracker.reset(&study), &format!("Reset {study}"));
        }
        Commands::RemoveStudy { study } => {
            if snapshot.remove_study(&study) {
                println!("Removed {study}.");
            } else {
                println!("No study named {study}.");
            }
        }
        Commands::Stats { study, json } => {
            let Some(stats) = tracker.compute_stats(&study) else {
                println!("No study named {study}.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{} day {}: {} on track, {} at risk, {} critical, {} withdrawn",
                    stats.study_id,
                    stats.study_day,
                    stats.on_track,
                    stats.at_risk,
                    stats.critical,
                    stats.withdrawn
                );
                match stats.overall_compliance_percent {
                    Some(percent) => println!("Compliance {percent:.1}%"),
                    None => println!("No completed days yet."),
                }
                for cohort in stats.cohorts.iter() {
                    println!(
                        "- cohort {}: day {}, {:.0}% complete, {} of {} active",
                        cohort.cohort,
                        cohort.current_day,
                        cohort.percent_complete,
                        cohort.active,
                        cohort.participants
                    );
                }
            }
        }
        Commands::Alerts { study, all } => {
            snapshot.refresh_alerts(&config.alerts, Utc::now());
            let alerts: Vec<_> = if all {
                snapshot.alerts.all().collect()
            } else {
                snapshot.alerts.active()
            };
            let alerts: Vec<_> = alerts
                .into_iter()
                .filter(|alert| study.as_deref().map_or(true, |id| alert.study_id == id))
                .collect();

            if alerts.is_empty() {
                println!("No open alerts.");
            }
            for alert in alerts {
                println!(
                    "- {} [{:?}] {} / {}: {}{}",
                    alert.id,
                    alert.severity,
                    alert.study_id,
                    alert.category.label(),
                    alert.message,
                    if alert.acknowledged { " (acknowledged)" } else { "" }
                );
            }
        }
        Commands::Ack { alert_id } => {
            if snapshot.alerts.acknowledge(alert_id) {
                println!("Acknowledged {alert_id}.");
            } else {
                println!("No alert with id {alert_id}.");
            }
        }
        Commands::Report { study, out } => {
            snapshot.refresh_alerts(&config.alerts, Utc::now());
            let Some(state) = snapshot.tracker.study(&study) else {
                bail!("unknown study {study}");
            };
            let stats = rebate_study_sim::compliance::compute_stats(state);
            let alerts: Vec<_> = snapshot
                .alerts
                .active()
                .into_iter()
                .filter(|alert| alert.study_id == study)
                .collect();
            let rendered = report::build_report(state, &stats, &alerts);
            std::fs::write(&out, rendered)?;
            println!("Report written to {}.", out.display());
        }
    }

    snapshot.refresh_alerts(&config.alerts, Utc::now());
    snapshots.save(&snapshot).await?;

    Ok(())
}

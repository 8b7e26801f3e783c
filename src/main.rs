use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gradebook_sync::backend::GradeBackend;
use gradebook_sync::config::{BackendKind, Config};
use gradebook_sync::db::{self, PgBackend};
use gradebook_sync::graphql::GraphqlBackend;
use gradebook_sync::models::{ScoreEdit, Scope};
use gradebook_sync::period::{self, Period};
use gradebook_sync::reconcile::{BatchResult, BatchStatus, RecordAction, Reconciler};
use gradebook_sync::scale::GradingScale;
use gradebook_sync::view::{Gradebook, GradebookCache};
use gradebook_sync::{report, sheet, view};

#[derive(Parser)]
#[command(name = "gradebook-sync")]
#[command(about = "Keep a school's grade records in step with course rosters", long_about = None)]
struct Cli {
    /// Override GRADING_SCALE for this run
    #[arg(long, global = true, value_enum)]
    scale: Option<GradingScale>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long)]
    course: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    period: String,
}

impl ScopeArgs {
    fn scope(&self) -> anyhow::Result<Scope> {
        Ok(Scope::new(&self.course, &self.subject, &self.period)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema
    InitDb,
    /// Load realistic seed data into Postgres
    Seed,
    /// Import enrollments from a CSV file into Postgres
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List selectable periods
    Periods {
        /// Last school year to list (defaults to the current year)
        #[arg(long)]
        until: Option<i32>,
    },
    /// List the subject catalog
    Subjects {
        #[arg(long)]
        teacher: Option<String>,
    },
    /// Attach a subject to a course for a period, creating unscored records
    Attach {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        teacher: String,
    },
    /// Remove a subject from a course for one period, deleting its records
    Detach {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Submit scores for a course, subject and period
    #[command(group(
        ArgGroup::new("input")
            .args(["score", "csv"])
            .required(true)
    ))]
    Submit {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        teacher: String,
        /// STUDENT=SCORE, repeatable
        #[arg(long)]
        score: Vec<String>,
        /// CSV with student_id,score columns
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Print the gradebook for a course, subject and period
    Show {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// List courses where a teacher has grade records in a period
    Courses {
        #[arg(long)]
        teacher: String,
        #[arg(long)]
        period: String,
    },
    /// Generate a markdown gradebook report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gradebook_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let scale = cli.scale.unwrap_or(config.scale);

    if let Commands::Periods { until } = cli.command {
        let periods = match until {
            Some(year) => period::catalog(year),
            None => period::current_catalog(),
        };
        for period in periods {
            println!("{}\t{}", period, period.label());
        }
        return Ok(());
    }

    let pool = match config.backend {
        BackendKind::Postgres => Some(connect_postgres(&config).await?),
        BackendKind::Graphql => None,
    };
    let backend: Box<dyn GradeBackend> = match &pool {
        Some(pool) => Box::new(PgBackend::new(pool.clone())),
        None => Box::new(GraphqlBackend::new(
            &config.graphql_endpoint,
            &config.roster_api_url,
            config.http_timeout,
        )?),
    };
    tracing::info!(backend = ?config.backend, %scale, "Backend ready");

    let backend = backend.as_ref();
    let engine = Reconciler::new(backend, scale);
    let mut gradebooks = GradebookCache::new();

    match cli.command {
        Commands::Periods { .. } => {}
        Commands::InitDb => {
            db::init_db(require_pool(&pool)?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(require_pool(&pool)?).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRoster { csv } => {
            let imported = db::import_roster(require_pool(&pool)?, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Subjects { teacher } => {
            let subjects = match teacher.as_deref() {
                Some(teacher_id) => view::subjects_for_teacher(backend, teacher_id).await?,
                None => backend.list_subject_catalog().await?,
            };
            if subjects.is_empty() {
                println!("No subjects found.");
            }
            for subject in subjects {
                println!(
                    "- {} ({}) taught by {}",
                    subject.name,
                    subject.id,
                    if subject.teacher_ids.is_empty() {
                        "nobody yet".to_string()
                    } else {
                        subject.teacher_ids.join(", ")
                    }
                );
            }
        }
        Commands::Attach { scope, teacher } => {
            let assignment = view::resolve_assignment(backend, scope.scope()?, &teacher).await?;
            let roster = backend.list_roster(&assignment.scope.course_id).await?;
            let result = engine
                .attach_subject(&assignment.scope, &assignment.teacher, &roster)
                .await?;
            println!(
                "Attached {} to course {} for {}: {} created, {} already present.",
                assignment.subject_name,
                assignment.scope.course_id,
                assignment.scope.period,
                result.count(RecordAction::Created),
                result.count(RecordAction::AlreadyPresent)
            );
            print_gradebook(gradebooks.refresh(backend, &assignment.scope).await?);
            finish(&result)?;
        }
        Commands::Detach { scope } => {
            let scope = scope.scope()?;
            let result = engine.detach_subject(&scope).await?;
            println!(
                "Detached subject {} from course {} for {}: {} records deleted.",
                scope.subject_id,
                scope.course_id,
                scope.period,
                result.count(RecordAction::Deleted)
            );
            gradebooks.invalidate(&scope);
            let remaining = view::subjects_in_course(backend, &scope.course_id, &scope.period).await?;
            if remaining.is_empty() {
                println!("Course {} has no subjects left for {}.", scope.course_id, scope.period);
            } else {
                println!(
                    "Course {} subjects for {}: {}",
                    scope.course_id,
                    scope.period,
                    remaining.join(", ")
                );
            }
            finish(&result)?;
        }
        Commands::Submit {
            scope,
            teacher,
            score,
            csv,
        } => {
            let assignment = view::resolve_assignment(backend, scope.scope()?, &teacher).await?;
            let mut edits: Vec<ScoreEdit> = match csv {
                Some(path) => sheet::read_score_sheet(&path)?,
                None => Vec::new(),
            };
            for pair in &score {
                edits.push(sheet::parse_score_pair(pair)?);
            }

            let result = engine
                .submit_scores(&assignment.scope, &assignment.teacher, &edits)
                .await?;
            println!(
                "{} updated, {} created, {} unchanged.",
                result.count(RecordAction::Updated),
                result.count(RecordAction::Created),
                result.count(RecordAction::Unchanged)
            );
            print_gradebook(gradebooks.refresh(backend, &assignment.scope).await?);
            finish(&result)?;
        }
        Commands::Show { scope } => {
            print_gradebook(gradebooks.get_or_load(backend, &scope.scope()?).await?);
        }
        Commands::Courses { teacher, period } => {
            let teacher = view::find_teacher(backend, &teacher).await?;
            let period = Period::parse(&period)?;
            let courses = view::courses_for_teacher(backend, &teacher, &period).await?;
            if courses.is_empty() {
                println!("{} has no courses in {}.", teacher.name, period.label());
            }
            for course in courses {
                let subjects = view::subjects_in_course(backend, &course, &period).await?;
                println!("- {}: {}", course, subjects.join(", "));
            }
        }
        Commands::Report { scope, out } => {
            let scope = scope.scope()?;
            let subject_name = backend
                .list_subject_catalog()
                .await?
                .into_iter()
                .find(|subject| subject.id == scope.subject_id)
                .map(|subject| subject.name);
            let gradebook = view::load_gradebook(backend, &scope).await?;
            let report = report::build_report(&gradebook, subject_name.as_deref(), scale);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn print_gradebook(gradebook: &Gradebook) {
    println!(
        "{} / {} / {}",
        gradebook.scope.course_id,
        gradebook.scope.subject_id,
        gradebook.scope.period.label()
    );
    if gradebook.rows.is_empty() {
        println!("No students enrolled.");
    }
    for row in &gradebook.rows {
        println!(
            "{}\t{}\t{}",
            row.student.id,
            row.student.full_name,
            row.score
                .map(|score| score.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

async fn connect_postgres(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn require_pool(pool: &Option<PgPool>) -> anyhow::Result<&PgPool> {
    pool.as_ref()
        .context("this command needs GRADEBOOK_BACKEND=postgres")
}

/// Print per-record failures and turn anything short of complete into an error.
fn finish(result: &BatchResult) -> anyhow::Result<()> {
    for failure in &result.failed {
        eprintln!("  failed {}: {}", failure.key, failure.error);
    }
    match result.status() {
        BatchStatus::Complete => {
            println!("Saved.");
            Ok(())
        }
        BatchStatus::Partial => bail!(
            "partially saved: {} of {} records failed ({}); retrying is safe",
            result.failed.len(),
            result.failed.len() + result.succeeded.len(),
            result.failed_students().join(", ")
        ),
        BatchStatus::Failed => bail!(
            "nothing saved: all {} records failed; retrying is safe",
            result.failed.len()
        ),
    }
}

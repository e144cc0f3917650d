use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cell_review::auth::{self, FirebaseIdentity, IdentityProvider, SignUpForm};
use cell_review::config::Config;
use cell_review::db::{self, PgStore};
use cell_review::deletion::{self, DeletionOutcome};
use cell_review::explain::ExplainCoordinator;
use cell_review::inference::HttpInferenceClient;
use cell_review::intake::{self, Intake, UploadForm};
use cell_review::models::Role;
use cell_review::navigation::{self, DetailContext, Route};
use cell_review::session::Session;
use cell_review::{aggregate, dashboard, details, listing, report};

#[derive(Parser)]
#[command(name = "cell-review")]
#[command(about = "Review classified cell image batches", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "CELL_REVIEW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Create an account and its user profile
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// doctor or patient
        #[arg(long)]
        role: Role,
    },
    /// Show the signed-in user's dashboard
    Whoami,
    /// List patients that can be the subject of a batch
    Patients,
    /// List batches uploaded by or about the signed-in user
    Batches,
    /// Per-class summary of one batch
    Summary {
        #[arg(long)]
        batch: String,
    },
    /// Images of one class within a batch
    Details {
        #[arg(long)]
        batch: String,
        #[arg(long)]
        class: String,
    },
    /// Request an explanation overlay for one image
    Explain {
        #[arg(long)]
        batch: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "overlay.png")]
        out: PathBuf,
    },
    /// Validate and upload a batch of 250x250 JPEG images
    Upload {
        #[arg(long)]
        name: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        patient: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete a batch and all of its images
    Delete {
        #[arg(long)]
        batch: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Write a batch summary as CSV
    Export {
        #[arg(long)]
        batch: String,
        #[arg(long, default_value = "summary.csv")]
        out: PathBuf,
    },
}

impl Commands {
    /// Everything except schema setup and account creation acts as a
    /// signed-in user.
    fn requires_session(&self) -> bool {
        !matches!(self, Commands::InitDb | Commands::SignUp { .. })
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn identity(config: &Config) -> anyhow::Result<FirebaseIdentity> {
    let api_key = config
        .identity_api_key
        .clone()
        .context("IDENTITY_API_KEY must be set to reach the identity provider")?;
    FirebaseIdentity::new(config.identity_url.clone(), api_key)
        .context("failed to build identity client")
}

async fn sign_in(provider: &FirebaseIdentity, config: &Config) -> anyhow::Result<Session> {
    let email = config
        .email
        .as_deref()
        .context("CELL_REVIEW_EMAIL must be set")?;
    let password = config
        .password
        .as_deref()
        .context("CELL_REVIEW_PASSWORD must be set")?;
    Ok(auth::sign_in(provider, email, password).await?)
}

fn confirm_on_terminal(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?.with_env_overrides(|key| std::env::var(key).ok());
    init_tracing(&config.log_level);

    match &config.source {
        Some(path) => info!(path = %path.display(), "loaded config"),
        None => warn!("no config file found, using defaults"),
    }

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to the record store's Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    if !cli.command.requires_session() {
        return run_setup(cli.command, &config, &pool, &store).await;
    }

    let provider = identity(&config)?;
    let session = sign_in(&provider, &config).await?;
    let result = run_signed_in(cli.command, &config, &store, &session).await;
    provider.sign_out(session).await;
    result
}

async fn run_setup(
    command: Commands,
    config: &Config,
    pool: &PgPool,
    store: &PgStore,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::SignUp {
            email,
            password,
            first_name,
            last_name,
            role,
        } => {
            let provider = identity(config)?;
            let form = SignUpForm {
                email,
                password,
                first_name,
                last_name,
                role,
            };
            let session = auth::sign_up(&provider, store, &form).await?;
            println!("Account created for {} ({}).", session.email(), role.display_name());
            provider.sign_out(session).await;
        }
        _ => bail!("this command needs a signed-in user"),
    }
    Ok(())
}

async fn run_signed_in(
    command: Commands,
    config: &Config,
    store: &PgStore,
    session: &Session,
) -> anyhow::Result<()> {
    match command {
        Commands::Whoami => {
            let dashboard = dashboard::load_dashboard(store, session).await?;
            print!("{}", report::render_dashboard(&dashboard));
        }
        Commands::Patients => {
            let patients = listing::patient_options(store).await?;
            if patients.is_empty() {
                println!("No patients registered.");
            }
            for (id, name) in patients {
                println!("- {name} ({id})");
            }
        }
        Commands::Batches => {
            let rows = listing::fetch_batch_rows(store, session).await?;
            print!("{}", report::render_batches(&rows));
        }
        Commands::Summary { batch } => {
            let route = Route::BatchSummary(batch.clone());
            let ctx = navigation::resolve_summary_context(store, &batch, None)
                .await
                .with_context(|| format!("cannot open {}", route.path()))?;
            let summary = aggregate::summarize_batch(store, &ctx.batch_id).await;
            print!("{}", report::render_summary(&ctx, &summary));
        }
        Commands::Details { batch, class } => {
            let summary = navigation::resolve_summary_context(store, &batch, None).await?;
            let ctx = DetailContext::try_from(&summary.select_class(&class))?;
            let records = details::fetch_class_details(store, &ctx.batch_id, &ctx.class_label).await?;
            print!("{}", report::render_details(&ctx, &records));
        }
        Commands::Explain {
            batch,
            class,
            image,
            out,
        } => {
            let summary = navigation::resolve_summary_context(store, &batch, None).await?;
            let ctx = DetailContext::try_from(&summary.select_class(&class))?;
            let model = ctx
                .explain_model()
                .with_context(|| format!("batch {batch} has no recorded model to explain with"))?;
            let records = details::fetch_class_details(store, &ctx.batch_id, &ctx.class_label).await?;
            let Some(record) = records.iter().find(|record| record.image_id == image) else {
                bail!("image {image} is not classified as {class} in batch {batch}");
            };

            let service = Arc::new(HttpInferenceClient::new(config.inference_url.clone())?);
            let coordinator = ExplainCoordinator::new(service);
            let overlay = coordinator.explain(record, model).await?;
            std::fs::write(&out, overlay.png_bytes()?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            coordinator.acknowledge(&record.image_id);
            println!("Overlay for {} written to {}.", record.file_name, out.display());
        }
        Commands::Upload {
            name,
            model,
            patient,
            files,
        } => {
            let intake = Intake::from_paths(&files)?;
            if let Some(folder) = intake.folder_name() {
                println!("Folder Name: {folder}");
            }
            let form = UploadForm {
                batch_name: name,
                model,
                patient_id: patient,
            };
            let service = HttpInferenceClient::new(config.inference_url.clone())?;
            intake::submit_upload(
                store,
                &service,
                session,
                intake,
                &form,
                Arc::new(|percent: u8| eprint!("\rUploading... {percent:>3}%")),
                |batch_name| println!("\nBatch uploaded: {batch_name}"),
            )
            .await?;

            let rows = listing::fetch_batch_rows(store, session).await?;
            print!("{}", report::render_batches(&rows));
        }
        Commands::Delete { batch, yes } => {
            let outcome =
                deletion::delete_batch(store, &batch, |prompt| yes || confirm_on_terminal(prompt))
                    .await?;
            match &outcome {
                DeletionOutcome::Declined => println!("Deletion cancelled."),
                DeletionOutcome::Deleted { images_removed } => {
                    println!("Deleted batch {batch} and {images_removed} images.")
                }
                DeletionOutcome::ParentAlreadyAbsent { images_removed } => println!(
                    "Batch {batch} was already gone; removed {images_removed} leftover images."
                ),
                DeletionOutcome::PartiallyDeleted {
                    images_removed,
                    failed,
                } => println!(
                    "Batch {batch} partially deleted ({images_removed} removed, {} failed). Run delete again to retry cleanup: {}",
                    failed.len(),
                    failed.join(", ")
                ),
            }

            if outcome != DeletionOutcome::Declined {
                let rows = listing::fetch_batch_rows(store, session).await?;
                print!("{}", report::render_batches(&rows));
            }
        }
        Commands::Export { batch, out } => {
            let summary = aggregate::summarize_known_batch(store, &batch).await?;
            if let aggregate::SummaryStatus::FetchFailed(reason) = &summary.status {
                bail!("could not load batch {batch}: {reason}");
            }
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_summary_csv(file, &summary)?;
            println!("Summary written to {}.", out.display());
        }
        Commands::InitDb | Commands::SignUp { .. } => {
            bail!("this command runs without signing in")
        }
    }
    Ok(())
}

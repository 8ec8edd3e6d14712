// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drydock::affinity::{AffinityOracle, HttpAffinityOracle};
use drydock::builds::{HttpBuildSource, HttpSignatureVerifier};
use drydock::db;
use drydock::db::models::Release;
use drydock::release::{ReleaseManager, RetainNothing};
use drydock::repository::HttpRepositoryClient;
use drydock::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "/var/lib/drydock/drydock.db";
const DEFAULT_CONFIG_PATH: &str = "/etc/drydock/drydock.toml";

#[derive(Parser)]
#[command(name = "drydock")]
#[command(author, version, about = "Release planning and repository reconciliation for RPM build systems", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the drydock database
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Plan a new release from finished builds
    Create {
        /// Build IDs to release
        #[arg(required = true)]
        build_ids: Vec<i64>,
        /// Restrict planning to specific build tasks
        #[arg(long, value_delimiter = ',')]
        task_ids: Option<Vec<i64>>,
        /// Operator recorded as the release creator
        #[arg(long, default_value = "operator")]
        created_by: String,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Rebuild the plan of a scheduled release
    Update {
        release_id: i64,
        /// Replace the release's build set
        #[arg(long, value_delimiter = ',')]
        build_ids: Option<Vec<i64>>,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Execute a scheduled release against the repository manager
    Commit {
        release_id: i64,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Remove a completed release's content from its repositories
    Revert {
        release_id: i64,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Show a release and its plan summary
    Show {
        release_id: i64,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
}

/// External service clients built from configuration
struct Services {
    client: HttpRepositoryClient,
    oracle: Option<HttpAffinityOracle>,
    builds: HttpBuildSource,
    verifier: HttpSignatureVerifier,
}

impl Services {
    fn from_config(config: &Config) -> Result<Self> {
        let client = HttpRepositoryClient::new(
            &config.repository_manager.endpoint,
            config.repository_manager.token.clone(),
            config.repository_manager.timeout_secs,
        )?;
        let oracle = if config.oracle.enabled {
            Some(HttpAffinityOracle::new(&config.oracle.endpoint)?)
        } else {
            None
        };
        let builds = HttpBuildSource::new(&config.scheduler.endpoint)?;
        let verifier = HttpSignatureVerifier::new(&config.signer.endpoint)?;
        Ok(Self {
            client,
            oracle,
            builds,
            verifier,
        })
    }

    fn manager<'a>(&'a self, config: &'a Config) -> ReleaseManager<'a> {
        ReleaseManager::new(
            &self.client,
            self.oracle.as_ref().map(|o| o as &dyn AffinityOracle),
            &self.builds,
            &self.verifier,
            &RetainNothing,
            &config.platform,
        )
    }
}

fn print_release(release: &Release) {
    let summary = release.plan.summary();
    println!("Release {}", release.id.unwrap_or(0));
    println!("  status:       {}", release.status);
    println!("  platform:     {}", release.platform);
    println!("  created by:   {}", release.created_by);
    println!("  builds:       {:?}", release.build_ids);
    println!(
        "  plan:         {} packages ({} unplaced), {} modules, {} repositories",
        summary.packages, summary.unplaced_packages, summary.modules, summary.repositories
    );
    if let Some(log) = &release.plan.last_log {
        println!("  last log:\n{}", log);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_path } => {
            db::init(&db_path).with_context(|| format!("initializing {db_path}"))?;
            info!("Database initialized at {}", db_path);
        }
        Commands::Create {
            build_ids,
            task_ids,
            created_by,
            db_path,
            config,
        } => {
            let config = Config::load(&config)?;
            let services = Services::from_config(&config)?;
            let mut conn = db::open(&db_path)?;
            let release = services
                .manager(&config)
                .create(&mut conn, build_ids, task_ids, &created_by)
                .await?;
            print_release(&release);
        }
        Commands::Update {
            release_id,
            build_ids,
            db_path,
            config,
        } => {
            let config = Config::load(&config)?;
            let services = Services::from_config(&config)?;
            let mut conn = db::open(&db_path)?;
            let release = services
                .manager(&config)
                .update(&mut conn, release_id, build_ids, None)
                .await?;
            print_release(&release);
        }
        Commands::Commit {
            release_id,
            db_path,
            config,
        } => {
            let config = Config::load(&config)?;
            let services = Services::from_config(&config)?;
            let mut conn = db::open(&db_path)?;
            let (release, message) = services
                .manager(&config)
                .commit(&mut conn, release_id)
                .await?;
            println!("{message}");
            print_release(&release);
        }
        Commands::Revert {
            release_id,
            db_path,
            config,
        } => {
            let config = Config::load(&config)?;
            let services = Services::from_config(&config)?;
            let mut conn = db::open(&db_path)?;
            let (release, message) = services
                .manager(&config)
                .revert(&mut conn, release_id)
                .await?;
            println!("{message}");
            print_release(&release);
        }
        Commands::Show {
            release_id,
            db_path,
        } => {
            let conn = db::open(&db_path)?;
            match Release::find_by_id(&conn, release_id)? {
                Some(release) => print_release(&release),
                None => println!("Release {release_id} not found"),
            }
        }
    }

    Ok(())
}

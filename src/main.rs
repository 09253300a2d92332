use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crm_cache::crm::{ProjectFilter, ProjectStatus};
use crm_cache::{Config, ProjectService};

#[derive(Parser, Debug)]
#[command(name = "crm-cache")]
#[command(about = "Query CRM projects through an identity-scoped cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crm-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the identity of the current session
  Whoami,
  /// List projects visible to the current session
  Projects {
    /// Only projects with this status (e.g. active, on_hold)
    #[arg(short, long)]
    status: Option<String>,
    /// Case-insensitive match on project or client name
    #[arg(short = 'q', long)]
    search: Option<String>,
    /// Drop cached project data before querying
    #[arg(long)]
    refresh: bool,
  },
  /// Show a single project
  Project { id: String },
  /// Check whether the current session may open a project
  Access { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = crm_cache::logging::init(&config.log)?;

  let service = ProjectService::new(&config)?;

  match args.command {
    Command::Whoami => {
      let identity = service.current_identity().await?;
      println!(
        "{} <{}>",
        identity.user_id,
        identity.email.as_deref().unwrap_or("no email")
      );
    }
    Command::Projects {
      status,
      search,
      refresh,
    } => {
      if refresh {
        service.refresh_projects().await?;
      }
      let filter = ProjectFilter {
        status: status.as_deref().map(ProjectStatus::from),
        search,
      };
      let projects = service.list_projects(&filter).await?;
      for project in projects.iter() {
        println!(
          "{:<38} {:<12} {}{}",
          project.id,
          project.status,
          project.name,
          project
            .client_name
            .as_deref()
            .map(|c| format!(" ({})", c))
            .unwrap_or_default()
        );
      }
      let stats = service.cache().stats();
      tracing::info!(count = projects.len(), hits = stats.hits, misses = stats.misses, "listed projects");
    }
    Command::Project { id } => match service.get_project(&id).await? {
      Some(project) => println!("{}", serde_json::to_string_pretty(&project)?),
      None => println!("project {} not found", id),
    },
    Command::Access { id } => {
      let allowed = service.has_project_access(&id).await?;
      println!("{}", if allowed { "allowed" } else { "denied" });
    }
  }

  Ok(())
}

use backoffice::admin;
use backoffice::api::types::{
  Career, Donation, Member, MemberStatus, NewsArticle, Opportunity, SafeguardingReport, Tender,
  User,
};
use backoffice::api::{AdminRecord, ApiClient, Resource};
use backoffice::config::Config;
use backoffice::fees::MembershipType;
use backoffice::logging;
use backoffice::notify::ConsoleNotifier;
use backoffice::query::{QueryClient, SqliteStorage};
use backoffice::AdminContext;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "backoffice")]
#[command(about = "Admin back office client for the site API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/backoffice/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Don't read or write the on-disk cache
  #[arg(long)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the records of a collection
  List {
    resource: Resource,
    /// Ignore cached results
    #[arg(long)]
    refresh: bool,
  },
  /// Create a record from a JSON object
  Create {
    resource: Resource,
    #[arg(long)]
    data: String,
  },
  /// Delete a record
  Delete { resource: Resource, id: String },
  /// Approve or reject a membership application
  MemberStatus { id: String, status: MemberStatus },
  /// Move a safeguarding report to a new status
  ReportStatus { id: String, status: String },
  /// Show the fees for a membership type
  Fee { membership_type: MembershipType },
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Drop every cached result
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Fees are fixed; no config or network needed
  if let Command::Fee { membership_type } = args.command {
    println!(
      "{}: registration {} + subscription {} = {}",
      membership_type,
      membership_type.registration_fee(),
      membership_type.subscription_fee(),
      membership_type.total_fee()
    );
    return Ok(());
  }

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let queries = build_queries(&config, args.no_cache)?;
  if let Command::Cache {
    action: CacheCommand::Clear,
  } = args.command
  {
    queries.clear()?;
    println!("Cache cleared");
    return Ok(());
  }

  let ctx = AdminContext::builder()
    .api(ApiClient::new(&config.api)?)
    .queries(queries)
    .notifier(Arc::new(ConsoleNotifier))
    .build()?;

  match args.command {
    Command::List { resource, refresh } => list(&ctx, resource, refresh).await,
    Command::Create { resource, data } => {
      let body = serde_json::from_str(&data).map_err(|e| eyre!("--data is not valid JSON: {}", e))?;
      admin::create_action(&ctx, resource).trigger(body).await?;
      Ok(())
    }
    Command::Delete { resource, id } => {
      admin::delete_action(&ctx, resource).trigger(id).await?;
      Ok(())
    }
    Command::MemberStatus { id, status } => member_status(&ctx, id, status).await,
    Command::ReportStatus { id, status } => {
      admin::report_status_action(&ctx).trigger((id, status)).await?;
      Ok(())
    }
    Command::Fee { .. } | Command::Cache { .. } => Ok(()),
  }
}

fn build_queries(config: &Config, no_cache: bool) -> Result<QueryClient> {
  let queries = if no_cache || !config.cache.persist {
    QueryClient::new()
  } else {
    let path = match &config.cache.path {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    QueryClient::with_storage(SqliteStorage::open(&path)?)
  };
  Ok(queries.with_stale_time(config.cache.stale_time()))
}

async fn list(ctx: &AdminContext, resource: Resource, refresh: bool) -> Result<()> {
  match resource {
    Resource::Members => print_records::<Member>(ctx, refresh).await,
    Resource::Donations => print_records::<Donation>(ctx, refresh).await,
    Resource::Careers => print_records::<Career>(ctx, refresh).await,
    Resource::Opportunities => print_records::<Opportunity>(ctx, refresh).await,
    Resource::Tenders => print_records::<Tender>(ctx, refresh).await,
    Resource::News => print_records::<NewsArticle>(ctx, refresh).await,
    Resource::SafeguardingReports => print_records::<SafeguardingReport>(ctx, refresh).await,
    Resource::Users => print_records::<User>(ctx, refresh).await,
  }
}

async fn print_records<R: AdminRecord>(ctx: &AdminContext, refresh: bool) -> Result<()> {
  let mut query = admin::records_query::<R>(ctx);
  if refresh {
    ctx.queries().invalidate_queries(query.key());
  }

  let records = query.load().await?;
  if records.is_empty() {
    println!("No {} found", R::RESOURCE);
  }
  for record in records {
    println!("{:<26} {}", record.id(), record.summary());
  }
  Ok(())
}

async fn member_status(ctx: &AdminContext, id: String, status: MemberStatus) -> Result<()> {
  // Load the list first so the optimistic update has something to work on
  let mut members = admin::records_query::<Member>(ctx);
  if let Err(e) = members.load().await {
    tracing::debug!(error = %e, "member list unavailable before status change");
  }

  admin::member_status_mutation(ctx)
    .trigger((id.clone(), status))
    .await?;

  // The key is stale now, so this reads the server's version
  if let Some(member) = members.load().await?.iter().find(|m| m.id == id) {
    println!("{:<26} {}", member.id(), member.summary());
  }
  Ok(())
}

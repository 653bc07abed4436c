use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pbn_manager::content::Persona;
use pbn_manager::logging::{init_logging, LogConfig};
use pbn_manager::manager::{Campaign, CategoryRef, ScheduleRequest};
use pbn_manager::{server, PbnConfig, PbnManager};

#[derive(Parser)]
#[command(name = "pbn-manager")]
#[command(about = "Manage a network of WordPress sites", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "PBN_CONFIG")]
    config: Option<String>,

    /// Log level or filter directive (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON panel
    Serve {
        /// Bind address, defaults to server.bind_addr
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Site registry
    #[command(subcommand)]
    Site(SiteCommands),

    /// Aggregated statistics of every site
    Stats,

    /// Schedule a post on a registered site
    Schedule {
        #[arg(long)]
        site: String,

        #[arg(long)]
        title: String,

        /// HTML body
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,

        /// Read the HTML body from a file
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Category id or name (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Publication time, e.g. 2025-01-01T10:00:00
        #[arg(long, value_parser = parse_datetime)]
        at: NaiveDateTime,
    },

    /// Generate posts with the LLM and schedule them
    Generate {
        /// Target site (repeatable, topics are spread round-robin)
        #[arg(long = "site", required_unless_present = "dry_run")]
        sites: Vec<String>,

        /// Topic (repeatable)
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,

        #[arg(long)]
        persona: Option<String>,

        /// First slot, defaults to the next configured publish hour
        #[arg(long, value_parser = parse_datetime)]
        start: Option<NaiveDateTime>,

        /// Hours between posts
        #[arg(long)]
        interval: Option<u32>,

        /// Category id or name (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Generate and upload a featured image
        #[arg(long)]
        featured_image: bool,

        /// Print the generated posts without publishing
        #[arg(long)]
        dry_run: bool,
    },

    /// Interlinking rules
    #[command(subcommand)]
    Link(LinkCommands),

    /// Writer personas
    #[command(subcommand)]
    Persona(PersonaCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a sample configuration file
    Init {
        #[arg(short, long, default_value = "pbn-manager.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SiteCommands {
    /// Register a site
    Add {
        #[arg(long)]
        url: String,

        #[arg(long)]
        username: String,

        /// Application Password
        #[arg(long, env = "PBN_SITE_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        name: Option<String>,
    },

    /// List registered sites
    List,

    /// Remove a site by id
    Remove { id: i64 },

    /// Check connectivity and credentials of every site
    Check,
}

#[derive(Subcommand)]
enum LinkCommands {
    /// Add or replace a rule
    Add { keyword: String, url: String },

    List,

    Remove { keyword: String },
}

#[derive(Subcommand)]
enum PersonaCommands {
    /// Add or replace a persona
    Add {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        tone: String,

        #[arg(long, default_value = "")]
        language: String,

        #[arg(long, default_value = "")]
        instructions: String,
    },

    List,
}

fn parse_datetime(value: &str) -> std::result::Result<NaiveDateTime, String> {
    let value = value.trim();
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("invalid date/time '{value}', expected YYYY-MM-DDTHH:MM[:SS]"))
}

fn category_refs(values: Vec<String>) -> Vec<CategoryRef> {
    values
        .into_iter()
        .map(|v| match v.trim().parse::<u64>() {
            Ok(id) => CategoryRef::Id(id),
            Err(_) => CategoryRef::Name(v),
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 設定ファイル生成はログ・ストア不要
    if let Commands::Config(ConfigCommands::Init { output, force }) = &cli.command {
        if output.exists() && !force {
            bail!("{} already exists, use --force to overwrite", output.display());
        }
        std::fs::write(output, PbnConfig::sample_toml()?)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Wrote {}", output.display());
        return Ok(());
    }

    let config = PbnConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = LogConfig::from_logging_config(&config.logging);
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(level.clone());
    }
    let _guard = init_logging(&log_config)?;

    let manager = PbnManager::from_config(&config).await?;

    match cli.command {
        Commands::Config(_) => {}
        Commands::Serve { bind } => {
            let addr = match bind {
                Some(addr) => addr,
                None => config
                    .server
                    .bind_addr
                    .parse()
                    .with_context(|| format!("invalid bind address '{}'", config.server.bind_addr))?,
            };
            server::serve(Arc::new(manager), addr).await?;
        }
        Commands::Site(command) => match command {
            SiteCommands::Add {
                url,
                username,
                password,
                name,
            } => {
                let site = manager
                    .add_site(name.as_deref(), &url, &username, SecretString::from(password))
                    .await?;
                println!("Registered site #{} {}", site.id, site.url);
            }
            SiteCommands::List => {
                for site in manager.sites().await? {
                    println!("{:>4}  {:<40}  {}  ({})", site.id, site.url, site.username, site.name);
                }
            }
            SiteCommands::Remove { id } => {
                manager.remove_site(id).await?;
                println!("Removed site #{id}");
            }
            SiteCommands::Check => {
                let reports = manager.health_check_all().await?;
                print_json(&reports)?;
            }
        },
        Commands::Stats => {
            print_json(&manager.aggregate_stats().await?)?;
        }
        Commands::Schedule {
            site,
            title,
            content,
            content_file,
            categories,
            at,
        } => {
            let content = match (content, content_file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("either --content or --content-file is required"),
            };
            let post = manager
                .schedule_post(
                    &site,
                    ScheduleRequest {
                        title,
                        content,
                        categories: category_refs(categories),
                        publish_at: at,
                    },
                )
                .await?;
            print_json(&post)?;
        }
        Commands::Generate {
            sites,
            topics,
            persona,
            start,
            interval,
            categories,
            featured_image,
            dry_run,
        } => {
            if dry_run {
                for topic in &topics {
                    let post = manager.generate_post(topic, persona.as_deref()).await?;
                    print_json(&post)?;
                }
            } else {
                let report = manager
                    .run_campaign(Campaign {
                        topics,
                        sites,
                        persona,
                        start,
                        interval_hours: interval,
                        categories: category_refs(categories),
                        featured_image,
                    })
                    .await?;
                info!(succeeded = report.succeeded, failed = report.failed, "campaign done");
                print_json(&report)?;
            }
        }
        Commands::Link(command) => match command {
            LinkCommands::Add { keyword, url } => {
                let rule = manager.upsert_link(&keyword, &url).await?;
                println!("{} -> {}", rule.keyword, rule.url);
            }
            LinkCommands::List => {
                for rule in manager.links().await? {
                    println!("{} -> {}", rule.keyword, rule.url);
                }
            }
            LinkCommands::Remove { keyword } => {
                manager.delete_link(&keyword).await?;
                println!("Removed '{keyword}'");
            }
        },
        Commands::Persona(command) => match command {
            PersonaCommands::Add {
                name,
                description,
                tone,
                language,
                instructions,
            } => {
                let persona = Persona::new(name)
                    .with_description(description)
                    .with_tone(tone)
                    .with_language(language)
                    .with_instructions(instructions);
                let saved = manager.upsert_persona(persona).await?;
                println!("Saved persona '{}'", saved.name);
            }
            PersonaCommands::List => {
                print_json(&manager.personas().await?)?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = parse_datetime("2025-01-01T10:00:00").unwrap();
        assert_eq!(parse_datetime("2025-01-01 10:00").unwrap(), expected);
        assert!(parse_datetime("tomorrow").is_err());
    }

    #[test]
    fn test_category_refs() {
        assert_eq!(
            category_refs(vec!["3".to_string(), "News".to_string()]),
            vec![CategoryRef::Id(3), CategoryRef::Name("News".to_string())]
        );
    }
}

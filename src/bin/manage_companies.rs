use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use prettytable::{Cell, Row, Table};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use veriaidpo::api::auth::{JwtKeys, Permission};
use veriaidpo::environment::Settings;
use veriaidpo::normalizer::{NormalizeOptions, Normalizer};
use veriaidpo::registry::{Industry, NewCompany, Region, Registry, SearchQuery};
use veriaidpo::TARGET_REGISTRY;

#[derive(Parser)]
#[command(author, version, about = "Manage the VeriAIDPO company registry", long_about = None)]
struct Cli {
    /// Registry file (defaults to VERIAIDPO_REGISTRY_PATH)
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new company
    Add {
        /// Canonical company name
        #[arg(short, long)]
        name: String,

        /// Industry (technology, finance, healthcare, ...)
        #[arg(short, long)]
        industry: String,

        /// Region (north, central, south)
        #[arg(short = 'g', long)]
        region: String,

        /// Comma-separated aliases
        #[arg(short, long, value_delimiter = ',')]
        aliases: Vec<String>,

        /// Only validate, do not write the registry file
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove a company by canonical name or alias
    Remove {
        name: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Search companies by name or alias
    Search {
        query: Option<String>,

        #[arg(short, long)]
        industry: Option<String>,

        #[arg(short = 'g', long)]
        region: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Resolve a name or alias to its canonical name
    Resolve { name: String },

    /// Display registry statistics
    Stats,

    /// Write the registry document as JSON
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how a text is normalized against the registry
    Normalize {
        text: String,

        /// Also replace person names
        #[arg(short, long)]
        persons: bool,
    },

    /// Issue a bearer token signed with JWT_SECRET
    IssueToken {
        #[arg(short, long)]
        subject: String,

        /// Comma-separated permissions (veriaidpo.classify, companies.read, companies.admin)
        #[arg(short, long, value_delimiter = ',', required = true)]
        permissions: Vec<String>,

        #[arg(short, long)]
        tenant: Option<String>,

        /// Lifetime in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    veriaidpo::logging::configure_logging();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Invalid configuration")?;
    let registry_path = cli.registry.unwrap_or_else(|| settings.registry_path.clone());

    let registry = Registry::open(&registry_path)
        .with_context(|| format!("Failed to open registry {}", registry_path.display()))?;

    match cli.command {
        Commands::Add {
            name,
            industry,
            region,
            aliases,
            dry_run,
        } => {
            let industry: Industry = industry.parse()?;
            let region: Region = region.parse()?;
            let mut company = NewCompany::new(&name, industry, region);
            company.aliases = aliases;

            info!(target: TARGET_REGISTRY, "Adding company {} ({}/{})", name, industry, region);
            match registry.add(company, !dry_run) {
                Ok(entry) => {
                    println!(
                        "{} {} with {} aliases",
                        "Added".green().bold(),
                        entry.name,
                        entry.aliases.len()
                    );
                    if dry_run {
                        println!("{}", "Dry run: registry file left unchanged".yellow());
                    }
                }
                Err(e) => bail!("{} {}", "Not added:".red().bold(), e),
            }
        }

        Commands::Remove { name, dry_run } => {
            let removed = registry.remove(&name, !dry_run)?;
            println!("{} {}", "Removed".green().bold(), removed.name);
            if dry_run {
                println!("{}", "Dry run: registry file left unchanged".yellow());
            }
        }

        Commands::Search {
            query,
            industry,
            region,
            limit,
        } => {
            let query = SearchQuery {
                query,
                industry: industry.map(|i| i.parse()).transpose()?,
                region: region.map(|r| r.parse()).transpose()?,
                limit,
            };
            let matches = registry.search(&query);
            if matches.is_empty() {
                println!("{}", "No companies found".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.add_row(Row::new(vec![
                Cell::new("Name"),
                Cell::new("Industry"),
                Cell::new("Region"),
                Cell::new("Aliases"),
                Cell::new("Added"),
            ]));
            for entry in &matches {
                table.add_row(Row::new(vec![
                    Cell::new(&entry.name),
                    Cell::new(entry.industry.as_str()),
                    Cell::new(entry.region.as_str()),
                    Cell::new(&entry.aliases.join(", ")),
                    Cell::new(&entry.added_date.format("%Y-%m-%d %H:%M").to_string()),
                ]));
            }
            table.printstd();
            println!("{} companies", matches.len());
        }

        Commands::Resolve { name } => match registry.resolve(&name) {
            Some(canonical) => println!("{} -> {}", name, canonical.green().bold()),
            None => println!("{} '{}'", "Unknown company".red(), name),
        },

        Commands::Stats => {
            let stats = registry.statistics();
            println!(
                "{} companies, {} aliases",
                stats.total_companies.to_string().bold(),
                stats.total_aliases.to_string().bold()
            );

            let mut table = Table::new();
            table.add_row(Row::new(vec![Cell::new("Industry"), Cell::new("Companies")]));
            for (industry, count) in &stats.by_industry {
                table.add_row(Row::new(vec![
                    Cell::new(industry.as_str()),
                    Cell::new(&count.to_string()),
                ]));
            }
            table.printstd();

            let mut table = Table::new();
            table.add_row(Row::new(vec![Cell::new("Region"), Cell::new("Companies")]));
            for (region, count) in &stats.by_region {
                table.add_row(Row::new(vec![
                    Cell::new(region.as_str()),
                    Cell::new(&count.to_string()),
                ]));
            }
            table.printstd();
        }

        Commands::Export { output } => {
            let json = serde_json::to_string_pretty(&registry.export())?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("{} {}", "Exported to".green(), path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Normalize { text, persons } => {
            let normalizer = Normalizer::with_settings(Arc::new(registry), settings.normalizer);
            let options = NormalizeOptions::default().with_persons(persons);
            let result = normalizer.normalize(&text, &options);
            let report = normalizer.validate(&result.original_text, &result.normalized_text);

            println!("{}", result.normalized_text.bold());
            for entity in &result.entities {
                let canonical = entity
                    .canonical
                    .as_ref()
                    .map(|c| format!(" -> {}", c.name))
                    .unwrap_or_default();
                println!(
                    "  [{}..{}] '{}' {}{}",
                    entity.start, entity.end, entity.surface, entity.placeholder, canonical
                );
            }
            if report.valid {
                println!("{} (length ratio {:.2})", "Valid".green(), report.length_ratio);
            } else {
                for warning in &report.warnings {
                    println!("{} {}", "Warning:".yellow().bold(), warning);
                }
            }
        }

        Commands::IssueToken {
            subject,
            permissions,
            tenant,
            hours,
        } => {
            let secret = settings
                .jwt_secret
                .as_deref()
                .ok_or_else(|| anyhow!("JWT_SECRET must be set to issue tokens"))?;
            let permissions = permissions
                .iter()
                .map(|p| parse_permission(p))
                .collect::<Result<Vec<_>>>()?;
            let token = JwtKeys::from_secret(secret.as_bytes()).issue(
                &subject,
                &permissions,
                tenant.as_deref(),
                chrono::Duration::hours(hours),
            )?;
            println!("{}", token);
        }
    }

    Ok(())
}

/// Parse a permission name into a `Permission`
fn parse_permission(permission: &str) -> Result<Permission> {
    match permission.trim().to_lowercase().as_str() {
        "veriaidpo.classify" | "classify" => Ok(Permission::Classify),
        "companies.read" | "read" => Ok(Permission::CompaniesRead),
        "companies.admin" | "admin" => Ok(Permission::CompaniesAdmin),
        _ => Err(anyhow!(
            "Invalid permission: {}. Must be one of: veriaidpo.classify, companies.read, companies.admin",
            permission
        )),
    }
}

//! Orgtree CLI: run the materialization pipeline and inspect hierarchies
//!
//! Talks to the document store directly using the same configuration as the
//! server binary.

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use orgtree::hierarchy::TreeNode;
use orgtree::{
    DataIssues, DocumentStore, HierarchyService, OrgtreeConfig, Pipeline, RemoteStore, RunReport,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "orgtree", version, about = "Organizational hierarchy materialization")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "ORGTREE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize the hierarchy of every employee (Ctrl-C stops gracefully)
    Run,
    /// Audit the source data without writing anything
    Check,
    /// Show one employee's hierarchy
    Hierarchy {
        /// Employee id
        id: String,
    },
    /// Check that the store is reachable
    Status,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match OrgtreeConfig::load(cli.config.as_deref()) {
        Ok(config) => dispatch(&cli, config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `false` when the command completed with problems worth a non-zero exit
async fn dispatch(cli: &Cli, config: OrgtreeConfig) -> Result<bool, Box<dyn std::error::Error>> {
    let store: Arc<dyn DocumentStore> = Arc::new(RemoteStore::new(&config.store)?);
    match &cli.command {
        Commands::Run => run_pipeline(store, config, &cli.format).await,
        Commands::Check => run_check(store, config, &cli.format).await,
        Commands::Hierarchy { id } => {
            let service = HierarchyService::from_config(store, &config);
            run_hierarchy(&service, id, &cli.format).await.map(|_| true)
        }
        Commands::Status => run_status(store.as_ref(), &config).await.map(|_| true),
    }
}

async fn run_pipeline(
    store: Arc<dyn DocumentStore>,
    config: OrgtreeConfig,
    format: &OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(store, config)?;
    let report = pipeline
        .run_until(interrupted(tokio::signal::ctrl_c()))
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }
    Ok(report.is_clean())
}

/// Resolves once `signal` fires; never resolves if the handler cannot be installed
async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Cannot listen for Ctrl-C ({}); the run can only finish on its own", e);
        futures::future::pending::<()>().await;
    }
}

async fn run_check(
    store: Arc<dyn DocumentStore>,
    config: OrgtreeConfig,
    format: &OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(store, config)?;
    let (pass, issues) = pipeline.check().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&issues)?),
        OutputFormat::Table => {
            println!("Employees: {}", pass.maps.len());
            println!("Roots:     {}", pass.maps.roots().len());
            print_issues(&issues);
        }
    }
    Ok(issues.is_clean())
}

async fn run_hierarchy(service: &HierarchyService, id: &str, format: &OutputFormat) -> CliResult {
    let view = service.get_hierarchy(id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Level", "Id", "Name", "Title", "Department"]);
            add_tree_rows(&mut table, &view.hierarchy_tree);
            println!("{}", table);
            if !view.missing.is_empty() {
                println!("Missing: {}", view.missing.join(", "));
            }
        }
    }
    Ok(())
}

async fn run_status(store: &dyn DocumentStore, config: &OrgtreeConfig) -> CliResult {
    store.ping().await?;
    println!("Store:   {} (reachable)", config.store.url);
    println!("Source:  {}", config.source_index);
    println!("Target:  {}", config.target_index);
    println!("Version: {}", orgtree::version());
    Ok(())
}

fn add_tree_rows(table: &mut Table, node: &TreeNode) {
    let indent = "  ".repeat(node.level);
    let marker = if node.is_target { "*" } else { "" };
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    table.add_row(vec![
        node.level.to_string(),
        format!("{}{}{}", indent, node.profile.id, marker),
        text(&node.profile.name),
        text(&node.profile.title),
        text(&node.profile.department),
    ]);
    for child in &node.reports {
        add_tree_rows(table, child);
    }
}

fn print_report(report: &RunReport) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Run".to_string(), report.run_id.to_string()]);
    table.add_row(vec!["Employees".to_string(), report.employees.to_string()]);
    table.add_row(vec!["Written".to_string(), report.succeeded().to_string()]);
    table.add_row(vec!["Failed".to_string(), report.writes.failed.len().to_string()]);
    table.add_row(vec!["Batches".to_string(), report.writes.batches.to_string()]);
    table.add_row(vec!["Write retries".to_string(), report.writes.write_retries.to_string()]);
    table.add_row(vec!["Read retries".to_string(), report.reads.page_retries.to_string()]);
    table.add_row(vec!["Slice restarts".to_string(), report.reads.slice_restarts.to_string()]);
    table.add_row(vec!["Longest chain".to_string(), report.longest_chain.to_string()]);
    table.add_row(vec![
        "Elapsed".to_string(),
        format!("{}ms", report.elapsed().num_milliseconds()),
    ]);
    if report.cancelled {
        table.add_row(vec!["Cancelled".to_string(), "yes".to_string()]);
    }
    println!("{}", table);

    print_issues(&report.data_issues);
    for failed in report.writes.failed.iter().take(20) {
        println!("  failed {}: {}", failed.id, failed.reason);
    }
}

fn print_issues(issues: &DataIssues) {
    if issues.is_clean() {
        println!("No data issues");
        return;
    }
    let cycles = issues.cycles_detected();
    println!("Cycle-affected employees: {}", cycles.len());
    for id in cycles.iter().take(20) {
        println!("  {}", id);
    }
    println!("Dangling references: {}", issues.dangling_references.len());
    for dangling in issues.dangling_references.iter().take(20) {
        println!("  {} -> {}", dangling.employee, dangling.missing_manager);
    }
    println!("Invalid records: {}", issues.invalid_records.len());
    println!("Duplicate records: {}", issues.duplicate_records);
    if !issues.late_records.is_empty() {
        println!("Late records: {}", issues.late_records.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_interrupted_on_signal() {
        let fired = tokio::time::timeout(Duration::from_millis(100), interrupted(async { Ok(()) })).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn test_failed_signal_handler_never_interrupts() {
        let signal = async { Err(std::io::Error::other("signal handler unavailable")) };
        let fired = tokio::time::timeout(Duration::from_millis(50), interrupted(signal)).await;
        assert!(fired.is_err());
    }
}

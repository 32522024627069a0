use clap::{Parser, Subcommand, builder::styling};
use etl_pipeline::cli::{check_pipeline, run_pipeline};
use etl_pipeline::etl::PipelineRun;
use eyre::{Result, eyre};
use owo_colors::OwoColorize;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// ETL pipeline: clean CSV, JSON and XML files into blob storage and a database table
#[derive(Parser)]
#[command(name = "etlp", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// The pipeline configuration file
    #[arg(short, long, global = true, default_value = "etl.yml")]
    config: String,

    /// Command to execute; runs the pipeline when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full extract, transform and load pass
    Run,

    /// Validate the configuration and sources without touching any sink
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            log::info!("Running pipeline from {}", cli.config.bright_black());
            let run = run_pipeline(&cli.config).await?;
            print_summary(&run);
            if let Some(error) = run.error {
                return Err(eyre!("Run {} failed: {}", run.run_id, error));
            }
        }
        Commands::Check => {
            let sources = check_pipeline(&cli.config)?;
            println!(
                "{} {} ({} source(s))",
                "valid".green(),
                cli.config.bright_black(),
                sources
            );
        }
    }

    Ok(())
}

fn print_summary(run: &PipelineRun) {
    let status = match run.succeeded() {
        true => run.status().green().to_string(),
        false => run.status().red().to_string(),
    };
    println!(
        "{} {}: {} row(s) extracted, {} loaded",
        run.run_id.bright_black(),
        status,
        run.extracted_rows.cyan(),
        run.loaded_rows.cyan()
    );
    if let Some(report) = &run.transform
        && !report.is_clean()
    {
        println!(
            "  transform: {} dropped, {} missing required, {} nulled, {} conversion failure(s)",
            report.dropped.yellow(),
            report.missing_required.yellow(),
            report.nulled.yellow(),
            report.conversion_failures.yellow()
        );
    }
    if let Some(error) = &run.error {
        println!("  {}: {}", error.kind().red(), error);
    }
}

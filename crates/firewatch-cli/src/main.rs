use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use firewatch::config::{Config, DEFAULT_CONFIG_FILE};
use firewatch::utils::ForecastStats;
use firewatch::{
    FeedParser, FireBanExtractor, ForecastAssembler, ForecastService, HtmlPageParser,
    RegionRegistry, RssParser,
};

#[derive(Parser)]
#[command(name = "firewatch")]
#[command(about = "CFA fire danger ratings and Total Fire Ban forecasts", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        short = 'c',
        long = "config",
        default_value = DEFAULT_CONFIG_FILE,
        global = true,
        help = "Path to the TOML configuration file"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the four-day forecast for one or more fire districts
    Forecast {
        #[arg(
            short = 'r',
            long = "regions",
            help = "Comma-separated region ids, defaults to the configured region"
        )]
        regions: Option<String>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// List the fire districts and their feed addresses
    Regions {
        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Extract a forecast from a saved feed or district page without fetching
    Parse {
        #[arg(help = "Path to a saved RSS feed (or HTML page with --html)")]
        file: PathBuf,

        #[arg(short = 'r', long = "region", help = "Region id the feed belongs to")]
        region: String,

        #[arg(long, help = "Treat the file as a district HTML page")]
        html: bool,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let config = Config::load_from_path(&cli.config).unwrap_or_else(|e| {
        log::error!("Error loading config: {}", e);
        process::exit(1);
    });

    match cli.command {
        Commands::Forecast { regions, format } => {
            let service = ForecastService::from_config(Arc::new(config)).unwrap_or_else(|e| {
                log::error!("Error creating scraper: {}", e);
                process::exit(1);
            });

            let requested = regions.unwrap_or_default();
            log::info!(
                "Fetching forecast for {}...",
                if requested.trim().is_empty() {
                    service.config().default_region.as_str()
                } else {
                    requested.as_str()
                }
            );

            let result = service.forecast(&requested).await;

            match format {
                OutputFormat::Json => serialize_json(&result),
                OutputFormat::Text => {
                    if result.is_unavailable() {
                        println!("Fire danger data unavailable.");
                    }
                    for forecast in result.ordered() {
                        println!("{}", forecast);
                    }
                    print!("{}", ForecastStats::from_aggregate(&result));
                    println!(
                        "  Next update:         {}",
                        result.next_scheduled_update.format("%Y-%m-%d %H:%M UTC")
                    );
                }
            }

            if result.is_unavailable() {
                process::exit(1);
            }
        }

        Commands::Regions { format } => {
            let registry = RegionRegistry::cfa();
            match format {
                OutputFormat::Json => serialize_json(&registry.regions()),
                OutputFormat::Text => {
                    for (i, region) in registry.regions().iter().enumerate() {
                        println!("{:>3}. {:<40} {}", i + 1, region.id, region.name);
                        println!("     {}", region.feed_address);
                    }
                }
            }
        }

        Commands::Parse {
            file,
            region,
            html,
            format,
        } => {
            let registry = RegionRegistry::cfa();
            let region = registry.locate(region.trim()).unwrap_or_else(|e| {
                log::error!("{}", e);
                process::exit(1);
            });

            let bytes = fs::read(&file).unwrap_or_else(|e| {
                log::error!("Error reading {}: {}", file.display(), e);
                process::exit(1);
            });

            let parser: &dyn FeedParser = if html { &HtmlPageParser } else { &RssParser };
            let assembler = ForecastAssembler::new(FireBanExtractor::new(
                registry.clone(),
                config.directional_qualifiers.clone(),
            ));

            let source = file.display().to_string();
            let forecast = assembler
                .try_assemble_at(&bytes, parser, region, &source, Utc::now())
                .unwrap_or_else(|e| {
                    log::error!("Error parsing {}: {}", source, e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&forecast),
                OutputFormat::Text => println!("{}", forecast),
            }
        }
    }
}

use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use escolas::{ClientSettings, MissingCityPolicy, Pipeline, ScrapeConfig};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "escolas")]
#[command(about = "A consultaescolas.pr.gov.br demand/supply scraper", long_about = None)]
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
        long,
        global = true,
        help = "Portal base URL",
        default_value = "https://www.consultaescolas.pr.gov.br/consultaescolas-java"
    )]
    base_url: String,

    #[arg(
        long = "timeout-secs",
        global = true,
        default_value_t = 30,
        help = "Per-request timeout in seconds"
    )]
    timeout_secs: u64,

    #[arg(
        long = "delay-ms",
        global = true,
        default_value_t = 0,
        help = "Pause before every request, in milliseconds"
    )]
    delay_ms: u64,

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
    /// Scrape every school listed in a spreadsheet and write the merged CSV
    Run {
        #[arg(help = "Input spreadsheet (.xlsx, .xls, .ods or .csv)")]
        input: PathBuf,

        #[arg(long = "out", default_value = "escolas_parana.csv", help = "Output CSV path")]
        out: PathBuf,

        #[arg(
            long = "unit-timeout-secs",
            default_value_t = 300,
            value_parser = clap::value_parser!(u64).range(1..),
            help = "Time allowed for one school, in seconds"
        )]
        unit_timeout_secs: u64,

        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(1..),
            help = "Maximum listing pages fetched per school"
        )]
        max_pages: Option<u32>,

        #[arg(
            long,
            default_value_t = 6,
            help = "Maximum navigation steps from a school page to its listing"
        )]
        max_hops: usize,

        #[arg(
            short = 'j',
            long,
            default_value_t = 1,
            help = "Schools processed concurrently"
        )]
        jobs: usize,

        #[arg(long, default_value = "mun2", help = "Spreadsheet column holding the city")]
        city_column: String,

        #[arg(
            long,
            default_value = "Estabelecimento_scrapping",
            help = "Spreadsheet column holding the school"
        )]
        school_column: String,

        #[arg(long, default_value = "3", help = "Teaching network filter code")]
        network_code: String,

        #[arg(
            long,
            default_value = "skip",
            value_parser = parse_policy,
            help = "What to do with cities missing from the portal: skip or abort"
        )]
        missing_city: MissingCityPolicy,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Summary format"
        )]
        format: OutputFormat,
    },
    /// List the cities offered by the portal
    Cities {
        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// List the schools the portal offers under a city
    Schools {
        #[arg(help = "City name or code")]
        city: String,

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

fn parse_policy(s: &str) -> Result<MissingCityPolicy, String> {
    MissingCityPolicy::from_str(s).map_err(|e| e.to_string())
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

    let client = ClientSettings {
        base_url: cli.base_url,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        request_delay: Duration::from_millis(cli.delay_ms),
    };

    match cli.command {
        Commands::Run {
            input,
            out,
            unit_timeout_secs,
            max_pages,
            max_hops,
            jobs,
            city_column,
            school_column,
            network_code,
            missing_city,
            format,
        } => {
            let mut config = ScrapeConfig::new(input);
            config.output_path = out;
            config.client = client;
            config.unit_timeout = Duration::from_secs(unit_timeout_secs);
            config.max_pages = max_pages;
            config.max_hops = max_hops;
            config.jobs = jobs;
            config.columns.city = city_column;
            config.columns.school = school_column;
            config.network_code = network_code;
            config.missing_city = missing_city;

            let config = config.validate().unwrap_or_else(|e| {
                log::error!("Invalid args: {e}");
                process::exit(1);
            });

            log::info!(
                "Scraping targets from {} into {}...",
                config.input_path.display(),
                config.output_path.display()
            );

            let summary = Pipeline::from_config(config)
                .run()
                .await
                .unwrap_or_else(|e| {
                    log::error!("Run failed: {}", e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&summary),
                OutputFormat::Text => print!("{}", summary),
            }
        }

        Commands::Cities { format } => {
            let mut config = ScrapeConfig::new("");
            config.client = client;
            let pipeline = Pipeline::from_config(config);

            let cities = pipeline.fetch_catalog().await.unwrap_or_else(|e| {
                log::error!("Error fetching city catalog: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&cities),
                OutputFormat::Text => {
                    if cities.is_empty() {
                        println!("No cities to display.");
                    }
                    for (i, city) in cities.iter().enumerate() {
                        println!("{:>4}. {}", i + 1, city);
                    }
                }
            }
        }

        Commands::Schools { city, format } => {
            let mut config = ScrapeConfig::new("");
            config.client = client;
            let pipeline = Pipeline::from_config(config);

            log::info!("Fetching schools offered under {}...", city);

            let (city, schools) = pipeline.list_schools(&city).await.unwrap_or_else(|e| {
                log::error!("Error fetching schools: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&schools),
                OutputFormat::Text => {
                    println!("{}", city);
                    for (i, school) in schools.iter().enumerate() {
                        println!("{:>4}. {}", i + 1, school);
                    }
                }
            }
        }
    }
}

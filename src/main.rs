//! EV Registration Demand CLI
//!
//! Import registration data, train a regressor over (year, month, region)
//! and predict monthly electric vehicle registrations.

use clap::{Parser, Subcommand};
use ev_demand::model::ModelKind;
use ev_demand::{Config, Result, UnknownRegionPolicy};

#[derive(Parser)]
#[command(name = "ev-demand")]
#[command(about = "Electric vehicle registration demand prediction", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Build the feature schema and train the model
    Train {
        /// Override the configured model
        #[arg(long)]
        model: Option<ModelKind>,
        /// Override number of MLP epochs
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Predict registrations for a region and month
    Predict {
        year: i32,
        month: u32,
        /// Region label, e.g. "King, WA"
        region: String,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
        /// Override the configured unknown-region policy
        #[arg(long)]
        unknown_region: Option<UnknownRegionPolicy>,
    },
    /// Prompt for requests in a loop against one loaded model
    Interactive {
        /// Override the configured unknown-region policy
        #[arg(long)]
        unknown_region: Option<UnknownRegionPolicy>,
    },
    /// Model management commands
    Model {
        #[command(subcommand)]
        action: ModelCommands,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import observations from a CSV file
    Import {
        /// CSV file path
        path: String,
        /// Input is raw dated county records (Date, County, State, ...)
        #[arg(long)]
        raw: bool,
        /// Remove stored observations before importing
        #[arg(long)]
        replace: bool,
    },
    /// Export stored observations as prepared CSV
    Export {
        /// Output path
        path: String,
    },
    /// Show database status
    Status,
    /// List stored regions
    Regions,
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Show model information
    Info,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown format: {}. Use table, json, or csv.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Run command
    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { path, raw, replace } => {
                commands::data_import(&config, &path, raw, replace)
            }
            DataCommands::Export { path } => commands::data_export(&config, &path),
            DataCommands::Status => commands::data_status(&config),
            DataCommands::Regions => commands::data_regions(&config),
        },
        Commands::Train { model, epochs } => commands::train(&config, model, epochs),
        Commands::Predict {
            year,
            month,
            region,
            format,
            unknown_region,
        } => commands::predict(&config, year, month, region, format, unknown_region),
        Commands::Interactive { unknown_region } => commands::interactive(&config, unknown_region),
        Commands::Model { action } => match action {
            ModelCommands::Info => commands::model_info(&config),
        },
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use ev_demand::data::{ingest, Database};
    use ev_demand::predict::{format_prediction, ModelArtifact, Predictor};
    use ev_demand::training::SchemaBuilder;
    use ev_demand::{EvError, Prediction, PredictionRequest};
    use std::io::{BufRead, Write};

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        std::fs::create_dir_all("models")?;
        println!("Created data/ and models/ directories");

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'ev-demand data import final_data.csv' to load observations");
        println!("  3. Run 'ev-demand train' to train the model");
        println!("  4. Run 'ev-demand predict 2024 6 \"King, WA\"' to make predictions");

        Ok(())
    }

    pub fn data_import(config: &Config, path: &str, raw: bool, replace: bool) -> Result<()> {
        let observations = if raw {
            ingest::read_registrations(path)?
        } else {
            ingest::read_observations(path)?
        };

        let mut db = Database::open(&config.data.database_path)?;
        if replace {
            let removed = db.clear_observations()?;
            println!("Removed {} stored observations", removed);
        }

        let count = db.insert_observations(&observations)?;
        println!("Imported {} observations from {}", count, path);

        let stats = db.get_stats()?;
        println!(
            "Database now holds {} observations across {} regions",
            stats.observation_count, stats.region_count
        );
        Ok(())
    }

    pub fn data_export(config: &Config, path: &str) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let observations = db.get_all_observations()?;
        ingest::write_observations(path, &observations)?;
        println!("Exported {} observations to {}", observations.len(), path);
        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:          {}", config.data.database_path);
        println!("  Observations:  {}", stats.observation_count);
        println!("  Regions:       {}", stats.region_count);
        println!("  Registrations: {:.0}", stats.total_registrations);
        if let (Some((y0, m0)), Some((y1, m1))) = (stats.earliest_period, stats.latest_period) {
            println!("  Range:         {}-{:02} to {}-{:02}", y0, m0, y1, m1);
        }

        Ok(())
    }

    pub fn data_regions(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let regions = db.regions()?;

        if regions.is_empty() {
            println!("No regions stored. Run 'ev-demand data import' first.");
            return Ok(());
        }
        for region in &regions {
            println!("{}", region);
        }
        println!("\n{} regions", regions.len());
        Ok(())
    }

    pub fn train(config: &Config, model: Option<ModelKind>, epochs: Option<usize>) -> Result<()> {
        let mut training_config = config.training.clone();
        if let Some(kind) = model {
            training_config.model = kind;
        }
        if let Some(e) = epochs {
            training_config.mlp.epochs = e;
        }

        let db = Database::open(&config.data.database_path)?;
        let observations = db.get_all_observations()?;
        if observations.is_empty() {
            return Err(EvError::Config(
                "No observations in database. Run 'ev-demand data import' first.".to_string(),
            ));
        }

        println!(
            "Training {} model on {} observations...",
            training_config.model,
            observations.len()
        );

        let artifact = SchemaBuilder::new(training_config).build(&observations)?;
        artifact.save(&config.data.model_path)?;

        println!("\nTraining complete!");
        println!("{}", artifact.report);
        println!("\nModel saved to {}", config.data.model_path);

        Ok(())
    }

    fn load_predictor(config: &Config, policy: Option<UnknownRegionPolicy>) -> Result<Predictor> {
        let policy = policy.unwrap_or(config.inference.unknown_region);
        Predictor::load(&config.data.model_path, policy)
    }

    pub fn predict(
        config: &Config,
        year: i32,
        month: u32,
        region: String,
        format: OutputFormat,
        policy: Option<UnknownRegionPolicy>,
    ) -> Result<()> {
        let predictor = load_predictor(config, policy)?;
        let prediction = predictor.predict(&PredictionRequest::new(year, month, region))?;

        match format {
            OutputFormat::Table => print!("{}", format_prediction(&prediction)),
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&prediction)
                    .map_err(|e| EvError::Parse(e.to_string()))?;
                println!("{}", json);
            }
            OutputFormat::Csv => write_csv(&prediction)?,
        }

        Ok(())
    }

    fn write_csv(prediction: &Prediction) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(std::io::stdout());
        wtr.write_record(["year", "month", "region", "registrations", "raw_estimate", "region_known"])?;
        wtr.write_record([
            prediction.request.year.to_string(),
            prediction.request.month.to_string(),
            prediction.request.region.clone(),
            prediction.registrations.to_string(),
            format!("{:.4}", prediction.raw_estimate),
            prediction.region_known.to_string(),
        ])?;
        wtr.flush()?;
        Ok(())
    }

    pub fn interactive(config: &Config, policy: Option<UnknownRegionPolicy>) -> Result<()> {
        let predictor = load_predictor(config, policy)?;

        println!(
            "Loaded {} model with {} regions (unknown regions: {})",
            predictor.model_kind(),
            predictor.regions().len(),
            predictor.policy()
        );
        println!("Type 'regions' to list known regions, 'quit' to exit.\n");

        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            let Some(year) = prompt(&mut lines, "Year")? else { break };
            if year.eq_ignore_ascii_case("regions") {
                for region in predictor.regions() {
                    println!("  {}", region);
                }
                continue;
            }
            let year: i32 = match year.parse() {
                Ok(y) => y,
                Err(_) => {
                    eprintln!("Error: year must be a whole number");
                    continue;
                }
            };

            let Some(month) = prompt(&mut lines, "Month (1-12)")? else { break };
            let month: u32 = match month.parse() {
                Ok(m) => m,
                Err(_) => {
                    eprintln!("Error: month must be a whole number");
                    continue;
                }
            };

            let Some(region) = prompt(&mut lines, "Region (County, ST)")? else { break };

            match predictor.predict(&PredictionRequest::new(year, month, region)) {
                Ok(prediction) => print!("{}", format_prediction(&prediction)),
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        println!("Bye.");
        Ok(())
    }

    /// Read one trimmed answer; None on end of input or "quit"
    fn prompt<I>(lines: &mut I, label: &str) -> Result<Option<String>>
    where
        I: Iterator<Item = std::io::Result<String>>,
    {
        print!("{}: ", label);
        std::io::stdout().flush()?;

        match lines.next() {
            Some(line) => {
                let answer = line?.trim().to_string();
                if answer.eq_ignore_ascii_case("quit") || answer.eq_ignore_ascii_case("exit") {
                    Ok(None)
                } else {
                    Ok(Some(answer))
                }
            }
            None => Ok(None),
        }
    }

    pub fn model_info(config: &Config) -> Result<()> {
        let artifact = ModelArtifact::load(&config.data.model_path)?;
        let regions: Vec<&str> = artifact.schema.regions().map(|(_, r)| r).collect();

        println!("Model Information");
        println!("───────────────────────────────");
        println!("  Path:     {}", config.data.model_path);
        println!("  Columns:  {}", artifact.schema.len());
        println!("  Regions:  {}", regions.len());
        for region in regions.iter().take(10) {
            println!("    {}", region);
        }
        if regions.len() > 10 {
            println!("    ... and {} more", regions.len() - 10);
        }
        println!();
        println!("{}", artifact.report);

        if let ev_demand::model::ModelState::RandomForest(forest) = &artifact.model {
            let mut ranked: Vec<(&String, f64)> = artifact
                .schema
                .columns()
                .iter()
                .zip(forest.feature_importances().iter().copied())
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            println!("\nTop feature importances:");
            for (column, importance) in ranked.iter().take(5) {
                println!("  {:<30} {:.4}", column, importance);
            }
        }

        Ok(())
    }
}

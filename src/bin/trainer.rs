use anyhow::{Context, Result};
use bsprec::{init_tracing, Algorithm, Config, TrainingService};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Edge list with one `user item [rating]` per line.
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the trained factors.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Algorithm::Sgd)]
    algorithm: Algorithm,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting BspRec trainer");

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config).with_context(|| format!("Failed to load {}", args.config))?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    info!("Engine configuration: {:?}", config.engine);

    let mut service = TrainingService::new(config)?;
    service.load_ratings_file(&args.input)?;

    let report = service.train(args.algorithm)?;

    if let Some(path) = &args.output {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let written = service.write_factors(&mut writer)?;
        info!("Wrote {} factor vectors to {}", written, path.display());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

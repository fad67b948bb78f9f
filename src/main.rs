//! `polscan` command-line entry point.
//!
//! ```text
//! polscan scan --config polscan.toml --mock
//! polscan fit --band-min 605 --band-max 615 --fix theta0 --theta0 30 data/scan_*.csv
//! polscan plan --start 0 --end 90 --step 30
//! polscan defaults > polscan.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use polscan::analysis::{load_metric_dataset, Band, CurveFitter, PolarizationModel};
use polscan::config::{ApplicationConfig, FitSettings, Settings};
use polscan::data::artifact::write_metric_dataset;
use polscan::hardware::mock::{MockRotator, MockSpectrometer};
use polscan::logging;
use polscan::scan::{plan, LiveDisplay, ScanEvent, ScanOrchestrator, TracingDisplay};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Polarization scan controller
#[derive(Parser)]
#[command(name = "polscan")]
#[command(about = "Rotate a stage, acquire spectra and fit the angular response")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan and fit the collected metric
    Scan {
        /// Settings file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use simulated devices
        #[arg(long)]
        mock: bool,
    },

    /// Fit previously saved artifacts
    Fit {
        /// Lower edge of the metric band
        #[arg(long)]
        band_min: f64,

        /// Upper edge of the metric band
        #[arg(long)]
        band_max: f64,

        /// Hold a parameter at its initial value
        #[arg(long, value_enum)]
        fix: Vec<FitParameter>,

        /// Angle multiplier of the model
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        k: u32,

        /// Initial baseline offset
        #[arg(long)]
        y0: Option<f64>,

        /// Initial amplitude
        #[arg(long)]
        amplitude: Option<f64>,

        /// Initial phase offset in degrees
        #[arg(long)]
        theta0: Option<f64>,

        /// Save the `(angle, metric)` dataset here
        #[arg(long)]
        save: Option<PathBuf>,

        /// Print the fit result as JSON
        #[arg(long)]
        json: bool,

        /// Artifact files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the built-in default settings as TOML
    Defaults,

    /// Print the step plan for an angle range
    Plan {
        /// First angle
        #[arg(long, allow_hyphen_values = true)]
        start: f64,

        /// Last angle
        #[arg(long, allow_hyphen_values = true)]
        end: f64,

        /// Signed increment
        #[arg(long, allow_hyphen_values = true)]
        step: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FitParameter {
    Y0,
    A,
    Theta0,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Scan { config, mock } => run_scan(config, mock).await,
        Command::Fit {
            band_min,
            band_max,
            fix,
            k,
            y0,
            amplitude,
            theta0,
            save,
            json,
            files,
        } => {
            logging::init_from_config(&ApplicationConfig::default())?;
            let mut settings = FitSettings {
                k,
                ..FitSettings::default()
            };
            settings.y0.initial = y0;
            settings.amplitude.initial = amplitude;
            settings.theta0.initial = theta0;
            for parameter in fix {
                match parameter {
                    FitParameter::Y0 => settings.y0.fixed = true,
                    FitParameter::A => settings.amplitude.fixed = true,
                    FitParameter::Theta0 => settings.theta0.fixed = true,
                }
            }
            let band = Band::new(band_min, band_max)?;
            run_fit(band, settings, save, json, &files)
        }
        Command::Defaults => {
            print!("{}", toml::to_string_pretty(&Settings::default())?);
            Ok(())
        }
        Command::Plan { start, end, step } => {
            let angles = plan(start, end, step)?;
            println!("{} steps", angles.len());
            for (i, angle) in angles.iter().enumerate() {
                println!("{:>4}  {:.3}", i + 1, angle);
            }
            Ok(())
        }
    }
}

async fn run_scan(config: Option<PathBuf>, mock: bool) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("loading settings")?;
    logging::init_from_config(&settings.application)?;
    info!(app = %settings.application.name, "Starting");

    if !mock {
        bail!("no hardware adapters are configured; run with --mock for simulated devices");
    }

    let scan = settings.scan.clone();
    std::fs::create_dir_all(&scan.save_directory)
        .with_context(|| format!("creating {}", scan.save_directory.display()))?;

    let rotator = Arc::new(MockRotator::new().with_jitter(0.05));
    let spectrometer = Arc::new(
        MockSpectrometer::new(&scan.save_directory)
            .with_extension(&scan.artifact_extension)
            .with_rotator(Arc::clone(&rotator))
            .with_exposure(std::time::Duration::from_millis(50)),
    );
    let display: Option<Arc<dyn LiveDisplay>> = Some(Arc::new(TracingDisplay));

    let (orchestrator, mut events) =
        ScanOrchestrator::new(rotator, spectrometer, settings.timeouts.clone(), display);
    let orchestrator = Arc::new(orchestrator);

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received");
                orchestrator.abort();
            }
        });
    }

    orchestrator.start(scan.clone()).await?;

    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Status { message, is_error } => {
                if is_error {
                    eprintln!("! {message}");
                } else {
                    println!("  {message}");
                }
            }
            ScanEvent::Progress(p) => {
                let eta = p
                    .eta_seconds
                    .map(|s| format!(", ETA {s:.0}s"))
                    .unwrap_or_default();
                println!(
                    "  [{:>3.0}%] {}/{}{}",
                    p.fraction * 100.0,
                    p.current_step,
                    p.total_steps,
                    eta
                );
            }
            ScanEvent::Completed { message, .. } => {
                println!("{message}");
                break;
            }
        }
    }

    let results = orchestrator.results();
    println!("{} steps recorded", results.len());

    let points = results.metric_points();
    if points.is_empty() {
        return Ok(());
    }
    let dataset_path = scan
        .save_directory
        .join(format!("{}_intensity_vs_angle.txt", scan.base_filename));
    write_metric_dataset(&dataset_path, &points)?;

    match orchestrator.fit_with_settings(&settings.fit) {
        Ok(fit) => println!("{}", fit.summary()),
        Err(e) => eprintln!("Fit Error: {e}"),
    }
    Ok(())
}

fn run_fit(
    band: Band,
    settings: FitSettings,
    save: Option<PathBuf>,
    json: bool,
    files: &[PathBuf],
) -> Result<()> {
    let loaded = load_metric_dataset(files, &band)?;
    println!("{}", loaded.summary());

    if let Some(path) = save {
        write_metric_dataset(&path, &loaded.points)?;
    }

    let model = PolarizationModel::new(settings.k);
    let (initial, bounds, fixed) = model.inputs_from_settings(&settings, &loaded.points);
    let result =
        CurveFitter::from(&settings).fit(&model, &initial, &bounds, &fixed, &loaded.points)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.summary());
    }
    Ok(())
}

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use pbf_scanner::{Entity, ScanOptions, Scanner};
use tracing::{info, warn, Level};

#[derive(clap::Parser)]
struct ClArgs {
    /// Input .osm.pbf file
    #[arg()]
    input: PathBuf,

    /// Number of decode threads (defaults to the number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print every decoded entity
    #[arg(long)]
    print: bool,

    /// Verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClArgs::parse();

    let level = match args.verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let size = std::fs::metadata(&args.input)?.len();
    let file = std::io::BufReader::new(std::fs::File::open(&args.input)?);
    let mut options = ScanOptions::default();
    if let Some(workers) = args.workers {
        options = options.workers(workers);
    }
    let mut scanner = Scanner::with_options(file, options);

    let header = scanner.header()?;
    info!("Writing program: {}", header.writing_program);
    if let Some(bbox) = header.bounding_box {
        info!("Bounding box: {:?}", bbox);
    }
    for feature in header.unsupported_features() {
        warn!("File requires unsupported feature '{}'", feature);
    }

    let (mut nodes, mut ways, mut relations) = (0u64, 0u64, 0u64);
    let mut last_report = Instant::now();
    while let Some(entity) = scanner.next_entity() {
        if args.print {
            println!("{:?}", entity);
        }
        match entity {
            Entity::Node(_) => nodes += 1,
            Entity::Way(_) => ways += 1,
            Entity::Relation(_) => relations += 1,
        }
        if last_report.elapsed() >= PROGRESS_INTERVAL {
            let done = scanner.bytes();
            info!("{} / {} bytes ({:.1}%)", done, size, 100.0 * done as f64 / size.max(1) as f64);
            last_report = Instant::now();
        }
    }

    if let Some(err) = scanner.error() {
        return Err(err.into());
    }
    println!("{} nodes, {} ways, and {} relations", nodes, ways, relations);
    Ok(())
}

use std::env;
use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{error, info, LevelFilter};

use betaduck::cli::{parse, Commands};
use betaduck::config::defs::PipelineError;
use betaduck::pipelines::{align, compress, config, plot, tidy};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n betaduck\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    if let Err(e) = run_command(&args.command).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn run_command(command: &Commands) -> Result<(), PipelineError> {
    match command {
        Commands::Config(args) => config::run(args).await,
        Commands::Tidy(args) => tidy::run(args).await,
        Commands::Compress(args) => compress::run(args).await,
        Commands::Plot(args) => plot::run(args).await,
        Commands::Align(args) => align::run(args).await,
    }
}

use std::env;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, info, LevelFilter};
use ccs_check::cli::{self, Command};
use ccs_check::config::defs::{PipelineError, RunConfig, QUEUE_CAPACITY};
use ccs_check::pipelines::ccs_check as ccs;
use ccs_check::utils::file::resolve_path;
use ccs_check::utils::streams::install_panic_hook;
use ccs_check::utils::system::{detect_ram, detect_workers};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = match cli::parse_from(env::args_os()) {
        Command::Help => {
            println!("{}", cli::usage());
            return Ok(());
        }
        Command::Usage(msg) => {
            println!("{}\n", msg);
            println!("{}", cli::usage());
            return Ok(());
        }
        Command::Run(args) => args,
    };

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
    install_panic_hook();

    println!("\n-------------\n CCS Check\n-------------\n");

    let cwd = env::current_dir()?;
    info!("The current directory is {:?}", cwd);

    let workers = detect_workers();
    debug!("Using {} read workers", workers);

    let available_ram = match detect_ram() {
        Ok((total_ram, available_ram)) => {
            debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
            debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);
            available_ram
        }
        Err(e) => {
            debug!("{}", e);
            0
        }
    };

    let out_dir = resolve_path(&args.out_dir, &cwd);
    let run_config = Arc::new(RunConfig {
        cwd,
        out_dir,
        args,
        workers,
        queue_capacity: QUEUE_CAPACITY,
        available_ram,
        log_level,
    });

    match ccs::run(run_config).await {
        Ok(_) => println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis()),
        Err(e) => report_error(&e),
    }
    Ok(())
}


/// Prints a failed run's error with its causes, outermost first.
fn report_error(e: &PipelineError) {
    match e {
        PipelineError::InputNotFound(_) | PipelineError::ReferenceNotFound(_) => println!("{}", e),
        _ => {
            println!("Error thrown when attempting to generate the CCS results");
            println!("{}", e);
            let mut cause = e.source();
            while let Some(inner) = cause {
                println!("{}", inner);
                cause = inner.source();
            }
        }
    }
}

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, Once};
use log::{Level, LevelFilter, Log, Metadata, Record};
use ccs_check::config::defs::PipelineError;
use ccs_check::pipelines::ccs_check::{run_pipeline, ReadProcessor};
use ccs_check::utils::align::{AlignmentResult, ReadAligner};
use ccs_check::utils::fastx::CcsRead;
use ccs_check::utils::filter::{ExclusionCounters, FilterChain};
use ccs_check::utils::metrics::OutputMultiplexer;
use ccs_check::utils::streams::install_panic_hook;
use ccs_check::utils::variants::ColumnVariantCaller;


/// Keeps every log line so tests can look for them.
struct CaptureLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger { lines: Mutex::new(Vec::new()) };
static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Debug);
        install_panic_hook();
    });
}

fn lines_at(level: Level, needle: &str) -> Vec<String> {
    LOGGER
        .lines
        .lock()
        .map(|lines| {
            lines
                .iter()
                .filter(|(l, line)| *l == level && line.contains(needle))
                .map(|(_, line)| line.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Fails or panics on the listed hole numbers, never aligns otherwise.
struct BrokenAligner {
    fail: Vec<u64>,
    panic_on: Vec<u64>,
}

impl ReadAligner for BrokenAligner {
    fn align(&self, read: &CcsRead) -> Result<Option<AlignmentResult>> {
        let hole = read.meta.hole_number.unwrap_or_default();
        if self.panic_on.contains(&hole) {
            panic!("aligner crashed on hole {}", hole);
        }
        if self.fail.contains(&hole) {
            return Err(anyhow!("no usable alignment"));
        }
        Ok(None)
    }
}

async fn run_reads(movie: &str, holes: u64, aligner: BrokenAligner) -> Result<u64> {
    let reads: Vec<Result<CcsRead, PipelineError>> = (1..=holes)
        .map(|hole| Ok(CcsRead::new(&format!("{}/{}/ccs", movie, hole), b"ACGTACGT", &[30; 8])))
        .collect();
    let processor = Arc::new(ReadProcessor::new(
        Some(Arc::new(aligner)),
        Arc::new(ColumnVariantCaller),
        FilterChain::new(None, ExclusionCounters::new()),
    ));
    let summary = run_pipeline(reads.into_iter(), processor, OutputMultiplexer::new(), 3, 2).await?;
    Ok(summary.counters.failed_reads)
}


#[tokio::test]
async fn test_failed_reads_are_named_in_warnings() -> Result<()> {
    init_logging();
    let failed = run_reads("m_warn", 12, BrokenAligner { fail: vec![4, 9], panic_on: vec![] }).await?;
    assert_eq!(failed, 2);

    for id in ["m_warn/4/ccs", "m_warn/9/ccs"] {
        let warnings = lines_at(Level::Warn, id);
        assert_eq!(warnings.len(), 1, "expected one warning for {}", id);
        assert!(warnings[0].contains("no usable alignment"));
    }
    assert!(lines_at(Level::Warn, "m_warn/5/ccs").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_caught_panics_go_to_the_log() -> Result<()> {
    init_logging();
    let failed = run_reads("m_panic", 6, BrokenAligner { fail: vec![], panic_on: vec![2] }).await?;
    assert_eq!(failed, 1);

    let warnings = lines_at(Level::Warn, "m_panic/2/ccs");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("aligner crashed on hole 2"));
    assert!(!lines_at(Level::Debug, "aligner crashed on hole 2").is_empty());
    Ok(())
}

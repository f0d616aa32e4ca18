use std::fs;
use std::path::Path;
use std::sync::Arc;
use anyhow::anyhow;
use log::{debug, info, warn};
use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::align::{AlignmentResult, PairwiseAligner, ReadAligner};
use crate::utils::fastx::{CcsRead, ReadSource};
use crate::utils::file::resolve_path;
use crate::utils::filter::{CounterSnapshot, ExclusionCounters, FilterChain};
use crate::utils::metrics::{OutputMultiplexer, QvCalibration, SnrMetrics, VariantDump, ZScoreMetrics, ZmwMetrics};
use crate::utils::streams::{catch_panic, spawn_read_workers};
use crate::utils::variants::{ColumnVariantCaller, Variant, VariantCaller};
use crate::utils::vcf::FilterSpec;


/// A read after processing.
///
/// Without a reference, or when the read did not map, `alignment` and `variants`
/// are both `None`.
#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub read: CcsRead,
    pub alignment: Option<AlignmentResult>,
    pub variants: Option<Vec<Variant>>,
}

impl PipelineRecord {
    pub fn unaligned(read: CcsRead) -> Self {
        PipelineRecord { read, alignment: None, variants: None }
    }
}


/// Totals reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: u64,
    pub counters: CounterSnapshot,
}


/// Aligns one read, calls its variants and filters them.
pub struct ReadProcessor {
    aligner: Option<Arc<dyn ReadAligner>>,
    caller: Arc<dyn VariantCaller>,
    filters: FilterChain,
}

impl ReadProcessor {
    pub fn new(
        aligner: Option<Arc<dyn ReadAligner>>,
        caller: Arc<dyn VariantCaller>,
        filters: FilterChain,
    ) -> Self {
        ReadProcessor { aligner, caller, filters }
    }

    pub fn counters(&self) -> &Arc<ExclusionCounters> {
        self.filters.counters()
    }

    /// Processes one read.
    ///
    /// Variant positions come back in reference coordinates. Any collaborator error
    /// or panic becomes `PipelineError::ReadFailed` naming the read.
    pub fn process(&self, read: CcsRead) -> Result<PipelineRecord, PipelineError> {
        let Some(aligner) = &self.aligner else {
            return Ok(PipelineRecord::unaligned(read));
        };

        let outcome = catch_panic(|| self.align_and_call(aligner.as_ref(), &read)).unwrap_or_else(|msg| Err(anyhow!(msg)));

        match outcome {
            Ok(Some((alignment, variants))) => {
                let (variants, counts) = self.filters.apply(variants);
                debug!(
                    "{}: {} variants kept, {} at end, {} filtered",
                    read.id,
                    variants.len(),
                    counts.at_end,
                    counts.filtered
                );
                Ok(PipelineRecord {
                    read,
                    alignment: Some(alignment),
                    variants: Some(variants),
                })
            }
            Ok(None) => {
                debug!("{} did not align", read.id);
                Ok(PipelineRecord::unaligned(read))
            }
            Err(e) => Err(PipelineError::ReadFailed {
                id: read.id,
                reason: format!("{:#}", e),
            }),
        }
    }

    fn align_and_call(
        &self,
        aligner: &dyn ReadAligner,
        read: &CcsRead,
    ) -> anyhow::Result<Option<(AlignmentResult, Vec<Variant>)>> {
        let Some(alignment) = aligner.align(read)? else {
            return Ok(None);
        };
        let mut variants = self.caller.call_variants(&alignment)?;
        for variant in variants.iter_mut() {
            variant.position += alignment.ref_start;
            variant.ref_name.clone_from(&alignment.ref_name);
        }
        Ok(Some((alignment, variants)))
    }
}


/// Registers the output collectors, each writing its own file into `out_dir`.
pub fn build_collectors(out_dir: &Path) -> Result<OutputMultiplexer, PipelineError> {
    let mut outputs = OutputMultiplexer::new();
    outputs.register(Box::new(ZmwMetrics::new(out_dir)?));
    outputs.register(Box::new(ZScoreMetrics::new(out_dir)?));
    outputs.register(Box::new(VariantDump::new(out_dir)?));
    outputs.register(Box::new(SnrMetrics::new(out_dir)?));
    outputs.register(Box::new(QvCalibration::new(out_dir)?));
    Ok(outputs)
}


/// Drives `source` through `processor` on a worker pool and feeds every record to
/// `outputs`.
///
/// Collectors are finished once the workers are joined, also when the run failed,
/// so whatever was delivered is flushed. A collector failure during the run stops
/// consumption and takes precedence over a source error.
///
/// # Arguments
///
/// * `source` - Lazy read source; an `Err` aborts production.
/// * `processor` - Shared per-read work.
/// * `outputs` - Registered collectors.
/// * `workers` - Worker pool size.
/// * `capacity` - Queue bound between workers and collectors.
///
/// # Returns
///
/// RunSummary with the delivered record count and the final counters.
pub async fn run_pipeline<S>(
    source: S,
    processor: Arc<ReadProcessor>,
    mut outputs: OutputMultiplexer,
    workers: usize,
    capacity: usize,
) -> Result<RunSummary, PipelineError>
where
    S: Iterator<Item = Result<CcsRead, PipelineError>> + Send + 'static,
{
    let counters = processor.counters().clone();
    let failure_counters = counters.clone();
    let worker_processor = processor.clone();

    let mut pipeline = spawn_read_workers(
        source,
        workers,
        capacity,
        move |read| worker_processor.process(read),
        move |_| failure_counters.add_failed_read(),
    );

    let mut delivered = 0u64;
    let mut consume_error = None;
    while let Some(record) = pipeline.next().await {
        if let Err(e) = outputs.consume(&record) {
            consume_error = Some(e);
            break;
        }
        delivered += 1;
    }
    debug!("Consumer finished after {} records, state {:?}", delivered, pipeline.state());

    let joined = pipeline.join().await;
    let finished = outputs.finish_all();

    if let Some(e) = consume_error {
        return Err(e);
    }
    joined?;
    finished?;

    Ok(RunSummary {
        delivered,
        counters: counters.snapshot(),
    })
}


/// Runs the full CCS check described by `config`.
pub async fn run(config: Arc<RunConfig>) -> Result<RunSummary, PipelineError> {
    let args = &config.args;

    let input = resolve_path(&args.input, &config.cwd);
    if !input.exists() {
        return Err(PipelineError::InputNotFound(input));
    }
    let reference = args.reference.as_deref().map(|r| resolve_path(r, &config.cwd));
    if let Some(reference) = &reference {
        if !reference.is_file() {
            return Err(PipelineError::ReferenceNotFound(reference.clone()));
        }
    }

    if config.out_dir.exists() {
        warn!("The output directory already exists, files may be overwritten: {}", config.out_dir.display());
    } else {
        fs::create_dir_all(&config.out_dir)?;
    }

    let source = ReadSource::open(&input)?;

    let filter_spec = match args.filter.as_deref() {
        Some(filter) => {
            let path = resolve_path(filter, &config.cwd);
            let spec = FilterSpec::from_vcf(&path)?;
            info!("Loaded {} excluded positions from {}", spec.len(), path.display());
            Some(Arc::new(spec))
        }
        None => None,
    };

    let aligner: Option<Arc<dyn ReadAligner>> = match &reference {
        Some(path) => {
            let aligner = PairwiseAligner::from_fasta(path)?;
            info!("Loaded {} reference sequences from {}", aligner.references().len(), path.display());
            Some(Arc::new(aligner))
        }
        None => {
            info!("No reference given, reporting read metrics only");
            None
        }
    };

    let counters = ExclusionCounters::new();
    let processor = Arc::new(ReadProcessor::new(
        aligner,
        Arc::new(ColumnVariantCaller),
        FilterChain::new(filter_spec, counters),
    ));
    let outputs = build_collectors(&config.out_dir)?;

    info!("Processing {} with {} workers", input.display(), config.workers);
    let summary = run_pipeline(source, processor, outputs, config.workers, config.queue_capacity).await?;

    if args.filter.is_some() {
        println!("Filtered out {} variants based on VCF file", summary.counters.filtered);
    }
    println!("Filtered out {} variants for being at end of alignment", summary.counters.at_end);
    println!("{} reads failed processing", summary.counters.failed_reads);
    println!("Wrote results for {} reads to {}", summary.delivered, config.out_dir.display());

    Ok(summary)
}

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{stderr, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sysinfo::System;
use ccs_check::config::defs::{PipelineError, ZMW_METRICS_FILE};
use ccs_check::pipelines::ccs_check::{build_collectors, run_pipeline, ReadProcessor};
use ccs_check::utils::align::{AlignmentResult, PairwiseAligner, ReadAligner};
use ccs_check::utils::fastx::{CcsRead, ReadSource, ReferenceSequence};
use ccs_check::utils::filter::{ExclusionCounters, FilterChain};
use ccs_check::utils::sequence::{SyntheticReads, DNA};
use ccs_check::utils::variants::ColumnVariantCaller;


/// Fails every read whose hole number is a multiple of `every`.
struct FlakyAligner {
    inner: PairwiseAligner,
    every: u64,
}

impl ReadAligner for FlakyAligner {
    fn align(&self, read: &CcsRead) -> Result<Option<AlignmentResult>> {
        match read.meta.hole_number {
            Some(hole) if hole % self.every == 0 => Err(anyhow!("injected failure for hole {}", hole)),
            _ => self.inner.align(read),
        }
    }
}

fn write_reads(path: &Path, reference: &[u8], count: usize, seed: u64) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    SyntheticReads::new(seed, reference.to_vec(), 100, 0.005).write_fastq(&mut writer, count)?;
    writer.flush()?;
    Ok(())
}

fn zmw_ids(out_dir: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(out_dir.join(ZMW_METRICS_FILE))?;
    Ok(text
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').next().map(str::to_string))
        .collect())
}


#[tokio::test]
async fn test_worker_grid_delivers_every_read_once() -> Result<()> {
    let num_reads = 200;
    let fail_every = 25;
    let workers_options = [1, 4, 16];
    let capacity_options = [1, 8, 1000];

    let mut rng = StdRng::seed_from_u64(11);
    let reference = DNA::random_sequence(&mut rng, 300);
    let dir = tempfile::tempdir()?;
    let reads_path = dir.path().join("reads.fastq");
    write_reads(&reads_path, &reference, num_reads, 3)?;

    let mut sys = System::new_all();
    println!("Workers\tCapacity\tDelivered\tFailed\tTime\tMemory");

    for &workers in &workers_options {
        for &capacity in &capacity_options {
            eprintln!("Workers: {}  Capacity: {}  Reads: {}", workers, capacity, num_reads);
            stderr().flush()?;

            let memory_before = {
                sys.refresh_memory();
                sys.used_memory()
            };
            let start = Instant::now();

            let out_dir = dir.path().join(format!("out_{}_{}", workers, capacity));
            fs::create_dir_all(&out_dir)?;
            let aligner = FlakyAligner {
                inner: PairwiseAligner::new(vec![ReferenceSequence {
                    name: "synthetic".to_string(),
                    seq: reference.clone(),
                }]),
                every: fail_every,
            };
            let processor = Arc::new(ReadProcessor::new(
                Some(Arc::new(aligner)),
                Arc::new(ColumnVariantCaller),
                FilterChain::new(None, ExclusionCounters::new()),
            ));

            let summary = run_pipeline(
                ReadSource::open(&reads_path)?,
                processor,
                build_collectors(&out_dir)?,
                workers,
                capacity,
            )
            .await?;

            let memory_used = {
                sys.refresh_memory();
                sys.used_memory().saturating_sub(memory_before) / 1024 / 1024
            };
            println!(
                "{}\t{}\t{}\t{}\t{:.3}\t{}",
                workers,
                capacity,
                summary.delivered,
                summary.counters.failed_reads,
                start.elapsed().as_secs_f64(),
                memory_used
            );

            let expected_failures = (num_reads as u64).div_ceil(fail_every);
            assert_eq!(summary.counters.failed_reads, expected_failures);
            assert_eq!(summary.delivered + summary.counters.failed_reads, num_reads as u64);

            let ids = zmw_ids(&out_dir)?;
            let unique: HashSet<&String> = ids.iter().collect();
            assert_eq!(ids.len() as u64, summary.delivered);
            assert_eq!(unique.len(), ids.len(), "a read was delivered twice");
        }
    }
    Ok(())
}


#[tokio::test]
async fn test_corrupt_tail_flushes_then_fails() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let reference = DNA::random_sequence(&mut rng, 300);
    let dir = tempfile::tempdir()?;
    let reads_path = dir.path().join("reads.fastq");
    write_reads(&reads_path, &reference, 200, 9)?;
    {
        let mut file = fs::OpenOptions::new().append(true).open(&reads_path)?;
        writeln!(file, "this line is not a FASTQ record")?;
    }

    for workers in [1, 8] {
        let out_dir = dir.path().join(format!("out_{}", workers));
        fs::create_dir_all(&out_dir)?;
        let processor = Arc::new(ReadProcessor::new(
            None,
            Arc::new(ColumnVariantCaller),
            FilterChain::new(None, ExclusionCounters::new()),
        ));

        let result = run_pipeline(ReadSource::open(&reads_path)?, processor, build_collectors(&out_dir)?, workers, 4).await;
        match result {
            Err(PipelineError::SourceParse { path, .. }) => assert_eq!(path, reads_path),
            other => return Err(anyhow!("Expected a source parse failure, got {:?}", other)),
        }
        assert_eq!(zmw_ids(&out_dir)?.len(), 200);
    }
    Ok(())
}

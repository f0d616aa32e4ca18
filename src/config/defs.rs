use std::io;
use std::path::PathBuf;
use log::LevelFilter;
use thiserror::Error;
use crate::cli::Arguments;

// Output files, one per collector
pub const ZMW_METRICS_FILE: &str = "zmws.tsv";
pub const ZSCORE_FILE: &str = "zscores.tsv";
pub const VARIANTS_FILE: &str = "variants.tsv";
pub const SNR_FILE: &str = "snrs.tsv";
pub const QV_CALIBRATION_FILE: &str = "qv_calibration.tsv";

// Static Parameters

/// Records held between the worker pool and the consumer before producers block.
pub const QUEUE_CAPACITY: usize = 1_000;

pub const ALIGN_MATCH: i32 = 1;
pub const ALIGN_MISMATCH: i32 = -2;
pub const ALIGN_GAP_OPEN: i32 = -3;
pub const ALIGN_GAP_EXTEND: i32 = -1;
/// Alignments scoring below this fraction of the read length are treated as unmapped.
pub const MIN_ALIGNMENT_SCORE_PER_BASE: f64 = 0.5;

pub const PHRED_OFFSET: u8 = 33;
pub const MAX_QV: usize = 93;

pub const FASTA_TAG : &str = "fasta";
pub const FASTQ_TAG : &str = "fastq";
pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "ffn", "frn"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];
pub const GZIP_EXT: &str = "gz";
pub const BAM_EXT: &str = "bam";
/// First bytes of a decompressed BAM stream.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";


pub struct RunConfig  {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub workers: usize,
    pub queue_capacity: usize,
    pub available_ram: u64,
    pub log_level: LevelFilter,
}


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Can't find file or folder: {0}")]
    InputNotFound(PathBuf),

    #[error("Can't find file: {0}")]
    ReferenceNotFound(PathBuf),

    #[error("Could not parse read file {path}")]
    SourceParse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("CCS read {id} failed: {reason}")]
    ReadFailed {
        id: String,
        reason: String,
    },

    #[error("Collector {name} failed")]
    Collector {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Invalid filter file {path} at line {line}: {reason}")]
    InvalidFilterFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid reference {path}: {reason}")]
    InvalidReference {
        path: PathBuf,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("IO error: {0}")]
    IOError(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

use seq_io::fasta::Reader as FastaReader;
use seq_io::fastq::{Reader as FastqReader, RecordsIntoIter as FastqRecords, OwnedRecord as FastqOwnedRecord};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use log::debug;
use crate::config::defs::{PipelineError, FASTA_EXTS, FASTA_TAG, FASTQ_EXTS, FASTQ_TAG, GZIP_EXT, PHRED_OFFSET};
use crate::utils::bam::{is_bam, BamReads};
use crate::utils::file::{extension_remover, list_fastq_files, open_file_reader, FileReader};


/// Per-ZMW instrument metadata carried alongside a CCS read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadMetadata {
    pub hole_number: Option<u64>,
    pub num_passes: Option<u32>,
    pub read_quality: Option<f32>,
    /// Signal-to-noise per channel, A, C, G, T order.
    pub snr: Option<[f32; 4]>,
}

/// One consensus read. `qual` holds decoded phred values, not ASCII.
#[derive(Debug, Clone, PartialEq)]
pub struct CcsRead {
    pub id: String,
    pub desc: Option<String>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub meta: ReadMetadata,
}

impl CcsRead {
    pub fn new(id: &str, seq: &[u8], qual: &[u8]) -> Self {
        CcsRead {
            id: id.to_string(),
            desc: None,
            seq: seq.to_vec(),
            qual: qual.to_vec(),
            meta: ReadMetadata {
                hole_number: hole_number_from_id(id),
                ..Default::default()
            },
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

impl From<FastqOwnedRecord> for CcsRead {
    fn from(record: FastqOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '@');
        let mut meta = desc.as_deref().map(parse_tags).unwrap_or_default();
        meta.hole_number = hole_number_from_id(&id);
        CcsRead {
            id,
            desc,
            seq: record.seq,
            qual: record.qual.iter().map(|q| q.saturating_sub(PHRED_OFFSET)).collect(),
            meta,
        }
    }
}


/// Parses a FASTX header.
///
/// # Arguments
///
/// * `head` - Header line of a FASTX record.
/// * 'prefix' - Leading, defining character of the header. > for FASTA, @ for FASTQ.
///
/// # Returns
/// Tuple: (id, desc) split of header on whitespace.
///
fn parse_header(head: &[u8], prefix: char) -> (String, Option<String>) {
    let head_str = String::from_utf8_lossy(head).into_owned();
    let parts: Vec<&str> = head_str.splitn(2, |c: char| c.is_whitespace()).collect();
    let id = parts[0].trim_start_matches(prefix).to_string();
    let desc = parts.get(1).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    (id, desc)
}

/// PacBio read names look like `movie/holeNumber/ccs`.
pub fn hole_number_from_id(id: &str) -> Option<u64> {
    id.split('/').nth(1).and_then(|s| s.parse().ok())
}

/// Reads `np=`, `rq=` and `sn=` tags from a header description.
pub fn parse_tags(desc: &str) -> ReadMetadata {
    let mut meta = ReadMetadata::default();
    for token in desc.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else { continue };
        match key {
            "np" => meta.num_passes = value.parse().ok(),
            "rq" => meta.read_quality = value.parse().ok(),
            "sn" => {
                let snrs: Vec<f32> = value.split(',').filter_map(|v| v.parse().ok()).collect();
                meta.snr = <[f32; 4]>::try_from(snrs.as_slice()).ok();
            }
            _ => {}
        }
    }
    meta
}


/// Determines if a file path is a FASTA, FASTQ, or neither.
/// Checks extensions, not the body.
pub fn fastx_filetype(path: &Path) -> io::Result<&'static str> {
    let (_, extensions) = extension_remover(path);

    for ext in extensions.iter().filter(|e| !e.eq_ignore_ascii_case(GZIP_EXT)) {
        if FASTA_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FASTA_TAG);
        }

        if FASTQ_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FASTQ_TAG);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "File '{}' has invalid extension(s) '{:?}'. Expected FASTA ({:?}) or FASTQ ({:?}).",
            path.display(),
            extensions,
            FASTA_EXTS,
            FASTQ_EXTS
        ),
    ))
}


/// Open reader over one input file.
enum Records {
    Fastq(FastqRecords<FileReader>),
    Bam(BamReads),
}

impl Records {
    fn open(path: &Path) -> io::Result<Self> {
        if is_bam(path)? {
            debug!("Reading CCS reads from BAM {}", path.display());
            Ok(Records::Bam(BamReads::open(path)?))
        } else {
            debug!("Reading CCS reads from {}", path.display());
            Ok(Records::Fastq(FastqReader::new(open_file_reader(path)?).into_records()))
        }
    }

    fn next_read(&mut self) -> Option<Result<CcsRead, Box<dyn std::error::Error + Send + Sync>>> {
        match self {
            Records::Fastq(records) => records
                .next()
                .map(|result| result.map(CcsRead::from).map_err(|e| e.into())),
            Records::Bam(records) => records.next().map(|result| result.map_err(|e| e.into())),
        }
    }
}


/// Lazy, single-pass sequence of CCS reads over a CCS BAM or one or more FASTQ files.
///
/// Files are opened only when the previous one is exhausted. Any open or parse
/// error is yielded once as `PipelineError::SourceParse`; the iterator is fused
/// afterwards.
pub struct ReadSource {
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, Records)>,
    failed: bool,
}

impl ReadSource {
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        ReadSource {
            pending: files.into(),
            current: None,
            failed: false,
        }
    }

    /// A single CCS BAM or FASTQ file, or every FASTQ file of a directory in sorted order.
    pub fn open(input: &Path) -> Result<Self, PipelineError> {
        let parse_error = |e: io::Error| PipelineError::SourceParse {
            path: input.to_path_buf(),
            source: Box::new(e),
        };
        if input.is_dir() {
            let files = list_fastq_files(input).map_err(parse_error)?;
            debug!("Found {} FASTQ files in {}", files.len(), input.display());
            Ok(ReadSource::from_files(files))
        } else if input.is_file() {
            if !is_bam(input).map_err(parse_error)? {
                fastx_filetype(input)
                    .and_then(|kind| match kind {
                        FASTQ_TAG => Ok(()),
                        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "Reads must be a CCS BAM or FASTQ")),
                    })
                    .map_err(parse_error)?;
            }
            Ok(ReadSource::from_files(vec![input.to_path_buf()]))
        } else {
            Err(PipelineError::InputNotFound(input.to_path_buf()))
        }
    }

    fn fail(&mut self, path: PathBuf, source: Box<dyn std::error::Error + Send + Sync>) -> Option<Result<CcsRead, PipelineError>> {
        self.failed = true;
        self.current = None;
        self.pending.clear();
        Some(Err(PipelineError::SourceParse { path, source }))
    }
}

impl Iterator for ReadSource {
    type Item = Result<CcsRead, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some((path, records)) = self.current.as_mut() {
                match records.next_read() {
                    Some(Ok(read)) => return Some(Ok(read)),
                    Some(Err(e)) => {
                        let path = path.clone();
                        return self.fail(path, e);
                    }
                    None => self.current = None,
                }
            }

            let path = self.pending.pop_front()?;
            match Records::open(&path) {
                Ok(records) => self.current = Some((path, records)),
                Err(e) => return self.fail(path, Box::new(e)),
            }
        }
    }
}


/// A named reference sequence, uppercased.
#[derive(Debug, Clone)]
pub struct ReferenceSequence {
    pub name: String,
    pub seq: Vec<u8>,
}

/// Loads every record of a FASTA reference.
pub fn load_reference(path: &Path) -> Result<Vec<ReferenceSequence>, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidReference {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_file() {
        return Err(PipelineError::ReferenceNotFound(path.to_path_buf()));
    }

    let reader = open_file_reader(path)?;
    let mut references = Vec::new();
    for result in FastaReader::new(reader).into_records() {
        let record = result.map_err(|e| invalid(e.to_string()))?;
        let (name, _) = parse_header(&record.head, '>');
        let seq: Vec<u8> = record
            .seq
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_uppercase())
            .collect();
        if seq.is_empty() {
            return Err(invalid(format!("reference '{}' has no bases", name)));
        }
        references.push(ReferenceSequence { name, seq });
    }

    if references.is_empty() {
        return Err(invalid("no FASTA records found".to_string()));
    }
    Ok(references)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_header_and_tags() {
        let (id, desc) = parse_header(b"m64011_190830/7528/ccs np=12 rq=0.998 sn=5.1,9.2,6.3,8.4", '@');
        assert_eq!(id, "m64011_190830/7528/ccs");
        let meta = parse_tags(desc.as_deref().unwrap());
        assert_eq!(meta.num_passes, Some(12));
        assert_eq!(meta.read_quality, Some(0.998));
        assert_eq!(meta.snr, Some([5.1, 9.2, 6.3, 8.4]));
        assert_eq!(hole_number_from_id(&id), Some(7528));
    }

    #[test]
    fn test_partial_snr_is_dropped() {
        let meta = parse_tags("sn=1.0,2.0 np=x");
        assert!(meta.snr.is_none());
        assert!(meta.num_passes.is_none());
    }

    #[test]
    fn test_fastx_filetype() {
        assert_eq!(fastx_filetype(Path::new("ref.fa.gz")).unwrap(), FASTA_TAG);
        assert_eq!(fastx_filetype(Path::new("reads.fastq")).unwrap(), FASTQ_TAG);
        assert!(fastx_filetype(Path::new("reads.bam")).is_err());
    }

    #[test]
    fn test_directory_source_concatenates_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.fastq"), "@m/1/ccs np=3\nACGT\n+\nIIII\n@m/2/ccs\nGG\n+\n!!\n")?;
        fs::write(dir.path().join("b.fastq"), "@m/3/ccs\nTTT\n+\n+++\n")?;
        fs::write(dir.path().join("ignored.txt"), "not reads")?;

        let reads: Vec<CcsRead> = ReadSource::open(dir.path())?.collect::<Result<_, _>>()?;
        let ids: Vec<&str> = reads.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m/1/ccs", "m/2/ccs", "m/3/ccs"]);
        assert_eq!(reads[0].qual, vec![40, 40, 40, 40]);
        assert_eq!(reads[0].meta.num_passes, Some(3));
        assert_eq!(reads[1].qual, vec![0, 0]);
        assert_eq!(reads[2].meta.hole_number, Some(3));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_yields_one_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.fastq");
        fs::write(&path, "@r1\nACGT\n+\nIIII\nthis is not fastq\n")?;

        let mut source = ReadSource::open(&path)?;
        assert!(matches!(source.next(), Some(Ok(_))));
        assert!(matches!(source.next(), Some(Err(PipelineError::SourceParse { .. }))));
        assert!(source.next().is_none());
        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let result = ReadSource::open(Path::new("/definitely/not/here.fastq"));
        assert!(matches!(result, Err(PipelineError::InputNotFound(_))));
    }

    #[test]
    fn test_load_reference() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ref.fasta");
        fs::write(&path, ">chr1 test\nacgt\nACGT\n>chr2\nTTTT\n")?;
        let refs = load_reference(&path)?;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "chr1");
        assert_eq!(refs[0].seq, b"ACGTACGT".to_vec());
        Ok(())
    }
}

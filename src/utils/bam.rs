// src/utils/bam.rs
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use flate2::read::MultiGzDecoder;
use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::data::field::value::Array;
use crate::config::defs::{BAM_EXT, BAM_MAGIC};
use crate::utils::fastx::{hole_number_from_id, CcsRead, ReadMetadata};
use crate::utils::file::{extension_remover, is_gzipped};

const HOLE_NUMBER_TAG: Tag = Tag::new(b'z', b'm');
const NUM_PASSES_TAG: Tag = Tag::new(b'n', b'p');
const READ_QUALITY_TAG: Tag = Tag::new(b'r', b'q');
const SNR_TAG: Tag = Tag::new(b's', b'n');


/// True if `path` ends in `.bam`, or holds a BGZF stream that opens with the BAM magic.
pub fn is_bam(path: &Path) -> io::Result<bool> {
    let (_, extensions) = extension_remover(path);
    if extensions.last().is_some_and(|ext| ext.eq_ignore_ascii_case(BAM_EXT)) {
        return Ok(true);
    }
    if !is_gzipped(path)? {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    match MultiGzDecoder::new(File::open(path)?).read_exact(&mut magic) {
        Ok(()) => Ok(&magic == BAM_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        // Not a valid gzip body; let the FASTQ reader report it.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput || e.kind() == io::ErrorKind::InvalidData => Ok(false),
        Err(e) => Err(e),
    }
}


/// Record-at-a-time reader over an unaligned PacBio CCS BAM.
pub struct BamReads {
    reader: bam::io::Reader<noodles::bgzf::io::Reader<File>>,
    header: Header,
}

impl BamReads {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut reader = bam::io::Reader::new(File::open(path)?);
        let header = reader.read_header()?;
        Ok(BamReads { reader, header })
    }
}

impl Iterator for BamReads {
    type Item = io::Result<CcsRead>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = RecordBuf::default();
        match self.reader.read_record_buf(&self.header, &mut record) {
            Ok(0) => None,
            Ok(_) => Some(Ok(ccs_read_from_record(&record))),
            Err(e) => Some(Err(e)),
        }
    }
}


/// Builds a `CcsRead` from a BAM record, taking metadata from the
/// `zm`, `np`, `rq` and `sn` aux tags.
pub fn ccs_read_from_record(record: &RecordBuf) -> CcsRead {
    let id = record
        .name()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default();
    let seq = record.sequence().as_ref().to_vec();
    let mut qual = record.quality_scores().as_ref().to_vec();
    if qual.len() != seq.len() {
        qual = vec![0; seq.len()];
    }

    let data = record.data();
    let meta = ReadMetadata {
        hole_number: data
            .get(&HOLE_NUMBER_TAG)
            .and_then(Value::as_int)
            .and_then(|n| u64::try_from(n).ok())
            .or_else(|| hole_number_from_id(&id)),
        num_passes: data
            .get(&NUM_PASSES_TAG)
            .and_then(Value::as_int)
            .and_then(|n| u32::try_from(n).ok()),
        read_quality: data.get(&READ_QUALITY_TAG).and_then(|value| match value {
            Value::Float(rq) => Some(*rq),
            _ => None,
        }),
        snr: data.get(&SNR_TAG).and_then(|value| match value {
            Value::Array(Array::Float(snrs)) => <[f32; 4]>::try_from(snrs.as_slice()).ok(),
            _ => None,
        }),
    };

    CcsRead {
        id,
        desc: None,
        seq,
        qual,
        meta,
    }
}

use std::path::Path;
use anyhow::anyhow;
use bio::alignment::pairwise::Aligner;
use bio::alignment::{Alignment, AlignmentOperation};
use bio::alphabets::dna::revcomp;
use crate::config::defs::{PipelineError, ALIGN_GAP_EXTEND, ALIGN_GAP_OPEN, ALIGN_MATCH, ALIGN_MISMATCH, MIN_ALIGNMENT_SCORE_PER_BASE};
use crate::utils::fastx::{load_reference, CcsRead, ReferenceSequence};

pub const GAP: u8 = b'-';

/// A read placed on the reference.
///
/// `aligned_ref`, `aligned_query` and `aligned_qual` are column-parallel. Gaps are
/// `-`, and a query gap carries quality 0.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentResult {
    pub ref_name: String,
    /// 0-based reference offset of the first aligned column.
    pub ref_start: u64,
    pub aligned_ref: Vec<u8>,
    pub aligned_query: Vec<u8>,
    pub aligned_qual: Vec<u8>,
    pub score: i32,
    pub reverse_strand: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColumnCounts {
    pub matches: u64,
    pub mismatches: u64,
    pub insertions: u64,
    pub deletions: u64,
}

impl ColumnCounts {
    pub fn columns(&self) -> u64 {
        self.matches + self.mismatches + self.insertions + self.deletions
    }

    pub fn identity(&self) -> f64 {
        match self.columns() {
            0 => 0.0,
            n => self.matches as f64 / n as f64,
        }
    }
}

impl AlignmentResult {
    /// Exclusive end on the reference.
    pub fn ref_end(&self) -> u64 {
        self.ref_start + self.aligned_ref.iter().filter(|&&b| b != GAP).count() as u64
    }

    pub fn column_counts(&self) -> ColumnCounts {
        let mut counts = ColumnCounts::default();
        for (&r, &q) in self.aligned_ref.iter().zip(&self.aligned_query) {
            match (r, q) {
                (GAP, _) => counts.insertions += 1,
                (_, GAP) => counts.deletions += 1,
                (r, q) if r.eq_ignore_ascii_case(&q) => counts.matches += 1,
                _ => counts.mismatches += 1,
            }
        }
        counts
    }
}


/// Places a read on the reference. `Ok(None)` means the read did not map.
pub trait ReadAligner: Send + Sync {
    fn align(&self, read: &CcsRead) -> anyhow::Result<Option<AlignmentResult>>;
}


/// Semiglobal aligner over every reference sequence and both strands.
pub struct PairwiseAligner {
    references: Vec<ReferenceSequence>,
}

impl PairwiseAligner {
    pub fn new(references: Vec<ReferenceSequence>) -> Self {
        PairwiseAligner { references }
    }

    pub fn from_fasta(path: &Path) -> Result<Self, PipelineError> {
        Ok(PairwiseAligner::new(load_reference(path)?))
    }

    pub fn references(&self) -> &[ReferenceSequence] {
        &self.references
    }
}

impl ReadAligner for PairwiseAligner {
    fn align(&self, read: &CcsRead) -> anyhow::Result<Option<AlignmentResult>> {
        if read.is_empty() {
            return Ok(None);
        }
        if read.qual.len() != read.seq.len() {
            return Err(anyhow!(
                "Read {} has {} bases but {} quality values",
                read.id,
                read.seq.len(),
                read.qual.len()
            ));
        }

        let forward: Vec<u8> = read.seq.iter().map(|b| b.to_ascii_uppercase()).collect();
        let reverse = revcomp(&forward);

        let mut best: Option<(Alignment, &ReferenceSequence, bool)> = None;
        for reference in &self.references {
            for (query, is_reverse) in [(&forward, false), (&reverse, true)] {
                let alignment = semiglobal(query, &reference.seq);
                if best.as_ref().is_none_or(|(b, _, _)| alignment.score > b.score) {
                    best = Some((alignment, reference, is_reverse));
                }
            }
        }

        let (alignment, reference, is_reverse) = best.ok_or_else(|| anyhow!("No reference sequences loaded"))?;
        let min_score = (MIN_ALIGNMENT_SCORE_PER_BASE * read.len() as f64) as i32;
        if alignment.score < min_score {
            return Ok(None);
        }

        let result = if is_reverse {
            let reverse_qual: Vec<u8> = read.qual.iter().rev().copied().collect();
            build_result(&alignment, &reverse, &reverse_qual, reference, true)?
        } else {
            build_result(&alignment, &forward, &read.qual, reference, false)?
        };
        Ok(Some(result))
    }
}

fn semiglobal(x: &[u8], y: &[u8]) -> Alignment {
    let score = |a: u8, b: u8| if a == b { ALIGN_MATCH } else { ALIGN_MISMATCH };
    let mut aligner = Aligner::with_capacity(x.len(), y.len(), ALIGN_GAP_OPEN, ALIGN_GAP_EXTEND, score);
    aligner.semiglobal(x, y)
}

/// Expands an operation list into gapped, column-parallel sequences.
fn build_result(
    alignment: &Alignment,
    query: &[u8],
    qual: &[u8],
    reference: &ReferenceSequence,
    reverse_strand: bool,
) -> anyhow::Result<AlignmentResult> {
    let is_clip = |op: &AlignmentOperation| matches!(op, AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_));
    let has_clips = alignment.operations.iter().any(is_clip);
    // Clip operations already account for the start offsets when present.
    let (mut xi, mut yi) = if has_clips { (0, 0) } else { (alignment.xstart, alignment.ystart) };

    let out_of_range = || anyhow!("Alignment operations run past the sequence ends");
    let mut ref_start = None;
    let mut aligned_ref = Vec::with_capacity(alignment.operations.len());
    let mut aligned_query = Vec::with_capacity(alignment.operations.len());
    let mut aligned_qual = Vec::with_capacity(alignment.operations.len());

    for op in &alignment.operations {
        if !is_clip(op) && ref_start.is_none() {
            ref_start = Some(yi as u64);
        }
        match *op {
            AlignmentOperation::Match | AlignmentOperation::Subst => {
                aligned_ref.push(*reference.seq.get(yi).ok_or_else(out_of_range)?);
                aligned_query.push(*query.get(xi).ok_or_else(out_of_range)?);
                aligned_qual.push(*qual.get(xi).ok_or_else(out_of_range)?);
                xi += 1;
                yi += 1;
            }
            AlignmentOperation::Ins => {
                aligned_ref.push(GAP);
                aligned_query.push(*query.get(xi).ok_or_else(out_of_range)?);
                aligned_qual.push(*qual.get(xi).ok_or_else(out_of_range)?);
                xi += 1;
            }
            AlignmentOperation::Del => {
                aligned_ref.push(*reference.seq.get(yi).ok_or_else(out_of_range)?);
                aligned_query.push(GAP);
                aligned_qual.push(0);
                yi += 1;
            }
            AlignmentOperation::Xclip(n) => xi += n,
            AlignmentOperation::Yclip(n) => yi += n,
        }
    }

    Ok(AlignmentResult {
        ref_name: reference.name.clone(),
        ref_start: ref_start.unwrap_or(yi as u64),
        aligned_ref,
        aligned_query,
        aligned_qual,
        score: alignment.score,
        reverse_strand,
    })
}

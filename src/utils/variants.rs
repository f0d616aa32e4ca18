use std::fmt;
use crate::utils::align::{AlignmentResult, GAP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Substitution,
    Insertion,
    Deletion,
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantType::Substitution => "SNP",
            VariantType::Insertion => "INS",
            VariantType::Deletion => "DEL",
        };
        write!(f, "{}", name)
    }
}

/// A difference between a read and the reference.
///
/// `position` is relative to the alignment start when a caller returns it and is
/// rewritten to a reference coordinate before the variant leaves the read processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub kind: VariantType,
    pub position: u64,
    pub ref_name: String,
    pub ref_bases: Vec<u8>,
    pub alt_bases: Vec<u8>,
    pub qv: Option<u8>,
    pub at_end_of_alignment: bool,
}

impl Variant {
    pub fn len(&self) -> usize {
        match self.kind {
            VariantType::Substitution => 1,
            VariantType::Insertion => self.alt_bases.len(),
            VariantType::Deletion => self.ref_bases.len(),
        }
    }
}


/// Calls variants on a single alignment.
pub trait VariantCaller: Send + Sync {
    fn call_variants(&self, alignment: &AlignmentResult) -> anyhow::Result<Vec<Variant>>;
}


/// Walks alignment columns left to right.
///
/// Mismatches become substitutions (columns with an `N` on either side are skipped),
/// and each run of gap columns becomes one indel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnVariantCaller;

impl VariantCaller for ColumnVariantCaller {
    fn call_variants(&self, alignment: &AlignmentResult) -> anyhow::Result<Vec<Variant>> {
        let refs = &alignment.aligned_ref;
        let query = &alignment.aligned_query;
        let qual = &alignment.aligned_qual;
        if refs.len() != query.len() || refs.len() != qual.len() {
            return Err(anyhow::anyhow!(
                "Alignment columns disagree: ref {}, query {}, qual {}",
                refs.len(),
                query.len(),
                qual.len()
            ));
        }

        let last = refs.len().saturating_sub(1);
        let mut variants = Vec::new();
        let mut ref_offset = 0u64;
        let mut col = 0;

        while col < refs.len() {
            let (r, q) = (refs[col], query[col]);
            if r == GAP {
                let start = col;
                while col < refs.len() && refs[col] == GAP {
                    col += 1;
                }
                variants.push(Variant {
                    kind: VariantType::Insertion,
                    position: ref_offset,
                    ref_name: String::new(),
                    ref_bases: Vec::new(),
                    alt_bases: query[start..col].to_vec(),
                    qv: qual[start..col].iter().min().copied(),
                    at_end_of_alignment: start == 0 || col - 1 == last,
                });
            } else if q == GAP {
                let start = col;
                while col < refs.len() && query[col] == GAP {
                    col += 1;
                }
                variants.push(Variant {
                    kind: VariantType::Deletion,
                    position: ref_offset,
                    ref_name: String::new(),
                    ref_bases: refs[start..col].to_vec(),
                    alt_bases: Vec::new(),
                    qv: flanking_qv(query, qual, start, col),
                    at_end_of_alignment: start == 0 || col - 1 == last,
                });
                ref_offset += (col - start) as u64;
            } else {
                let informative = !r.eq_ignore_ascii_case(&b'N') && !q.eq_ignore_ascii_case(&b'N');
                if informative && !r.eq_ignore_ascii_case(&q) {
                    variants.push(Variant {
                        kind: VariantType::Substitution,
                        position: ref_offset,
                        ref_name: String::new(),
                        ref_bases: vec![r],
                        alt_bases: vec![q],
                        qv: Some(qual[col]),
                        at_end_of_alignment: col == 0 || col == last,
                    });
                }
                ref_offset += 1;
                col += 1;
            }
        }
        Ok(variants)
    }
}

/// Lowest quality of the query bases on either side of a deletion.
fn flanking_qv(query: &[u8], qual: &[u8], start: usize, end: usize) -> Option<u8> {
    let before = start.checked_sub(1).filter(|&i| query[i] != GAP).map(|i| qual[i]);
    let after = (end < query.len() && query[end] != GAP).then(|| qual[end]);
    match (before, after) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

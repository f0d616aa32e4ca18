use std::io::{BufRead, BufReader};
use std::path::Path;
use fxhash::{FxHashMap, FxHashSet};
use crate::config::defs::PipelineError;
use crate::utils::file::open_file_reader;
use crate::utils::variants::Variant;


/// Reference positions whose variants are excluded from output.
///
/// Positions are 0-based and keyed by reference name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    positions: FxHashMap<String, FxHashSet<u64>>,
}

impl FilterSpec {
    pub fn from_positions<I, S>(positions: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut spec = FilterSpec::default();
        for (name, pos) in positions {
            spec.insert(name.into(), pos);
        }
        spec
    }

    /// Loads CHROM/POS pairs from a VCF file (plain or gzipped).
    ///
    /// # Arguments
    ///
    /// * `path` - VCF file; header lines starting with `#` are skipped.
    ///
    /// # Returns
    ///
    /// FilterSpec with 1-based VCF positions converted to 0-based.
    pub fn from_vcf(path: &Path) -> Result<Self, PipelineError> {
        let reader = BufReader::new(open_file_reader(path)?);
        let mut spec = FilterSpec::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let invalid = |reason: String| PipelineError::InvalidFilterFile {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 5 {
                return Err(invalid(format!(
                    "expected at least 5 fields, found {} in line: '{}'",
                    fields.len(),
                    line
                )));
            }
            let pos: u64 = fields[1]
                .parse()
                .map_err(|_| invalid(format!("POS '{}' is not a number", fields[1])))?;
            if pos == 0 {
                return Err(invalid("POS must be 1-based".to_string()));
            }
            spec.insert(fields[0].to_string(), pos - 1);
        }

        Ok(spec)
    }

    fn insert(&mut self, ref_name: String, position: u64) {
        self.positions.entry(ref_name).or_default().insert(position);
    }

    pub fn contains(&self, ref_name: &str, position: u64) -> bool {
        self.positions
            .get(ref_name)
            .is_some_and(|positions| positions.contains(&position))
    }

    pub fn contains_variant(&self, variant: &Variant) -> bool {
        self.contains(&variant.ref_name, variant.position)
    }

    pub fn len(&self) -> usize {
        self.positions.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const VCF: &str = "##fileformat=VCFv4.2\n\
                       #CHROM\tPOS\tID\tREF\tALT\n\
                       chr1\t101\t.\tA\tG\n\
                       chr1\t250\t.\tAT\tA\n\
                       chr2\t1\t.\tC\tT\n";

    #[test]
    fn test_load_positions() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("mask.vcf");
        fs::write(&path, VCF)?;

        let spec = FilterSpec::from_vcf(&path)?;
        assert_eq!(spec.len(), 3);
        assert!(spec.contains("chr1", 100));
        assert!(spec.contains("chr1", 249));
        assert!(spec.contains("chr2", 0));
        assert!(!spec.contains("chr2", 100));
        Ok(())
    }

    #[test]
    fn test_loading_twice_is_identical() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("mask.vcf");
        fs::write(&path, VCF)?;
        assert_eq!(FilterSpec::from_vcf(&path)?, FilterSpec::from_vcf(&path)?);
        Ok(())
    }

    #[test]
    fn test_short_line_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.vcf");
        fs::write(&path, "#header\nchr1\t12\t.\n")?;
        match FilterSpec::from_vcf(&path) {
            Err(PipelineError::InvalidFilterFile { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected InvalidFilterFile, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_non_numeric_position_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.vcf");
        fs::write(&path, "chr1\tabc\t.\tA\tG\n")?;
        assert!(matches!(FilterSpec::from_vcf(&path), Err(PipelineError::InvalidFilterFile { .. })));
        Ok(())
    }
}

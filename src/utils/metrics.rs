use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use log::{debug, error};
use crate::config::defs::{PipelineError, MAX_QV, QV_CALIBRATION_FILE, SNR_FILE, VARIANTS_FILE, ZMW_METRICS_FILE, ZSCORE_FILE};
use crate::pipelines::ccs_check::PipelineRecord;
use crate::utils::align::GAP;
use crate::utils::file::create_output_file;
use crate::utils::stats::{mean, mean_and_sd, phred_from_error_rate, z_score};


/// One output-side consumer of processed records.
///
/// Collectors are driven from a single task and need not be thread-safe.
/// `finish` is called exactly once, after the last `consume`.
pub trait MetricCollector {
    fn name(&self) -> &'static str;
    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

fn na<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| v.to_string())
}

fn na_f64(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{:.*}", precision, v))
}


/// Per-read identity and placement.
pub struct ZmwMetrics {
    writer: BufWriter<File>,
}

impl ZmwMetrics {
    pub fn new(out_dir: &Path) -> io::Result<Self> {
        let mut writer = create_output_file(out_dir, ZMW_METRICS_FILE)?;
        writeln!(
            writer,
            "id\thole_number\tread_length\tmean_qv\tnum_passes\tread_quality\tmapped\tref_name\tref_start\tref_end\tstrand\tmatches\tmismatches\tinsertions\tdeletions\tidentity\tvariants"
        )?;
        Ok(ZmwMetrics { writer })
    }
}

impl MetricCollector for ZmwMetrics {
    fn name(&self) -> &'static str {
        "zmw_metrics"
    }

    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()> {
        let read = &record.read;
        write!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t",
            read.id,
            na(read.meta.hole_number),
            read.len(),
            na_f64(mean(&read.qual), 2),
            na(read.meta.num_passes),
            na(read.meta.read_quality),
        )?;
        match &record.alignment {
            Some(aln) => {
                let counts = aln.column_counts();
                writeln!(
                    self.writer,
                    "true\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.5}\t{}",
                    aln.ref_name,
                    aln.ref_start,
                    aln.ref_end(),
                    if aln.reverse_strand { '-' } else { '+' },
                    counts.matches,
                    counts.mismatches,
                    counts.insertions,
                    counts.deletions,
                    counts.identity(),
                    na(record.variants.as_ref().map(|v| v.len())),
                )
            }
            None => writeln!(self.writer, "false\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tNA"),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}


/// Read mean QV standardised against the whole run; written at finish.
pub struct ZScoreMetrics {
    writer: BufWriter<File>,
    reads: Vec<(String, Option<u64>, Option<f64>)>,
}

impl ZScoreMetrics {
    pub fn new(out_dir: &Path) -> io::Result<Self> {
        let writer = create_output_file(out_dir, ZSCORE_FILE)?;
        Ok(ZScoreMetrics { writer, reads: Vec::new() })
    }
}

impl MetricCollector for ZScoreMetrics {
    fn name(&self) -> &'static str {
        "zscore_metrics"
    }

    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()> {
        let read = &record.read;
        self.reads.push((read.id.clone(), read.meta.hole_number, mean(&read.qual)));
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        let means: Vec<f64> = self.reads.iter().filter_map(|(_, _, m)| *m).collect();
        let run_stats = mean_and_sd(&means);
        debug!("Z-scores over {} reads, run mean/sd {:?}", means.len(), run_stats);

        writeln!(self.writer, "id\thole_number\tmean_qv\tzscore")?;
        for (id, hole, read_mean) in &self.reads {
            let z = match (read_mean, run_stats) {
                (Some(m), Some((run_mean, sd))) => z_score(*m, run_mean, sd),
                _ => None,
            };
            writeln!(self.writer, "{}\t{}\t{}\t{}", id, na(*hole), na_f64(*read_mean, 2), na_f64(z, 4))?;
        }
        self.writer.flush()
    }
}


/// Every variant that survived filtering, one row each.
pub struct VariantDump {
    writer: BufWriter<File>,
}

impl VariantDump {
    pub fn new(out_dir: &Path) -> io::Result<Self> {
        let mut writer = create_output_file(out_dir, VARIANTS_FILE)?;
        writeln!(writer, "id\thole_number\tref_name\tposition\ttype\tref\talt\tlength\tqv")?;
        Ok(VariantDump { writer })
    }
}

impl MetricCollector for VariantDump {
    fn name(&self) -> &'static str {
        "variant_dump"
    }

    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()> {
        let Some(variants) = &record.variants else { return Ok(()) };
        for v in variants {
            writeln!(
                self.writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                record.read.id,
                na(record.read.meta.hole_number),
                v.ref_name,
                v.position,
                v.kind,
                String::from_utf8_lossy(&v.ref_bases),
                String::from_utf8_lossy(&v.alt_bases),
                v.len(),
                na(v.qv),
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}


/// Per-channel signal-to-noise for each ZMW.
pub struct SnrMetrics {
    writer: BufWriter<File>,
}

impl SnrMetrics {
    pub fn new(out_dir: &Path) -> io::Result<Self> {
        let mut writer = create_output_file(out_dir, SNR_FILE)?;
        writeln!(writer, "id\thole_number\tsnr_a\tsnr_c\tsnr_g\tsnr_t\tnum_passes\tread_quality")?;
        Ok(SnrMetrics { writer })
    }
}

impl MetricCollector for SnrMetrics {
    fn name(&self) -> &'static str {
        "snr_metrics"
    }

    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()> {
        let meta = &record.read.meta;
        let snr = |i: usize| na(meta.snr.map(|s| s[i]));
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            record.read.id,
            na(meta.hole_number),
            snr(0),
            snr(1),
            snr(2),
            snr(3),
            na(meta.num_passes),
            na(meta.read_quality),
        )
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}


/// Reported QV against observed error rate over aligned query bases.
pub struct QvCalibration {
    writer: BufWriter<File>,
    bases: Vec<u64>,
    errors: Vec<u64>,
}

impl QvCalibration {
    pub fn new(out_dir: &Path) -> io::Result<Self> {
        let writer = create_output_file(out_dir, QV_CALIBRATION_FILE)?;
        Ok(QvCalibration {
            writer,
            bases: vec![0; MAX_QV + 1],
            errors: vec![0; MAX_QV + 1],
        })
    }
}

impl MetricCollector for QvCalibration {
    fn name(&self) -> &'static str {
        "qv_calibration"
    }

    fn consume(&mut self, record: &PipelineRecord) -> io::Result<()> {
        let Some(aln) = &record.alignment else { return Ok(()) };
        let columns = aln.aligned_ref.iter().zip(&aln.aligned_query).zip(&aln.aligned_qual);
        for ((&r, &q), &qv) in columns {
            if q == GAP || r.eq_ignore_ascii_case(&b'N') {
                continue;
            }
            let bin = (qv as usize).min(MAX_QV);
            self.bases[bin] += 1;
            if r == GAP || !r.eq_ignore_ascii_case(&q) {
                self.errors[bin] += 1;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        writeln!(self.writer, "qv\tbases\terrors\tempirical_qv")?;
        for (qv, (&bases, &errors)) in self.bases.iter().zip(&self.errors).enumerate() {
            if bases == 0 {
                continue;
            }
            writeln!(
                self.writer,
                "{}\t{}\t{}\t{}",
                qv,
                bases,
                errors,
                na_f64(phred_from_error_rate(errors, bases), 2)
            )?;
        }
        self.writer.flush()
    }
}


/// Fans each record out to every registered collector, in registration order.
#[derive(Default)]
pub struct OutputMultiplexer {
    collectors: Vec<Box<dyn MetricCollector + Send>>,
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        OutputMultiplexer::default()
    }

    pub fn register(&mut self, collector: Box<dyn MetricCollector + Send>) {
        debug!("Registered collector {}", collector.name());
        self.collectors.push(collector);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Stops at the first collector that fails.
    pub fn consume(&mut self, record: &PipelineRecord) -> Result<(), PipelineError> {
        for collector in self.collectors.iter_mut() {
            collector
                .consume(record)
                .map_err(|source| PipelineError::Collector { name: collector.name(), source })?;
        }
        Ok(())
    }

    /// Finishes every collector even if some fail; returns the first failure.
    pub fn finish_all(self) -> Result<(), PipelineError> {
        let mut first_error = None;
        for mut collector in self.collectors {
            let name = collector.name();
            match collector.finish() {
                Ok(()) => debug!("Closed {}", name),
                Err(source) => {
                    error!("Failed to finish {}: {}", name, source);
                    first_error.get_or_insert(PipelineError::Collector { name, source });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

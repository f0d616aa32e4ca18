pub mod align;
pub mod bam;
pub mod fastx;
pub mod file;
pub mod filter;
pub mod metrics;
pub mod sequence;
pub mod stats;
pub mod streams;
pub mod system;
pub mod variants;
pub mod vcf;

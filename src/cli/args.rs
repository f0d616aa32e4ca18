use std::ffi::OsString;
use clap::Parser;

const HELP_TOKENS: &[&str] = &["h", "help", "?", "-h", "--help"];

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ccs-check", version = "1.0", disable_help_flag = true)]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(value_name = "INPUT", help = "A FASTQ file of CCS reads, or a directory of FASTQ files")]
    pub input: String,

    #[arg(value_name = "OUTDIR", help = "Directory to output results into")]
    pub out_dir: String,

    #[arg(value_name = "REF", help = "A FASTA file with the references (optional)")]
    pub reference: Option<String>,

    #[arg(value_name = "VCF", requires = "reference", help = "A VCF file with variant positions to exclude (optional)")]
    pub filter: Option<String>,
}

/// Outcome of reading the command line.
#[derive(Debug)]
pub enum Command {
    Help,
    /// Arguments were unusable; the message is shown above the usage text.
    Usage(String),
    Run(Arguments),
}

pub fn usage() -> &'static str {
    "ccs-check INPUT OUTDIR REF[optional] VCF[optional]\n\
     INPUT - the input ccs.bam or CCS FASTQ file, or a folder of FASTQ files\n\
     OUTDIR - directory to output results into\n\
     REF - A fasta file with the references (optional)\n\
     VCF - A VCF file with variant positions to exclude (optional)"
}

/// Interprets the raw command line (program name first).
///
/// Help aliases win over everything else, then the positional count is checked
/// before handing the rest to clap.
pub fn parse_from<I, T>(raw: I) -> Command
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let raw: Vec<OsString> = raw.into_iter().map(Into::into).collect();
    let user_args: Vec<String> = raw
        .iter()
        .skip(1)
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    if let Some(first) = user_args.iter().find(|a| !is_verbose_flag(a)) {
        if HELP_TOKENS.contains(&first.as_str()) {
            return Command::Help;
        }
    }

    let positionals = user_args.iter().filter(|a| !is_verbose_flag(a)).count();
    if positionals > 4 {
        return Command::Usage("Too many arguments".to_string());
    }
    if positionals < 2 {
        return Command::Usage("Not enough arguments".to_string());
    }

    match Arguments::try_parse_from(raw) {
        Ok(args) => Command::Run(args),
        Err(e) => Command::Usage(e.to_string()),
    }
}

fn is_verbose_flag(arg: &str) -> bool {
    arg == "-v" || arg == "--verbose"
}

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use flate2::read::MultiGzDecoder;
use crate::config::defs::{FASTQ_EXTS, GZIP_EXT};

/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Opens a file for reading, transparently decompressing gzip input.
pub fn open_file_reader(path: &Path) -> io::Result<FileReader> {
    let is_gz = is_gzipped(path)?;
    let file = BufReader::new(File::open(path)?);
    if is_gz {
        Ok(FileReader::Gzipped(MultiGzDecoder::new(file)))
    } else {
        Ok(FileReader::Uncompressed(file))
    }
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Splits a path into its stem and all trailing extensions.
/// `reads.fastq.gz` -> (`reads`, ["fastq", "gz"])
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();
    while let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        extensions.insert(0, ext);
        stem.set_extension("");
    }
    (stem, extensions)
}

/// True for `.fastq`, `.fq`, and their gzipped forms.
pub fn is_fastq_path(path: &Path) -> bool {
    let (_, extensions) = extension_remover(path);
    let mut exts = extensions.iter().rev();
    let last = match exts.next() {
        Some(ext) if ext.eq_ignore_ascii_case(GZIP_EXT) => exts.next(),
        other => other,
    };
    last.map(|ext| FASTQ_EXTS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Lists FASTQ files in a directory, sorted by path so runs are reproducible.
pub fn list_fastq_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_fastq_path(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Creates a buffered writer for `name` inside `out_dir`, overwriting any existing file.
pub fn create_output_file(out_dir: &Path, name: &str) -> io::Result<BufWriter<File>> {
    let path = out_dir.join(name);
    Ok(BufWriter::new(File::create(path)?))
}

/// Resolves a command line path against `cwd` unless it is already absolute.
pub fn resolve_path(path: &str, cwd: &Path) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("/data/movie.ccs.fastq.gz"));
        assert_eq!(stem, PathBuf::from("/data/movie"));
        assert_eq!(exts, vec!["ccs", "fastq", "gz"]);
    }

    #[test]
    fn test_is_fastq_path() {
        assert!(is_fastq_path(Path::new("a.fastq")));
        assert!(is_fastq_path(Path::new("a.FQ.gz")));
        assert!(!is_fastq_path(Path::new("a.fasta")));
        assert!(!is_fastq_path(Path::new("a.gz")));
        assert!(!is_fastq_path(Path::new("README")));
    }

    #[test]
    fn test_list_fastq_files_sorted() -> io::Result<()> {
        let dir = tempdir()?;
        for name in ["b.fastq", "a.fq", "notes.txt", "c.fastq.gz"] {
            File::create(dir.path().join(name))?;
        }
        let files = list_fastq_files(dir.path())?;
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.fq", "b.fastq", "c.fastq.gz"]);
        Ok(())
    }

    #[test]
    fn test_gzip_reader_round() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("x.fastq.gz");
        let mut enc = GzEncoder::new(File::create(&path)?, Compression::default());
        enc.write_all(b"@r1\nACGT\n+\nIIII\n")?;
        enc.finish()?;

        assert!(is_gzipped(&path)?);
        let mut text = String::new();
        open_file_reader(&path)?.read_to_string(&mut text)?;
        assert!(text.starts_with("@r1"));
        Ok(())
    }

    #[test]
    fn test_empty_file_is_not_gzipped() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.fastq");
        File::create(&path)?;
        assert!(!is_gzipped(&path)?);
        Ok(())
    }

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/work");
        assert_eq!(resolve_path("reads.fq", cwd), PathBuf::from("/work/reads.fq"));
        assert_eq!(resolve_path("/data/reads.fq", cwd), PathBuf::from("/data/reads.fq"));
    }
}

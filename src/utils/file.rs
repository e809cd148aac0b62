use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::config::defs::TMP_SUFFIX;


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Plain or gzip-compressed file, picked by magic bytes.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn open_maybe_gzipped(path: &Path) -> io::Result<FileReader> {
    let file = File::open(path)?;
    if is_gzipped(path)? {
        Ok(FileReader::Gzipped(GzDecoder::new(file)))
    } else {
        Ok(FileReader::Uncompressed(BufReader::new(file)))
    }
}


/// Lists entries of `dir` whose file name matches `pattern`, keyed by the first
/// capture group parsed as a number. Sorted by that number.
pub fn numbered_entries(dir: &Path, pattern: &Regex) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = Vec::new();
    let read_dir = fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in read_dir {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(caps) = pattern.captures(&file_name) {
            let number = caps
                .get(1)
                .ok_or_else(|| anyhow!("Pattern {} has no capture group", pattern))?
                .as_str()
                .parse::<u32>()
                .with_context(|| format!("Batch number out of range in {}", file_name))?;
            entries.push((number, entry.path()));
        }
    }
    entries.sort_by_key(|(n, _)| *n);
    Ok(entries)
}

/// Regular files in `dir` whose names end with `suffix`, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let read_dir = fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in read_dir {
        let path = entry?.path();
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(suffix))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(TMP_SUFFIX);
    PathBuf::from(s)
}


/// Gzips `source` into `dest`, writing `<dest>.tmp` first and renaming once complete
/// so a partial archive never carries the final name.
pub fn gzip_file(source: &Path, dest: &Path) -> Result<()> {
    let tmp = tmp_path(dest);
    {
        let mut reader = BufReader::new(
            File::open(source).with_context(|| format!("Failed to open {}", source.display()))?,
        );
        let writer = BufWriter::new(
            File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?,
        );
        let mut encoder = GzEncoder::new(writer, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
    }
    fs::rename(&tmp, dest)
        .with_context(|| format!("Failed to move {} to {}", tmp.display(), dest.display()))?;
    Ok(())
}


/// md5sum-style line for `path`: `<hex digest>  <file name>`.
pub fn md5_line(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}  {}", context.compute(), file_name_string(path)))
}

pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

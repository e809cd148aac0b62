//! The batch manifest written by `config` and consumed by `tidy`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::config::defs::{PipelineError, FAST5_EXT, GZIP_EXT, SUMMARY_TAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Pass,
    Fail,
    All,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::Pass => "pass",
            Quality::Fail => "fail",
            Quality::All => "all",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastqFile {
    pub quality: Quality,
    pub path: PathBuf,
}

/// One numbered unit of instrument output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub number: u32,
    pub sequencing_summary_file: PathBuf,
    pub fastq_files: Vec<FastqFile>,
    pub fast5_dir: PathBuf,
    pub flowcell_id: String,
    pub rnumber: u64,
    pub md5_fast5: PathBuf,
    pub md5_fastq: PathBuf,
}

impl BatchEntry {
    fn run_prefix(&self) -> String {
        format!("{}_{}", self.flowcell_id, self.rnumber)
    }

    /// `<FC>_<RN>_<NNNNN>.fast5.tar.gz`, next to the batch directory.
    pub fn fast5_archive_path(&self) -> PathBuf {
        let root = self.fast5_dir.parent().unwrap_or_else(|| Path::new("."));
        root.join(format!(
            "{}_{:05}.{}.tar.{}",
            self.run_prefix(),
            self.number,
            FAST5_EXT,
            GZIP_EXT
        ))
    }

    /// `<FC>_<RN>_<quality>_<NNNNN>.fastq.gz`, next to the source file.
    pub fn fastq_output_path(&self, fastq: &FastqFile) -> PathBuf {
        let dir = fastq.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!(
            "{}_{}_{:05}.fastq.{}",
            self.run_prefix(),
            fastq.quality,
            self.number,
            GZIP_EXT
        ))
    }

    pub fn summary_output_path(&self) -> PathBuf {
        let dir = self
            .sequencing_summary_file
            .parent()
            .unwrap_or_else(|| Path::new("."));
        dir.join(format!(
            "{}_{:05}.{}.txt.{}",
            self.run_prefix(),
            self.number,
            SUMMARY_TAG,
            GZIP_EXT
        ))
    }
}

pub fn write_manifest(path: &Path, entries: &[BatchEntry]) -> Result<(), PipelineError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(writer, entries)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<Vec<BatchEntry>, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    let entries: Vec<BatchEntry> = serde_yaml::from_reader(reader)?;
    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry() -> BatchEntry {
        BatchEntry {
            number: 4,
            sequencing_summary_file: PathBuf::from("/run/sequencing_summary/sequencing_summary_4.txt"),
            fastq_files: vec![FastqFile {
                quality: Quality::Pass,
                path: PathBuf::from("/run/fastq/pass/fastq_4.fastq"),
            }],
            fast5_dir: PathBuf::from("/run/fast5/4"),
            flowcell_id: "PAD23566".to_string(),
            rnumber: 61163,
            md5_fast5: PathBuf::from("/run/fast5/checksum.fast5.md5"),
            md5_fastq: PathBuf::from("/run/fastq/checksum.fastq.md5"),
        }
    }

    #[test]
    fn test_output_names() {
        let e = entry();
        assert_eq!(
            e.fast5_archive_path(),
            PathBuf::from("/run/fast5/PAD23566_61163_00004.fast5.tar.gz")
        );
        assert_eq!(
            e.fastq_output_path(&e.fastq_files[0]),
            PathBuf::from("/run/fastq/pass/PAD23566_61163_pass_00004.fastq.gz")
        );
        assert_eq!(
            e.summary_output_path(),
            PathBuf::from("/run/sequencing_summary/PAD23566_61163_00004.sequencing_summary.txt.gz")
        );
    }

    #[test]
    fn test_manifest_yaml() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("batches.yaml");
        write_manifest(&path, &[entry()])?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("flowcell_id: PAD23566"));
        assert!(text.contains("quality: pass"));

        let entries = read_manifest(&path)?;
        assert_eq!(entries, vec![entry()]);
        Ok(())
    }

    #[test]
    fn test_missing_manifest() {
        let err = read_manifest(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }
}

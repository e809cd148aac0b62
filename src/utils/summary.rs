use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::config::defs::SUMMARY_TAG;
use crate::utils::file::open_maybe_gzipped;


/// The sequencing summary columns used by the QC plots. Other columns are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryRow {
    pub read_id: String,
    pub run_id: String,
    pub channel: u32,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub num_events: Option<u64>,
    pub template_start: f64,
    pub template_duration: f64,
    pub sequence_length_template: u64,
    pub mean_qscore_template: f64,
}

/// Summary files in each of `dirs`: names containing `sequencing_summary` that end
/// in `.txt` or `.txt.gz`.
pub fn get_summary_files(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        let read_dir = std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
        for entry in read_dir {
            let path = entry?.path();
            let name = crate::utils::file::file_name_string(&path);
            if name.contains(SUMMARY_TAG) && (name.ends_with(".txt") || name.ends_with(".txt.gz")) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_summary_file(path: &Path) -> Result<Vec<SummaryRow>> {
    let reader = open_maybe_gzipped(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for result in csv_reader.deserialize() {
        let row: SummaryRow = result.with_context(|| format!("Invalid summary row in {}", path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_summary_files(paths: &[PathBuf]) -> Result<Vec<SummaryRow>> {
    let mut rows = Vec::new();
    for path in paths {
        let mut file_rows = read_summary_file(path)?;
        info!("Read {} rows from {}", file_rows.len(), path.display());
        rows.append(&mut file_rows);
    }
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "filename\tread_id\trun_id\tchannel\tstart_time\tduration\tnum_events\ttemplate_start\tnum_events_template\ttemplate_duration\tsequence_length_template\tmean_qscore_template\tstrand_score_template";

    #[test]
    fn test_read_summary_file_ignores_extra_columns() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sequencing_summary_0.txt");
        fs::write(
            &path,
            format!("{}\nf.fast5\tr1\trun1\t12\t10.5\t2.0\t4000\t10.6\t3900\t1.9\t1000\t11.2\t-0.5\n", HEADER),
        )?;
        let rows = read_summary_file(&path)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].read_id, "r1");
        assert_eq!(rows[0].channel, 12);
        assert_eq!(rows[0].num_events, Some(4000));
        assert_eq!(rows[0].sequence_length_template, 1000);
        Ok(())
    }

    #[test]
    fn test_num_events_optional() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sequencing_summary.txt");
        fs::write(
            &path,
            "read_id\trun_id\tchannel\tstart_time\tduration\ttemplate_start\ttemplate_duration\tsequence_length_template\tmean_qscore_template\n\
             r1\trun1\t1\t0\t1\t0\t1\t10\t8.0\n",
        )?;
        let rows = read_summary_file(&path)?;
        assert_eq!(rows[0].num_events, None);
        Ok(())
    }

    #[test]
    fn test_get_summary_files() -> Result<()> {
        let dir = tempdir()?;
        for name in ["sequencing_summary_1.txt", "PAD_1_00001.sequencing_summary.txt.gz", "fastq_1.fastq", "summary.txt"] {
            fs::File::create(dir.path().join(name))?;
        }
        let files = get_summary_files(&[dir.path().to_path_buf()])?;
        assert_eq!(files.len(), 2);
        Ok(())
    }
}

// src/pipelines/plot.rs: run QC statistics and plots from summaries and FASTQ headers
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use crate::cli::args::PlotArgs;
use crate::config::defs::{PipelineError, FASTQ_GZ_SUFFIX};
use crate::utils::dataset::{
    annotate_cumulative, convert_sample_time_columns, merge_datasets, stats_report, trim_dataset,
    ReadRecord, TrimReport,
};
use crate::utils::fastx::{read_fastq_meta, FastqMeta};
use crate::utils::file::{append_line, files_with_suffix};
use crate::utils::plotting::plot_data;
use crate::utils::summary::{get_summary_files, read_summary_files};
use crate::utils::system::{create_thread_pool, generate_rng, log_arguments, worker_count};


pub fn stats_path(plots_dir: &Path, name: &str, stage: &str) -> PathBuf {
    plots_dir.join(format!("{}.{}.stats.txt", name, stage))
}

/// Header metadata of every `.fastq.gz` file under `dirs`, parsed on a rayon pool.
pub fn read_fastq_dirs(dirs: &[PathBuf], workers: usize) -> Result<Vec<FastqMeta>> {
    let mut files = Vec::new();
    for dir in dirs {
        files.extend(files_with_suffix(dir, FASTQ_GZ_SUFFIX)?);
    }
    info!("Reading {} fastq files with {} workers", files.len(), workers);

    let pool = create_thread_pool(workers)?;
    let parsed: Vec<(Vec<FastqMeta>, usize)> =
        pool.install(|| files.par_iter().map(|path| read_fastq_meta(path)).collect::<Result<Vec<_>>>())?;

    let mut records = Vec::new();
    let mut skipped = 0;
    for (mut meta, file_skipped) in parsed {
        records.append(&mut meta);
        skipped += file_skipped;
    }
    if skipped > 0 {
        warn!("Skipped {} fastq records with incomplete headers", skipped);
    }
    Ok(records)
}

/// Reads and joins the summary and FASTQ tables.
pub fn load_dataset(summary_dirs: &[PathBuf], fastq_dirs: &[PathBuf], workers: usize) -> Result<Vec<ReadRecord>, PipelineError> {
    let summary_files = get_summary_files(summary_dirs)?;
    if summary_files.is_empty() {
        return Err(PipelineError::NoInputFiles {
            dir: summary_dirs.first().cloned().unwrap_or_default(),
            pattern: "*sequencing_summary*.txt[.gz]".to_string(),
        });
    }
    let summary = read_summary_files(&summary_files)?;
    let fastq = read_fastq_dirs(fastq_dirs, workers)?;
    info!("Merging {} summary rows with {} fastq records", summary.len(), fastq.len());

    let records = merge_datasets(summary, fastq);
    if records.is_empty() {
        return Err(PipelineError::EmptyDataset(
            "no read is present in both the summaries and the fastq files".to_string(),
        ));
    }
    info!("Merged dataset has {} reads", records.len());
    Ok(records)
}

/// Time-orders the records and fills the cumulative columns.
pub fn prepare_dataset(records: &mut Vec<ReadRecord>) {
    convert_sample_time_columns(records);
    annotate_cumulative(records);
}

pub fn write_stats(records: &[ReadRecord], plots_dir: &Path, name: &str, stage: &str) -> Result<()> {
    let path = stats_path(plots_dir, name, stage);
    info!("Writing {} stats to {}", stage, path.display());
    append_line(&path, stats_report(records).trim_end())
}

/// Unfiltered stats, trimming, filtered stats. Returns the trimmed records.
pub fn summarise(records: Vec<ReadRecord>, plots_dir: &Path, name: &str) -> Result<(Vec<ReadRecord>, TrimReport)> {
    let mut records = records;
    prepare_dataset(&mut records);
    write_stats(&records, plots_dir, name, "unfiltered")?;

    let (mut trimmed, report) = trim_dataset(records);
    prepare_dataset(&mut trimmed);
    write_stats(&trimmed, plots_dir, name, "filtered")?;
    Ok((trimmed, report))
}

fn plot_run(args: PlotArgs) -> Result<(), PipelineError> {
    fs::create_dir_all(&args.plots_dir)
        .with_context(|| format!("Failed to create {}", args.plots_dir.display()))?;

    let records = load_dataset(&args.summary_dir, &args.fastq_dir, worker_count(args.threads))?;
    let (trimmed, report) = summarise(records, &args.plots_dir, &args.name)?;
    if trimmed.is_empty() {
        return Err(PipelineError::EmptyDataset("every read was removed by trimming".to_string()));
    }

    let mut rng = generate_rng(args.seed);
    let failures = plot_data(&trimmed, &report, &args.name, &args.plots_dir, &mut rng);
    if failures > 0 {
        warn!("{} plots could not be drawn", failures);
    }
    Ok(())
}


pub async fn run(args: &PlotArgs) -> Result<(), PipelineError> {
    log_arguments(&[
        ("summary_dir", format!("{:?}", args.summary_dir)),
        ("fastq_dir", format!("{:?}", args.fastq_dir)),
        ("plots_dir", args.plots_dir.display().to_string()),
        ("name", args.name.clone()),
        ("threads", args.threads.to_string()),
        ("seed", format!("{:?}", args.seed)),
    ]);
    let args = args.clone();
    tokio::task::spawn_blocking(move || plot_run(args))
        .await
        .map_err(|e| PipelineError::Other(e.into()))?
}


#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    const SUMMARY_HEADER: &str = "read_id\trun_id\tchannel\tstart_time\tduration\tnum_events\ttemplate_start\ttemplate_duration\tsequence_length_template\tmean_qscore_template";

    fn write_gz(path: &Path, text: &str) -> Result<()> {
        let mut encoder = GzEncoder::new(fs::File::create(path)?, Compression::default());
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    fn fastq_record(read_id: &str, channel: u32, second: u32, length: usize) -> String {
        format!(
            "@{} runid=run1 sampleid=NA12878 read=1 ch={} start_time=2018-06-01T10:00:{:02}Z\n{}\n+\n{}\n",
            read_id,
            channel,
            second,
            "A".repeat(length),
            "I".repeat(length)
        )
    }

    fn make_inputs(root: &Path) -> Result<(PathBuf, PathBuf)> {
        let summary_dir = root.join("summary");
        let fastq_dir = root.join("fastq");
        fs::create_dir_all(&summary_dir)?;
        fs::create_dir_all(&fastq_dir)?;

        let mut summary = format!("{}\n", SUMMARY_HEADER);
        let mut fastq = String::new();
        for i in 0..5u32 {
            let length = 100 + i as usize * 10;
            summary.push_str(&format!(
                "r{i}\trun1\t{ch}\t{i}.0\t1.0\t{ev}\t{i}.0\t2.0\t{len}\t{q}\n",
                i = i,
                ch = i + 1,
                ev = length * 2,
                len = length,
                q = 8.0 + i as f64,
            ));
            fastq.push_str(&fastq_record(&format!("r{}", i), i + 1, i, length));
        }
        // Only in the summary, dropped by the join
        summary.push_str("orphan\trun1\t9\t0.0\t1.0\t200\t0.0\t2.0\t100\t10.0\n");
        // No sampleid, skipped
        fastq.push_str("@bad runid=run1 read=1 ch=3 start_time=2018-06-01T10:00:00Z\nAC\n+\nII\n");

        fs::write(summary_dir.join("sequencing_summary_0.txt"), summary)?;
        write_gz(&fastq_dir.join("fastq_0.fastq.gz"), &fastq)?;
        Ok((summary_dir, fastq_dir))
    }

    #[test]
    fn test_load_dataset_joins_tables() -> Result<()> {
        let dir = tempdir()?;
        let (summary_dir, fastq_dir) = make_inputs(dir.path())?;
        let records = load_dataset(&[summary_dir], &[fastq_dir], 2)?;
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.sample_id == "NA12878"));
        assert!(records.iter().all(|r| r.read_id != "orphan"));
        Ok(())
    }

    #[test]
    fn test_load_dataset_without_summaries() -> Result<()> {
        let dir = tempdir()?;
        let result = load_dataset(&[dir.path().to_path_buf()], &[dir.path().to_path_buf()], 1);
        assert!(matches!(result, Err(PipelineError::NoInputFiles { .. })));
        Ok(())
    }

    #[test]
    fn test_load_dataset_without_matching_reads() -> Result<()> {
        let dir = tempdir()?;
        let (summary_dir, _) = make_inputs(dir.path())?;
        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty)?;
        let result = load_dataset(&[summary_dir], &[empty], 1);
        assert!(matches!(result, Err(PipelineError::EmptyDataset(_))));
        Ok(())
    }

    #[test]
    fn test_summarise_writes_both_stats_files() -> Result<()> {
        let dir = tempdir()?;
        let (summary_dir, fastq_dir) = make_inputs(dir.path())?;
        let records = load_dataset(&[summary_dir], &[fastq_dir], 1)?;
        let plots_dir = dir.path().join("plots");
        fs::create_dir_all(&plots_dir)?;

        let (trimmed, report) = summarise(records, &plots_dir, "run")?;
        assert_eq!(report.before, 5);
        assert_eq!(report.after, trimmed.len());
        assert!(trimmed.windows(2).all(|w| w[0].start_time_float_by_sample <= w[1].start_time_float_by_sample));
        assert_eq!(trimmed.last().map(|r| r.read_count), Some(trimmed.len() as u64));

        let unfiltered = fs::read_to_string(stats_path(&plots_dir, "run", "unfiltered"))?;
        assert!(unfiltered.starts_with("# Stats for sample 'NA12878' #"));
        assert!(unfiltered.contains("NX values:"));
        assert!(stats_path(&plots_dir, "run", "filtered").is_file());
        Ok(())
    }

    #[test]
    fn test_stats_path() {
        assert_eq!(
            stats_path(Path::new("/plots"), "PAD23566", "filtered"),
            PathBuf::from("/plots/PAD23566.filtered.stats.txt")
        );
    }
}

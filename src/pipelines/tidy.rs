// src/pipelines/tidy.rs: rename, compress and checksum each batch of a run
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::cli::args::TidyArgs;
use crate::config::batch::{read_manifest, BatchEntry};
use crate::config::defs::{PipelineError, TAR_TAG};
use crate::utils::command::tar;
use crate::utils::file::{append_line, file_name_string, gzip_file, md5_line, tmp_path};
use crate::utils::streams::run_tool;
use crate::utils::system::{log_arguments, resolve_threads};


#[derive(Debug, Clone, Copy, Default)]
pub struct TidyOptions {
    pub keep: bool,
    pub dry_run: bool,
    pub overwrite: bool,
}

/// Serialises appends to the checksum files shared by all batches.
type ChecksumLock = Arc<Mutex<()>>;


fn should_skip(output: &Path, options: TidyOptions) -> bool {
    if output.exists() && !options.overwrite {
        info!("{} already exists, skipping", output.display());
        return true;
    }
    false
}

async fn append_checksum(output: &Path, md5_file: &Path, lock: &ChecksumLock) -> Result<()> {
    let output = output.to_path_buf();
    let line = tokio::task::spawn_blocking(move || md5_line(&output)).await??;
    let _guard = lock.lock().await;
    append_line(md5_file, &line)
}

async fn remove_source(path: &Path, options: TidyOptions) -> Result<()> {
    if options.keep {
        return Ok(());
    }
    if path.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}


/// Tars and gzips the batch's FAST5 folder next to it.
pub async fn tar_fast5_dir(entry: &BatchEntry, options: TidyOptions, lock: &ChecksumLock) -> Result<()> {
    let archive = entry.fast5_archive_path();
    if should_skip(&archive, options) {
        return Ok(());
    }
    let root = entry
        .fast5_dir
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent folder", entry.fast5_dir.display()))?;
    let member = file_name_string(&entry.fast5_dir);
    let tmp = tmp_path(&archive);
    let args = tar::create_gz_args(&tmp, root, &member);

    if options.dry_run {
        info!("Would have run: {} {}", TAR_TAG, args.join(" "));
        info!("Would have moved {} to {}", tmp.display(), archive.display());
        if !options.keep {
            info!("Would have removed {}", entry.fast5_dir.display());
        }
        return Ok(());
    }

    info!("Running: {} {}", TAR_TAG, args.join(" "));
    let output = run_tool(TAR_TAG, &args, None).await?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            tool: TAR_TAG.to_string(),
            error: output.stderr.trim_end().to_string(),
        }
        .into());
    }
    tokio::fs::rename(&tmp, &archive).await?;
    remove_source(&entry.fast5_dir, options).await?;
    append_checksum(&archive, &entry.md5_fast5, lock).await
}

/// Gzips `source` to `dest` in-process. Returns false when nothing was written.
async fn gzip_to(source: &Path, dest: &Path, options: TidyOptions) -> Result<bool> {
    if should_skip(dest, options) {
        return Ok(false);
    }
    if options.dry_run {
        info!("Would have gzipped {} to {}", source.display(), dest.display());
        if !options.keep {
            info!("Would have removed {}", source.display());
        }
        return Ok(false);
    }
    info!("Compressing {} to {}", source.display(), dest.display());
    let (src, dst): (PathBuf, PathBuf) = (source.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || gzip_file(&src, &dst)).await??;
    remove_source(source, options).await?;
    Ok(true)
}

pub async fn compress_fastq_files(entry: &BatchEntry, options: TidyOptions, lock: &ChecksumLock) -> Result<()> {
    for fastq in &entry.fastq_files {
        if !fastq.path.is_file() {
            continue;
        }
        let output = entry.fastq_output_path(fastq);
        if gzip_to(&fastq.path, &output, options).await? {
            append_checksum(&output, &entry.md5_fastq, lock).await?;
        }
    }
    Ok(())
}

pub async fn compress_summary_file(entry: &BatchEntry, options: TidyOptions) -> Result<()> {
    if !entry.sequencing_summary_file.is_file() {
        warn!("Summary file {} does not exist", entry.sequencing_summary_file.display());
        return Ok(());
    }
    gzip_to(&entry.sequencing_summary_file, &entry.summary_output_path(), options).await?;
    Ok(())
}


/// Tidies one batch: FAST5 archive, FASTQ files, then the summary.
pub async fn tidy_batch(entry: &BatchEntry, options: TidyOptions, lock: &ChecksumLock) -> Result<()> {
    if entry.fast5_dir.is_dir() {
        tar_fast5_dir(entry, options, lock).await?;
    } else {
        warn!("Fast5 folder {} does not exist", entry.fast5_dir.display());
    }

    if entry.fastq_files.iter().any(|f| f.path.is_file()) {
        compress_fastq_files(entry, options, lock).await?;
    } else {
        warn!("None of the fastq files of batch {} exist", entry.number);
    }

    compress_summary_file(entry, options).await
}


pub async fn run(args: &TidyArgs) -> Result<(), PipelineError> {
    log_arguments(&[
        ("config", args.config.display().to_string()),
        ("keep", args.keep.to_string()),
        ("dry_run", args.dry_run.to_string()),
        ("overwrite", args.overwrite.to_string()),
        ("threads", args.threads.to_string()),
    ]);

    let entries = read_manifest(&args.config)?;
    if entries.is_empty() {
        warn!("No batches listed in {}", args.config.display());
        return Ok(());
    }
    let options = TidyOptions { keep: args.keep, dry_run: args.dry_run, overwrite: args.overwrite };
    let lock: ChecksumLock = Arc::new(Mutex::new(()));
    let total = entries.len();

    let results: Vec<(u32, Result<()>)> = stream::iter(entries.into_iter().map(|entry| {
        let lock = lock.clone();
        async move {
            let outcome = tidy_batch(&entry, options, &lock).await;
            (entry.number, outcome)
        }
    }))
    .buffer_unordered(resolve_threads(args.threads))
    .collect()
    .await;

    let mut failed = 0;
    for (number, outcome) in results {
        if let Err(e) = outcome {
            warn!("Batch {} failed: {}", number, e);
            failed += 1;
        }
    }
    info!("Tidied {} of {} batches", total - failed, total);
    Ok(())
}

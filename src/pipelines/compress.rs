// src/pipelines/compress.rs: gzip loose FAST5 files of a run in place
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use log::info;

use crate::cli::args::CompressArgs;
use crate::config::defs::{PipelineError, FAST5_SUBDIR, GZIP_TAG};
use crate::utils::command::gzip;
use crate::utils::fast5::compressible_fast5_files;
use crate::utils::file::file_name_string;
use crate::utils::streams::run_tool;
use crate::utils::system::{log_arguments, resolve_threads};


/// Runs `gzip --best [-f] <name>` inside `fast5_dir`.
async fn gzip_fast5(fast5_dir: &Path, file: &Path, overwrite: bool, dry_run: bool) -> Result<(), PipelineError> {
    let name = PathBuf::from(file_name_string(file));
    let args = gzip::compress_best_args(&name, overwrite);
    if dry_run {
        info!("Would have run: {} {} in {}", GZIP_TAG, args.join(" "), fast5_dir.display());
        return Ok(());
    }

    info!("Compressing {}", file.display());
    let output = run_tool(GZIP_TAG, &args, Some(fast5_dir)).await?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            tool: GZIP_TAG.to_string(),
            error: format!("{} on {}: {}", output.status, name.display(), output.stderr.trim_end()),
        });
    }
    Ok(())
}


pub async fn run(args: &CompressArgs) -> Result<(), PipelineError> {
    log_arguments(&[
        ("run_dir", args.run_dir.display().to_string()),
        ("dry_run", args.dry_run.to_string()),
        ("overwrite", args.overwrite.to_string()),
        ("threads", args.threads.to_string()),
    ]);

    let fast5_dir = args.run_dir.join(FAST5_SUBDIR);
    if !fast5_dir.is_dir() {
        return Err(PipelineError::MissingInput(fast5_dir));
    }

    let files = compressible_fast5_files(&fast5_dir, args.overwrite)?;
    if files.is_empty() {
        info!("No fast5 files to compress in {}", fast5_dir.display());
        return Ok(());
    }
    info!("Compressing {} fast5 files", files.len());

    let fast5_dir = fast5_dir.as_path();
    let results: Vec<()> = stream::iter(files.iter().map(|file| gzip_fast5(fast5_dir, file, args.overwrite, args.dry_run)))
        .buffer_unordered(resolve_threads(args.threads))
        .try_collect()
        .await?;

    info!("Compressed {} fast5 files", results.len());
    Ok(())
}

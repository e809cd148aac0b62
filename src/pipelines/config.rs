//! `betaduck config`: scans a run directory and writes the batch manifest used by `tidy`.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{info, warn};
use regex::Regex;

use crate::cli::args::ConfigArgs;
use crate::config::batch::{write_manifest, BatchEntry, FastqFile, Quality};
use crate::config::defs::{
    PipelineError, FAIL_SUBDIR, FAST5_BATCH_PATTERN, FAST5_SUBDIR, FASTQ_BATCH_PATTERN,
    FASTQ_SANITISER_TAG, FASTQ_SUBDIR, MD5_FAST5_FILENAME, MD5_FASTQ_FILENAME, PASS_SUBDIR,
    SUMMARY_BATCH_PATTERN, SUMMARY_SUBDIR,
};
use crate::utils::command::sanitiser;
use crate::utils::fast5::{flowcell_from_fast5, rnumber_from_name};
use crate::utils::fastx::flowcell_from_fastq;
use crate::utils::file::{file_name_string, files_with_suffix, numbered_entries};
use crate::utils::streams::{run_tool, warn_on_failure};
use crate::utils::system::log_arguments;


/// The files of one batch, before the run identity is known.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFiles {
    pub number: u32,
    pub summary: PathBuf,
    pub fastq_files: Vec<FastqFile>,
    pub fast5_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunDirs {
    pub summary_dir: PathBuf,
    pub fastq_dir: PathBuf,
    pub fast5_dir: PathBuf,
}

impl RunDirs {
    pub fn from_args(args: &ConfigArgs) -> Self {
        RunDirs {
            summary_dir: args.summary_dir.clone().unwrap_or_else(|| args.run_dir.join(SUMMARY_SUBDIR)),
            fastq_dir: args.fastq_dir.clone().unwrap_or_else(|| args.run_dir.join(FASTQ_SUBDIR)),
            fast5_dir: args.fast5_dir.clone().unwrap_or_else(|| args.run_dir.join(FAST5_SUBDIR)),
        }
    }
}


/// Runs the FASTQ sanitiser over `fastq_dir`. A non-zero exit is only a warning.
pub async fn sanitise_fastq_files(fastq_dir: &Path) -> Result<(), PipelineError> {
    let args = sanitiser::arg_generator(fastq_dir);
    info!("Running {} {}", FASTQ_SANITISER_TAG, args.join(" "));
    let output = run_tool(FASTQ_SANITISER_TAG, &args, None)
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: FASTQ_SANITISER_TAG.to_string(),
            error: e.to_string(),
        })?;
    warn_on_failure(&output, FASTQ_SANITISER_TAG);
    Ok(())
}


/// Batches that have a summary file, a FAST5 directory and at least one FASTQ
/// file, in batch order.
pub fn collect_batches(dirs: &RunDirs) -> Result<Vec<BatchFiles>> {
    let summary_re = Regex::new(SUMMARY_BATCH_PATTERN)?;
    let fastq_re = Regex::new(FASTQ_BATCH_PATTERN)?;
    let fast5_re = Regex::new(FAST5_BATCH_PATTERN)?;

    let summaries: BTreeMap<u32, PathBuf> = numbered_entries(&dirs.summary_dir, &summary_re)?
        .into_iter()
        .filter(|(_, path)| path.is_file())
        .collect();
    let fast5_dirs: BTreeMap<u32, PathBuf> = numbered_entries(&dirs.fast5_dir, &fast5_re)?
        .into_iter()
        .filter(|(_, path)| path.is_dir())
        .collect();

    let mut fastqs: BTreeMap<u32, Vec<FastqFile>> = BTreeMap::new();
    let fastq_locations = [
        (dirs.fastq_dir.clone(), Quality::All),
        (dirs.fastq_dir.join(PASS_SUBDIR), Quality::Pass),
        (dirs.fastq_dir.join(FAIL_SUBDIR), Quality::Fail),
    ];
    for (dir, quality) in fastq_locations {
        if !dir.is_dir() {
            continue;
        }
        for (number, path) in numbered_entries(&dir, &fastq_re)? {
            if path.is_file() {
                fastqs.entry(number).or_default().push(FastqFile { quality, path });
            }
        }
    }

    let batches = summaries
        .into_iter()
        .filter_map(|(number, summary)| {
            let fast5_dir = fast5_dirs.get(&number)?.clone();
            let fastq_files = fastqs.remove(&number)?;
            Some(BatchFiles { number, summary, fastq_files, fast5_dir })
        })
        .collect();
    Ok(batches)
}


/// Finds the flowcell ID and rnumber of the run.
///
/// The rnumber comes from FAST5 file names. The flowcell ID is `flowcell_override`
/// when given, else the FAST5 tracking attributes, else the first FASTQ header
/// carrying `flow_cell_id`.
pub fn run_identity(batches: &[BatchFiles], flowcell_override: Option<&str>) -> Result<(String, u64)> {
    let mut flowcell_id = flowcell_override.map(String::from);
    let mut rnumber = None;

    'scan: for batch in batches {
        for fast5 in files_with_suffix(&batch.fast5_dir, ".fast5")? {
            if rnumber.is_none() {
                rnumber = rnumber_from_name(&file_name_string(&fast5));
            }
            if flowcell_id.is_none() {
                flowcell_id = flowcell_from_fast5(&fast5);
            }
            let flowcell_settled = flowcell_id.is_some() || !cfg!(feature = "fast5");
            if rnumber.is_some() && flowcell_settled {
                break 'scan;
            }
        }
    }

    if flowcell_id.is_none() {
        'fastq: for batch in batches {
            for fastq in &batch.fastq_files {
                match flowcell_from_fastq(&fastq.path) {
                    Ok(Some(id)) => {
                        flowcell_id = Some(id);
                        break 'fastq;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Could not read {}: {}", fastq.path.display(), e),
                }
            }
        }
    }

    match (flowcell_id, rnumber) {
        (Some(flowcell_id), Some(rnumber)) => Ok((flowcell_id, rnumber)),
        (None, _) => Err(anyhow!("Could not get flowcell ID from any fast5 or fastq file, try --flowcell-id")),
        (_, None) => Err(anyhow!("Could not get rnumber from any fast5 file name")),
    }
}

pub fn build_entries(batches: Vec<BatchFiles>, dirs: &RunDirs, flowcell_id: &str, rnumber: u64) -> Vec<BatchEntry> {
    batches
        .into_iter()
        .map(|batch| BatchEntry {
            number: batch.number,
            sequencing_summary_file: batch.summary,
            fastq_files: batch.fastq_files,
            fast5_dir: batch.fast5_dir,
            flowcell_id: flowcell_id.to_string(),
            rnumber,
            md5_fast5: dirs.fast5_dir.join(MD5_FAST5_FILENAME),
            md5_fastq: dirs.fastq_dir.join(MD5_FASTQ_FILENAME),
        })
        .collect()
}


pub async fn run(args: &ConfigArgs) -> Result<(), PipelineError> {
    log_arguments(&[
        ("run_dir", args.run_dir.display().to_string()),
        ("output_yaml_file", args.output_yaml_file.display().to_string()),
        ("sanitiser", args.sanitiser.to_string()),
        ("active", args.active.to_string()),
        ("flowcell_id", args.flowcell_id.clone().unwrap_or_default()),
    ]);

    let dirs = RunDirs::from_args(args);
    for dir in [&args.run_dir, &dirs.summary_dir, &dirs.fastq_dir, &dirs.fast5_dir] {
        if !dir.is_dir() {
            return Err(PipelineError::MissingInput(dir.clone()));
        }
    }

    if args.sanitiser {
        sanitise_fastq_files(&dirs.fastq_dir).await?;
    }

    let mut batches = collect_batches(&dirs)?;
    if args.active {
        if let Some(last) = batches.pop() {
            info!("Run is active, leaving batch {} alone", last.number);
        }
    }
    if batches.is_empty() {
        return Err(PipelineError::NoInputFiles {
            dir: args.run_dir.clone(),
            pattern: "complete batches (summary, fastq and fast5 folder)".to_string(),
        });
    }

    let (flowcell_id, rnumber) = run_identity(&batches, args.flowcell_id.as_deref())?;
    info!("Flowcell {} with rnumber {}", flowcell_id, rnumber);

    let entries = build_entries(batches, &dirs, &flowcell_id, rnumber);
    write_manifest(&args.output_yaml_file, &entries)?;
    info!("Wrote {} batches to {}", entries.len(), args.output_yaml_file.display());
    Ok(())
}

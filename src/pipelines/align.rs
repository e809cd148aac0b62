// src/pipelines/align.rs: minimap2 alignment of a sample's FASTQ files, merging and wub QC
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use log::{info, warn};

use crate::cli::args::AlignArgs;
use crate::cli::CsTag;
use crate::config::defs::{
    PipelineError, BAM_ALIGNMENT_QC_TAG, BAM_MULTI_QC_TAG, CURL_TAG, FASTQ_GZ_SUFFIX, GENOME_BED,
    GENOME_FAI, GENOME_FASTA, GENOME_INDEX, GENOME_W_LAMBDA_FASTA, GENOME_W_LAMBDA_INDEX, GZIP_TAG,
    LAMBDA_FILT_TAG, LAMBDA_GENOME_URL, LAMBDA_NAME, MERGED_SUBDIR, MINIMAP2_TAG, QC_SUBDIR,
    SAMTOOLS_TAG, UNALIGNED_NAME,
};
use crate::utils::command::{check_versions, gzip, minimap2, samtools, wub};
use crate::utils::fastx::{concat_fasta, fasta_to_bed};
use crate::utils::file::{file_name_string, files_with_suffix};
use crate::utils::streams::{run_pipeline, run_tool, warn_on_failure, PipelineStage};
use crate::utils::system::{log_arguments, worker_count};


#[derive(Debug, Clone, PartialEq)]
pub struct LambdaPaths {
    pub dir: PathBuf,
    pub fasta: PathBuf,
    pub bed: PathBuf,
    pub fai: PathBuf,
}

/// Reference files for one genome, optionally extended with the lambda control.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomePaths {
    pub dir: PathBuf,
    pub host_fasta: PathBuf,
    /// FASTA the index is built from: the host, or host + lambda.
    pub target_fasta: PathBuf,
    pub index: PathBuf,
    pub lambda: Option<LambdaPaths>,
}

impl GenomePaths {
    pub fn new(genome_dir: &Path, genome: &str, w_lambda: bool) -> Self {
        let dir = genome_dir.join(genome);
        let host_fasta = dir.join(GENOME_FASTA);
        if w_lambda {
            let lambda_dir = genome_dir.join(LAMBDA_NAME);
            GenomePaths {
                target_fasta: dir.join(GENOME_W_LAMBDA_FASTA),
                index: dir.join(GENOME_W_LAMBDA_INDEX),
                lambda: Some(LambdaPaths {
                    fasta: lambda_dir.join(GENOME_FASTA),
                    bed: lambda_dir.join(GENOME_BED),
                    fai: lambda_dir.join(GENOME_FAI),
                    dir: lambda_dir,
                }),
                host_fasta,
                dir,
            }
        } else {
            GenomePaths {
                target_fasta: host_fasta.clone(),
                index: dir.join(GENOME_INDEX),
                lambda: None,
                host_fasta,
                dir,
            }
        }
    }
}


/// Output naming for one sample, keyed by the flowcell and rnumber of its FASTQ files.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    pub output_dir: PathBuf,
    pub genome: String,
    pub w_lambda: bool,
    pub flowcell_id: String,
    pub rnumber: String,
}

impl SampleLayout {
    pub fn host_label(&self) -> String {
        if self.w_lambda {
            format!("{}.{}", self.genome, LAMBDA_FILT_TAG)
        } else {
            self.genome.clone()
        }
    }

    pub fn host_bam(&self, prefix: &str) -> PathBuf {
        let stem = if self.w_lambda { format!("{}.{}", prefix, LAMBDA_FILT_TAG) } else { prefix.to_string() };
        self.output_dir.join(&self.genome).join(format!("{}.sorted.bam", stem))
    }

    pub fn lambda_bam(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(LAMBDA_NAME).join(format!("{}.{}.sorted.bam", prefix, LAMBDA_NAME))
    }

    pub fn unaligned_bam(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(UNALIGNED_NAME).join(format!("{}.{}.bam", prefix, UNALIGNED_NAME))
    }

    pub fn merged_bam(&self, label: &str) -> PathBuf {
        self.output_dir
            .join(MERGED_SUBDIR)
            .join(format!("{}_{}_{}.sorted.merged.bam", label, self.flowcell_id, self.rnumber))
    }

    pub fn qc_pickle(&self, label: &str) -> PathBuf {
        self.output_dir.join(QC_SUBDIR).join(format!("{}.pickle", label))
    }

    pub fn qc_report(&self, label: &str) -> PathBuf {
        self.output_dir.join(QC_SUBDIR).join(format!("{}.report.pdf", label))
    }

    pub fn multiqc_report(&self) -> PathBuf {
        self.output_dir
            .join(QC_SUBDIR)
            .join(format!("{}_{}_{}.multiqc.pdf", self.genome, self.flowcell_id, self.rnumber))
    }

    /// Every folder the outputs land in.
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.output_dir.join(&self.genome),
            self.output_dir.join(UNALIGNED_NAME),
            self.output_dir.join(MERGED_SUBDIR),
            self.output_dir.join(QC_SUBDIR),
        ];
        if self.w_lambda {
            dirs.push(self.output_dir.join(LAMBDA_NAME));
        }
        dirs
    }
}


/// One FASTQ and the BAM files aligning it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignJob {
    pub fastq: PathBuf,
    pub host_bam: PathBuf,
    pub lambda_bam: Option<PathBuf>,
    pub unaligned_bam: PathBuf,
}

impl AlignJob {
    pub fn new(fastq: &Path, layout: &SampleLayout) -> Self {
        let prefix = fastq_prefix(fastq);
        AlignJob {
            fastq: fastq.to_path_buf(),
            host_bam: layout.host_bam(&prefix),
            lambda_bam: layout.w_lambda.then(|| layout.lambda_bam(&prefix)),
            unaligned_bam: layout.unaligned_bam(&prefix),
        }
    }

    /// The coordinate-sorted outputs. The unaligned BAM is not sorted, so it is never indexed.
    pub fn sorted_bams(&self) -> Vec<PathBuf> {
        let mut bams = vec![self.host_bam.clone()];
        bams.extend(self.lambda_bam.clone());
        bams
    }
}


pub fn fastq_prefix(fastq: &Path) -> String {
    let name = file_name_string(fastq);
    name.strip_suffix(FASTQ_GZ_SUFFIX).map(str::to_string).unwrap_or(name)
}

/// Flowcell ID and rnumber: the first two `_` separated tokens of a FASTQ name.
///
/// Names are expected to follow the `tidy` output layout, `<FC>_<RN>_<quality>_<NNNNN>.fastq.gz`.
pub fn sample_identity(fastq: &Path) -> Result<(String, String), PipelineError> {
    let prefix = fastq_prefix(fastq);
    let mut tokens = prefix.split('_');
    match (tokens.next(), tokens.next()) {
        (Some(flowcell), Some(rnumber)) if !flowcell.is_empty() && !rnumber.is_empty() => {
            Ok((flowcell.to_string(), rnumber.to_string()))
        }
        _ => Err(PipelineError::Parse(format!(
            "flowcell and rnumber from {}",
            fastq.display()
        ))),
    }
}

pub fn list_fastq_files(fastq_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !fastq_dir.is_dir() {
        return Err(PipelineError::MissingInput(fastq_dir.to_path_buf()));
    }
    let files = files_with_suffix(fastq_dir, FASTQ_GZ_SUFFIX)?;
    if files.is_empty() {
        return Err(PipelineError::NoInputFiles {
            dir: fastq_dir.to_path_buf(),
            pattern: format!("*{}", FASTQ_GZ_SUFFIX),
        });
    }
    Ok(files)
}


/// Runs a tool whose failure, including failure to start, only warrants a warning.
async fn run_tool_or_warn(tool: &str, args: &[String], cwd: Option<&Path>, what: &str) -> bool {
    info!("Running: {} {}", tool, args.join(" "));
    match run_tool(tool, args, cwd).await {
        Ok(output) => warn_on_failure(&output, what),
        Err(e) => {
            warn!("{} could not be run: {}", what, e);
            false
        }
    }
}

async fn download_lambda(lambda: &LambdaPaths) -> Result<()> {
    let download = LAMBDA_GENOME_URL
        .rsplit('/')
        .next()
        .ok_or_else(|| anyhow!("No file name in {}", LAMBDA_GENOME_URL))?;
    info!("Downloading the lambda genome into {}", lambda.dir.display());
    let output = run_tool(CURL_TAG, &["-O".to_string(), LAMBDA_GENOME_URL.to_string()], Some(&lambda.dir)).await?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            tool: CURL_TAG.to_string(),
            error: output.stderr.trim_end().to_string(),
        }
        .into());
    }

    let gz = lambda.dir.join(download);
    let output = run_tool(GZIP_TAG, &gzip::decompress_args(&gz), None).await?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            tool: GZIP_TAG.to_string(),
            error: output.stderr.trim_end().to_string(),
        }
        .into());
    }
    let unzipped = lambda.dir.join(download.trim_end_matches(".gz"));
    tokio::fs::rename(&unzipped, &lambda.fasta).await?;
    Ok(())
}

/// Makes sure every reference file the alignment needs exists.
pub async fn prepare_genome(paths: &GenomePaths) -> Result<(), PipelineError> {
    if !paths.dir.is_dir() {
        return Err(PipelineError::MissingInput(paths.dir.clone()));
    }
    if !paths.host_fasta.is_file() {
        return Err(PipelineError::MissingInput(paths.host_fasta.clone()));
    }
    let Some(lambda) = &paths.lambda else {
        return Ok(());
    };

    tokio::fs::create_dir_all(&lambda.dir).await?;
    if !lambda.fasta.is_file() {
        download_lambda(lambda).await?;
    }
    if !lambda.fai.is_file() {
        run_tool_or_warn(SAMTOOLS_TAG, &samtools::faidx_args(&lambda.fasta), None, "samtools faidx").await;
    }
    if !lambda.bed.is_file() {
        let records = fasta_to_bed(&lambda.fasta, &lambda.bed)?;
        info!("Wrote {} regions to {}", records, lambda.bed.display());
    }
    if !paths.target_fasta.is_file() {
        let records = concat_fasta(&[paths.host_fasta.as_path(), lambda.fasta.as_path()], &paths.target_fasta)?;
        info!("Wrote {} records to {}", records, paths.target_fasta.display());
    }
    Ok(())
}

/// Builds the minimap2 index when it does not exist yet.
pub async fn ensure_index(paths: &GenomePaths) {
    if paths.index.is_file() {
        return;
    }
    let args = minimap2::index_arg_generator(&paths.index, &paths.target_fasta);
    run_tool_or_warn(MINIMAP2_TAG, &args, None, "minimap2 index").await;
}


/// The pipe chain aligning one FASTQ file.
pub fn align_stages(job: &AlignJob, paths: &GenomePaths, md: bool, cs: CsTag) -> Vec<PipelineStage> {
    let mut stages = vec![
        PipelineStage::new(MINIMAP2_TAG, minimap2::align_arg_generator(&paths.index, &job.fastq, md, cs)),
        PipelineStage::new(SAMTOOLS_TAG, samtools::view_mapped_args(&job.unaligned_bam)),
    ];
    match (&paths.lambda, &job.lambda_bam) {
        (Some(lambda), Some(lambda_bam)) => {
            stages.push(PipelineStage::new(SAMTOOLS_TAG, samtools::sort_args(None)));
            stages.push(PipelineStage::new(
                SAMTOOLS_TAG,
                samtools::view_split_by_bed_args(&lambda.bed, lambda_bam, &job.host_bam),
            ));
        }
        _ => stages.push(PipelineStage::new(SAMTOOLS_TAG, samtools::sort_args(Some(&job.host_bam)))),
    }
    stages
}

/// Runs one job's pipe chain, then indexes its sorted outputs.
///
/// A stage exiting non-zero is only a warning.
///
/// # Returns
/// The number of stages that failed.
async fn execute_job(job: &AlignJob, stages: &[PipelineStage]) -> Result<usize> {
    let statuses = run_pipeline(stages, None).await?;
    let mut failed = 0;
    for (tool, status) in statuses {
        if !status.success() {
            warn!("{} returned non-zero exit code ({}) for {}", tool, status, job.fastq.display());
            failed += 1;
        }
    }
    for bam in job.sorted_bams() {
        if bam.is_file() {
            run_tool_or_warn(SAMTOOLS_TAG, &samtools::index_args(&bam), None, "samtools index").await;
        } else {
            warn!("{} was not produced", bam.display());
        }
    }
    Ok(failed)
}

async fn align_fastq(job: AlignJob, paths: &GenomePaths, md: bool, cs: CsTag) -> Result<usize> {
    info!("Aligning {}", job.fastq.display());
    let stages = align_stages(&job, paths, md, cs);
    execute_job(&job, &stages).await
}


/// (label, merged BAM, QC reference) for each merged output.
pub fn merge_targets(layout: &SampleLayout, paths: &GenomePaths) -> Vec<(String, PathBuf, PathBuf)> {
    let host_label = layout.host_label();
    let mut targets = vec![(host_label.clone(), layout.merged_bam(&host_label), paths.host_fasta.clone())];
    if let Some(lambda) = &paths.lambda {
        targets.push((LAMBDA_NAME.to_string(), layout.merged_bam(LAMBDA_NAME), lambda.fasta.clone()));
    }
    targets.push((UNALIGNED_NAME.to_string(), layout.merged_bam(UNALIGNED_NAME), paths.host_fasta.clone()));
    targets
}

fn merge_inputs(label: &str, layout: &SampleLayout, jobs: &[AlignJob]) -> Vec<PathBuf> {
    jobs.iter()
        .filter_map(|job| {
            if label == UNALIGNED_NAME {
                Some(job.unaligned_bam.clone())
            } else if label == LAMBDA_NAME {
                job.lambda_bam.clone()
            } else if label == layout.host_label() {
                Some(job.host_bam.clone())
            } else {
                None
            }
        })
        .filter(|bam| bam.is_file())
        .collect()
}

/// Merges the per-FASTQ BAMs, returning the merged files that were written.
async fn merge_bams(layout: &SampleLayout, paths: &GenomePaths, jobs: &[AlignJob]) -> Vec<(String, PathBuf, PathBuf)> {
    let mut merged = Vec::new();
    for (label, output, reference) in merge_targets(layout, paths) {
        let inputs = merge_inputs(&label, layout, jobs);
        if inputs.is_empty() {
            warn!("No {} BAM files to merge", label);
            continue;
        }
        let args = samtools::merge_args(&output, &inputs);
        if run_tool_or_warn(SAMTOOLS_TAG, &args, None, "samtools merge").await && output.is_file() {
            merged.push((label, output, reference));
        }
    }
    merged
}

async fn run_qc(layout: &SampleLayout, merged: &[(String, PathBuf, PathBuf)]) {
    let mut pickles = Vec::new();
    for (label, bam, reference) in merged {
        let pickle = layout.qc_pickle(label);
        let args = wub::alignment_qc_args(reference, &pickle, &layout.qc_report(label), bam);
        if run_tool_or_warn(BAM_ALIGNMENT_QC_TAG, &args, None, BAM_ALIGNMENT_QC_TAG).await {
            pickles.push(pickle);
        }
    }
    if pickles.is_empty() {
        warn!("No QC results to combine");
        return;
    }
    let args = wub::multi_qc_args(&layout.multiqc_report(), &pickles);
    run_tool_or_warn(BAM_MULTI_QC_TAG, &args, None, BAM_MULTI_QC_TAG).await;
}


pub async fn run(args: &AlignArgs) -> Result<(), PipelineError> {
    log_arguments(&[
        ("fastq_dir", args.fastq_dir.display().to_string()),
        ("output_dir", args.output_dir.display().to_string()),
        ("genome_dir", args.genome_dir.display().to_string()),
        ("genome", args.genome.clone()),
        ("filter_lambda", args.w_lambda.to_string()),
        ("cs", format!("{:?}", args.cs)),
        ("md", args.md.to_string()),
        ("threads", args.threads.to_string()),
    ]);

    let fastq_files = list_fastq_files(&args.fastq_dir)?;
    let (flowcell_id, rnumber) = sample_identity(&fastq_files[0])?;
    info!("Aligning {} fastq files of {}_{}", fastq_files.len(), flowcell_id, rnumber);

    let paths = GenomePaths::new(&args.genome_dir, &args.genome, args.w_lambda);
    prepare_genome(&paths).await?;
    check_versions(&[MINIMAP2_TAG, SAMTOOLS_TAG]).await;
    ensure_index(&paths).await;

    let layout = SampleLayout {
        output_dir: args.output_dir.clone(),
        genome: args.genome.clone(),
        w_lambda: args.w_lambda,
        flowcell_id,
        rnumber,
    };
    for dir in layout.output_dirs() {
        tokio::fs::create_dir_all(&dir).await?;
    }

    let jobs: Vec<AlignJob> = fastq_files.iter().map(|fastq| AlignJob::new(fastq, &layout)).collect();
    let outcomes: Vec<Result<usize>> = stream::iter(jobs.iter().cloned().map(|job| align_fastq(job, &paths, args.md, args.cs)))
        .buffer_unordered(worker_count(args.threads))
        .collect()
        .await;
    let mut failed_jobs = 0;
    for outcome in outcomes {
        match outcome {
            Ok(0) => {}
            Ok(_) => failed_jobs += 1,
            Err(e) => {
                warn!("Alignment failed: {}", e);
                failed_jobs += 1;
            }
        }
    }
    if failed_jobs > 0 {
        warn!("{} of {} alignments did not complete cleanly", failed_jobs, jobs.len());
    }

    let merged = merge_bams(&layout, &paths, &jobs).await;
    run_qc(&layout, &merged).await;
    info!("Alignment outputs are in {}", args.output_dir.display());
    Ok(())
}

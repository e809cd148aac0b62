use std::collections::HashMap;
use std::path::PathBuf;
use lazy_static::lazy_static;
use thiserror::Error;

// External software
pub const GZIP_EXT: &str = "gz";
pub const GZIP_TAG: &str = "gzip";
pub const TAR_TAG: &str = "tar";
pub const CURL_TAG: &str = "curl";
pub const MINIMAP2_TAG: &str = "minimap2";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BAM_ALIGNMENT_QC_TAG: &str = "bam_alignment_qc";
pub const BAM_MULTI_QC_TAG: &str = "bam_multi_qc";
pub const FASTQ_SANITISER_TAG: &str = "fix_concatenated_fastqs";


lazy_static! {
    /// Oldest (major, minor) release each tool was tested with.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(SAMTOOLS_TAG, (1, 9));
        m.insert(MINIMAP2_TAG, (2, 17));
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Sort,
    Index,
    Merge,
    Faidx,
}

impl SamtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamtoolsSubcommand::View => "view",
            SamtoolsSubcommand::Sort => "sort",
            SamtoolsSubcommand::Index => "index",
            SamtoolsSubcommand::Merge => "merge",
            SamtoolsSubcommand::Faidx => "faidx",
        }
    }
}

// Instrument layout
pub const SUMMARY_SUBDIR: &str = "sequencing_summary";
pub const FASTQ_SUBDIR: &str = "fastq";
pub const FAST5_SUBDIR: &str = "fast5";
pub const PASS_SUBDIR: &str = "pass";
pub const FAIL_SUBDIR: &str = "fail";

pub const SUMMARY_BATCH_PATTERN: &str = r"^sequencing_summary_(\d+)\.txt$";
pub const FASTQ_BATCH_PATTERN: &str = r"^fastq_(\d+)\.fastq$";
pub const FAST5_BATCH_PATTERN: &str = r"^(\d+)$";

pub const FAST5_EXT: &str = "fast5";
pub const FASTQ_GZ_SUFFIX: &str = ".fastq.gz";
pub const SUMMARY_TAG: &str = "sequencing_summary";

pub const MD5_FAST5_FILENAME: &str = "checksum.fast5.md5";
pub const MD5_FASTQ_FILENAME: &str = "checksum.fastq.md5";
pub const TMP_SUFFIX: &str = ".tmp";

// Reference layout
pub const GENOME_FASTA: &str = "genome.fa";
pub const GENOME_INDEX: &str = "genome.mmi";
pub const GENOME_W_LAMBDA_FASTA: &str = "genome.w_lambda.fa";
pub const GENOME_W_LAMBDA_INDEX: &str = "genome.w_lambda.mmi";
pub const GENOME_BED: &str = "genome.bed";
pub const GENOME_FAI: &str = "genome.fa.fai";
pub const LAMBDA_NAME: &str = "lambda";
pub const LAMBDA_GENOME_URL: &str = "ftp://ftp.ncbi.nlm.nih.gov/genomes/all/GCF/000/840/245/GCF_000840245.1_ViralProj14204/GCF_000840245.1_ViralProj14204_genomic.fna.gz";

// Alignment output layout
pub const UNALIGNED_NAME: &str = "unaligned";
pub const MERGED_SUBDIR: &str = "merged";
pub const QC_SUBDIR: &str = "wub";
pub const LAMBDA_FILT_TAG: &str = "lambda-filt";

// Static Parameters
pub const PASS_QSCORE_THRESHOLD: f64 = 9.0;
pub const READ_LENGTH_MAX_QUANTILE: f64 = 0.995;
pub const EVENTS_RATIO_THRESHOLD: f64 = 10.0;
pub const TIME_MIN_QUANTILE: f64 = 0.001;
pub const TIME_MAX_QUANTILE: f64 = 0.999;
pub const STATS_PERCENTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No such file or directory: {0}")]
    MissingInput(PathBuf),

    #[error("No files matching '{pattern}' found in {dir}")]
    NoInputFiles { dir: PathBuf, pattern: String },

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse {0}")]
    Parse(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

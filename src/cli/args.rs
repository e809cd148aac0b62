use std::path::PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum CsTag {
    #[default]
    Long,
    Short,
    None,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "betaduck", version, about = "Nanopore data handling for PromethION runs")]
#[command(arg_required_else_help = true)]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", global = true, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Generate a config file that will be used to organise the run folder
    Config(ConfigArgs),
    /// Use the config file to tidy and tar up the batch directories
    Tidy(TidyArgs),
    /// Gzip loose fast5 files of a run that was not basecalled
    Compress(CompressArgs),
    /// Plot the run(s)
    Plot(PlotArgs),
    /// Align reads to a reference genome
    Align(AlignArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, help = "Path to run")]
    pub run_dir: PathBuf,

    #[arg(long, help = "Yaml file to create")]
    pub output_yaml_file: PathBuf,

    #[arg(long, default_value_t = false, help = "Run fastq sanitiser before generating config")]
    pub sanitiser: bool,

    #[arg(long, default_value_t = false, help = "Don't tar up the last folder as data may still be writing to there")]
    pub active: bool,

    #[arg(long, help = "Sequencing summary directory (default: <run-dir>/sequencing_summary)")]
    pub summary_dir: Option<PathBuf>,

    #[arg(long, help = "Fastq directory (default: <run-dir>/fastq)")]
    pub fastq_dir: Option<PathBuf>,

    #[arg(long, help = "Fast5 directory (default: <run-dir>/fast5)")]
    pub fast5_dir: Option<PathBuf>,

    #[arg(long, help = "Use this flowcell ID instead of reading it from the run")]
    pub flowcell_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TidyArgs {
    #[arg(long, help = "Path to config file")]
    pub config: PathBuf,

    #[arg(long, default_value_t = false, help = "Keep the original files")]
    pub keep: bool,

    #[arg(long, default_value_t = false, help = "Just log the commands, do not run them")]
    pub dry_run: bool,

    #[arg(long, default_value_t = false, help = "Overwrite files if they already exist")]
    pub overwrite: bool,

    #[arg(long, default_value_t = 1, help = "Number of folders to zip up simultaneously")]
    pub threads: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CompressArgs {
    #[arg(long, help = "Path to run directory")]
    pub run_dir: PathBuf,

    #[arg(long, default_value_t = false, help = "Just log the commands, do not run them")]
    pub dry_run: bool,

    #[arg(long, default_value_t = false, help = "Overwrite files if they already exist")]
    pub overwrite: bool,

    #[arg(long, default_value_t = 1, help = "Number of files to zip up simultaneously")]
    pub threads: usize,
}

#[derive(Args, Debug, Clone)]
pub struct PlotArgs {
    #[arg(long, value_delimiter = ',', required = true, help = "Contains the txt files (comma separated for multiple locations)")]
    pub summary_dir: Vec<PathBuf>,

    #[arg(long, value_delimiter = ',', required = true, help = "Where are the fastq files (comma separated for multiple locations)")]
    pub fastq_dir: Vec<PathBuf>,

    #[arg(long, help = "Where do the plots go")]
    pub plots_dir: PathBuf,

    #[arg(long, help = "Titles for plots")]
    pub name: String,

    #[arg(long, default_value_t = 1, help = "Read the fastq files in parallel")]
    pub threads: usize,

    #[clap(long, help = "Optional fixed seed for the pair plot sample; defaults to OS entropy")]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct AlignArgs {
    #[arg(long, help = "Path to gzipped fastq files")]
    pub fastq_dir: PathBuf,

    #[arg(long, help = "Folder to place bam files")]
    pub output_dir: PathBuf,

    #[arg(long, help = "Path to directory of genomes")]
    pub genome_dir: PathBuf,

    #[arg(long, help = "Name of genome in genome directory")]
    pub genome: String,

    #[arg(long = "filter-lambda", default_value_t = false, help = "Filter reads aligning to the lambda control")]
    pub w_lambda: bool,

    #[arg(long, default_value = "long", value_enum, help = "CS tag type")]
    pub cs: CsTag,

    #[arg(long, default_value_t = false, help = "Add MD tag to BAM file")]
    pub md: bool,

    #[arg(long, default_value_t = 1)]
    pub threads: usize,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_dirs_are_comma_separated() {
        let args = Arguments::try_parse_from([
            "betaduck", "plot",
            "--summary-dir", "a,b",
            "--fastq-dir", "c",
            "--plots-dir", "plots",
            "--name", "run1",
        ]).unwrap();
        match args.command {
            Commands::Plot(plot) => {
                assert_eq!(plot.summary_dir, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert_eq!(plot.fastq_dir, vec![PathBuf::from("c")]);
                assert_eq!(plot.threads, 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_align_defaults() {
        let args = Arguments::try_parse_from([
            "betaduck", "-v", "align",
            "--fastq-dir", "fq",
            "--output-dir", "out",
            "--genome-dir", "genomes",
            "--genome", "hg38",
            "--filter-lambda",
        ]).unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Align(align) => {
                assert!(align.w_lambda);
                assert!(!align.md);
                assert_eq!(align.cs, CsTag::Long);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cs_rejects_unknown_value() {
        let result = Arguments::try_parse_from([
            "betaduck", "align",
            "--fastq-dir", "fq",
            "--output-dir", "out",
            "--genome-dir", "genomes",
            "--genome", "hg38",
            "--cs", "medium",
        ]);
        assert!(result.is_err());
    }
}

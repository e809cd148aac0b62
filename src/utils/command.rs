//! Functions and structs for working with creating command-line arguments

use anyhow::{anyhow, Result};
use log::{info, warn};
use crate::config::defs::{MINIMAP2_TAG, SAMTOOLS_TAG, TOOL_VERSIONS};


pub mod minimap2 {
    use std::path::Path;
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::cli::CsTag;
    use crate::config::defs::MINIMAP2_TAG;
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    pub async fn minimap2_presence_check() -> anyhow::Result<String> {
        let args: Vec<&str> = vec!["--version"];

        let mut child = Command::new(MINIMAP2_TAG)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn: {}. Is minimap2 installed?", e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from minimap2 --version"))?;
        // e.g. 2.17-r941
        let version = first_line
            .split('-')
            .next()
            .ok_or_else(|| anyhow!("Invalid minimap2 --version output: {}", first_line))?
            .trim()
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in minimap2 --version output: {}", first_line));
        }
        Ok(version)
    }

    /// `minimap2 -x map-ont -d <index> <genome>`
    pub fn index_arg_generator(index: &Path, genome: &Path) -> Vec<String> {
        vec![
            "-x".to_string(),
            "map-ont".to_string(),
            "-d".to_string(),
            index.to_string_lossy().to_string(),
            genome.to_string_lossy().to_string(),
        ]
    }

    /// `minimap2 -a [--MD] [--cs=long|short] <index> <fastq>`, SAM on stdout.
    pub fn align_arg_generator(index: &Path, fastq: &Path, md: bool, cs: CsTag) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-a".to_string());
        if md {
            args_vec.push("--MD".to_string());
        }
        match cs {
            CsTag::Long => args_vec.push("--cs=long".to_string()),
            CsTag::Short => args_vec.push("--cs=short".to_string()),
            CsTag::None => {}
        }
        args_vec.push(index.to_string_lossy().to_string());
        args_vec.push(fastq.to_string_lossy().to_string());
        args_vec
    }
}

pub mod samtools {
    use std::path::{Path, PathBuf};
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::config::defs::{SamtoolsSubcommand, SAMTOOLS_TAG};
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    pub async fn samtools_presence_check() -> anyhow::Result<String> {
        let args: Vec<&str> = vec!["--version"];

        let mut child = Command::new(SAMTOOLS_TAG)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn: {}. Is samtools installed?", e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from samtools --version"))?;
        // e.g. samtools 1.9
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid samtools --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }

    fn with_subcommand(subcommand: SamtoolsSubcommand, rest: Vec<String>) -> Vec<String> {
        let mut args_vec = vec![subcommand.as_str().to_string()];
        args_vec.extend(rest);
        args_vec
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    /// Keeps mapped reads as uncompressed BAM on stdout, unmapped reads go to `unaligned`.
    pub fn view_mapped_args(unaligned: &Path) -> Vec<String> {
        with_subcommand(SamtoolsSubcommand::View, vec![
            "-bu".to_string(),
            "-F4".to_string(),
            "-U".to_string(),
            path_arg(unaligned),
        ])
    }

    /// Sorts stdin into `output`, or onto stdout when `output` is None.
    pub fn sort_args(output: Option<&Path>) -> Vec<String> {
        let rest = match output {
            Some(out) => vec!["-o".to_string(), path_arg(out)],
            None => Vec::new(),
        };
        with_subcommand(SamtoolsSubcommand::Sort, rest)
    }

    /// Reads overlapping `bed` go to `inside`, everything else to `outside`.
    pub fn view_split_by_bed_args(bed: &Path, inside: &Path, outside: &Path) -> Vec<String> {
        with_subcommand(SamtoolsSubcommand::View, vec![
            "-b".to_string(),
            "-L".to_string(),
            path_arg(bed),
            "-U".to_string(),
            path_arg(outside),
            "-o".to_string(),
            path_arg(inside),
        ])
    }

    pub fn index_args(bam: &Path) -> Vec<String> {
        with_subcommand(SamtoolsSubcommand::Index, vec![path_arg(bam)])
    }

    pub fn merge_args(output: &Path, inputs: &[PathBuf]) -> Vec<String> {
        let mut rest = vec!["-f".to_string(), path_arg(output)];
        rest.extend(inputs.iter().map(|p| path_arg(p)));
        with_subcommand(SamtoolsSubcommand::Merge, rest)
    }

    pub fn faidx_args(fasta: &Path) -> Vec<String> {
        with_subcommand(SamtoolsSubcommand::Faidx, vec![path_arg(fasta)])
    }
}

pub mod wub {
    use std::path::{Path, PathBuf};

    /// `bam_alignment_qc -f <ref> -Q -p <pickle> -r <report> <bam>`
    pub fn alignment_qc_args(reference: &Path, pickle: &Path, report: &Path, bam: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            reference.to_string_lossy().to_string(),
            "-Q".to_string(),
            "-p".to_string(),
            pickle.to_string_lossy().to_string(),
            "-r".to_string(),
            report.to_string_lossy().to_string(),
            bam.to_string_lossy().to_string(),
        ]
    }

    /// `bam_multi_qc -r <report> <pickles...>`
    pub fn multi_qc_args(report: &Path, pickles: &[PathBuf]) -> Vec<String> {
        let mut args_vec = vec!["-r".to_string(), report.to_string_lossy().to_string()];
        args_vec.extend(pickles.iter().map(|p| p.to_string_lossy().to_string()));
        args_vec
    }
}

pub mod gzip {
    use std::path::Path;

    pub fn compress_best_args(file_name: &Path, overwrite: bool) -> Vec<String> {
        let mut args_vec = vec!["--best".to_string()];
        if overwrite {
            args_vec.push("-f".to_string());
        }
        args_vec.push(file_name.to_string_lossy().to_string());
        args_vec
    }

    pub fn decompress_args(file: &Path) -> Vec<String> {
        vec!["--decompress".to_string(), file.to_string_lossy().to_string()]
    }
}

pub mod tar {
    use std::path::Path;

    /// `tar -czf <archive> -C <root> <member>`
    pub fn create_gz_args(archive: &Path, root: &Path, member: &str) -> Vec<String> {
        vec![
            "-czf".to_string(),
            archive.to_string_lossy().to_string(),
            "-C".to_string(),
            root.to_string_lossy().to_string(),
            member.to_string(),
        ]
    }
}

pub mod sanitiser {
    use std::path::Path;

    pub fn arg_generator(fastq_dir: &Path) -> Vec<String> {
        vec![
            format!("--input={}", fastq_dir.to_string_lossy()),
            "--non_recursive".to_string(),
        ]
    }
}


pub async fn check_version(tool: &str) -> Result<String> {
    let version = match tool {
        MINIMAP2_TAG => minimap2::minimap2_presence_check().await,
        SAMTOOLS_TAG => samtools::samtools_presence_check().await,
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };
    version
}

/// Parses the leading `major.minor` of a version string.
pub fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next().and_then(|m| m.parse::<u32>().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Logs the version of each tool and warns when it is missing or older than tested.
pub async fn check_versions(tools: &[&str]) {
    for tool in tools {
        match check_version(tool).await {
            Ok(version) => {
                info!("{} version {}", tool, version);
                if let (Some(found), Some(tested)) = (parse_major_minor(&version), TOOL_VERSIONS.get(*tool)) {
                    if found < *tested {
                        warn!("{} {} is older than the tested version {}.{}", tool, version, tested.0, tested.1);
                    }
                }
            }
            Err(e) => warn!("Could not determine {} version: {}", tool, e),
        }
    }
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const FAST5_NAME: &str =
    "PCT0021_20180601_0004A30B001C0E1D_2_E3_H3_sequencing_run_NA12878_61163_read_24_ch_2195_strand.fast5";

fn make_run(root: &Path, batches: u32) -> Result<(), Box<dyn std::error::Error>> {
    let summary_dir = root.join("sequencing_summary");
    let pass_dir = root.join("fastq").join("pass");
    let fast5_dir = root.join("fast5");
    for dir in [&summary_dir, &pass_dir, &fast5_dir] {
        fs::create_dir_all(dir)?;
    }
    for i in 0..batches {
        fs::write(summary_dir.join(format!("sequencing_summary_{}.txt", i)), "read_id\nr1\n")?;
        fs::write(pass_dir.join(format!("fastq_{}.fastq", i)), "@r1 runid=a ch=1\nACGT\n+\nIIII\n")?;
        let batch = fast5_dir.join(i.to_string());
        fs::create_dir_all(&batch)?;
        fs::write(batch.join(FAST5_NAME), b"fast5")?;
    }
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn test_help_output() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;
        cmd.arg("--help");

        cmd.assert()
            .success()
            .stdout(predicate::str::contains("Usage:"))
            .stdout(predicate::str::contains("config"))
            .stdout(predicate::str::contains("tidy"))
            .stdout(predicate::str::contains("compress"))
            .stdout(predicate::str::contains("plot"))
            .stdout(predicate::str::contains("align"));

        Ok(())
    }

    #[test]
    fn test_version_output() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;
        cmd.arg("--version");

        cmd.assert()
            .success()
            .stdout(predicate::str::contains("betaduck"));

        Ok(())
    }

    #[test]
    fn test_no_arguments_shows_help() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;

        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("Usage:"));

        Ok(())
    }

    #[test]
    fn test_invalid_subcommand() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;
        cmd.arg("sequence");

        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("error:"))
            .stderr(predicate::str::contains("subcommand"));

        Ok(())
    }

    #[test]
    fn test_missing_required_argument() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;
        cmd.args(["config", "--run-dir", "/tmp"]);

        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("--output-yaml-file"));

        Ok(())
    }

    #[test]
    fn test_invalid_cs_value() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("betaduck")?;
        cmd.args([
            "align", "--fastq-dir", "/tmp", "--output-dir", "/tmp", "--genome-dir", "/tmp",
            "--genome", "hg38", "--cs", "medium",
        ]);

        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));

        Ok(())
    }

    #[test]
    fn test_config_then_tidy_dry_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        make_run(dir.path(), 2)?;
        let yaml = dir.path().join("batches.yaml");

        Command::cargo_bin("betaduck")?
            .arg("config")
            .arg("--run-dir")
            .arg(dir.path())
            .arg("--output-yaml-file")
            .arg(&yaml)
            .args(["--flowcell-id", "PAD23566"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Run complete"));

        let manifest = fs::read_to_string(&yaml)?;
        assert!(manifest.contains("flowcell_id: PAD23566"));
        assert!(manifest.contains("rnumber: 61163"));

        Command::cargo_bin("betaduck")?
            .arg("tidy")
            .arg("--config")
            .arg(&yaml)
            .arg("--dry-run")
            .assert()
            .success()
            .stderr(predicate::str::contains("Would have"));

        assert!(dir.path().join("fast5").join("0").join(FAST5_NAME).is_file());
        assert!(!dir.path().join("fast5").join("PAD23566_61163_00000.fast5.tar.gz").exists());

        Ok(())
    }

    #[test]
    fn test_compress_without_fast5_dir_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;

        Command::cargo_bin("betaduck")?
            .arg("compress")
            .arg("--run-dir")
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Pipeline failed"));

        Ok(())
    }

    #[test]
    fn test_plot_without_summaries_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let plots = dir.path().join("plots");

        Command::cargo_bin("betaduck")?
            .arg("plot")
            .arg("--summary-dir")
            .arg(dir.path())
            .arg("--fastq-dir")
            .arg(dir.path())
            .arg("--plots-dir")
            .arg(&plots)
            .args(["--name", "run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Pipeline failed"));

        Ok(())
    }
}

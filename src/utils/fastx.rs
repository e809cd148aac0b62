use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use seq_io::fasta::{Reader as FastaReader, Record as FastaRecord};
use seq_io::fastq::{Reader as FastqReader, Record as FastqRecord};

use crate::utils::file::open_maybe_gzipped;


/// Run metadata MinKNOW writes into each FASTQ header:
/// `@<read_id> runid=.. sampleid=.. read=.. ch=.. start_time=..`
#[derive(Debug, Clone, PartialEq)]
pub struct FastqMeta {
    pub read_id: String,
    pub run_id: String,
    pub sample_id: String,
    pub read: u64,
    pub channel: u32,
    pub start_time_utc: DateTime<Utc>,
}

/// Splits a header into its id and `key=value` description fields.
pub fn header_fields(head: &str) -> (String, HashMap<String, String>) {
    let mut tokens = head.trim_start_matches('@').split_whitespace();
    let id = tokens.next().unwrap_or_default().to_string();
    let fields = tokens
        .filter_map(|t| t.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (id, fields)
}

pub fn parse_fastq_meta(head: &str) -> Result<FastqMeta> {
    let (read_id, fields) = header_fields(head);
    if read_id.is_empty() {
        return Err(anyhow!("Empty read id in header '{}'", head));
    }
    let get = |key: &str| {
        fields
            .get(key)
            .ok_or_else(|| anyhow!("Header of {} has no '{}' field", read_id, key))
    };
    // Header order: runid, sampleid, read, ch, start_time
    let run_id = get("runid")?.clone();
    let sample_id = get("sampleid")?.clone();
    let read = get("read")?.parse().with_context(|| format!("Bad read number for {}", read_id))?;
    let channel = get("ch")?.parse().with_context(|| format!("Bad channel for {}", read_id))?;
    let start_time_utc = DateTime::parse_from_rfc3339(get("start_time")?)
        .with_context(|| format!("Bad start_time for {}", read_id))?
        .with_timezone(&Utc);

    Ok(FastqMeta { read_id, run_id, sample_id, read, channel, start_time_utc })
}


/// Header metadata for every record in a (possibly gzipped) FASTQ file.
///
/// # Returns
/// (parsed records, number of records whose header lacked a field)
pub fn read_fastq_meta(path: &Path) -> Result<(Vec<FastqMeta>, usize)> {
    let reader = open_maybe_gzipped(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut fastq = FastqReader::new(reader);
    let mut records = Vec::new();
    let mut skipped = 0;
    while let Some(result) = fastq.next() {
        let record = result.with_context(|| format!("Invalid FASTQ in {}", path.display()))?;
        let head = String::from_utf8_lossy(record.head());
        match parse_fastq_meta(&head) {
            Ok(meta) => records.push(meta),
            Err(_) => skipped += 1,
        }
    }
    Ok((records, skipped))
}

/// `flow_cell_id=` from the first header of a FASTQ file, if present.
pub fn flowcell_from_fastq(path: &Path) -> Result<Option<String>> {
    let reader = open_maybe_gzipped(path)?;
    let mut fastq = FastqReader::new(reader);
    match fastq.next() {
        Some(result) => {
            let record = result?;
            let head = String::from_utf8_lossy(record.head());
            let (_, fields) = header_fields(&head);
            Ok(fields.get("flow_cell_id").cloned())
        }
        None => Ok(None),
    }
}


pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(head)?;
    writeln!(writer)?;
    writer.write_all(seq)?;
    writeln!(writer)?;
    Ok(())
}

/// Writes one `<id>\t0\t<length>` BED line per FASTA record.
pub fn fasta_to_bed(fasta: &Path, bed: &Path) -> Result<usize> {
    let mut reader = FastaReader::new(open_maybe_gzipped(fasta)?);
    let mut writer = BufWriter::new(File::create(bed)?);
    let mut count = 0;
    while let Some(result) = reader.next() {
        let record = result.with_context(|| format!("Invalid FASTA in {}", fasta.display()))?;
        let id = record.id().map_err(|e| anyhow!("Non UTF-8 FASTA id in {}: {}", fasta.display(), e))?;
        let length: usize = record.seq_lines().map(|line| line.len()).sum();
        writeln!(writer, "{}\t0\t{}", id, length)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Concatenates the records of `inputs`, in order, into a single FASTA file.
pub fn concat_fasta(inputs: &[&Path], output: &Path) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(output)?);
    let mut count = 0;
    for input in inputs {
        let mut reader = FastaReader::new(open_maybe_gzipped(input)?);
        while let Some(result) = reader.next() {
            let record = result.with_context(|| format!("Invalid FASTA in {}", input.display()))?;
            write_fasta_record(&mut writer, record.head(), &record.full_seq())?;
            count += 1;
        }
    }
    writer.flush()?;
    Ok(count)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "@0a1b2c3d runid=6fd51fb7 sampleid=NA12878 read=24 ch=2195 start_time=2018-06-01T10:00:05Z";

    #[test]
    fn test_parse_fastq_meta() -> Result<()> {
        let meta = parse_fastq_meta(HEADER)?;
        assert_eq!(meta.read_id, "0a1b2c3d");
        assert_eq!(meta.run_id, "6fd51fb7");
        assert_eq!(meta.sample_id, "NA12878");
        assert_eq!(meta.read, 24);
        assert_eq!(meta.channel, 2195);
        assert_eq!(meta.start_time_utc.to_rfc3339(), "2018-06-01T10:00:05+00:00");
        Ok(())
    }

    #[test]
    fn test_parse_fastq_meta_missing_field() {
        let err = parse_fastq_meta("@read1 runid=abc ch=1").unwrap_err();
        assert!(err.to_string().contains("sampleid"));

        let err = parse_fastq_meta("@read1 runid=abc sampleid=s read=1 ch=1").unwrap_err();
        assert!(err.to_string().contains("start_time"));
    }

    #[test]
    fn test_read_fastq_meta_counts_skipped() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("fastq_0.fastq");
        fs::write(&path, format!("{}\nACGT\n+\nIIII\n@bad_header\nAC\n+\nII\n", HEADER))?;
        let (records, skipped) = read_fastq_meta(&path)?;
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 1);
        Ok(())
    }

    #[test]
    fn test_flowcell_from_fastq() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("fastq_0.fastq");
        fs::write(&path, "@r1 runid=a flow_cell_id=PAD23566 ch=1\nA\n+\nI\n")?;
        assert_eq!(flowcell_from_fastq(&path)?, Some("PAD23566".to_string()));
        Ok(())
    }

    #[test]
    fn test_fasta_to_bed_and_concat() -> Result<()> {
        let dir = tempdir()?;
        let host = dir.path().join("host.fa");
        let lambda = dir.path().join("lambda.fa");
        fs::write(&host, ">chr1 first\nACGT\nAC\n>chr2\nA\n")?;
        fs::write(&lambda, ">NC_001416.1 lambda\nGGGG\n")?;

        let bed = dir.path().join("lambda.bed");
        assert_eq!(fasta_to_bed(&lambda, &bed)?, 1);
        assert_eq!(fs::read_to_string(&bed)?, "NC_001416.1\t0\t4\n");

        let combined = dir.path().join("combined.fa");
        assert_eq!(concat_fasta(&[&host, &lambda], &combined)?, 3);
        assert_eq!(
            fs::read_to_string(&combined)?,
            ">chr1 first\nACGTAC\n>chr2\nA\n>NC_001416.1 lambda\nGGGG\n"
        );
        Ok(())
    }
}

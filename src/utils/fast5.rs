// src/utils/fast5.rs: run identity from FAST5 files and open-file detection
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};


/// The run's random number, embedded in MinKNOW FAST5 names as
/// `<...>_<rnumber>_read_<read>_ch_<channel>_strand.fast5`.
pub fn rnumber_from_name(file_name: &str) -> Option<u64> {
    let tokens: Vec<&str> = file_name.split('_').collect();
    if tokens.len() < 7 {
        return None;
    }
    let rnumber = tokens[tokens.len() - 6];
    match rnumber.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Tried to get rnumber from fast5 file {}. Got {}", file_name, rnumber);
            None
        }
    }
}

/// Reads `flow_cell_id` from the `UniqueGlobalKey/tracking_id` attributes.
#[cfg(feature = "fast5")]
pub fn flowcell_from_fast5(path: &Path) -> Option<String> {
    use hdf5_metno::types::VarLenAscii;

    let read = || -> hdf5_metno::Result<String> {
        let file = hdf5_metno::File::open(path)?;
        let group = file.group("UniqueGlobalKey/tracking_id")?;
        let value: VarLenAscii = group.attr("flow_cell_id")?.read_scalar()?;
        Ok(value.as_str().to_string())
    };
    match read() {
        Ok(id) if !id.is_empty() => Some(id),
        Ok(_) => None,
        Err(e) => {
            warn!("Could not find flowcell ID from {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(not(feature = "fast5"))]
pub fn flowcell_from_fast5(_path: &Path) -> Option<String> {
    None
}


/// Every path some live process holds open, from `/proc/<pid>/fd`.
///
/// Processes whose descriptors cannot be read (other users, exited) are skipped.
pub fn open_file_paths() -> HashSet<PathBuf> {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
    );
    let mut open = HashSet::new();
    for pid in system.processes().keys() {
        let fd_dir = PathBuf::from(format!("/proc/{}/fd", pid.as_u32()));
        let Ok(entries) = fs::read_dir(&fd_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if let Ok(target) = fs::read_link(entry.path()) {
                open.insert(target);
            }
        }
    }
    open
}

/// `.fast5` regular files in `dir`, skipping any still open for writing and, unless
/// `overwrite`, any whose `.gz` already exists.
pub fn compressible_fast5_files(dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    let open = open_file_paths();
    let mut files = crate::utils::file::files_with_suffix(dir, ".fast5")?;
    files.retain(|path| {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        if open.contains(&canonical) {
            warn!("Skipping {} as it is still open", path.display());
            return false;
        }
        let mut gz = path.as_os_str().to_owned();
        gz.push(".gz");
        overwrite || !Path::new(&gz).is_file()
    });
    Ok(files)
}

//! Unpacking the per-cell archives: osm2city `.txz` overlays and ws3 `vpb`
//! zips. Both run on blocking threads; directory entries are skipped and
//! parent folders created as needed.

use std::{
    fs::{self, File},
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::Error;

fn archive_error(path: &Path, reason: impl ToString) -> Error {
    Error::Archive {
        path: path.to_owned(),
        reason: reason.to_string(),
    }
}

/// Extracts an xz-compressed tarball below `dest`. Returns the number of
/// files written.
pub fn extract_txz(bytes: &[u8], dest: &Path) -> Result<usize, Error> {
    let mut archive = tar::Archive::new(xz2::read::XzDecoder::new(bytes));
    let mut written = 0;

    for entry in archive.entries().map_err(|e| archive_error(dest, e))? {
        let mut entry = entry.map_err(|e| archive_error(dest, e))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        // refuses entries escaping `dest`
        if entry.unpack_in(dest).map_err(|e| archive_error(dest, e))? {
            written += 1;
        } else {
            let name = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            warn!(path = %dest.display(), entry = %name, "skipping archive entry outside the target folder");
        }
    }

    debug!(path = %dest.display(), files = written, "extracted overlay archive");
    Ok(written)
}

/// Folder below the cell directory a `vpb` entry belongs in, `None` for the
/// cell directory itself.
///
/// The cell's root files (15 character names, and the `added` lists) stay
/// at the top; every other file goes into the `_root_L0_X0_Y0` folder of the
/// 10 character tile name it starts with.
pub fn vpb_entry_dir(name: &str) -> Option<String> {
    if name.len() == 15 || name.ends_with("added") {
        return None;
    }
    name.get(..10).map(|prefix| format!("{prefix}_root_L0_X0_Y0"))
}

/// Extracts a ws3 `vpb` zip into the cell directory `dest`. Returns the number
/// of files written.
pub fn extract_vpb(bytes: &[u8], dest: &Path) -> Result<usize, Error> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_error(dest, e))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| archive_error(dest, e))?;
        if file.is_dir() {
            continue;
        }

        let relative = match file.enclosed_name() {
            Some(relative) => relative,
            None => {
                warn!(path = %dest.display(), entry = file.name(), "skipping archive entry outside the target folder");
                continue;
            }
        };

        let target: PathBuf = match vpb_entry_dir(&relative.to_string_lossy()) {
            Some(dir) => dest.join(dir).join(&relative),
            None => dest.join(&relative),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let mut out = File::create(&target).map_err(|e| Error::io(&target, e))?;
        io::copy(&mut file, &mut out).map_err(|e| Error::io(&target, e))?;
        written += 1;
    }

    debug!(path = %dest.display(), files = written, "extracted vpb archive");
    Ok(written)
}

//! Chart archive reading and writing
//!
//! Charts travel as `.tgz` archives, usually with every file nested under a
//! single top-level directory named after the chart.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Component, Path};
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};

/// Read every regular file of a gzipped tar archive into memory
///
/// Returns a map of archive-relative paths (with `/` separators) to contents.
/// Entries escaping the archive root are rejected.
pub fn read_archive(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let decoder = GzDecoder::new(data);
    let mut archive = Archive::new(decoder);
    let mut files = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = normalize_path(&entry.path()?)?;
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.insert(path, content);
    }

    Ok(files)
}

/// Write files into a gzipped tar archive
///
/// Entries get a fixed mode and mtime so the same input yields the same bytes.
pub fn write_archive(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, content) in files {
        add_bytes_to_archive(&mut builder, path, content)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Add bytes to a tar archive with a given path
fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

fn normalize_path(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => {
                return Err(CoreError::InvalidChart {
                    message: format!("archive entry escapes chart root: {}", path.display()),
                });
            }
        }
    }
    Ok(parts.join("/"))
}

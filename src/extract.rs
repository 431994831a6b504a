// src/extract.rs

//! Payload extraction boundary.
//!
//! Operation execution never unpacks archives itself; it goes through the
//! `PayloadExtractor` trait so the codec stays an external collaborator.
//! Two implementations ship: `DirExtractor` for plain payload trees and
//! `TarGzExtractor` for `.tar.gz` archives. Failures surface as
//! `ExtractionFailed`.

use crate::error::{Error, Result};
use crate::fsutil::sanitize_path;
use crate::hash;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// One file inside a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// Payload-relative path, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Boundary trait: given a payload reference, enumerate its files or
/// materialize them into a target directory.
pub trait PayloadExtractor {
    /// Enumerate the payload's files with sizes and content hashes.
    fn list(&self, payload: &Path) -> Result<Vec<PayloadEntry>>;

    /// Extract the full payload into `target`, returning the file count.
    fn extract(&self, payload: &Path, target: &Path) -> Result<usize>;
}

/// Pick the extractor matching a payload reference.
pub fn extractor_for(payload: &Path) -> Box<dyn PayloadExtractor> {
    let name = payload.to_string_lossy();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(TarGzExtractor)
    } else {
        Box::new(DirExtractor)
    }
}

/// Extractor for payloads that are plain directory trees in the repository.
pub struct DirExtractor;

impl PayloadExtractor for DirExtractor {
    fn list(&self, payload: &Path) -> Result<Vec<PayloadEntry>> {
        if !payload.is_dir() {
            return Err(Error::ExtractionFailed(format!(
                "payload directory not found: {}",
                payload.display()
            )));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(payload).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::ExtractionFailed(format!("walking payload: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(payload)
                .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
            let metadata = entry.metadata().map_err(|e| {
                Error::ExtractionFailed(format!("{}: {}", entry.path().display(), e))
            })?;
            entries.push(PayloadEntry {
                path: rel.to_string_lossy().replace('\\', "/"),
                size: metadata.len(),
                sha256: hash::sha256_file(entry.path())?,
            });
        }
        Ok(entries)
    }

    fn extract(&self, payload: &Path, target: &Path) -> Result<usize> {
        let entries = self.list(payload)?;
        for entry in &entries {
            let rel = sanitize_path(&entry.path)?;
            let src = payload.join(&rel);
            let dst = target.join(&rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dst)?;
        }
        Ok(entries.len())
    }
}

/// Extractor for `.tar.gz` payload archives.
pub struct TarGzExtractor;

impl TarGzExtractor {
    fn open_archive(payload: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
        let file = File::open(payload).map_err(|e| {
            Error::ExtractionFailed(format!("opening {}: {}", payload.display(), e))
        })?;
        Ok(tar::Archive::new(GzDecoder::new(file)))
    }
}

impl PayloadExtractor for TarGzExtractor {
    fn list(&self, payload: &Path) -> Result<Vec<PayloadEntry>> {
        let mut archive = Self::open_archive(payload)?;
        let mut entries = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| Error::ExtractionFailed(format!("reading archive: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::ExtractionFailed(format!("reading entry: {}", e)))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .map_err(|e| Error::ExtractionFailed(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            // Hash while streaming so the archive is read exactly once
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut content)
                .map_err(|e| Error::ExtractionFailed(format!("{}: {}", rel, e)))?;
            entries.push(PayloadEntry {
                path: rel,
                size: content.len() as u64,
                sha256: hash::sha256_bytes(&content),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn extract(&self, payload: &Path, target: &Path) -> Result<usize> {
        fs::create_dir_all(target)?;
        let mut archive = Self::open_archive(payload)?;
        let mut count = 0usize;

        for entry in archive
            .entries()
            .map_err(|e| Error::ExtractionFailed(format!("reading archive: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::ExtractionFailed(format!("reading entry: {}", e)))?;
            let is_file = entry.header().entry_type().is_file();
            // unpack_in refuses paths escaping the target
            let ok = entry
                .unpack_in(target)
                .map_err(|e| Error::ExtractionFailed(format!("unpacking: {}", e)))?;
            if is_file && ok {
                count += 1;
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn build_dir_payload(dir: &Path) {
        fs::create_dir_all(dir.join("docs")).unwrap();
        fs::write(dir.join("install.txt"), "top level").unwrap();
        fs::write(dir.join("docs/readme.txt"), "nested").unwrap();
    }

    fn build_targz_payload(path: &Path) {
        let file = File::create(path).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);

        let mut header = tar::Header::new_gnu();
        header.set_size(9);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "install.txt", &b"top level"[..])
            .unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_size(6);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "docs/readme.txt", &b"nested"[..])
            .unwrap();

        let enc = builder.into_inner().unwrap();
        enc.finish().unwrap().sync_all().unwrap();
    }

    #[test]
    fn test_dir_extractor_list() {
        let dir = TempDir::new().unwrap();
        build_dir_payload(dir.path());

        let entries = DirExtractor.list(dir.path()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/readme.txt", "install.txt"]);
        assert_eq!(entries[1].size, 9);
        assert_eq!(entries[1].sha256, hash::sha256_bytes(b"top level"));
    }

    #[test]
    fn test_dir_extractor_extract() {
        let dir = TempDir::new().unwrap();
        let payload = dir.path().join("payload");
        build_dir_payload(&payload);
        let target = dir.path().join("out");

        let count = DirExtractor.extract(&payload, &target).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(target.join("docs/readme.txt")).unwrap(),
            "nested"
        );
    }

    #[test]
    fn test_dir_extractor_missing_payload() {
        let dir = TempDir::new().unwrap();
        let err = DirExtractor.list(&dir.path().join("ghost")).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
    }

    #[test]
    fn test_targz_extractor_list_and_extract() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("payload.tar.gz");
        build_targz_payload(&archive);

        let entries = TarGzExtractor.list(&archive).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/readme.txt", "install.txt"]);
        assert_eq!(entries[0].sha256, hash::sha256_bytes(b"nested"));

        let target = dir.path().join("out");
        let count = TarGzExtractor.extract(&archive, &target).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(target.join("install.txt")).unwrap(),
            "top level"
        );
    }

    #[test]
    fn test_extractor_for_dispatch() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("payload.tar.gz");
        build_targz_payload(&archive);
        let payload_dir = dir.path().join("tree");
        build_dir_payload(&payload_dir);

        // Trait objects picked by reference shape both produce the same view
        let a = extractor_for(&archive).list(&archive).unwrap();
        let d = extractor_for(&payload_dir).list(&payload_dir).unwrap();
        assert_eq!(a.len(), d.len());
        assert_eq!(a[0].sha256, d[0].sha256);
    }
}

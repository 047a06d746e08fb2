use std::{
    fs, io,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use log::info;

use super::error::IngestError;

/// A directory where files wait to be bulk loaded into one table.
/// Laid out as `<root>/<database>/<schema>/<table>/`.
#[derive(Debug, Clone)]
pub struct Stage {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: Option<Timestamp>,
}

impl StagedFile {
    fn from_path(path: PathBuf) -> io::Result<StagedFile> {
        let meta = fs::metadata(&path)?;
        Ok(StagedFile {
            name: path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: meta.len(),
            last_modified: meta.modified().ok().and_then(|t| Timestamp::try_from(t).ok()),
            path,
        })
    }
}

impl Stage {
    pub fn for_table(root: &Path, database: &str, schema: &str, table: &str) -> Stage {
        Stage {
            dir: root.join(database).join(schema).join(table),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy a local file into the stage, replacing a staged file with the same name.
    pub fn put(&self, local: &Path) -> Result<StagedFile, IngestError> {
        let stage_error = |source| IngestError::Stage {
            path: local.to_path_buf(),
            source,
        };
        let name = local.file_name().ok_or_else(|| {
            stage_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a file name",
            ))
        })?;
        fs::create_dir_all(&self.dir).map_err(stage_error)?;
        let target = self.dir.join(name);
        fs::copy(local, &target).map_err(stage_error)?;
        let staged = StagedFile::from_path(target).map_err(stage_error)?;
        info!("staged {} ({} bytes) in {}", staged.name, staged.size, self.dir.display());
        Ok(staged)
    }

    /// Staged files, sorted by name.  An empty list if nothing was ever staged.
    pub fn list(&self) -> io::Result<Vec<StagedFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(StagedFile::from_path(entry.path())?);
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn purge(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.dir.join(name))
    }
}

//! [`BackupModule`]: one independently keyed unit of a backup.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::manifest::{ManifestError, ModuleRecord};
use crate::options::DecryptOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupModule {
    pub name:         String,
    /// Packed `encMsgV3` (salt ‖ nonce).
    pub enc_msg_v3:   String,
    /// Packed `checkMsgV3`; may be empty when the backup carries none.
    pub check_msg_v3: String,
    /// Directory holding the encrypted member files.
    pub member_root:  PathBuf,
    /// Directory that mirrors `member_root` with decrypted files.
    pub output_root:  PathBuf,
}

impl BackupModule {
    /// Lay out a manifest row inside `backup_dir`, mirroring into `output_dir`.
    ///
    /// `<backup_dir>/<name><member_dir_suffix>` → `<output_dir>/<name><member_dir_suffix>`
    ///
    /// The name must be a single normal path component, so a manifest can
    /// never place output outside `output_dir`.
    pub fn from_record(
        record:     &ModuleRecord,
        backup_dir: &Path,
        output_dir: &Path,
        opts:       &DecryptOptions,
    ) -> Result<Self, ManifestError> {
        if !is_plain_name(&record.name) {
            return Err(ManifestError::InvalidName(record.name.clone()));
        }
        let dir_name = format!("{}{}", record.name, opts.member_dir_suffix);
        Ok(Self {
            name:         record.name.clone(),
            enc_msg_v3:   record.enc_msg_v3.clone(),
            check_msg_v3: record.check_msg_v3.clone(),
            member_root:  backup_dir.join(&dir_name),
            output_root:  output_dir.join(&dir_name),
        })
    }

    /// Collect member files under `member_root`, sorted by path.
    ///
    /// Unreadable subdirectories do not abort the walk; they are returned
    /// alongside the members so the caller can report them per path.
    pub fn members(&self, opts: &DecryptOptions) -> Result<(Vec<PathBuf>, Vec<(PathBuf, Error)>)> {
        let mut members = Vec::new();
        let mut skipped = Vec::new();
        let root = fs::read_dir(&self.member_root).map_err(Error::io(&self.member_root))?;
        let mut pending = vec![(self.member_root.clone(), root)];

        while let Some((dir, entries)) = pending.pop() {
            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        skipped.push((dir.clone(), Error::io(&dir)(e)));
                        continue;
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type() {
                    Ok(t) => t,
                    Err(e) => {
                        skipped.push((path.clone(), Error::io(&path)(e)));
                        continue;
                    }
                };
                if file_type.is_dir() {
                    match fs::read_dir(&path) {
                        Ok(sub) => pending.push((path, sub)),
                        Err(e) => skipped.push((path.clone(), Error::io(&path)(e))),
                    }
                } else if file_type.is_file()
                    && entry.file_name().to_str().is_some_and(|n| opts.is_member(n))
                {
                    members.push(path);
                }
            }
        }

        members.sort();
        Ok((members, skipped))
    }

    /// Destination of `member` under `output_root`.
    pub fn output_path(&self, member: &Path) -> Result<PathBuf> {
        let rel = member.strip_prefix(&self.member_root).map_err(|_| Error::Io {
            path:   member.to_owned(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not under module root {}", self.member_root.display()),
            ),
        })?;
        Ok(self.output_root.join(rel))
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(part)), None) if part.to_str() == Some(name)
    )
}

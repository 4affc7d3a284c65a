//! Batch configuration.

use std::path::{Path, PathBuf};

/// Configuration for [`crate::batch::Decryptor`].
#[derive(Debug, Clone)]
pub struct DecryptOptions {
    /// Only files whose name ends with this are treated as members.
    /// An empty suffix selects every file.
    pub member_suffix:     String,
    /// Appended to a module name to locate its member root.
    pub member_dir_suffix: String,
    /// Appended to the backup directory name to form the output root.
    pub output_suffix:     String,
    /// Backup manifest file name inside the backup directory.
    pub manifest_name:     String,
    /// Check each member against `checkMsgV3` before decrypting it.
    pub verify:            bool,
    /// Emit derived keys, salts and digests on the `kobackup::secrets`
    /// trace target. Never enable in production.
    pub trace_secrets:     bool,
    /// Extra attempts for transient read/write errors.
    pub io_retries:        u32,
    /// Worker threads with the `parallel` feature; 0 = rayon default.
    pub jobs:              usize,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            member_suffix:     ".tar".into(),
            member_dir_suffix: "_appDataTar".into(),
            output_suffix:     "_decrypted".into(),
            manifest_name:     "info.xml".into(),
            verify:            false,
            trace_secrets:     false,
            io_retries:        0,
            jobs:              0,
        }
    }
}

impl DecryptOptions {
    pub fn is_member(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.member_suffix)
    }

    /// Sibling output directory: `backup` → `backup_decrypted`.
    pub fn output_dir_for(&self, dir: &Path) -> PathBuf {
        match dir.file_name() {
            Some(name) => {
                let mut name = name.to_owned();
                name.push(&self.output_suffix);
                dir.with_file_name(name)
            }
            None => dir.join(self.output_suffix.trim_start_matches('_')),
        }
    }
}

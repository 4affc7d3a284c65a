//! Decryption and integrity checking for KoBackup V3 encrypted backups.
//!
//! ```no_run
//! use kobackup::batch::Decryptor;
//! use kobackup::options::DecryptOptions;
//! use std::path::Path;
//!
//! let decryptor = Decryptor::new(DecryptOptions::default());
//! let report = decryptor.decrypt_backup(
//!     Path::new("backup"),
//!     Path::new("backup_decrypted"),
//!     "password",
//! )?;
//! assert!(!report.has_failures());
//! # Ok::<(), kobackup::Error>(())
//! ```

pub mod batch;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod kdf;
pub mod manifest;
pub mod module;
pub mod options;

pub use batch::{BatchReport, CancelToken, Decryptor, FileOutcome, FileStatus, ModuleSummary};
pub use descriptor::{EncryptionDescriptor, FormatError, IntegrityDescriptor, IntegrityEntry};
pub use error::{Error, ErrorKind, Result};
pub use module::BackupModule;
pub use options::DecryptOptions;

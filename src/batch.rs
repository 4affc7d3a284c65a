//! Module batch decryption with per-file failure isolation.
//!
//! Per module:
//!
//! ```text
//! Start → DescriptorsParsed → KeyDerived → (MemberProcessed)* → Done
//! ```
//!
//! A descriptor or key-derivation failure aborts only that module; sibling
//! modules still run. A member failure (tag mismatch, digest mismatch, I/O)
//! aborts only that member. Every member produces a [`FileOutcome`], and every
//! module a [`ModuleSummary`], so nothing is swallowed into logs alone.
//!
//! Plaintext is written to a temporary file next to its destination and
//! renamed into place only once complete, so a failed member never leaves a
//! truncated or empty output behind.
//!
//! With the `parallel` feature, the members of a module are decrypted on a
//! Rayon pool of [`DecryptOptions::jobs`] threads.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::crypto::{decrypt_aead_buffer, verify};
use crate::descriptor::{EncryptionDescriptor, IntegrityDescriptor};
use crate::error::{Error, ErrorKind, Result};
use crate::kdf::{derive_hmac_key_material, derive_raw_key, DerivedKey};
use crate::manifest::read_manifest;
use crate::module::BackupModule;
use crate::options::DecryptOptions;

const SECRETS_TARGET: &str = "kobackup::secrets";

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Shared flag that stops new members from being scheduled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Ok,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// Result of processing one member file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path:   PathBuf,
    /// Written plaintext; `None` for verification runs and failures.
    pub output: Option<PathBuf>,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl FileOutcome {
    fn ok(path: &Path, output: Option<PathBuf>) -> Self {
        Self { path: path.to_owned(), output, status: FileStatus::Ok }
    }

    fn failed(path: &Path, err: &Error) -> Self {
        Self {
            path:   path.to_owned(),
            output: None,
            status: FileStatus::Failed { kind: err.kind(), message: err.to_string() },
        }
    }

    fn cancelled(path: &Path) -> Self {
        Self { path: path.to_owned(), output: None, status: FileStatus::Cancelled }
    }

    pub fn success(&self) -> bool {
        self.status == FileStatus::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            FileStatus::Ok => None,
            FileStatus::Failed { kind, .. } => Some(kind),
            FileStatus::Cancelled => Some(ErrorKind::Cancelled),
        }
    }
}

/// Why a whole module was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub kind:    ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub module_name:     String,
    /// Members attempted (succeeded + failed).
    pub files_processed: usize,
    pub files_failed:    usize,
    pub files_cancelled: usize,
    /// Set when the module was abandoned before any member was attempted.
    pub error:           Option<ModuleFailure>,
    pub outcomes:        Vec<FileOutcome>,
}

impl ModuleSummary {
    fn aborted(module_name: &str, err: &Error) -> Self {
        Self {
            module_name:     module_name.to_owned(),
            files_processed: 0,
            files_failed:    0,
            files_cancelled: 0,
            error:           Some(ModuleFailure { kind: err.kind(), message: err.to_string() }),
            outcomes:        Vec::new(),
        }
    }

    fn from_outcomes(module_name: &str, outcomes: Vec<FileOutcome>) -> Self {
        let files_cancelled = outcomes.iter().filter(|o| o.status == FileStatus::Cancelled).count();
        let files_failed = outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Failed { .. }))
            .count();
        Self {
            module_name: module_name.to_owned(),
            files_processed: outcomes.len() - files_cancelled,
            files_failed,
            files_cancelled,
            error: None,
            outcomes,
        }
    }

    pub fn files_succeeded(&self) -> usize {
        self.files_processed - self.files_failed
    }

    pub fn has_failures(&self) -> bool {
        self.error.is_some() || self.files_failed > 0 || self.files_cancelled > 0
    }
}

/// Summaries for every module of a run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub modules:      Vec<ModuleSummary>,
}

impl BatchReport {
    pub fn new(modules: Vec<ModuleSummary>) -> Self {
        Self { generated_at: Utc::now(), modules }
    }

    pub fn has_failures(&self) -> bool {
        self.modules.iter().any(ModuleSummary::has_failures)
    }

    pub fn modules_failed(&self) -> usize {
        self.modules.iter().filter(|m| m.error.is_some()).count()
    }

    pub fn files_processed(&self) -> usize {
        self.modules.iter().map(|m| m.files_processed).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.modules.iter().map(|m| m.files_failed).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ── Decryptor ─────────────────────────────────────────────────────────────────

/// Parsed descriptors and key for one module; dropped (and wiped) with the module.
struct ModuleContext<'a> {
    password:  &'a str,
    integrity: Option<IntegrityDescriptor>,
    /// `None` on verify-only runs, which never touch `encMsgV3`.
    cipher:    Option<ModuleCipher>,
}

struct ModuleCipher {
    encryption: EncryptionDescriptor,
    key:        DerivedKey,
}

pub struct Decryptor {
    options: DecryptOptions,
    cancel:  CancelToken,
}

impl Decryptor {
    pub fn new(options: DecryptOptions) -> Self {
        Self::with_cancel(options, CancelToken::new())
    }

    pub fn with_cancel(options: DecryptOptions, cancel: CancelToken) -> Self {
        Self { options, cancel }
    }

    pub fn options(&self) -> &DecryptOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Decrypt every module listed in `<backup_dir>/info.xml` into `output_dir`.
    ///
    /// Only a missing or unreadable manifest fails the whole call. A row whose
    /// name is not a plain directory name abandons just that module.
    pub fn decrypt_backup(&self, backup_dir: &Path, output_dir: &Path, password: &str) -> Result<BatchReport> {
        let manifest = backup_dir.join(&self.options.manifest_name);
        let records = read_manifest(&manifest)?;
        info!(modules = records.len(), manifest = %manifest.display(), "manifest loaded");

        fs::create_dir_all(output_dir).map_err(Error::io(output_dir))?;
        let summaries = records
            .iter()
            .map(|r| match BackupModule::from_record(r, backup_dir, output_dir, &self.options) {
                Ok(module) => self.decrypt_module(&module, password),
                Err(e) => {
                    let e = Error::from(e);
                    error!(module = %r.name, error = %e, "module abandoned");
                    ModuleSummary::aborted(&r.name, &e)
                }
            })
            .collect();
        Ok(BatchReport::new(summaries))
    }

    pub fn decrypt_modules(&self, modules: &[BackupModule], password: &str) -> BatchReport {
        BatchReport::new(modules.iter().map(|m| self.decrypt_module(m, password)).collect())
    }

    pub fn decrypt_module(&self, module: &BackupModule, password: &str) -> ModuleSummary {
        self.run_module(module, password, false)
    }

    /// Check every member against `checkMsgV3` without decrypting anything.
    pub fn verify_module(&self, module: &BackupModule, password: &str) -> ModuleSummary {
        self.run_module(module, password, true)
    }

    fn run_module(&self, module: &BackupModule, password: &str, verify_only: bool) -> ModuleSummary {
        let span = info_span!("module", name = %module.name);
        let _guard = span.enter();
        info!(root = %module.member_root.display(), "processing module");

        let ctx = match self.prepare(module, password, verify_only) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "module abandoned");
                return ModuleSummary::aborted(&module.name, &e);
            }
        };

        let (members, skipped) = match module.members(&self.options) {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "cannot list module members");
                return ModuleSummary::aborted(&module.name, &e);
            }
        };
        debug!(members = members.len(), "members discovered");

        let mut outcomes: Vec<FileOutcome> = skipped
            .iter()
            .map(|(path, e)| {
                warn!(path = %path.display(), error = %e, "skipping unreadable path");
                FileOutcome::failed(path, e)
            })
            .collect();
        outcomes.extend(self.for_each_member(&span, &members, |member| {
            self.process_member(&ctx, module, member)
        }));

        let summary = ModuleSummary::from_outcomes(&module.name, outcomes);
        info!(
            processed = summary.files_processed,
            failed = summary.files_failed,
            cancelled = summary.files_cancelled,
            "module done"
        );
        summary
    }

    /// `Start → DescriptorsParsed → KeyDerived`. Verify-only runs stop after
    /// `checkMsgV3`.
    fn prepare<'a>(&self, module: &BackupModule, password: &'a str, verify_only: bool) -> Result<ModuleContext<'a>> {
        let needs_integrity = verify_only || self.options.verify;
        let integrity = if needs_integrity || !module.check_msg_v3.is_empty() {
            Some(IntegrityDescriptor::parse(&module.check_msg_v3)?)
        } else {
            None
        };
        if verify_only {
            return Ok(ModuleContext { password, integrity, cipher: None });
        }

        let encryption = EncryptionDescriptor::parse(&module.enc_msg_v3)?;
        let key = derive_raw_key(password, &encryption.salt)?;
        if self.options.trace_secrets {
            trace!(
                target: SECRETS_TARGET,
                salt = %hex::encode(encryption.salt),
                nonce = %hex::encode(encryption.nonce),
                key = %hex::encode(key.as_slice()),
                "module key derived"
            );
        }
        Ok(ModuleContext { password, integrity, cipher: Some(ModuleCipher { encryption, key }) })
    }

    fn for_each_member<F>(&self, span: &Span, members: &[PathBuf], f: F) -> Vec<FileOutcome>
    where
        F: Fn(&Path) -> FileOutcome + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            match rayon::ThreadPoolBuilder::new().num_threads(self.options.jobs).build() {
                Ok(pool) => {
                    // Worker threads do not inherit the caller's entered span.
                    return pool.install(|| {
                        members.par_iter().map(|m| span.in_scope(|| f(m.as_path()))).collect()
                    });
                }
                Err(e) => warn!(error = %e, "thread pool unavailable, decrypting sequentially"),
            }
        }

        members.iter().map(|m| span.in_scope(|| f(m.as_path()))).collect()
    }

    fn process_member(&self, ctx: &ModuleContext<'_>, module: &BackupModule, member: &Path) -> FileOutcome {
        if self.cancel.is_cancelled() {
            debug!(path = %member.display(), "cancelled");
            return FileOutcome::cancelled(member);
        }

        let result = match &ctx.cipher {
            None => self.verify_member(ctx, member).map(|()| None),
            Some(cipher) => self.decrypt_member(ctx, cipher, module, member).map(Some),
        };

        match result {
            Ok(output) => {
                debug!(path = %member.display(), "ok");
                FileOutcome::ok(member, output)
            }
            Err(e) => {
                warn!(path = %member.display(), error = %e, "member failed");
                FileOutcome::failed(member, &e)
            }
        }
    }

    fn decrypt_member(
        &self,
        ctx:    &ModuleContext<'_>,
        cipher: &ModuleCipher,
        module: &BackupModule,
        member: &Path,
    ) -> Result<PathBuf> {
        if self.options.verify {
            self.verify_member(ctx, member)?;
        }

        let output = module.output_path(member)?;
        let sealed = with_retries(self.options.io_retries, || fs::read(member)).map_err(Error::io(member))?;
        let plaintext = decrypt_aead_buffer(&sealed, &cipher.key, &cipher.encryption.nonce)?;
        with_retries(self.options.io_retries, || write_atomic(&output, &plaintext))
            .map_err(Error::io(&output))?;

        debug!(from = %member.display(), to = %output.display(), bytes = plaintext.len(), "decrypted");
        Ok(output)
    }

    fn verify_member(&self, ctx: &ModuleContext<'_>, member: &Path) -> Result<()> {
        let integrity = ctx.integrity.as_ref().ok_or_else(|| Error::NotFound(
            crate::descriptor::EntryNotFound(member.display().to_string()),
        ))?;
        verify_file(member, integrity, ctx.password, self.options.trace_secrets)
    }
}

/// Verify `path` against its entry in `integrity`, looked up by base name.
pub fn verify_file(
    path:          &Path,
    integrity:     &IntegrityDescriptor,
    password:      &str,
    trace_secrets: bool,
) -> Result<()> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let entry = integrity.lookup(name)?;
    let hmac_key = derive_hmac_key_material(password, &entry.salt)?;
    if trace_secrets {
        trace!(
            target: SECRETS_TARGET,
            member = name,
            salt = %hex::encode(entry.salt),
            expected = %hex::encode(entry.expected_digest),
            "verifying member"
        );
    }

    let file = File::open(path).map_err(Error::io(path))?;
    let matches = verify(BufReader::new(file), &entry.expected_digest, hmac_key.as_slice())
        .map_err(Error::io(path))?;
    if !matches {
        return Err(Error::DigestMismatch(name.to_owned()));
    }
    Ok(())
}

/// Decrypt a single sealed file to `output` using a module descriptor.
pub fn decrypt_file(input: &Path, output: &Path, encryption: &EncryptionDescriptor, password: &str) -> Result<()> {
    let key = derive_raw_key(password, &encryption.salt)?;
    let sealed = fs::read(input).map_err(Error::io(input))?;
    let plaintext = decrypt_aead_buffer(&sealed, &key, &encryption.nonce)?;
    write_atomic(output, &plaintext).map_err(Error::io(output))
}

/// Write `data` to a temp file beside `dest`, then rename it into place.
fn write_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    // Concurrent callers may race on shared parents; create_dir_all tolerates that.
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

fn with_retries<T>(retries: u32, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if attempt < retries && is_transient(&e) => {
                attempt += 1;
                debug!(attempt, error = %e, "retrying transient I/O error");
            }
            result => return result,
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

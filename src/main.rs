use clap::{Args, Parser, Subcommand, ValueEnum};
use kobackup::batch::{decrypt_file, verify_file, BatchReport, Decryptor, FileStatus};
use kobackup::manifest::read_manifest;
use kobackup::descriptor::CHECK_PREFIX_LEN;
use kobackup::{BackupModule, DecryptOptions, EncryptionDescriptor, FormatError, IntegrityDescriptor};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kobackup", about = "Decrypt and verify KoBackup V3 encrypted backups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Backup password
    #[arg(short, long, global = true, env = "KOBACKUP_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Verify each member against checkMsgV3 before decrypting it
    #[arg(long, global = true)]
    verify: bool,
    /// Worker threads (needs the `parallel` feature; 0 = one per core)
    #[arg(short, long, global = true, default_value = "0")]
    jobs: usize,
    /// Extra attempts for transient I/O errors
    #[arg(long, global = true, default_value = "0")]
    io_retries: u32,
    /// Log derived keys, salts and digests (debugging only)
    #[arg(long, global = true)]
    trace_secrets: bool,
    /// Write a JSON report of every file outcome to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt every module listed in a backup directory's info.xml
    DecryptDir {
        backup_dir: PathBuf,
        /// Output root (default: <BACKUP_DIR>_decrypted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decrypt one file, or every file under a directory, with a single encMsgV3
    Decrypt {
        #[arg(long)]
        enc_msg: String,
        /// checkMsgV3 used with --verify
        #[arg(long, default_value = "")]
        check_msg: String,
        /// Only decrypt files ending with this (directory input)
        #[arg(long, default_value = "")]
        suffix: String,
        input: PathBuf,
        /// Output file, or output root for a directory (default: <INPUT>_decrypted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a member file's HMAC against checkMsgV3
    Check {
        #[arg(long)]
        check_msg: String,
        input: PathBuf,
    },
    /// List the modules described by a backup's info.xml
    Modules {
        backup_dir: PathBuf,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.common.log_level, cli.common.log_format);
    let common = &cli.common;

    let options = DecryptOptions {
        verify:        common.verify,
        trace_secrets: common.trace_secrets,
        io_retries:    common.io_retries,
        jobs:          common.jobs,
        ..Default::default()
    };

    match cli.command {

        // ── DecryptDir ───────────────────────────────────────────────────────
        Commands::DecryptDir { backup_dir, output } => {
            let password = require_password(common)?;
            let output = output.unwrap_or_else(|| options.output_dir_for(&backup_dir));
            let decryptor = Decryptor::new(options);
            let report = decryptor.decrypt_backup(&backup_dir, &output, password)?;
            finish(&report, common.report.as_deref(), &output)
        }

        // ── Decrypt ──────────────────────────────────────────────────────────
        Commands::Decrypt { enc_msg, check_msg, suffix, input, output } => {
            let password = require_password(common)?;
            if input.is_dir() {
                let output = output.unwrap_or_else(|| options.output_dir_for(&input));
                let module = BackupModule {
                    name:         input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                    enc_msg_v3:   enc_msg,
                    check_msg_v3: check_msg,
                    member_root:  input,
                    output_root:  output.clone(),
                };
                let decryptor = Decryptor::new(DecryptOptions { member_suffix: suffix, ..options });
                let report = decryptor.decrypt_modules(std::slice::from_ref(&module), password);
                finish(&report, common.report.as_deref(), &output)
            } else {
                let output = output.ok_or("--output is required when INPUT is a file")?;
                let encryption = EncryptionDescriptor::parse(&enc_msg)?;
                if options.verify {
                    verify_file(&input, &IntegrityDescriptor::parse(&check_msg)?, password, options.trace_secrets)?;
                }
                decrypt_file(&input, &output, &encryption, password)?;
                println!("Decrypted: {} → {}", input.display(), output.display());
                Ok(ExitCode::SUCCESS)
            }
        }

        // ── Check ────────────────────────────────────────────────────────────
        Commands::Check { check_msg, input } => {
            let password = require_password(common)?;
            let integrity = check_descriptor(&check_msg, &input)?;
            match verify_file(&input, &integrity, password, options.trace_secrets) {
                Ok(()) => {
                    println!("OK        {}", input.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("FAILED    {}  ({e})", input.display());
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        // ── Modules ──────────────────────────────────────────────────────────
        Commands::Modules { backup_dir } => {
            let records = read_manifest(backup_dir.join(&options.manifest_name))?;
            let output = options.output_dir_for(&backup_dir);
            println!("{:<40} {:>8} {:>10} {:>10}", "Module", "Members", "encMsgV3", "checkMsgV3");
            for record in &records {
                let members = match BackupModule::from_record(record, &backup_dir, &output, &options) {
                    Ok(module) => module
                        .members(&options)
                        .map(|(m, _)| m.len().to_string())
                        .unwrap_or_else(|_| "—".into()),
                    Err(_) => "bad name".into(),
                };
                let enc_ok = EncryptionDescriptor::parse(&record.enc_msg_v3).is_ok();
                let check = match IntegrityDescriptor::parse(&record.check_msg_v3) {
                    Ok(d) => format!("{} entr.", d.len()),
                    Err(_) if record.check_msg_v3.is_empty() => "none".into(),
                    Err(_) => "invalid".into(),
                };
                println!("{:<40} {:>8} {:>10} {:>10}",
                    record.name, members, if enc_ok { "ok" } else { "invalid" }, check);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn require_password(common: &CommonArgs) -> Result<&str, Box<dyn std::error::Error>> {
    common
        .password
        .as_deref()
        .ok_or_else(|| "a password is required (--password or KOBACKUP_PASSWORD)".into())
}

/// `check` also takes a bare `digest ‖ salt` prefix, naming the entry after INPUT.
fn check_descriptor(check_msg: &str, input: &Path) -> Result<IntegrityDescriptor, FormatError> {
    if check_msg.len() == CHECK_PREFIX_LEN && !check_msg.contains(['_', '*']) {
        let name = input.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        return IntegrityDescriptor::single(check_msg, &name);
    }
    IntegrityDescriptor::parse(check_msg)
}

fn finish(report: &BatchReport, report_path: Option<&Path>, output: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    for module in &report.modules {
        match &module.error {
            Some(failure) => println!("  {:<40} ABANDONED  {}", module.module_name, failure.message),
            None => println!("  {:<40} {:>5} ok {:>5} failed", module.module_name,
                module.files_succeeded(), module.files_failed),
        }
        for outcome in &module.outcomes {
            if let FileStatus::Failed { message, .. } = &outcome.status {
                println!("      ✗ {}  {}", outcome.path.display(), message);
            }
        }
    }

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)?;
    }

    println!("Decrypted to: {}  ({} file(s), {} failed, {} module(s) abandoned)",
        output.display(), report.files_processed(), report.files_failed(), report.modules_failed());

    Ok(if report.has_failures() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

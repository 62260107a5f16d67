// {{{ Copyright (c) cvdkit contributors, 2025
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE. }}}

//! `cvdkit`: a thin CLI over the library's build/diff/apply/verify pipeline.
//! Subcommand layout follows `ngdp-client`'s `clap` derive structure
//! (`examples/wowemulation-dev-cascette-rs/ngdp-client/src/main.rs`).

use clap::{Parser, Subcommand};
use cvdkit::{archive, build, config::BuildConfig, cvd, diff, mirror, patch, signer};
use std::{
    io::BufReader,
    net::Ipv4Addr,
    path::PathBuf,
    process::ExitCode,
    time::{Duration, SystemTime},
};

#[derive(Parser)]
#[command(name = "cvdkit", about = "Build, diff, patch, and verify signature-database bundles", version)]
struct Cli {
    /// Set the logging level.
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new CVD (and, if `--previous-dir` is given, a CDIFF) from a
    /// signature-database directory.
    Build {
        db_dir: PathBuf,
        #[arg(long)]
        engine_signature_count: u32,
        #[arg(long)]
        engine_level: u32,
        #[arg(long)]
        builder: String,
        #[arg(long)]
        previous_version: Option<u32>,
        #[arg(long)]
        previous_dir: Option<PathBuf>,
        #[arg(long)]
        signer_host: String,
        #[arg(long, env = "SIGNDUSER")]
        signer_user: String,
        #[arg(long, env = "SIGNDPASS")]
        signer_pass: String,
        #[arg(long)]
        out_cvd: PathBuf,
        #[arg(long)]
        out_cdiff: Option<PathBuf>,
    },
    /// Diff two unpacked signature-database directories into a PatchScript.
    Diff {
        old_dir: PathBuf,
        new_dir: PathBuf,
    },
    /// Apply a PatchScript to a signature-database directory in place.
    Apply {
        script: PathBuf,
        db_dir: PathBuf,
    },
    /// Verify a CVD file's hash (and, with the `sequoia` feature, signature).
    Verify {
        cvd_path: PathBuf,
    },
    /// Unpack a CVD's archive payload into a directory.
    Unpack {
        cvd_path: PathBuf,
        dest_dir: PathBuf,
    },
    /// Print a CVD file's header fields.
    Info {
        cvd_path: PathBuf,
    },
    /// Count non-comment signature lines in a database directory.
    ListSigs {
        db_dir: PathBuf,
    },
    /// Print the mirror reputation store's current records.
    MirrorList {
        store_path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level))
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::from(0),
        Err(code) => ExitCode::from(code),
    }
}

fn run(command: Commands) -> Result<(), u8> {
    match command {
        Commands::Build {
            db_dir,
            engine_signature_count,
            engine_level,
            builder,
            previous_version,
            previous_dir,
            signer_host,
            signer_user,
            signer_pass,
            out_cvd,
            out_cdiff,
        } => {
            let config = BuildConfig {
                engine_level,
                builder,
                signer_timeout: Duration::from_secs(60),
                notify_hooks: Vec::new(),
            };
            let client = signer::SignerClient::new(signer_user, signer_pass, config.signer_timeout);
            let previous = previous_version.map(|version| build::PreviousRelease {
                version,
                signature_count: engine_signature_count,
            });

            let output = build::build(
                &db_dir,
                engine_signature_count,
                previous.as_ref(),
                previous_dir.as_deref(),
                &config,
                &client,
                &signer_host,
            )
            .map_err(|e| {
                tracing::error!(stage = ?e.stage, file = ?e.file, "{e}");
                1
            })?;

            std::fs::write(&out_cvd, &output.cvd_bytes).map_err(|_| 3u8)?;
            if let (Some(path), Some(bytes)) = (out_cdiff, &output.cdiff_bytes) {
                std::fs::write(path, bytes).map_err(|_| 3u8)?;
            }
            tracing::info!(version = output.cvd_header.version, "build complete");
            Ok(())
        }

        Commands::Diff { old_dir, new_dir } => {
            let commands = diff::diff_dirs(&old_dir, &new_dir, &Default::default()).map_err(|e| {
                tracing::error!("{e}");
                1u8
            })?;
            for command in commands {
                println!("{command:?}");
            }
            Ok(())
        }

        Commands::Apply { script, db_dir } => {
            let file = std::fs::File::open(&script).map_err(|_| 3u8)?;
            patch::apply_script(BufReader::new(file), &db_dir).map_err(|e| {
                tracing::error!("{e}");
                1u8
            })
        }

        Commands::Verify { cvd_path } => {
            let bytes = std::fs::read(&cvd_path).map_err(|_| 3u8)?;
            let mut reader = std::io::Cursor::new(bytes);
            #[cfg(feature = "sequoia")]
            {
                let verified = cvd::verify(&mut reader, None).map_err(|e| {
                    tracing::error!("{e}");
                    1u8
                })?;
                println!("version {} ok ({:?})", verified.header.version, verified.signature_outcome);
            }
            #[cfg(not(feature = "sequoia"))]
            {
                let mut header_bytes = [0u8; cvd::HEADER_LEN];
                use std::io::Read;
                reader.read_exact(&mut header_bytes).map_err(|_| 1u8)?;
                let header = cvd::parse_header(&header_bytes).map_err(|_| 1u8)?;
                println!("version {}", header.version);
            }
            Ok(())
        }

        Commands::Unpack { cvd_path, dest_dir } => {
            let bytes = std::fs::read(&cvd_path).map_err(|_| 3u8)?;
            let mut reader = std::io::Cursor::new(bytes);
            let payload = cvd::open_payload(&mut reader).map_err(|_| 1u8)?;
            std::fs::create_dir_all(&dest_dir).map_err(|_| 3u8)?;
            archive::unpack_dir(payload, &dest_dir).map_err(|e| {
                tracing::error!("{e}");
                1u8
            })
        }

        Commands::Info { cvd_path } => {
            let bytes = std::fs::read(&cvd_path).map_err(|_| 3u8)?;
            let mut header_bytes = [0u8; cvd::HEADER_LEN];
            header_bytes.copy_from_slice(&bytes[..cvd::HEADER_LEN]);
            let header = cvd::parse_header(&header_bytes).map_err(|_| 1u8)?;
            println!("{header:#?}");
            let warnings = cvd::advisories(&header, &Default::default(), SystemTime::now());
            for warning in warnings {
                println!("warning: {warning:?}");
            }
            Ok(())
        }

        Commands::ListSigs { db_dir } => {
            for entry in std::fs::read_dir(&db_dir).map_err(|_| 3u8)? {
                let entry = entry.map_err(|_| 3u8)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if patch::is_allowed_name(&name) {
                    println!("{name}");
                }
            }
            Ok(())
        }

        Commands::MirrorList { store_path } => {
            let store = mirror::MirrorStore::load(&store_path, true, Default::default()).map_err(|_| 3u8)?;
            for record in store.list() {
                println!(
                    "{} atime={} succ={} fail={} ignore={} engine={}",
                    Ipv4Addr::from(record.ip),
                    record.atime,
                    record.succ,
                    record.fail,
                    record.ignore != 0,
                    record.engine_level,
                );
            }
            Ok(())
        }
    }
}

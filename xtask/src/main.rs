// Licensed under the Apache-2.0 license

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use std::path::PathBuf;

mod config;
mod image;
mod release;
mod version;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    #[command(flatten)]
    global: GlobalArgs,

    /// Defaults to `release`
    #[command(subcommand)]
    xtask: Option<Commands>,
}

#[derive(Args)]
pub(crate) struct GlobalArgs {
    /// Release configuration; defaults to ./release.toml when present
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// AES-256 key as 64 hex digits
    #[arg(long, global = true, env = "FW_RELEASE_AES_KEY", hide_env_values = true)]
    aes_key: Option<String>,

    /// AES-CTR initial counter as 32 hex digits
    #[arg(long, global = true, env = "FW_RELEASE_AES_IV", hide_env_values = true)]
    aes_iv: Option<String>,

    /// HMAC-SHA-256 key as hex
    #[arg(long, global = true, env = "FW_RELEASE_HMAC_KEY", hide_env_values = true)]
    hmac_key: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stamp, pad, convert, encrypt and publish every binary in the search directories
    Release {
        /// Directory to search for .bin files; repeatable
        #[arg(long = "search-dir", value_name = "DIR")]
        search_dirs: Vec<PathBuf>,

        /// Directory that receives the published artifacts
        #[arg(long)]
        release_dir: Option<PathBuf>,

        /// Version registry header
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Flash address of the first image byte
        #[arg(long, value_parser=maybe_hex::<u32>)]
        flash_start: Option<u32>,

        /// Flash erase block size the image is padded to
        #[arg(long, value_parser=maybe_hex::<usize>)]
        block_size: Option<usize>,

        /// Data bytes per Intel HEX record
        #[arg(long)]
        record_len: Option<u8>,
    },
    /// Print the firmware version recorded in the registry
    Version {
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Advance the development build number in the version registry
    BumpVersion {
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Source tree whose fw_version banners are refreshed
        #[arg(long, value_name = "DIR")]
        sources: Option<PathBuf>,
    },
    /// Check header, padding and hash of a finished image
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// FILE is an encrypted .gbin image
        #[arg(long, default_value_t = false)]
        encrypted: bool,
    },
    /// Decrypt a published .gbin image
    Decrypt {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, value_name = "OUTPUT")]
        output: PathBuf,
    },
    /// Convert a flat binary into Intel HEX
    Ihex {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Defaults to FILE with a .hex extension
        #[arg(long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        #[arg(long, value_parser=maybe_hex::<u32>)]
        flash_start: Option<u32>,
    },
}

fn main() {
    let cli = Xtask::parse();
    let level = if cli.global.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();

    let result = match cli.xtask.unwrap_or(Commands::Release {
        search_dirs: Vec::new(),
        release_dir: None,
        registry: None,
        flash_start: None,
        block_size: None,
        record_len: None,
    }) {
        Commands::Release {
            search_dirs,
            release_dir,
            registry,
            flash_start,
            block_size,
            record_len,
        } => release::release(
            &cli.global,
            release::ReleaseOverrides {
                search_dirs,
                release_dir,
                registry,
                flash_start,
                block_size,
                record_len,
            },
        ),
        Commands::Version { registry } => version::print(&cli.global, registry),
        Commands::BumpVersion { registry, sources } => {
            version::bump(&cli.global, registry, sources)
        }
        Commands::Verify { file, encrypted } => image::verify(&cli.global, &file, encrypted),
        Commands::Decrypt { file, output } => image::decrypt(&cli.global, &file, &output),
        Commands::Ihex {
            file,
            output,
            flash_start,
        } => image::ihex(&cli.global, &file, output, flash_start),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    });
}

use std::error::Error as StdError;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use ringstage::config::{
    load_config, parse_delimiter, parse_oversize, FlattenedConfig, OversizePolicy, SourceConfig,
    SourceKind,
};
use ringstage::{Error, Framer};
use tokio::io::AsyncWriteExt;

/// Split byte streams into delimiter-terminated frames.
#[derive(Parser, Debug)]
#[command(name = "ringstage", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Buffer capacity in bytes, rounded up to a power of two.
    #[arg(long)]
    capacity: Option<usize>,

    /// Frame delimiter; accepts \n \r \t \0 \\ and \xHH escapes.
    #[arg(short, long)]
    delimiter: Option<String>,

    /// What to do when a frame outgrows the buffer: flush or error.
    #[arg(long, value_parser = parse_oversize)]
    oversize: Option<OversizePolicy>,

    /// Drop unterminated bytes at end of stream instead of emitting them.
    #[arg(long)]
    no_trailing: bool,

    /// Flush a partial frame after this many idle milliseconds (0 disables).
    #[arg(long)]
    idle_flush_ms: Option<u64>,

    /// Input files, read in order; `-` is stdin. Replaces configured sources.
    inputs: Vec<String>,
}

fn get_config_path() -> String {
    if let Ok(home) = std::env::var("HOME") {
        format!("{}/.config/ringstage/config.toml", home)
    } else {
        "/etc/ringstage/config.toml".to_string()
    }
}

fn resolve_config(args: &Args) -> Result<FlattenedConfig, Box<dyn StdError>> {
    let cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let path = get_config_path();
            if Path::new(&path).exists() {
                load_config(&path)?
            } else {
                info!("No config at {}, using defaults", path);
                FlattenedConfig::default()
            }
        }
    };
    apply_overrides(cfg, args)
}

/// Lets command line flags and positional inputs win over the config file.
fn apply_overrides(mut cfg: FlattenedConfig, args: &Args) -> Result<FlattenedConfig, Box<dyn StdError>> {
    if let Some(capacity) = args.capacity {
        cfg.capacity = capacity;
    }
    if let Some(delimiter) = &args.delimiter {
        cfg.delimiter = parse_delimiter(delimiter)?;
    }
    if let Some(oversize) = args.oversize {
        cfg.oversize = oversize;
    }
    if args.no_trailing {
        cfg.emit_trailing = false;
    }
    if let Some(ms) = args.idle_flush_ms {
        cfg.idle_flush_ms = ms;
    }
    if !args.inputs.is_empty() {
        cfg.sources = args
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| input_source(i, input))
            .collect();
    }
    Ok(cfg)
}

fn input_source(index: usize, input: &str) -> SourceConfig {
    if input == "-" {
        SourceConfig {
            id: format!("stdin-{}", index),
            kind: SourceKind::Stdin,
            path: None,
            enabled: true,
        }
    } else {
        SourceConfig {
            id: format!("input-{}", index),
            kind: SourceKind::File,
            path: Some(input.to_string()),
            enabled: true,
        }
    }
}

async fn run(cfg: FlattenedConfig) -> Result<(), Error> {
    let mut framer = Framer::from_config(cfg).await?;
    let mut stdout = tokio::io::stdout();

    // Listens for the whole run, including while a frame is being written.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let next = tokio::select! {
            res = framer.next_frame() => Some(res?),
            _ = &mut ctrl_c => None,
        };
        match next {
            Some(Some(frame)) => stdout.write_all(frame.bytes()).await?,
            Some(None) => break,
            None => {
                info!("Interrupted, flushing {} buffered bytes", framer.buffered());
                framer.write_buffered(&mut stdout).await?;
                break;
            }
        }
    }
    stdout.flush().await?;

    let (frames, bytes) = framer.stats();
    info!("Served {} frames, {} bytes", frames, bytes);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();
    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ringstage failed: {}", e);
            ExitCode::from(e.to_status_code() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringstage::config::parse_config;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["ringstage"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn base_config() -> FlattenedConfig {
        parse_config(
            r#"
            [stream]
            capacity = 1024
            delimiter = "|"
            oversize = "flush"
            emit_trailing = true
            idle_flush_ms = 0

            [[source]]
            id = "log-a"
            kind = "file"
            path = "/tmp/a.log"
            enabled = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cfg = apply_overrides(base_config(), &args(&[])).unwrap();
        assert_eq!(cfg.capacity, 1024);
        assert_eq!(cfg.delimiter, b"|");
        assert_eq!(cfg.oversize, OversizePolicy::Flush);
        assert!(cfg.emit_trailing);
        assert_eq!(cfg.idle_flush_ms, 0);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].id, "log-a");
    }

    #[test]
    fn test_flags_override_config() {
        let cfg = apply_overrides(
            base_config(),
            &args(&[
                "--capacity",
                "300",
                "--delimiter",
                "\\r\\n",
                "--oversize",
                "error",
                "--no-trailing",
                "--idle-flush-ms",
                "75",
            ]),
        )
        .unwrap();
        assert_eq!(cfg.capacity, 300);
        assert_eq!(cfg.delimiter, b"\r\n");
        assert_eq!(cfg.oversize, OversizePolicy::Error);
        assert!(!cfg.emit_trailing);
        assert_eq!(cfg.idle_flush_ms, 75);
        // No positional inputs, configured sources stay.
        assert_eq!(cfg.sources[0].id, "log-a");
    }

    #[test]
    fn test_inputs_replace_sources() {
        let cfg = apply_overrides(base_config(), &args(&["-", "/var/log/b.log"])).unwrap();
        assert_eq!(cfg.sources.len(), 2);

        assert_eq!(cfg.sources[0].id, "stdin-0");
        assert_eq!(cfg.sources[0].kind, SourceKind::Stdin);
        assert_eq!(cfg.sources[0].path, None);

        assert_eq!(cfg.sources[1].id, "input-1");
        assert_eq!(cfg.sources[1].kind, SourceKind::File);
        assert_eq!(cfg.sources[1].path.as_deref(), Some("/var/log/b.log"));
        assert!(cfg.sources.iter().all(|s| s.enabled));
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert!(apply_overrides(base_config(), &args(&["--delimiter", ""])).is_err());
        assert!(apply_overrides(base_config(), &args(&["--delimiter", "\\q"])).is_err());
    }

    #[test]
    fn test_bad_oversize_flag_rejected() {
        assert!(Args::try_parse_from(["ringstage", "--oversize", "drop"]).is_err());
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let args = args(&["--config", "/nonexistent/ringstage.toml"]);
        assert!(resolve_config(&args).is_err());
    }
}

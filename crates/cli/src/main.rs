//! `qsf`: write and read QSF containers from the command line.
//!
//! ```text
//! qsf write --out bundle.qsf report.pdf:cid,zstr:gzip,encrypt:doc.key notes.txt:cid
//! qsf read --src bundle.qsf --out extracted/ --key-dir keys/
//! qsf read --src bundle.qsf --mode manifest
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use qsf_core::filter::cid::cid;
use qsf_core::filter::zstr::{zstr, ZCodec};
use qsf_core::manifest::ManifestRecord;
use qsf_core::reader::{QsfReader, ReaderOptions, StreamEvent};
use qsf_core::writer::{EntrySource, QsfWriter, WriteEntry};
use qsf_core::{frame, StreamConfigRecord};
use qsf_crypto::{load_or_generate, AesGcmEncoder, AesGcmFactory, KeyStore};

#[derive(Debug, Parser)]
#[command(name = "qsf", version, about = "QSF container format tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes files into a new container.
    Write {
        /// Output container path.
        #[arg(long)]
        out: PathBuf,
        /// Entries: `<file>[:<token>,<token>…]` with tokens `cid`,
        /// `zstr[:deflate|deflate-raw|gzip]`, `encrypt:<keyfile>`.
        #[arg(required = true)]
        entries: Vec<String>,
    },
    /// Reads a container back out.
    Read {
        /// Source container path.
        #[arg(long)]
        src: PathBuf,
        /// Output directory for `--mode stream`.
        #[arg(long)]
        out: Option<PathBuf>,
        /// What to emit.
        #[arg(long, value_enum, default_value = "stream")]
        mode: Mode,
        /// Directory of `*.key` files for encrypted streams.
        #[arg(long)]
        key_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Decode each stream into `<out>/stream-<id>`.
    Stream,
    /// Print manifest records as JSON lines.
    Manifest,
    /// Print raw frame records.
    Qrec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EncoderToken {
    Cid,
    ZStr(ZCodec),
    Encrypt(PathBuf),
}

impl FromStr for EncoderToken {
    type Err = anyhow::Error;

    fn from_str(token: &str) -> Result<Self> {
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };
        match (name, arg) {
            ("cid", None) => Ok(Self::Cid),
            ("zstr", None) => Ok(Self::ZStr(ZCodec::default())),
            ("zstr", Some(codec)) => Ok(Self::ZStr(
                codec.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            )),
            ("encrypt", Some(keyfile)) if !keyfile.is_empty() => {
                Ok(Self::Encrypt(PathBuf::from(keyfile)))
            }
            ("encrypt", _) => bail!("encrypt token needs a key file: encrypt:<keyfile>"),
            _ => bail!("unknown encoder token {token:?}"),
        }
    }
}

/// Splits `<file>[:<token>,…]`; the first `:` separates the path from the
/// token list.
fn parse_entry_spec(spec: &str) -> Result<(PathBuf, Vec<EncoderToken>)> {
    let (path, tokens) = match spec.split_once(':') {
        Some((path, tokens)) => (path, tokens),
        None => (spec, ""),
    };
    if path.is_empty() {
        bail!("entry spec {spec:?} has no file path");
    }
    let tokens = tokens
        .split(',')
        .filter(|t| !t.is_empty())
        .map(EncoderToken::from_str)
        .collect::<Result<Vec<_>>>()?;
    Ok((PathBuf::from(path), tokens))
}

async fn run_write(out: &Path, specs: &[String]) -> Result<()> {
    let sink = tokio::fs::File::create(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    let mut writer = QsfWriter::new(sink);

    for spec in specs {
        let (path, tokens) = parse_entry_spec(spec)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let mut entry = WriteEntry::new(EntrySource::from_reader(file));
        for token in tokens {
            entry = match token {
                EncoderToken::Cid => entry.encoder(cid()),
                EncoderToken::ZStr(codec) => entry.encoder(zstr(codec)),
                EncoderToken::Encrypt(keyfile) => {
                    let key = load_or_generate(&keyfile)
                        .with_context(|| format!("loading key {}", keyfile.display()))?;
                    entry.encoder(AesGcmEncoder::new(key))
                }
            };
        }
        let record = writer
            .write_entry(entry)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(
            stream_id = record.stream_id.value(),
            length = record.length,
            file = %path.display(),
            "stream written"
        );
    }

    writer.finish().await.context("finishing container")?;
    Ok(())
}

async fn reader_for(src: &Path, key_dir: Option<&Path>) -> Result<QsfReader> {
    let file = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("opening {}", src.display()))?;
    let mut options = ReaderOptions::new();
    if let Some(dir) = key_dir {
        let mut factory = AesGcmFactory::new();
        for key in KeyStore::new(dir).load_all().context("loading key dir")? {
            factory = factory.with_key(key);
        }
        tracing::debug!(keys = factory.len(), dir = %dir.display(), "key ring loaded");
        options = options.decoder(factory);
    }
    Ok(QsfReader::with_options(file, options))
}

async fn run_read_stream(src: &Path, out: &Path, key_dir: Option<&Path>) -> Result<()> {
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    let mut reader = reader_for(src, key_dir).await?;

    while let Some(event) = reader.next().await {
        match event.context("reading container")? {
            StreamEvent::Begin(begin) => {
                let id = begin.stream_id.value();
                let target = out.join(format!("stream-{id}"));
                let mut file = tokio::fs::File::create(&target)
                    .await
                    .with_context(|| format!("creating {}", target.display()))?;
                let mut plain = begin
                    .decode()
                    .with_context(|| format!("resolving decoders for stream {id}"))?;
                while let Some(chunk) = plain.next().await {
                    let chunk = chunk.with_context(|| format!("decoding stream {id}"))?;
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                tracing::info!(stream_id = id, target = %target.display(), "stream extracted");
            }
            StreamEvent::End(end) => {
                tracing::debug!(stream_id = end.stream_id.value(), length = end.length, "stream closed");
            }
        }
    }
    Ok(())
}

async fn run_read_manifest(src: &Path, key_dir: Option<&Path>) -> Result<()> {
    let mut reader = reader_for(src, key_dir).await?;
    while let Some(event) = reader.next().await {
        let record = match event.context("reading container")? {
            StreamEvent::Begin(begin) => ManifestRecord::Config(StreamConfigRecord {
                stream_id: begin.stream_id,
                combine_id: begin.combine_id.clone(),
                filters: begin.filters.clone(),
            }),
            StreamEvent::End(end) => ManifestRecord::Result(end),
        };
        println!("{}", serde_json::to_string(&record.to_value()?)?);
    }
    Ok(())
}

async fn run_read_qrec(src: &Path) -> Result<()> {
    let bytes = tokio::fs::read(src)
        .await
        .with_context(|| format!("reading {}", src.display()))?;
    for item in frame::iter_frames(&bytes) {
        let (frame, offset) = item.context("malformed frame")?;
        println!(
            "{}",
            serde_json::json!({
                "offset": offset,
                "type": frame.frame_type,
                "kind": frame.kind().map(|k| format!("{k:?}")),
                "streamId": frame.stream_id,
                "length": frame.payload.len(),
            })
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qsf=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Write { out, entries } => run_write(&out, &entries).await,
        Command::Read {
            src,
            out,
            mode,
            key_dir,
        } => match mode {
            Mode::Stream => {
                let Some(out) = out.as_deref() else {
                    bail!("--mode stream needs --out <dir>");
                };
                run_read_stream(&src, out, key_dir.as_deref()).await
            }
            Mode::Manifest => run_read_manifest(&src, key_dir.as_deref()).await,
            Mode::Qrec => run_read_qrec(&src).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_spec() {
        let (path, tokens) = parse_entry_spec("report.pdf:cid,zstr:gzip,encrypt:doc.key")
            .expect("parses");
        assert_eq!(path, PathBuf::from("report.pdf"));
        assert_eq!(
            tokens,
            vec![
                EncoderToken::Cid,
                EncoderToken::ZStr(ZCodec::Gzip),
                EncoderToken::Encrypt(PathBuf::from("doc.key")),
            ]
        );
    }

    #[test]
    fn test_parse_entry_spec_without_tokens() {
        let (path, tokens) = parse_entry_spec("notes.txt").expect("parses");
        assert_eq!(path, PathBuf::from("notes.txt"));
        assert!(tokens.is_empty());

        let (_, tokens) = parse_entry_spec("notes.txt:").expect("parses");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_parse_zstr_defaults_to_deflate() {
        let (_, tokens) = parse_entry_spec("a:zstr").expect("parses");
        assert_eq!(tokens, vec![EncoderToken::ZStr(ZCodec::Deflate)]);
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert!(parse_entry_spec("a:rot13").is_err());
        assert!(parse_entry_spec("a:encrypt").is_err());
        assert!(parse_entry_spec("a:zstr:zstd").is_err());
        assert!(parse_entry_spec(":cid").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "qsf", "write", "--out", "bundle.qsf", "a.txt:cid", "b.txt",
        ])
        .expect("parses");
        assert!(matches!(cli.command, Command::Write { .. }));

        let cli = Cli::try_parse_from([
            "qsf", "read", "--src", "bundle.qsf", "--mode", "manifest",
        ])
        .expect("parses");
        let Command::Read { mode, out, .. } = cli.command else {
            panic!("expected read command");
        };
        assert_eq!(mode, Mode::Manifest);
        assert!(out.is_none());
    }
}

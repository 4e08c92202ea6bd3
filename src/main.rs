use std::io;
use std::path::Path;
use std::pin::Pin;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use streamnorm::config::{load_config, AppConfig};
use streamnorm::observability::{init_tracing, log_stream_complete};
use streamnorm::stream::{normalize, ResponseSource, StreamTranscript};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const READ_CHUNK_BYTES: usize = 16 * 1024;

const USAGE: &str = "Usage: streamnorm [--config PATH] [INPUT]

Reads an SSE capture (or one JSON response object) from INPUT or stdin and
writes one normalized event per line to stdout.";

type Input = Pin<Box<dyn AsyncRead + Send>>;

struct CliArgs {
    config_path: Option<String>,
    input_path: Option<String>,
}

fn main() {
    let args = parse_args(std::env::args().skip(1)).unwrap_or_else(|msg| {
        eprintln!("{msg}");
        eprintln!("{USAGE}");
        std::process::exit(2);
    });

    let config = resolve_config(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let exit_code = runtime.block_on(async move {
        match run(&config, args.input_path.as_deref()).await {
            Ok(transcript) if transcript.error.is_some() => 1,
            Ok(_) => 0,
            Err(err) => {
                eprintln!("{err}");
                1
            }
        }
    });
    std::process::exit(exit_code);
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs {
        config_path: None,
        input_path: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "--config" => {
                let path = args.next().ok_or("--config requires a path")?;
                parsed.config_path = Some(path);
            }
            _ if arg.starts_with("--config=") => {
                parsed.config_path = arg.strip_prefix("--config=").map(str::to_string);
            }
            _ if arg.starts_with("--") => return Err(format!("Unknown option: {arg}")),
            _ if parsed.input_path.is_none() => parsed.input_path = Some(arg),
            _ => return Err(format!("Unexpected argument: {arg}")),
        }
    }
    Ok(parsed)
}

fn resolve_config(explicit: Option<&str>) -> Result<AppConfig, String> {
    match explicit {
        Some(path) => load_config(path).map_err(|e| e.to_string()),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_config(DEFAULT_CONFIG_PATH).map_err(|e| e.to_string())
        }
        None => Ok(AppConfig::default()),
    }
}

async fn open_input(path: Option<&str>) -> io::Result<Input> {
    match path {
        None | Some("-") => Ok(Box::pin(tokio::io::stdin())),
        Some(path) => Ok(Box::pin(tokio::fs::File::open(path).await?)),
    }
}

fn read_chunks(input: Input) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures_util::stream::unfold(Some(input), |input| async move {
        let mut input = input?;
        let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);
        match input.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(input))),
            Err(err) => Some((Err(err), None)),
        }
    })
}

/// Pick the source from the first bytes: a leading `{` means one complete
/// JSON object, anything else is streamed as SSE.
async fn build_source(input: Input) -> io::Result<ResponseSource> {
    let mut chunks = Box::pin(read_chunks(input));
    let mut head = BytesMut::new();
    let first_byte = loop {
        match chunks.next().await {
            Some(chunk) => {
                head.extend_from_slice(&chunk?);
                if let Some(&byte) = head.iter().find(|byte| !byte.is_ascii_whitespace()) {
                    break Some(byte);
                }
            }
            None => break None,
        }
    };

    match first_byte {
        None => Ok(ResponseSource::Empty),
        Some(b'{') => {
            while let Some(chunk) = chunks.next().await {
                head.extend_from_slice(&chunk?);
            }
            ResponseSource::from_body(head.freeze())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
        }
        Some(_) => {
            let head = futures_util::stream::once(async move { Ok(head.freeze()) });
            Ok(ResponseSource::sse(head.chain(chunks)))
        }
    }
}

async fn run(config: &AppConfig, input_path: Option<&str>) -> Result<StreamTranscript, String> {
    let start_time = Instant::now();
    let input = open_input(input_path)
        .await
        .map_err(|e| format!("Failed to open input: {e}"))?;
    let source = build_source(input)
        .await
        .map_err(|e| format!("Failed to read input: {e}"))?;
    let mut events = normalize(source, &config.normalizer).map_err(|e| e.to_string())?;

    let mut stdout = tokio::io::stdout();
    let mut transcript = StreamTranscript::default();
    let mut line = Vec::with_capacity(256);
    while let Some(event) = events.next().await {
        transcript.push(&event);
        line.clear();
        serde_json::to_writer(&mut line, &event).map_err(|e| e.to_string())?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .map_err(|e| format!("Failed to write output: {e}"))?;
    }
    stdout
        .flush()
        .await
        .map_err(|e| format!("Failed to write output: {e}"))?;

    log_stream_complete(
        transcript.finish_reason.as_ref(),
        &transcript.usage,
        start_time,
    );
    Ok(transcript)
}

use serde::Deserialize;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use turbo_autoload::autoload::{self, AutoloadGenerator, GeneratorConfig};
use turbo_autoload::Package;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_extensions() -> Vec<String> {
    ["php", "inc", "hh"].map(String::from).to_vec()
}

#[derive(Debug, Deserialize)]
struct Input {
    command: String,

    // dump
    #[serde(default)]
    config: GeneratorConfig,
    #[serde(default)]
    root: Option<Package>,
    #[serde(default)]
    packages: Vec<Package>,
    #[serde(default)]
    dev_package_names: Option<Vec<String>>,

    // scan
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default = "default_extensions")]
    extensions: Vec<String>,
    #[serde(default)]
    base_dir: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    let body = serde_json::json!({ "error": message.to_string() });
    print!("{body}");
    std::process::exit(1);
}

fn run(input: Input) -> turbo_autoload::Result<serde_json::Value> {
    let value = match input.command.as_str() {
        "dump" => {
            let root = input.root.unwrap_or_else(|| Package::new("__root__"));
            let report = AutoloadGenerator::new(input.config).generate(
                &root,
                &input.packages,
                input.dev_package_names.as_deref(),
            )?;
            serde_json::to_value(report)
        }
        "scan" => {
            let base_dir = input.base_dir.unwrap_or_else(|| PathBuf::from("."));
            let report =
                autoload::scan_paths(&input.paths, &input.exclude, &input.extensions, &base_dir)?;
            serde_json::to_value(report)
        }
        other => fail(format!("unknown command: {other}")),
    };
    Ok(value.unwrap_or_else(|e| fail(format!("failed to serialise output: {e}"))))
}

fn main() {
    let total_start = std::time::Instant::now();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("turbo-autoload {}", VERSION);
        return;
    }

    init_tracing();

    let stdin_start = std::time::Instant::now();
    let mut buf = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buf) {
        fail(format!("failed to read stdin: {e}"));
    }
    let stdin_ms = stdin_start.elapsed().as_millis();

    let parse_start = std::time::Instant::now();
    let input: Input = match serde_json::from_str(&buf) {
        Ok(input) => input,
        Err(e) => fail(format!("failed to parse input JSON: {e}")),
    };
    let json_parse_ms = parse_start.elapsed().as_millis();

    let command_start = std::time::Instant::now();
    let mut output = match run(input) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{e}");
            fail(e);
        }
    };
    let command_ms = command_start.elapsed().as_millis();

    if let Some(stats) = output.get_mut("stats").and_then(|s| s.as_object_mut()) {
        stats.insert("stdin_read_ms".to_string(), serde_json::json!(stdin_ms));
        stats.insert("json_parse_ms".to_string(), serde_json::json!(json_parse_ms));
        stats.insert("command_ms".to_string(), serde_json::json!(command_ms));
    }

    let serialize_start = std::time::Instant::now();
    let json = match serde_json::to_string(&output) {
        Ok(json) => json,
        Err(e) => fail(format!("failed to serialise output: {e}")),
    };
    let serialize_ms = serialize_start.elapsed().as_millis();

    tracing::info!(
        total_ms = total_start.elapsed().as_millis() as u64,
        stdin_ms = stdin_ms as u64,
        json_parse_ms = json_parse_ms as u64,
        command_ms = command_ms as u64,
        json_serialize_ms = serialize_ms as u64,
        "done"
    );

    print!("{json}");
}

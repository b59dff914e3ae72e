mod app;

use std::path::PathBuf;

use app::cli;
use live_transcoder::{TaskObservers, Transcoder, TranscoderConfig};

fn main() {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "live_transcoder=info,transcode=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = match take_config_path(&mut args) {
        Some(path) => match TranscoderConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[ERROR]: Failed to load {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => TranscoderConfig::default(),
    };

    let (observers, events) = TaskObservers::channel();
    let transcoder = Transcoder::new(config).with_observers(observers);

    let code = cli::run_cli(&transcoder, &events, args);
    std::process::exit(code);
}

fn take_config_path(args: &mut Vec<String>) -> Option<PathBuf> {
    let position = args.iter().position(|arg| arg == "--config")?;
    args.remove(position);
    if position < args.len() {
        Some(PathBuf::from(args.remove(position)))
    } else {
        None
    }
}

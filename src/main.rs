use log::{error, info, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use rust_video_harvester::app_state::AppState;
use rust_video_harvester::config::Config;
use rust_video_harvester::crawler::Harvester;
use std::path::Path;
use std::process::ExitCode;

const LOG_CONFIG: &str = "log4rs.yml";
const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}";

fn init_logging() {
    if Path::new(LOG_CONFIG).exists() {
        match log4rs::init_file(LOG_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to load {}: {}, logging to console", LOG_CONFIG, e),
        }
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Invalid logging config: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let state = match AppState::from_config(cfg) {
        Ok(state) => state,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if state.config.crawl.full_crawl {
        info!("Full crawl: artifact contents will not filter discovery");
    }

    let harvester = Harvester::from_state(&state);
    let results = harvester.run_all(&state.config.data_types).await;

    for (name, result) in &results {
        match result {
            Ok(report) => {
                info!(
                    "{}: {} discovered, {} skipped, {} fetched, {} failed, {} entries",
                    name,
                    report.discovered,
                    report.already_processed,
                    report.fetched,
                    report.failed,
                    report.total_entries
                );
                if let Some(assets) = &report.assets {
                    info!(
                        "{} covers: {} downloaded, {} present, {} failed",
                        name, assets.downloaded, assets.skipped, assets.failed
                    );
                }
            }
            Err(e) => warn!("{} skipped: {}", name, e),
        }
    }

    log::debug!("Source metrics: {}", state.metrics.export_json());
    ExitCode::SUCCESS
}

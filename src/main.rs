use std::io::{self, BufWriter};
use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info};

use evtxcarve::filter::FilterCriteria;
use evtxcarve::output::{self, SinkKind};
use evtxcarve::pipeline::{self, CarveOptions, DispatchMode, RecordDispatcher};
use evtxcarve::{cli, config, logging};

fn main() -> Result<ExitCode> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.debug, cli_opts.log_json);

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    info!("config_hash={}", loaded.config_hash);
    let mut cfg = loaded.config;
    cli_opts.apply_to(&mut cfg);

    let filter = FilterCriteria::from_config(&cfg.filters)?;
    let mode = if cli_opts.stats {
        DispatchMode::Stats
    } else if cfg.output.kind != SinkKind::None {
        DispatchMode::Forward
    } else {
        DispatchMode::Print {
            timestamp: cli_opts.timestamp,
        }
    };

    let stdout = BufWriter::new(io::stdout().lock());
    let mut dispatcher = RecordDispatcher::new(filter, mode, stdout);
    if mode == DispatchMode::Forward {
        dispatcher = dispatcher.with_sink(output::build_sink(&cfg.output));
    }

    let carve_opts = CarveOptions {
        offset: cfg.carve.offset,
        limit: cfg.carve.limit,
        queue_capacity: cfg.carve.queue_capacity,
    };

    let mut processed = 0usize;
    for path in &cli_opts.files {
        let outcome = if cli_opts.header {
            pipeline::print_header(path, dispatcher.out())
        } else if cli_opts.carve {
            pipeline::carve_file(path, &carve_opts, &mut dispatcher).map(|summary| {
                info!(path = %path.display(), ?summary, "carved");
            })
        } else {
            pipeline::dump_file(path, &mut dispatcher).map(|summary| {
                info!(path = %path.display(), ?summary, "dumped");
            })
        };
        match outcome {
            Ok(()) => processed += 1,
            Err(err) => error!(path = %path.display(), "{err:#}"),
        }
    }

    dispatcher.finish()?;
    info!(processed, inputs = cli_opts.files.len(), "evtxcarve run finished");
    Ok(if processed == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

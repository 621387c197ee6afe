use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use ferrite_corpus::{
    init_tracing, CacheStore, DataSource, GraphSpec, ImageSource, NameContext, PipelineConfig,
    PipelineError, RasterDecoder, Result, StageGraph,
};

const USAGE: &str = "usage: ferrite-corpus <pipeline.json> [graph.json]";

// Opens the configured corpus and logs how it was partitioned. With a graph
// description, also builds the graph, which computes normalization
// statistics and restores any checkpointed parameters.
fn main() -> ExitCode {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let graph_path = args.next();

    match run(&config_path, graph_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str, graph_path: Option<&str>) -> Result<()> {
    let config = PipelineConfig::load_json(config_path)?;
    let source = ImageSource::open(&config.source, Arc::new(RasterDecoder::default()))?;

    let index = source.index();
    for (name, count) in index.class_names().iter().zip(index.class_counts()) {
        info!(class = %name, files = count, "class");
    }
    info!(
        method = ?source.load_method(),
        batches = source.num_batches(),
        batch_size = source.batch_size(),
        held_out = index.test_set_size(),
        shape = ?source.image_shape(),
        "corpus partitioned"
    );

    let Some(graph_path) = graph_path else {
        return Ok(());
    };
    let spec = GraphSpec::load_json(graph_path)?;
    if let Some(dir) = &config.weights_dir {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::Io { path: dir.clone(), source: e })?;
    }
    let cache = CacheStore::from_option(config.weights_dir.clone());
    let graph = StageGraph::build(&spec, &source, cache, &mut NameContext::new())?;
    info!(parameters = graph.num_parameters(), "graph ready");
    Ok(())
}

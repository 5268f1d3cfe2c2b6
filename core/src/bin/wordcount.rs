use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use spillmr_common::{JobConfig, ScratchDir, SystemTempFiles, TempFileProvider};
use spillmr_core::{
    HashPartitioner, LocalJob, MapRuntime, MapTask, ReduceRuntime, ReduceTask, Result,
    SumCombiner,
};

#[derive(Parser, Debug)]
#[command(name = "wordcount", version, about = "Count words with the spillmr store")]
struct Args {
    /// Input text files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output prefix; partition files are named <output><n>_of_<total>.
    #[arg(long, short)]
    output: PathBuf,

    /// JSON job config. Command line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    partitions: Option<u32>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    no_combine: bool,

    /// Shared directory for intermediate files. Defaults to a fresh private
    /// scratch dir.
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

struct WordCountMap;

impl MapTask for WordCountMap {
    type InputKey = String;
    type InputValue = String;
    type Key = String;
    type Value = u64;

    fn process(
        &self,
        runtime: &mut MapRuntime<'_, String, u64>,
        _source: String,
        line: String,
    ) -> Result<()> {
        for word in line
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            runtime.emit_intermediate(word.to_lowercase(), 1)?;
        }
        Ok(())
    }
}

struct WordCountReduce;

impl ReduceTask<String, u64> for WordCountReduce {
    type OutputKey = String;
    type OutputValue = u64;

    fn process(
        &self,
        runtime: &mut ReduceRuntime<'_, String, u64>,
        word: &String,
        counts: &[u64],
    ) -> Result<()> {
        runtime.emit(word.clone(), counts.iter().sum())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => JobConfig::from_json_file(path)?,
        None => JobConfig::default(),
    };
    if let Some(partitions) = args.partitions {
        config.num_partitions = partitions;
    }
    if let Some(workers) = args.workers {
        config.num_map_workers = workers;
    }
    if args.no_combine {
        config.combine = false;
    }
    config.output_base = Some(args.output.clone());

    let temp_files: Arc<dyn TempFileProvider> = match &args.temp_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            Arc::new(SystemTempFiles::in_dir(dir))
        }
        None => Arc::new(ScratchDir::new()?),
    };

    let mut input = Vec::new();
    for path in &args.inputs {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let source = path.display().to_string();
        input.extend(text.lines().map(|line| (source.clone(), line.to_string())));
    }

    let partitioner = HashPartitioner::new(config.num_partitions);
    let job = LocalJob::new(config, WordCountMap, WordCountReduce, partitioner, temp_files)?
        .with_combiner(SumCombiner::<u64>::new());
    let stats = job.run_to_files(input)?;

    info!(
        "Counted {} distinct words from {} lines",
        stats.reduce_keys, stats.input_records
    );
    for file in &stats.output_files {
        println!("{}", file.display());
    }
    Ok(())
}

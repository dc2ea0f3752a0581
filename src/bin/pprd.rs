use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use personaprd::{
    config::{self, PipelineConfig},
    display::viz::ScatterPlot,
    pprd::{
        artifacts::ArtifactStore,
        diagnostics::INTERPRETATION_GUIDE,
        embeddings::{SentenceEmbedder, SentenceEmbeddingsModelType},
        model::ClusterCount,
        pipeline::{Pipeline, draft_prd, rediagnose},
        report::MarkdownAssembler,
        summarize::GeminiClient,
    },
};
use tch::Device;
use tracing_subscriber::{EnvFilter, fmt};

/// pprd: Reddit pain points to PRD drafts
#[derive(Parser)]
#[command(name = "pprd")]
#[command(about = "Cluster Reddit posts into pain points and draft a PRD from them", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file. Defaults to ~/.config/personaprd/config.toml if present.
    #[arg(short, long, global = true, env = "PPRD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which dataset, for which persona.
#[derive(Args)]
struct Target {
    /// Persona the dataset was collected for, e.g. "vibecoding".
    #[arg(short, long)]
    persona: String,

    /// JSON array of Reddit submissions.
    #[arg(short, long)]
    dataset: PathBuf,

    /// Root of the artifact tree. Overrides the config file.
    #[arg(short, long)]
    output_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean, embed, cluster, diagnose, plot and summarise a dataset.
    Run {
        #[command(flatten)]
        target: Target,

        /// Number of clusters.
        #[arg(short)]
        k: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(short, long, value_enum)]
        model: Option<SentenceEmbeddingsModelType>,

        /// Skip the LLM summaries.
        #[arg(long)]
        no_summaries: bool,
    },

    /// Draft a PRD from the summaries of an earlier run.
    Prd {
        #[command(flatten)]
        target: Target,

        /// Comma-separated cluster numbers, as shown in the summaries (1-based).
        #[arg(short, long)]
        select: String,

        /// Display name for the persona in the PRD. Defaults to --persona.
        #[arg(long)]
        persona_name: Option<String>,
    },

    /// Recompute diagnostics from cached embeddings and the saved assignment.
    Diagnose {
        #[command(flatten)]
        target: Target,

        /// Cluster count of the run being checked. Defaults to the saved one.
        #[arg(short)]
        k: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            target,
            k,
            seed,
            model,
            no_summaries,
        } => {
            apply_overrides(&mut config, &target, k)?;
            config.seed = seed.unwrap_or(config.seed);
            config.model = model.unwrap_or(config.model);
            handle_run(&config, &target, no_summaries)
        }
        Commands::Prd {
            target,
            select,
            persona_name,
        } => {
            apply_overrides(&mut config, &target, None)?;
            let persona_name = persona_name.unwrap_or_else(|| target.persona.clone());
            handle_prd(&config, &target, &select, &persona_name)
        }
        Commands::Diagnose { target, k } => {
            apply_overrides(&mut config, &target, None)?;
            handle_diagnose(&config, &target, k)
        }
    }
}

fn apply_overrides(config: &mut PipelineConfig, target: &Target, k: Option<usize>) -> Result<()> {
    if let Some(k) = k {
        config.n_clusters = ClusterCount::try_new(k)?;
    }
    if let Some(root) = &target.output_root {
        config.output_root = Some(root.clone());
    }
    Ok(())
}

fn open_store(config: &PipelineConfig, target: &Target) -> Result<ArtifactStore> {
    ArtifactStore::open(&config.output_root()?, &target.persona, &target.dataset)
}

fn handle_run(config: &PipelineConfig, target: &Target, no_summaries: bool) -> Result<()> {
    let embedder = SentenceEmbedder::new(config.model, Device::cuda_if_available())?;
    let visualizer = ScatterPlot::default()
        .with_caption(format!("{} pain point clusters", target.persona));
    let llm = if no_summaries {
        None
    } else {
        Some(GeminiClient::from_env(&config.llm_model)?)
    };

    let mut pipeline = Pipeline::new(config, &embedder, &visualizer);
    if let Some(llm) = &llm {
        pipeline = pipeline.with_llm(llm);
    }
    let output = pipeline.run(&target.persona, &target.dataset)?;

    println!("{}", output.assignment);
    println!("{}\n", output.diagnostics);
    println!("{}\n", INTERPRETATION_GUIDE);
    if let Some(summaries) = &output.summaries {
        for s in summaries.iter() {
            println!(
                "Cluster {} ({} posts): {}\n",
                s.cluster_label.display_id(),
                s.num_posts,
                s.summary_text
            );
        }
    }
    println!("Artifacts in {}", output.store.dir().display());
    Ok(())
}

fn handle_prd(
    config: &PipelineConfig,
    target: &Target,
    selection: &str,
    persona_name: &str,
) -> Result<()> {
    let store = open_store(config, target)?;
    let llm = GeminiClient::from_env(&config.llm_model)?;
    let (doc, written) = draft_prd(&store, &llm, &MarkdownAssembler::new()?, persona_name, selection)
        .with_context(|| format!("drafting PRD for {}", target.persona))?;

    println!("{} ({} posts)", doc.title, doc.num_posts);
    for path in written {
        println!("wrote {}", display_path(&path));
    }
    Ok(())
}

fn handle_diagnose(config: &PipelineConfig, target: &Target, k: Option<usize>) -> Result<()> {
    let store = open_store(config, target)?;
    let diagnostics = rediagnose(&store, k)?;
    println!("{}\n", diagnostics);
    println!("{}", INTERPRETATION_GUIDE);
    Ok(())
}

fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

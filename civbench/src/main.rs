//! civbench CLI

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use civbench::{
    analysis::AnalysisSummary,
    assignments::{Assignment, AssignmentStore},
    collector::{plan_units, CollectionSettings, Collector, Response, ResponseStore},
    config::{Config, ModelTarget},
    grading::{GradeStore, Grader},
    log::{load_grade_table, GradeLog},
    providers::{create_providers_with_config, ProviderRegistry},
    reporting::{print_console_report, JsonSummary},
    runner::{ConsoleProgress, Executor, ExecutorConfig},
};

#[derive(Parser)]
#[command(name = "civbench")]
#[command(about = "Civil-engineering homework benchmark for vision LLMs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Default)]
struct CollectArgs {
    /// Comma-separated model ids (default: all configured)
    #[arg(short, long)]
    models: Option<String>,

    /// Comma-separated assignment numbers (default: all configured)
    #[arg(short, long)]
    assignments: Option<String>,

    /// Trials per model and assignment
    #[arg(short, long)]
    trials: Option<u32>,

    /// Re-request targets that already have a successful response
    #[arg(long)]
    force: bool,
}

#[derive(clap::Args, Default)]
struct GradeArgs {
    /// Gradings per response
    #[arg(short, long)]
    grades: Option<u32>,

    /// Grade with this sampling temperature (opts into randomized grading)
    #[arg(long)]
    grader_temperature: Option<f32>,

    /// Grading model id
    #[arg(long)]
    grader_model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send assignments to the models under test and store their answers
    Collect(CollectArgs),

    /// Grade stored responses and append the results to the grade log
    Grade(GradeArgs),

    /// Collect, then grade what was collected
    Run {
        #[command(flatten)]
        collect: CollectArgs,

        #[command(flatten)]
        grade: GradeArgs,
    },

    /// Summarize the grade log
    Analyze {
        /// Grade log path (default: <results_dir>/grades.jsonl)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the JSON summary (default: <results_dir>/summary.json)
        #[arg(long)]
        json: Option<PathBuf>,

        /// Only include grades from this grading model
        #[arg(long)]
        grader: Option<String>,
    },

    /// List assignments found in the images directory
    ListAssignments,

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/civbench.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "civbench=debug,info"
    } else {
        "civbench=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output.clone());
    }

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect(args) => {
            apply_collect_args(&mut config, &args)?;
            let providers = create_providers_with_config(&config);
            collect(&config, providers, args.force).await?;
        }

        Commands::Grade(args) => {
            apply_grade_args(&mut config, &args)?;
            let providers = create_providers_with_config(&config);
            let responses = ResponseStore::new(&config.paths.responses_dir).load_all()?;
            grade(&config, &providers, responses).await?;
        }

        Commands::Run { collect: c, grade: g } => {
            apply_collect_args(&mut config, &c)?;
            apply_grade_args(&mut config, &g)?;
            let providers = create_providers_with_config(&config);
            let responses = collect(&config, providers.clone(), c.force).await?;
            grade(&config, &providers, responses).await?;
        }

        Commands::Analyze { input, json, grader } => {
            analyze(&config, input, json, grader)?;
        }

        Commands::ListAssignments => {
            list_assignments(&config)?;
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn parse_list<T: std::str::FromStr>(raw: &str, what: &str) -> Result<Vec<T>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|_| format!("invalid {}: {}", what, s)))
        .collect()
}

fn apply_collect_args(config: &mut Config, args: &CollectArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(models) = &args.models {
        let known = config.collection.models.clone();
        config.collection.models = parse_list::<String>(models, "model")?
            .into_iter()
            .map(|model| {
                known
                    .iter()
                    .find(|t| t.model == model)
                    .cloned()
                    .unwrap_or_else(|| ModelTarget::new("openrouter", model))
            })
            .collect();
    }
    if let Some(assignments) = &args.assignments {
        config.collection.assignments = parse_list(assignments, "assignment number")?;
    }
    if let Some(trials) = args.trials {
        config.collection.trials = trials;
    }
    config.validate()?;
    Ok(())
}

fn apply_grade_args(config: &mut Config, args: &GradeArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(grades) = args.grades {
        config.grading.grades_per_response = grades;
    }
    if let Some(model) = &args.grader_model {
        config.grading.grader_model = model.clone();
    }
    if let Some(temperature) = args.grader_temperature {
        config.grading = config.grading.clone().randomized(temperature);
    }
    config.validate()?;
    Ok(())
}

/// Load the requested assignments, skipping (and reporting) any that fail
fn load_assignments(config: &Config, numbers: &[u32]) -> BTreeMap<u32, Arc<Assignment>> {
    let store = AssignmentStore::new(&config.paths.images_dir, &config.paths.ground_truth_dir);
    let mut loaded = BTreeMap::new();
    for &number in numbers {
        match store.load(number) {
            Ok(assignment) => {
                loaded.insert(number, Arc::new(assignment));
            }
            Err(e) => {
                tracing::warn!("Skipping assignment {}: {}", number, e);
                eprintln!("Skipping assignment {}: {}", number, e);
            }
        }
    }
    loaded
}

fn executor_for(config: &Config) -> Executor {
    Executor::new(ExecutorConfig::from(&config.runner)).with_progress(Arc::new(ConsoleProgress))
}

async fn collect(
    config: &Config,
    providers: ProviderRegistry,
    force: bool,
) -> Result<Vec<Response>, Box<dyn std::error::Error>> {
    if providers.is_empty() {
        return Err("No providers available. Set OPENROUTER_API_KEY or ANTHROPIC_API_KEY.".into());
    }

    let assignments = load_assignments(config, &config.collection.assignments);
    if assignments.is_empty() {
        return Err("No assignments could be loaded".into());
    }
    let assignment_list: Vec<Arc<Assignment>> = assignments.values().cloned().collect();

    let units = plan_units(&config.collection.models, &assignment_list, config.collection.trials);
    println!(
        "Collecting {} response(s): {} model(s) × {} assignment(s) × {} trial(s)",
        units.len(),
        config.collection.models.len(),
        assignment_list.len(),
        config.collection.trials
    );

    let settings = CollectionSettings {
        force,
        ..CollectionSettings::from(&config.collection)
    };
    let collector = Arc::new(Collector::new(
        providers,
        ResponseStore::new(&config.paths.responses_dir),
        settings,
    ));

    let (responses, summary) = executor_for(config).collect_all(collector, units).await;
    summary.print("Collection Summary");
    Ok(responses)
}

async fn grade(
    config: &Config,
    providers: &ProviderRegistry,
    responses: Vec<Response>,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = providers.get(&config.grading.provider).ok_or_else(|| {
        format!(
            "Grading provider {} is not available; check its API key",
            config.grading.provider
        )
    })?;

    let numbers: Vec<u32> = responses
        .iter()
        .map(|r| r.assignment)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let assignments = load_assignments(config, &numbers);

    println!(
        "Grading {} response(s) with {} (temperature {}, {} grading(s) each)",
        responses.len(),
        config.grading.grader_model,
        config.grading.temperature,
        config.grading.grades_per_response
    );

    let grader = Arc::new(
        Grader::new(provider, config.grading.clone())
            .with_detail_store(GradeStore::new(&config.paths.grades_dir)),
    );
    let log = GradeLog::open(config.paths.grade_log()).await?;
    let sender = log.sender();

    let summary = executor_for(config)
        .grade_all(grader, responses, &assignments, &sender)
        .await;
    drop(sender);

    let written = log.finish().await?;
    summary.print("Grading Summary");
    println!("Appended {} grade(s) to {}", written, config.paths.grade_log().display());
    println!("Grade details in {}", config.paths.grades_dir.display());
    Ok(())
}

fn analyze(
    config: &Config,
    input: Option<PathBuf>,
    json: Option<PathBuf>,
    grader: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = input.unwrap_or_else(|| config.paths.grade_log());
    let mut table = load_grade_table(&input)?;
    if let Some(grader) = grader {
        table = table.for_grader(&grader);
    }

    for line in &table.malformed {
        eprintln!("Malformed line {}: {}", line.line_number, line.error);
    }

    let summary = AnalysisSummary::from_table(&table);
    print_console_report(&summary);

    let json_path = json.unwrap_or_else(|| config.paths.results_dir.join("summary.json"));
    JsonSummary::from_analysis(&summary, input.display().to_string()).write_to_file(&json_path)?;
    println!("Summary written to {}", json_path.display());
    Ok(())
}

fn list_assignments(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = AssignmentStore::new(&config.paths.images_dir, &config.paths.ground_truth_dir);
    let numbers = store.available()?;

    println!("Assignments in {}:\n", store.images_dir().display());
    for number in numbers {
        match store.load(number) {
            Ok(assignment) => println!(
                "  {:>3}  {} image(s)  sub-questions: {}",
                number,
                assignment.images.len(),
                assignment.labels().join(", ")
            ),
            Err(e) => println!("  {:>3}  unusable: {}", number, e),
        }
    }
    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Config::default().save_toml(&output)?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use globtim_core::basis::{BasisKind, DegreeSpec};
use globtim_core::benchmarks::Benchmark;
use globtim_core::domain::RangeSpec;
use globtim_core::equation_engine::ExpressionObjective;
use globtim_core::pipeline::{run_pipeline, PipelineConfig, PipelineReport};
use globtim_core::profiling::{StageStats, StageTimer};
use globtim_core::traits::Objective;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::fmt::SubscriberBuilder;

#[derive(Parser)]
#[command(name = "globtim")]
#[command(about = "Polynomial approximation, critical points and valley walks")]
struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Run the full pipeline and print the report as JSON
    Run(RunArgs),
    /// List the built-in benchmark objectives
    Benchmarks,
}

#[derive(Clone, Copy, ValueEnum)]
enum BasisArg {
    Chebyshev,
    Legendre,
}

impl From<BasisArg> for BasisKind {
    fn from(arg: BasisArg) -> Self {
        match arg {
            BasisArg::Chebyshev => BasisKind::Chebyshev,
            BasisArg::Legendre => BasisKind::Legendre,
        }
    }
}

#[derive(Args, Default)]
struct RunArgs {
    /// JSON pipeline configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Named benchmark objective
    #[arg(long, conflicts_with = "expr")]
    benchmark: Option<String>,
    /// Objective expression in the variables x1..xn
    #[arg(long)]
    expr: Option<String>,
    #[arg(long)]
    dimension: Option<usize>,
    /// Total degree of the approximant
    #[arg(long)]
    degree: Option<usize>,
    /// Requested sample count
    #[arg(long)]
    samples: Option<usize>,
    #[arg(long, value_enum)]
    basis: Option<BasisArg>,
    /// Domain center, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    center: Option<Vec<f64>>,
    /// Half-width, one value or one per axis
    #[arg(long, value_delimiter = ',')]
    range: Option<Vec<f64>>,
    /// Maximum valley-walk steps
    #[arg(long)]
    n_steps: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunOutput {
    objective: String,
    config: PipelineConfig,
    report: PipelineReport,
    timings: BTreeMap<&'static str, StageStats>,
}

enum CliObjective {
    Benchmark(Benchmark),
    Expression(ExpressionObjective),
}

impl CliObjective {
    fn dimension(&self) -> usize {
        match self {
            CliObjective::Benchmark(b) => Objective::<f64>::dimension(b),
            CliObjective::Expression(e) => Objective::<f64>::dimension(e),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    SubscriberBuilder::default()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.action {
        Action::Run(args) => {
            let output = run(&args)?;
            let json = serde_json::to_string_pretty(&output)?;
            match &args.output {
                Some(path) => write_report(path, &json)?,
                None => println!("{json}"),
            }
            Ok(())
        }
        Action::Benchmarks => {
            for name in Benchmark::NAMES {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(dimension) = args.dimension {
        config.domain.dimension = dimension;
    }
    if let Some(degree) = args.degree {
        config.degree = DegreeSpec::Total(degree);
    }
    if let Some(samples) = args.samples {
        config.sampling.count = samples;
    }
    if let Some(basis) = args.basis {
        config.basis = basis.into();
    }
    if let Some(center) = &args.center {
        config.domain.center = center.clone();
    }
    if let Some(range) = &args.range {
        config.domain.range = match range.as_slice() {
            [r] => RangeSpec::Uniform(*r),
            rs => RangeSpec::PerAxis(rs.to_vec()),
        };
    }
    if let Some(n_steps) = args.n_steps {
        config.walk.n_steps = n_steps;
    }
    if let Some(seed) = args.seed {
        config.sampling.seed = seed;
        config.homotopy.seed = seed;
        config.walk.seed = seed;
    }
}

/// Fixed-dimension benchmarks decide the dimension; a center that no longer
/// fits and was not given explicitly is reset to the origin.
fn reconcile_dimension(config: &mut PipelineConfig, objective: &CliObjective, args: &RunArgs) {
    config.domain.dimension = objective.dimension();
    if args.center.is_none() && config.domain.center.len() != config.domain.dimension {
        config.domain.center = vec![0.0; config.domain.dimension];
    }
}

fn build_objective(args: &RunArgs, dimension: usize) -> Result<(String, CliObjective)> {
    match (&args.benchmark, &args.expr) {
        (Some(name), None) => {
            let benchmark = Benchmark::from_name(name, dimension)
                .with_context(|| format!("benchmark '{name}'"))?;
            Ok((name.clone(), CliObjective::Benchmark(benchmark)))
        }
        (None, Some(expr)) => {
            let objective = ExpressionObjective::new(expr, dimension)
                .with_context(|| format!("compiling expression '{expr}'"))?;
            Ok((expr.clone(), CliObjective::Expression(objective)))
        }
        (None, None) => bail!("one of --benchmark or --expr is required"),
        (Some(_), Some(_)) => bail!("--benchmark and --expr are mutually exclusive"),
    }
}

fn run(args: &RunArgs) -> Result<RunOutput> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, args);
    let (name, objective) = build_objective(args, config.domain.dimension)?;
    reconcile_dimension(&mut config, &objective, args);
    tracing::info!(objective = %name, dimension = config.domain.dimension, "run");

    let timer = StageTimer::new();
    let report = match &objective {
        CliObjective::Benchmark(b) => run_pipeline(b, &config, &timer),
        CliObjective::Expression(e) => run_pipeline(e, &config, &timer),
    }
    .context("pipeline failed")?;

    Ok(RunOutput {
        objective: name,
        config,
        report,
        timings: timer.summary(),
    })
}

fn write_report(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(cli: Cli) -> RunArgs {
        match cli.action {
            Action::Run(args) => args,
            Action::Benchmarks => panic!("expected run"),
        }
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "globtim",
            "-v",
            "run",
            "--benchmark",
            "himmelblau",
            "--degree",
            "12",
            "--basis",
            "legendre",
            "--center",
            "-1,2.5",
            "--range",
            "5",
        ])
        .expect("valid flags");
        assert!(cli.verbose);
        let args = run_args(cli);
        assert_eq!(args.benchmark.as_deref(), Some("himmelblau"));
        assert_eq!(args.center, Some(vec![-1.0, 2.5]));

        let mut config = PipelineConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.degree, DegreeSpec::Total(12));
        assert_eq!(config.basis, BasisKind::Legendre);
        assert_eq!(config.domain.range, RangeSpec::Uniform(5.0));
        assert_eq!(config.domain.center, vec![-1.0, 2.5]);
    }

    #[test]
    fn benchmark_and_expr_conflict() {
        let parsed = Cli::try_parse_from([
            "globtim",
            "run",
            "--benchmark",
            "himmelblau",
            "--expr",
            "x1^2",
        ]);
        assert!(parsed.is_err());
        assert!(build_objective(&RunArgs::default(), 2).is_err());
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"domain": {"dimension": 3, "center": [0, 0, 0], "range": [1, 2, 3]},
                "sampling": {"count": 50}, "walk": {"n_steps": 7}}"#,
        )
        .expect("write config");

        let mut config = load_config(Some(&path)).expect("config loads");
        assert_eq!(config.domain.dimension, 3);
        assert_eq!(config.sampling.count, 50);

        let args = RunArgs {
            samples: Some(80),
            range: Some(vec![2.0, 2.0, 1.0]),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.sampling.count, 80);
        assert_eq!(config.walk.n_steps, 7);
        assert_eq!(config.domain.range, RangeSpec::PerAxis(vec![2.0, 2.0, 1.0]));

        assert!(load_config(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn fixed_dimension_benchmark_resets_center() {
        let mut config = PipelineConfig::default();
        config.domain.dimension = 4;
        config.domain.center = vec![0.0; 4];
        let args = RunArgs {
            benchmark: Some("himmelblau".to_string()),
            ..Default::default()
        };
        let (_, objective) = build_objective(&args, 4).expect("benchmark");
        reconcile_dimension(&mut config, &objective, &args);
        assert_eq!(config.domain.dimension, 2);
        assert_eq!(config.domain.center, vec![0.0, 0.0]);
    }

    #[test]
    fn expression_run_writes_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("nested").join("report.json");
        let args = RunArgs {
            expr: Some("(x1 - 0.25)^2 + 3*(x2 + 0.5)^2".to_string()),
            degree: Some(4),
            samples: Some(64),
            output: Some(out.clone()),
            ..Default::default()
        };
        let output = run(&args).expect("pipeline runs");
        assert_eq!(output.report.critical_points.len(), 1);
        let point = &output.report.critical_points[0].coordinates;
        assert!((point[0] - 0.25).abs() < 1e-8);
        assert!((point[1] + 0.5).abs() < 1e-8);

        let json = serde_json::to_string_pretty(&output).expect("serializes");
        write_report(&out, &json).expect("report written");
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).expect("read back"))
                .expect("valid json");
        assert_eq!(parsed["report"]["walks"][0]["status"], "converged");
        assert!(parsed["timings"]["fit"]["calls"].as_u64() >= Some(1));
    }
}

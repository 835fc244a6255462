use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use arrow::array::RecordBatch;
use arrow::util::display::array_value_to_string;
use clap::{Parser, ValueEnum};
use clickstream_stats::{run, Query, QueryOutput, TableStore, Tier};
use tracing::error;

#[derive(Parser)]
#[command(name = "clickstream-stats")]
#[command(about = "Clickstream statistics over an eager or chunked dataset")]
struct Cli {
    /// Headerless TSV: coming_from, article, referrer_type, n
    #[arg(short, long, default_value = "data/clickstream_data.tsv")]
    data: PathBuf,

    /// Directory of the table store used by chunked top-links
    #[arg(short, long, default_value = "data/clickstream_store")]
    store: PathBuf,

    #[arg(short, long, value_enum, default_value = "chunked")]
    tier: TierArg,

    #[arg(short, long, value_enum, default_value = "top-links")]
    query: QueryArg,

    /// Article for visitors-clicked-link
    #[arg(short, long)]
    article: Option<String>,

    /// Number of timed runs
    #[arg(short, long, default_value = "1")]
    runs: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Eager,
    Chunked,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryArg {
    TopLinks,
    SummedArticles,
    VisitorsClickedLink,
    MostPopularArticles,
}

fn print_table(batch: &RecordBatch) {
    let schema = batch.schema();
    let header: Vec<String> = schema.fields().iter().map(|f| format!("{:<40}", f.name())).collect();
    println!("{}", header.join(" "));
    println!("{:-<100}", "");

    for row in 0..batch.num_rows() {
        let cells: Vec<String> = batch
            .columns()
            .iter()
            .map(|col| format!("{:<40}", array_value_to_string(col, row).unwrap_or_default()))
            .collect();
        println!("{}", cells.join(" "));
    }
    println!();
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let tier = match cli.tier {
        TierArg::Eager => Tier::Eager,
        TierArg::Chunked => Tier::Chunked,
    };
    let query = match cli.query {
        QueryArg::TopLinks => Query::TopLinks,
        QueryArg::SummedArticles => Query::SummedArticles,
        QueryArg::MostPopularArticles => Query::MostPopularArticles,
        QueryArg::VisitorsClickedLink => match cli.article {
            Some(article) => Query::VisitorsClickedLink { article },
            None => {
                eprintln!("--article is required for visitors-clicked-link");
                return ExitCode::FAILURE;
            }
        },
    };

    let store = match TableStore::open(&cli.store) {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Clickstream query: {:?} ({} tier)", query, tier);
    println!("Data path: {}", cli.data.display());
    println!();

    // Warmup run; its result and time are discarded
    if let Err(e) = run(&cli.data, tier, &query, Some(&store)) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let runs = cli.runs.max(1);
    let mut times = Vec::with_capacity(runs);
    let mut last = None;

    for _ in 0..runs {
        let start = Instant::now();
        // Each run reloads the dataset from scratch
        match run(&cli.data, tier, &query, Some(&store)) {
            Ok(output) => last = Some(output),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        times.push(start.elapsed().as_secs_f64() * 1000.0);
    }

    match last {
        Some(QueryOutput::Table(batch)) => print_table(&batch),
        Some(QueryOutput::Percentage(pct)) => println!("{:.2}%\n", pct),
        None => {}
    }

    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    println!("Duration ({} runs):", runs);
    println!("{:-<40}", "");
    println!("  Mean:   {:.2} ms", mean);
    println!("  Stddev: {:.2} ms", variance.sqrt());
    println!("  Min:    {:.2} ms", min);
    println!("  Max:    {:.2} ms", max);

    ExitCode::SUCCESS
}

//! Binary entry point: a headless summary of the store for operators. It
//! resolves settings, wires the analytics layer the same way the dashboard
//! does, prints the headline breakdowns and optionally writes an export.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mortality_dashboard::{
    build_export, AggregationResult, ConnectionManager, FilterSet, MortalityAnalytics,
    ReferenceDataCache, Settings, Sex,
};

#[derive(Parser)]
#[command(name = "mortality-dashboard")]
#[command(about = "Summarise the death-record store and optionally export the breakdowns")]
struct Args {
    /// Death year to narrow the breakdowns to
    #[arg(long)]
    year: Option<i32>,

    /// Death month (1-12)
    #[arg(long)]
    month: Option<u32>,

    /// Department code, e.g. 75, 2A or 974
    #[arg(long)]
    department: Option<String>,

    /// Sex: M/F or the INSEE codes 1/2
    #[arg(long)]
    sex: Option<Sex>,

    /// Write the JSON export to this path
    #[arg(long, value_name = "FILE", env = "MORTALITY_EXPORT_PATH")]
    export: Option<PathBuf>,
}

impl Args {
    fn filters(&self) -> Result<FilterSet> {
        let filters = FilterSet {
            year: self.year,
            month: self.month,
            department: self.department.as_ref().map(|code| code.to_ascii_uppercase()),
            sex: self.sex,
        };
        filters.validate()?;
        Ok(filters)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let filters = args.filters()?;
    let settings = Settings::from_env().context("failed to load settings")?;

    let connections =
        ConnectionManager::new(settings.db_path.clone()).with_retry_policy(settings.retry.clone());
    let mut analytics = MortalityAnalytics::new(connections);
    let population = &settings.population;
    if [&population.department, &population.age, &population.complete]
        .iter()
        .all(|path| path.is_file())
    {
        let cache = Arc::new(ReferenceDataCache::new(population.clone()));
        cache.preload().context("failed to load population reference data")?;
        analytics = analytics.with_population(cache);
    } else {
        warn!(dir = %settings.data_dir.display(), "population files missing, rates disabled");
    }

    let stats = analytics.store_stats().context("failed to read store statistics")?;
    println!(
        "{} records, {} departments, deaths from {} to {}",
        stats.total_records,
        stats.departments,
        stats.first_death_date.map_or("-".to_string(), |d| d.to_string()),
        stats.last_death_date.map_or("-".to_string(), |d| d.to_string()),
    );
    println!("filters: {filters}");

    let by_year = analytics.totals_by_year(&filters)?;
    let by_department = analytics.by_department(&filters)?;
    print_result("Deaths by year", &by_year);
    print_result("Deaths by department", &by_department);

    if let Some(path) = args.export {
        let document = build_export(
            &[("by_year", by_year), ("by_department", by_department)],
            &filters,
        );
        document
            .write_json(&path)
            .with_context(|| format!("failed to write export to {}", path.display()))?;
        println!("export written to {}", path.display());
    }

    Ok(())
}

fn print_result(title: &str, result: &AggregationResult) {
    println!("\n{title}");
    if result.is_empty() {
        println!("  no data");
        return;
    }
    for row in &result.rows {
        let label = row
            .dimensions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" / ");
        match row.rate {
            Some(rate) => println!("  {label:<12} {:>10}  {rate:>8.2} /100k", row.count),
            None => println!("  {label:<12} {:>10}", row.count),
        }
    }
}

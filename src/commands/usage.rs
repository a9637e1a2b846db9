use owo_colors::OwoColorize;
use serde::Serialize;

use super::{CliError, CliResult};
use crate::UsageCommand;
use crate::config::DashConfig;
use crate::usage::{SeriesMetric, UsageService};

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Usage(e.to_string()))?;
    println!("{text}");
    Ok(())
}

pub async fn handle_usage_cmd(cfg: &DashConfig, cmd: UsageCommand) -> CliResult<()> {
    let usage = UsageService::new(cfg.trace_file(), cfg.usage_ttl());
    if !usage.trace_file().exists() {
        println!("No usage log found at {:?}", usage.trace_file());
    }

    match cmd {
        UsageCommand::Summary { days, json } => {
            let report = usage
                .token_metrics(days.clamp(1, 365))
                .await
                .map_err(|e| CliError::Usage(e.to_string()))?;
            if json {
                return print_json(report.as_ref());
            }
            println!(
                "{}",
                format!("Usage over the last {} day(s)", report.period_days).bold()
            );
            println!(
                "{}",
                "model | provider | requests | input | output | cache_hits | cache_writes | cost"
                    .bold()
            );
            for m in &report.models {
                println!(
                    "{} | {} | {} | {} | {} | {} | {} | ${:.4}",
                    m.model,
                    m.provider,
                    m.requests,
                    m.input_tokens,
                    m.output_tokens,
                    m.cache_hits,
                    m.cache_writes,
                    m.cost
                );
            }
            println!(
                "total: {} tokens, {}",
                report.total_tokens,
                format!("${:.2}", report.total_cost).green()
            );
        }
        UsageCommand::Timeseries {
            metric,
            hours,
            json,
        } => {
            let metric = SeriesMetric::parse_lenient(&metric);
            let report = usage
                .timeseries(metric, hours.clamp(1, 24 * 365))
                .await
                .map_err(|e| CliError::Usage(e.to_string()))?;
            if json {
                return print_json(report.as_ref());
            }
            println!(
                "{}",
                format!("Hourly {} over the last {} hour(s)", metric, hours).bold()
            );
            for point in &report.data {
                println!("{}  {}", point.timestamp.dimmed(), point.value.as_f64());
            }
        }
        UsageCommand::Breakdown { json } => {
            let report = usage
                .breakdown()
                .await
                .map_err(|e| CliError::Usage(e.to_string()))?;
            if json {
                return print_json(&report);
            }
            println!("{}", "By model (7 days)".bold());
            for m in &report.by_model {
                println!(
                    "  {} | {} tokens | {} requests | ${:.4}",
                    m.model, m.tokens, m.requests, m.cost
                );
            }
            println!("{}", "Daily trend".bold());
            for day in &report.daily_trend {
                println!("  {} | {} tokens | ${:.2}", day.date, day.tokens, day.cost);
            }
        }
    }

    Ok(())
}

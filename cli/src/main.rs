//! Cambio CLI
//!
//! Rate lookups and conversions from the command line, plus a long-running
//! mode that keeps critical pairs warm.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cambio_common::CurrencyCode;
use cambio_fx::{ExchangeRate, FxEngine, FxEngineConfig, MemoryRateStore};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cambio FX engine CLI
#[derive(Parser, Debug)]
#[command(name = "cambio")]
#[command(about = "Exchange-rate resolution and currency conversion")]
struct Args {
    /// JSON configuration file; `CAMBIO_*` variables still apply on top
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    plain_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported currencies
    Currencies,

    /// Resolve an exchange rate
    Rate {
        base: CurrencyCode,
        quote: CurrencyCode,
        /// Historical date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Convert an amount between currencies
    Convert {
        amount: Decimal,
        from: CurrencyCode,
        to: CurrencyCode,
        /// Historical date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Run the engine with the background refresher until Ctrl+C
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    ));
    if args.plain_logs {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    }

    let config = load_config(args.config.as_deref())?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }

    let engine = Arc::new(FxEngine::from_config(config, Arc::new(MemoryRateStore::new()))?);

    let outcome = run(&engine, args.command).await;
    engine.close().await;

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<FxEngineConfig> {
    match path {
        Some(path) => {
            let config = FxEngineConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            Ok(config.with_env_overrides())
        }
        None => Ok(FxEngineConfig::from_env()),
    }
}

async fn run(engine: &Arc<FxEngine>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Currencies => {
            for currency in engine.catalog().active() {
                println!(
                    "{}  {:<28} {} digits  {}",
                    currency.code,
                    currency.name,
                    currency.minor_unit_digits,
                    currency.symbol
                );
            }
        }
        Command::Rate { base, quote, as_of } => {
            let rate = engine.get_rate(&base, &quote, as_of).await?;
            println!("{}", describe_rate(&rate));
        }
        Command::Convert {
            amount,
            from,
            to,
            as_of,
        } => {
            let result = engine.convert(amount, &from, &to, as_of).await?;
            println!(
                "{} = {}",
                engine.format_amount(result.input_amount, &from)?,
                engine.format_amount(result.output_amount, &to)?
            );
            match &result.rate {
                Some(rate) => println!("{}", describe_rate(rate)),
                None => println!("no rate applied"),
            }
        }
        Command::Serve => serve(engine).await?,
    }
    Ok(())
}

fn describe_rate(rate: &ExchangeRate) -> String {
    format!(
        "{} {} (as of {}, source {}, tier {})",
        rate.pair, rate.rate, rate.as_of, rate.source, rate.tier
    )
}

async fn serve(engine: &Arc<FxEngine>) -> anyhow::Result<()> {
    info!(
        providers = engine.config().providers.len(),
        interval_secs = engine.config().refresh_interval_secs,
        "Starting Cambio FX engine"
    );
    engine.spawn_refresher();

    let mut ticker = tokio::time::interval(engine.config().refresh_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let health = engine.health();
                if health.is_healthy {
                    info!(
                        cached_pairs = health.cached_pairs,
                        fresh = health.fresh_entries,
                        stale = health.stale_entries,
                        last_refresh = ?health.last_refresh,
                        "Engine healthy"
                    );
                } else {
                    warn!(
                        cached_pairs = health.cached_pairs,
                        fresh = health.fresh_entries,
                        stale = health.stale_entries,
                        last_refresh = ?health.last_refresh,
                        "Critical pairs not fresh"
                    );
                }
                info!(metrics = %serde_json::to_string(&engine.metrics().snapshot())?, "Metrics");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert() {
        let args = Args::try_parse_from([
            "cambio", "--plain-logs", "convert", "1000", "eur", "XOF", "--as-of", "2024-03-01",
        ])
        .unwrap();
        assert!(args.plain_logs);
        match args.command {
            Command::Convert {
                amount,
                from,
                to,
                as_of,
            } => {
                assert_eq!(amount, Decimal::from(1000));
                assert_eq!(from, CurrencyCode::eur());
                assert_eq!(to, CurrencyCode::xof());
                assert_eq!(as_of, NaiveDate::from_ymd_opt(2024, 3, 1));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_date() {
        assert!(Args::try_parse_from(["cambio", "rate", "EUR", "USD", "--as-of", "yesterday"]).is_err());
    }
}

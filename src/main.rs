//! `mse_cli`: a thin demo harness around the `mse_core` library.
//!
//! Seeds a synthetic exam, drives a `Session` through one full
//! evaluation against a simulated subject, and prints the resulting
//! profile. No HTTP surface is exposed here — this binary exists purely
//! to exercise the core end to end against a single in-process run.

mod demo;

use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use mse_core::session::{Context, NextItem, Session};
use mse_core::storage::{InMemoryStorage, Storage};
use mse_core::subject::PassthroughSubject;
use mse_core::{config, judge, report};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mse_cli", about = "Moral Spectrometry Engine demo runner")]
struct Args {
    /// Identifier for the simulated subject under evaluation.
    #[arg(long, default_value = "demo-agent")]
    agent_id: String,

    /// Items per axis to administer.
    #[arg(long, default_value_t = 18)]
    items_per_axis: u32,

    /// Exam version code.
    #[arg(long, default_value = "v2.1")]
    exam_version: String,

    /// Seed for the selector and the simulated subject.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output format: console, json, or markdown.
    #[arg(long, default_value = "console")]
    output: String,

    /// Write the rendered report to a file instead of stdout.
    #[arg(long)]
    output_file: Option<String>,
}

fn print_banner() {
    println!(
        "{}",
        r#"
  __  __ ____  _____
 |  \/  / ___|| ____|
 | |\/| \___ \|  _|
 | |  | |___) | |___
 |_|  |_|____/|_____|  Moral Spectrometry Engine
"#
        .bright_cyan()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    print_banner();

    let storage = Arc::new(InMemoryStorage::new());
    demo::seed_exam(&storage, args.items_per_axis, args.seed).await;

    let context = Arc::new(Context {
        storage: storage.clone(),
        judge: Arc::new(judge::HeuristicJudge::new()),
        subject: Arc::new(PassthroughSubject),
        session: config::SessionConfig::default(),
        selector: config::SelectorConfig::default(),
        estimator: config::EstimatorConfig::default(),
        gaming: config::GamingConfig::default(),
        sophistication_weights: config::SophisticationWeights::default(),
        coupling: config::CouplingConfig::default(),
        rating: config::RatingConfig::default(),
        termination: config::TerminationConfig::default(),
    });
    let session = Session::new(context.clone());

    let run = session
        .start(
            &args.agent_id,
            Some(args.exam_version.clone()),
            Some(args.items_per_axis),
            None,
            Some(args.seed),
        )
        .await?;
    tracing::info!(run_id = %run.id, total_items = run.total_items, "run started");

    let progress = ProgressBar::new(run.total_items as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} items")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut subject = demo::SimulatedSubject::new(args.seed);
    let run_id = run.id;
    loop {
        match session.next_item(run_id).await? {
            NextItem::Item(item) => {
                let payload = subject.answer(&item);
                session.submit_response(run_id, item.code.clone(), &payload).await?;
                progress.inc(1);
            }
            NextItem::Complete(descriptor) => {
                progress.finish_with_message(format!("{:?}", descriptor.state));
                break;
            }
        }
    }

    let snapshot = session
        .current_profile(&args.agent_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("run finished without a snapshot"))?;
    let axes = storage.list_axes().await?;

    let rendered = match args.output.as_str() {
        "json" => report::generate_json(&snapshot)?,
        "markdown" => report::generate_markdown(&snapshot, &axes)?,
        _ => {
            report::render_console(&snapshot, &axes)?;
            return Ok(());
        }
    };

    match args.output_file {
        Some(path) => std::fs::write(&path, rendered)?,
        None => println!("{rendered}"),
    }

    Ok(())
}

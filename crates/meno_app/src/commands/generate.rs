use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use clap::Args;
use meno_core::{Difficulty, GenerationRequest, ItemStatus, Vibe};
use meno_engine::{
    BackendClient, ChannelProgressSink, EngineEvent, HydrationEngine, MutationOutbox,
};
use meno_logging::{meno_info, meno_warn};

use crate::config::AppConfig;

const VIBES: [Vibe; 5] = [
    Vibe::Comfort,
    Vibe::Fresh,
    Vibe::HighProtein,
    Vibe::Impress,
    Vibe::Light,
];
const DIFFICULTIES: [Difficulty; 2] = [Difficulty::Easy, Difficulty::Medium];

#[derive(Args, Clone)]
pub struct GenerateArgs {
    /// Time target in minutes
    #[arg(long, default_value_t = 30)]
    pub time: u32,
    /// comfort, fresh, high-protein, impress or light
    #[arg(long, default_value = "comfort", value_parser = parse_vibe)]
    pub vibe: Vibe,
    /// easy or medium
    #[arg(long, default_value = "easy", value_parser = parse_difficulty)]
    pub difficulty: Difficulty,
    /// Save every hydrated recipe to the cookbook
    #[arg(long)]
    pub save: bool,
}

fn parse_vibe(value: &str) -> Result<Vibe, String> {
    VIBES
        .into_iter()
        .find(|vibe| vibe.as_str() == value)
        .ok_or_else(|| format!("unknown vibe {value:?}"))
}

fn parse_difficulty(value: &str) -> Result<Difficulty, String> {
    DIFFICULTIES
        .into_iter()
        .find(|difficulty| difficulty.as_str() == value)
        .ok_or_else(|| format!("unknown difficulty {value:?}"))
}

fn describe(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::ItemSettled {
            item_id, status, ..
        } => Some(format!("  {item_id}: {status:?}")),
        EngineEvent::RunStageChanged { run_id, stage } => {
            Some(format!("run {run_id}: {stage:?}"))
        }
        EngineEvent::HydrationCancelled { .. } => None,
    }
}

/// Wait for the progress printer; false if it panicked.
fn finish_printer(printer: thread::JoinHandle<()>) -> bool {
    match printer.join() {
        Ok(()) => true,
        Err(_) => {
            meno_warn!("Progress printer panicked; some events were not shown");
            false
        }
    }
}

pub async fn run_generate(
    config: &AppConfig,
    outbox: &MutationOutbox,
    args: &GenerateArgs,
) -> Result<()> {
    let settings = config.engine.backend.clone().unwrap_or_default();
    let client = Arc::new(BackendClient::new(settings).context("invalid backend settings")?);

    let (tx, rx) = mpsc::channel();
    let printer = thread::spawn(move || {
        for event in rx {
            if let Some(line) = describe(&event) {
                println!("{line}");
            }
        }
    });

    let engine = HydrationEngine::builder(client.clone(), client)
        .settings(config.engine.hydration.clone())
        .sink(Arc::new(ChannelProgressSink::new(tx)))
        .build();

    let request = GenerationRequest {
        time: args.time,
        vibe: args.vibe,
        difficulty: args.difficulty,
    };
    let run_id = engine
        .start_run(request, config.preferences.clone())
        .await
        .context("summary generation failed")?;
    let report = engine.hydrate_run(run_id).await?;
    meno_info!("Hydration report: {:?}", report);

    let run = engine
        .run(run_id)
        .context("run disappeared during hydration")?;
    drop(engine);
    finish_printer(printer);

    for summary in run.items() {
        match run.status(&summary.id) {
            Some(ItemStatus::Ready) => println!("[ready] {} {}", summary.id, summary.title),
            Some(ItemStatus::Error) => println!(
                "[error] {} {}: {}",
                summary.id,
                summary.title,
                run.error(&summary.id).unwrap_or("unknown error")
            ),
            _ => println!("[pending] {} {}", summary.id, summary.title),
        }
    }

    if args.save {
        let mut saved = 0;
        for summary in run.items() {
            if let Some(recipe) = run.content(&summary.id) {
                if outbox.save(recipe.clone()).await {
                    saved += 1;
                }
            }
        }
        println!("saved {saved} recipe(s)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vibe_names_parse() {
        assert_eq!(parse_vibe("high-protein"), Ok(Vibe::HighProtein));
        assert!(parse_vibe("spicy").is_err());
    }

    #[test]
    fn a_panicking_printer_is_reported() {
        let printer = thread::spawn(|| panic!("stdout closed"));
        assert!(!finish_printer(printer));
        assert!(finish_printer(thread::spawn(|| {})));
    }

    #[test]
    fn difficulty_names_parse() {
        assert_eq!(parse_difficulty("medium"), Ok(Difficulty::Medium));
        assert!(parse_difficulty("hard").is_err());
    }
}

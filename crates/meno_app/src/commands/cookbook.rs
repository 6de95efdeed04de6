use anyhow::Result;
use clap::Subcommand;
use meno_core::{lineage, Recipe};
use meno_engine::{FlushOutcome, MutationOutbox};

#[derive(Subcommand, Clone)]
pub enum CookbookCmd {
    /// List saved recipes, reconciled with the backend when reachable
    List {
        /// Skip the backend and print the local copy
        #[arg(long)]
        local: bool,
    },
    /// Remove recipes by id
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Put the given ids first, in the given order
    Reorder {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move the given ids to the top, keeping their current order
    Top {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show operations the backend kept rejecting
    DeadLetters {
        /// Drop them afterwards
        #[arg(long)]
        clear: bool,
    },
}

fn print_items(items: &[Recipe]) {
    if items.is_empty() {
        println!("cookbook is empty");
        return;
    }
    for item in items {
        println!(
            "{}  {} (v{})",
            item.id,
            item.title,
            lineage::version_of(item)
        );
    }
}

fn print_sync_state(outbox: &MutationOutbox) {
    let pending = outbox.pending_operations();
    if pending > 0 {
        println!("{pending} change(s) waiting to sync");
    }
    if let Some(error) = outbox.sync_error() {
        println!("last sync failed: {error}");
    }
}

pub async fn run_cookbook(outbox: &MutationOutbox, cmd: CookbookCmd) -> Result<()> {
    match cmd {
        CookbookCmd::List { local } => {
            let items = if local {
                outbox.items()
            } else {
                outbox.get().await
            };
            print_items(&items);
        }
        CookbookCmd::Remove { ids } => {
            let removed = outbox.remove_many(&ids).await;
            println!("removed {} of {} recipe(s)", removed.len(), ids.len());
        }
        CookbookCmd::Reorder { ids } => {
            let order = outbox.reorder(&ids).await;
            println!("{}", order.join(" "));
        }
        CookbookCmd::Top { ids } => {
            let order = outbox.move_to_top(&ids).await;
            println!("{}", order.join(" "));
        }
        CookbookCmd::DeadLetters { clear } => {
            let dead = outbox.dead_letters();
            for operation in &dead {
                println!(
                    "{} {} after {} attempt(s)",
                    operation.id,
                    operation.kind.label(),
                    operation.attempts
                );
            }
            if clear {
                println!("cleared {}", outbox.clear_dead_letters());
            }
        }
    }
    print_sync_state(outbox);
    Ok(())
}

pub async fn run_sync(outbox: &MutationOutbox) -> Result<()> {
    match outbox.retry_sync().await {
        FlushOutcome::NoRemote => println!("no backend configured; cookbook is local only"),
        FlushOutcome::AlreadyRunning => println!("a sync is already running"),
        FlushOutcome::Drained => println!("cookbook is in sync"),
        FlushOutcome::Pending { remaining } => println!("{remaining} change(s) still pending"),
    }
    print_sync_state(outbox);
    let dead = outbox.dead_letters().len();
    if dead > 0 {
        println!("{dead} change(s) abandoned; see `meno cookbook dead-letters`");
    }
    Ok(())
}

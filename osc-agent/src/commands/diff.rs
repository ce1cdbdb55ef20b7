//! Print the pending changes without applying them.

use anyhow::Result;
use osc_agent::Config;
use osc_core::ChangeSet;
use osc_types::UnitAction;

/// Run the diff command.
pub async fn run(config: &Config) -> Result<()> {
    let reconciler = super::build_reconciler(config);

    match reconciler.diff().await? {
        None => println!("No desired config at {}", config.source.path.display()),
        Some(changes) if changes.is_empty() => println!("Node is up to date"),
        Some(changes) => print!("{}", render(&changes)),
    }

    Ok(())
}

fn render(changes: &ChangeSet) -> String {
    let mut out = String::new();

    for file in &changes.files.changed {
        out.push_str(&format!("~ file {} ({:04o})\n", file.path(), file.mode()));
    }
    for path in &changes.files.deleted {
        out.push_str(&format!("- file {path}\n"));
    }

    for change in &changes.units.changed {
        let action = match change.unit.action() {
            UnitAction::Restart => "restart",
            UnitAction::Stop => "stop",
        };
        out.push_str(&format!("~ unit {} ({action})\n", change.unit.name));
        for drop_in in &change.drop_ins.changed {
            out.push_str(&format!("    ~ drop-in {}\n", drop_in.name));
        }
        for name in &change.drop_ins.deleted {
            out.push_str(&format!("    - drop-in {name}\n"));
        }
    }
    for name in &changes.units.deleted {
        out.push_str(&format!("- unit {name}\n"));
    }

    out
}

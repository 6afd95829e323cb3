//! Interactive conflict strategy selection.

use std::collections::HashMap;

use console::Style;
use dialoguer::{Confirm, Select};
use tracing::warn;

use dotmirror_core::conflict::{ConflictRecord, ResolutionPlan, ResolutionStrategy, StrategyPicker};

use crate::style;

/// Asks on the terminal how conflicts should be resolved.
///
/// Any prompt failure (closed stdin, no terminal) falls back to
/// merge-both so the cycle can still complete.
#[derive(Debug, Default)]
pub struct DialoguerPicker;

impl DialoguerPicker {
    /// `None` when nobody is at the terminal.
    pub fn attended() -> Option<Self> {
        console::user_attended().then_some(Self)
    }

    fn choose(prompt: &str) -> Result<ResolutionStrategy, dialoguer::Error> {
        let items: Vec<&str> = ResolutionStrategy::ALL.iter().map(|s| s.description()).collect();
        let default = ResolutionStrategy::ALL
            .iter()
            .position(|s| *s == ResolutionStrategy::MergeBoth)
            .unwrap_or(0);
        let index = Select::new()
            .with_prompt(prompt)
            .items(&items)
            .default(default)
            .interact()?;
        Ok(ResolutionStrategy::ALL[index])
    }

    fn ask(conflicts: &[ConflictRecord]) -> Result<ResolutionPlan, dialoguer::Error> {
        let accent = Style::new().yellow().bold();
        println!();
        println!("{}", accent.apply_to(format!("{} file(s) in conflict:", conflicts.len())));
        for conflict in conflicts {
            let (local, remote) = conflict.short_ids();
            println!(
                "  {} {}",
                conflict.path.display(),
                style::dim(&format!("(local {local}, remote {remote})"))
            );
        }
        println!();

        let same_for_all = Confirm::new()
            .with_prompt("Use same strategy for all files?")
            .default(true)
            .interact()?;

        if same_for_all {
            return Ok(ResolutionPlan::Uniform(Self::choose("Resolution strategy")?));
        }

        let mut plan = HashMap::new();
        for conflict in conflicts {
            let strategy = Self::choose(&format!("Strategy for {}", conflict.path.display()))?;
            plan.insert(conflict.path.clone(), strategy);
        }
        Ok(ResolutionPlan::PerPath(plan))
    }
}

impl StrategyPicker for DialoguerPicker {
    fn pick(&mut self, conflicts: &[ConflictRecord]) -> ResolutionPlan {
        match Self::ask(conflicts) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "conflict prompt failed, merging both versions");
                ResolutionPlan::Uniform(ResolutionStrategy::MergeBoth)
            }
        }
    }
}

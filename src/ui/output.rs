use crate::hub::{RefreshOutcome, RepoStatus};
use crate::query::{HitSummary, ImpactLevel};
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().dim.clone()), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn empty(what: &str) {
    println!("{} {}", Icons::EMPTY, what.style(theme().muted.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted.clone()).to_string()
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}

/// One traversal hit, e.g. `🔴 [direct] login (function) src/auth.ts`
pub fn hit(hit: &HitSummary) {
    let icon = match hit.impact_level {
        ImpactLevel::Direct => Icons::DIRECT,
        ImpactLevel::Transitive => Icons::TRANSITIVE,
    };
    println!(
        "{} [{}] {} ({}) {}",
        icon,
        hit.impact_level.as_str(),
        hit.name.style(theme().entity.clone()),
        hit.kind.as_str(),
        muted(&hit.file_path),
    );
    if hit.depth > 1 {
        println!("   {}", dim(&format!("depth {}", hit.depth)));
    }
}

pub fn repo_status(status: RepoStatus) -> String {
    match status {
        RepoStatus::Active => status.as_str().style(theme().success.clone()).to_string(),
        RepoStatus::Stale => status.as_str().style(theme().warn.clone()).to_string(),
        RepoStatus::Unregistered => muted(status.as_str()),
    }
}

pub fn refresh_outcome(repo_id: &str, outcome: RefreshOutcome) {
    match outcome {
        RefreshOutcome::Refreshed => success(&format!("{} refreshed", repo_id)),
        RefreshOutcome::Skipped => println!("{} {} unchanged", Icons::SKIPPED, repo_id),
        RefreshOutcome::Stale => warn(&format!("{} path is gone, marked stale", repo_id)),
    }
}

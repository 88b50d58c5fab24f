//! Human-readable and JSON output for session results.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use forksync_core::models::{ChangeInfo, FileStatus, MergeResult};
use forksync_core::overrides::PolicyWarning;
use forksync_core::PublishReport;

use crate::style;

/// Print a sync or check result.
pub fn print_merge_result(result: &MergeResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let p = &result.provenance;
    let title = if result.dry_run { "Sync preview" } else { "Sync" };
    println!();
    println!("{}", style::header(title));
    println!("  Upstream   {} ({})", p.upstream_url, p.upstream_ref);
    println!(
        "  Tip        {} {} {}",
        p.upstream_commit.short_sha,
        p.upstream_commit.subject,
        style::dim(&p.upstream_commit.date.format("%Y-%m-%d %H:%M").to_string())
    );
    println!("  Merge-base {}", short(&p.merge_base));
    if let Some(url) = &p.fork_url {
        println!("  Fork       {url}");
    }
    println!();

    let changed: Vec<_> = result
        .files
        .iter()
        .filter(|r| r.status != FileStatus::Identical)
        .collect();
    if changed.is_empty() {
        println!("{}", style::success("Fork and upstream agree on every file."));
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["File", "Status", "Conflict", "Fork", "Upstream"]);
        for record in changed {
            let mut status = Cell::new(record.status.label());
            if let Some(color) = style::status_color(record.status) {
                status = status.fg(color);
            }
            let conflict = match record.has_conflict {
                Some(true) => "yes",
                Some(false) => "",
                None => "—",
            };
            let mut path = Cell::new(&record.path);
            if record.status.needs_attention() {
                path = path.add_attribute(comfy_table::Attribute::Bold);
            }
            table.add_row(vec![
                path,
                status,
                Cell::new(conflict),
                Cell::new(change(record.fork_change.as_ref())),
                Cell::new(change(record.upstream_change.as_ref())),
            ]);
        }
        println!("{table}");
    }

    let counts: Vec<String> = FileStatus::ALL
        .iter()
        .filter(|s| result.summary.get(**s) > 0)
        .map(|s| format!("{} {}", result.summary.get(*s), s.label()))
        .collect();
    if !counts.is_empty() {
        println!("  {}", counts.join(", "));
    }
    let at_risk = result.files.iter().filter(|r| r.status.is_at_risk()).count();
    if at_risk > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{at_risk} file(s) changed only in the fork; run `forksync contribute` to offer them upstream"
            ))
        );
    }
    if result.auto_resolved > 0 {
        println!("  {} conflict(s) resolved by overrides", result.auto_resolved);
    }
    println!();

    if result.success {
        let msg = if result.dry_run {
            "Merge would complete without manual conflicts."
        } else {
            "Merge staged. Review and commit to finish."
        };
        println!("{}", style::success(msg));
    } else {
        println!(
            "{}",
            style::error(&format!(
                "{} conflict(s) need manual resolution:",
                result.conflicts.len()
            ))
        );
        for path in &result.conflicts {
            println!("    {path}");
        }
    }
    Ok(())
}

/// Print the outcome of publishing a review branch.
pub fn print_publish_report(report: &PublishReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match &report.commit {
        Some(commit) => println!(
            "{}",
            style::success(&format!(
                "Pushed {} file(s) to {}/{} ({})",
                report.published,
                report.remote,
                report.branch,
                short(commit)
            ))
        ),
        None => println!(
            "{}",
            style::error(&format!("Nothing to publish on {}", report.branch))
        ),
    }
    if report.forced_without_lease {
        println!(
            "{}",
            style::warn("Remote branch had moved; it was overwritten.")
        );
    }
    for skipped in &report.skipped {
        println!(
            "{}",
            style::warn(&format!("skipped {}: {}", skipped.path, skipped.reason))
        );
    }
    Ok(())
}

/// Print override policy warnings.
pub fn print_warnings(warnings: &[PolicyWarning]) {
    if warnings.is_empty() {
        println!("  [OK] Override patterns look good");
        return;
    }
    for warning in warnings {
        println!("  {}", style::warn(&warning.to_string()));
    }
}

fn change(info: Option<&ChangeInfo>) -> String {
    match info {
        Some(c) => format!("{} {}", c.short_sha, c.date.format("%Y-%m-%d")),
        None => "—".to_string(),
    }
}

fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

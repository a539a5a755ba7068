//! Diff command - compare candidate values with an installed package

use console::style;
use pkgdriver_core::Values;
use similar::{ChangeTag, TextDiff};

use crate::error::Result;
use crate::{ClusterArgs, ValuesArgs};

/// Run the diff command; returns whether the configuration changed
pub async fn run(cluster: &ClusterArgs, name: &str, values_args: &ValuesArgs) -> Result<bool> {
    let values = super::load_values(values_args)?;

    let session = super::connect(cluster).await?;
    let drift = session.config_drift(name, values).await?;

    if !drift.is_changed() {
        println!(
            "{} No changes for {} (revision {})",
            style("✓").green().bold(),
            style(name).cyan(),
            drift.revision
        );
        return Ok(false);
    }

    println!(
        "{} Configuration of {} differs from revision {}",
        style("!").yellow().bold(),
        style(name).cyan(),
        drift.revision
    );
    print!("{}", render_diff(&drift.stored, &drift.candidate)?);

    Ok(true)
}

/// Unified diff of two values trees rendered as YAML
pub fn render_diff(stored: &Values, candidate: &Values) -> Result<String> {
    let old = stored.to_yaml()?;
    let new = candidate.to_yaml()?;
    let diff = TextDiff::from_lines(&old, &new);

    let mut output = String::new();
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => style(format!("-{}", change)).red().to_string(),
            ChangeTag::Insert => style(format!("+{}", change)).green().to_string(),
            ChangeTag::Equal => format!(" {}", change),
        };
        output.push_str(&line);
    }
    Ok(output)
}

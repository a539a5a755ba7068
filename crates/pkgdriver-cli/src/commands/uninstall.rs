//! Uninstall command - remove a package from the target cluster

use console::style;
use pkgdriver_kube::UninstallOutcome;

use crate::ClusterArgs;
use crate::error::Result;

/// Run the uninstall command
pub async fn run(cluster: &ClusterArgs, name: &str) -> Result<()> {
    println!(
        "{} Uninstalling {}",
        style("→").blue().bold(),
        style(name).cyan()
    );

    let session = super::connect(cluster).await?;

    match session.uninstall(name).await? {
        UninstallOutcome::NotFound => {
            println!(
                "{} Release {} is not installed",
                style("✓").green().bold(),
                style(name).cyan()
            );
        }
        UninstallOutcome::Removed {
            namespace,
            bookkeeping,
        } => {
            println!(
                "{} Release {} uninstalled from namespace {}",
                style("✓").green().bold(),
                style(name).cyan(),
                style(&namespace).yellow()
            );
            for failure in &bookkeeping {
                eprintln!("{} {}", style("⚠").yellow(), failure);
            }
        }
    }

    Ok(())
}

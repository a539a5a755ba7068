//! Install command - create or upgrade a package on the target cluster

use console::style;
use pkgdriver_core::PackageSource;
use pkgdriver_kube::ReleaseAction;

use crate::error::Result;
use crate::{ClusterArgs, ValuesArgs};

/// Run the install command
pub async fn run(
    cluster: &ClusterArgs,
    name: &str,
    chart: &str,
    version: &str,
    digest: &str,
    namespace: &str,
    values_args: &ValuesArgs,
) -> Result<()> {
    let source = PackageSource::new(chart, version, digest)?;
    let values = super::load_values(values_args)?;

    println!(
        "{} Installing {} from {}",
        style("→").blue().bold(),
        style(name).cyan(),
        style(&source).yellow()
    );

    let session = super::connect(cluster).await?;
    let outcome = session.install(name, namespace, &source, values).await?;

    let verb = match outcome.action {
        ReleaseAction::Created => "installed",
        ReleaseAction::Upgraded => "upgraded",
    };
    println!(
        "{} Release {} {} in namespace {} (revision {})",
        style("✓").green().bold(),
        style(name).cyan(),
        verb,
        style(&outcome.namespace).yellow(),
        outcome.revision
    );

    for failure in &outcome.bookkeeping {
        eprintln!("{} {}", style("⚠").yellow(), failure);
    }

    Ok(())
}

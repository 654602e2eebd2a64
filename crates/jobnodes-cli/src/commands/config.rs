//! `jobnodes check-config` and `jobnodes resolve`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use jobnodes_core::{ConfigFinding, Label, ProvisionerConfig, Severity};

pub fn load(path: &Path) -> Result<ProvisionerConfig> {
    ProvisionerConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Validate the configuration and print every finding.
///
/// Fails when at least one finding is an error.
pub fn check(path: &Path, format: &str) -> Result<()> {
    let config = load(path)?;
    let findings = config.validate();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&findings)?),
        "text" => print!("{}", render_findings(&findings)),
        other => bail!("unsupported output format: {other}"),
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    if errors > 0 {
        bail!("{} has {errors} error(s)", path.display());
    }
    Ok(())
}

/// Print what `label` resolves to.
pub fn resolve(path: &Path, label: &str) -> Result<()> {
    let config = load(path)?;
    print!("{}", render_resolved(&config, &Label::from(label)));
    Ok(())
}

fn render_findings(findings: &[ConfigFinding]) -> String {
    if findings.is_empty() {
        return "configuration OK\n".to_string();
    }
    findings
        .iter()
        .map(|f| {
            let level = match f.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            format!("{level}: {}: {}\n", f.field, f.message)
        })
        .collect()
}

fn render_resolved(config: &ProvisionerConfig, label: &Label) -> String {
    let excluded = label.matches(&config.exclude_label_set());
    format!(
        "label:             {label}\n\
         excluded:          {excluded}\n\
         provision job:     {}\n\
         decommission job:  {}\n\
         image:             {}\n\
         git url:           {}\n",
        config.to_provision_job(label),
        config.to_decommission_job(label),
        config.to_agent_image(label),
        config.to_git_url(label),
    )
}

use std::path::Path;

use moorage_core::MoorageConfig;

pub fn init_config(cluster: &str, region: &str, store: &Path, output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = MoorageConfig::scaffold(cluster, region, store);
    std::fs::write(output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

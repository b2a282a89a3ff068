//! Init command - write a default configuration file.

use std::path::PathBuf;

use fieldlayer::config::ConfigFile;

use crate::error::CliError;
use crate::runner::config_path;

/// Run the init command.
pub fn run(path: Option<PathBuf>, force: bool) -> Result<(), CliError> {
    let path = config_path(path);

    if path.exists() && !force {
        println!("Configuration already exists: {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    ConfigFile::default().save_to(&path)?;

    println!("Wrote default configuration: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add a [provider.<name>] section with your credentials");
    println!("  2. Point [provider] preferred at it");
    println!("  3. Run: fieldlayer run --lands lands.json");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        run(Some(path.clone()), false).unwrap();
        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, ConfigFile::default());
    }

    #[test]
    fn test_init_keeps_existing_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[grid]\nzoom = 12\n").unwrap();

        run(Some(path.clone()), false).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap().grid.zoom, 12);

        run(Some(path.clone()), true).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }
}

//! Spec discovery and loading.
//!
//! Finds spec files under a test root, reads and parses them, and loads the optional suite
//! configuration.

use crate::env;
use crate::errors::LoadError;
use crate::parser::parse_spec;
use crate::schema::{SuiteConfig, TestSpec};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suite configuration file names, in order of preference.
pub const SUITE_CONFIG_FILENAMES: [&str; 2] = ["specrun.yaml", "specrun.toml"];

/// A spec file found under the test root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecPath {
    /// Root-relative name with `/` separators.
    pub name: String,
    /// Path on disk.
    pub path: PathBuf,
}

/// Read and parse one spec file.
pub fn load_spec(spec_path: &SpecPath) -> Result<TestSpec, LoadError> {
    let contents = std::fs::read(&spec_path.path).map_err(|source| LoadError::Io {
        path: spec_path.path.clone(),
        source,
    })?;
    let base_dir = spec_path.path.parent().unwrap_or(Path::new("."));
    let mut spec = parse_spec(&spec_path.name, &contents, base_dir)?;
    spec.path = spec_path.path.clone();
    Ok(spec)
}

/// Load suite configuration from the test root.
///
/// Returns the default configuration if no config file exists. `${VAR}` references in `exe` and
/// `env` values are interpolated.
pub fn load_suite_config(root: &Path) -> Result<SuiteConfig, LoadError> {
    let Some(path) = SUITE_CONFIG_FILENAMES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
    else {
        return Ok(SuiteConfig::default());
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    let mut config: SuiteConfig = if path.extension().is_some_and(|e| e == "toml") {
        toml::from_str(&contents).map_err(|source| LoadError::Toml {
            path: path.clone(),
            source,
        })?
    } else {
        serde_yaml::from_str(&contents).map_err(|source| LoadError::Yaml {
            path: path.clone(),
            source,
        })?
    };
    debug!(path = %path.display(), "loaded suite configuration");

    if let Some(exe) = &config.exe {
        config.exe = Some(env::interpolate_env(exe).map_err(|message| {
            LoadError::Interpolation {
                field: "exe".to_string(),
                message,
            }
        })?);
    }
    config.env = env::interpolate_map(&config.env).map_err(|message| LoadError::Interpolation {
        field: "env".to_string(),
        message,
    })?;

    Ok(config)
}

/// Find every spec file with the given extension under `root`, sorted by name.
pub fn find_specs(root: &Path, extension: &str) -> Result<Vec<SpecPath>, std::io::Error> {
    let mut specs = Vec::new();
    collect_specs_recursive(root, root, extension, &mut specs)?;
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

fn collect_specs_recursive(
    root: &Path,
    dir: &Path,
    extension: &str,
    specs: &mut Vec<SpecPath>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        // Symlinked directories are not followed, so a link cycle cannot recurse forever.
        if entry.file_type()?.is_dir() {
            collect_specs_recursive(root, &path, extension, specs)?;
        } else if path.extension().is_some_and(|e| e == extension) {
            if path
                .file_name()
                .is_some_and(|f| SUITE_CONFIG_FILENAMES.iter().any(|c| f == *c))
            {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            specs.push(SpecPath { name, path });
        }
    }
    Ok(())
}

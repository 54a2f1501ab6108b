//! Environment variable interpolation for suite configuration values.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("variable reference regex is valid"));

/// Replace every `${VAR}` in `s` with the value of `VAR` from the process environment.
///
/// Returns an error message naming the first variable that is unset, or an unclosed `${`.
pub fn interpolate_env(s: &str) -> Result<String, String> {
    interpolate_with(s, |name| std::env::var(name).ok())
}

/// Interpolate every value of a map, keeping keys as-is.
pub fn interpolate_map(map: &HashMap<String, String>) -> Result<HashMap<String, String>, String> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), interpolate_env(v)?)))
        .collect()
}

fn interpolate_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String, String> {
    let mut missing = None;
    let replaced = VAR_REF.replace_all(s, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(format!("environment variable '{name}' is not set"));
    }
    if let Some(start) = replaced.find("${") {
        return Err(format!("unclosed variable reference: {}", &replaced[start..]));
    }
    Ok(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "OUT" => Some("/build/out".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn replaces_references() {
        assert_eq!(interpolate_with("${OUT}/pnacl", lookup).unwrap(), "/build/out/pnacl");
        assert_eq!(interpolate_with("a${EMPTY}b", lookup).unwrap(), "ab");
        assert_eq!(interpolate_with("no vars", lookup).unwrap(), "no vars");
        assert_eq!(interpolate_with("", lookup).unwrap(), "");
    }

    #[test]
    fn missing_variable_is_named() {
        let err = interpolate_with("${OUT}/${NOPE}", lookup).unwrap_err();
        assert!(err.contains("NOPE"), "{err}");
    }

    #[test]
    fn unclosed_reference_is_an_error() {
        let err = interpolate_with("${OUT", lookup).unwrap_err();
        assert!(err.contains("unclosed"), "{err}");
    }

    #[test]
    fn reads_process_environment() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(interpolate_env("${PATH}").unwrap(), path);
    }
}

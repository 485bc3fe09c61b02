//! Classification of early process exits from their last stderr line

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ErrorKind;

static PYTHON_MISSING_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ModuleNotFoundError: No module named '([\w.]+)'").expect("valid regex")
});

static GENERIC_MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cannot find module '([^']+)'").expect("valid regex"));

/// Top-level module named in a missing-module error, if any
pub fn missing_module(stderr: &str) -> Option<String> {
    [&*PYTHON_MISSING_MODULE, &*GENERIC_MISSING_MODULE]
        .iter()
        .find_map(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .and_then(|module| module.as_str().split(['.', '/']).next())
        .filter(|module| !module.is_empty())
        .map(str::to_string)
}

/// Refine an instant exit: a missing host module means the extension relies
/// on internals, any other missing module is a dependency to install
pub fn classify(stderr: &str, host_namespace: &str) -> Option<(ErrorKind, String)> {
    let module = missing_module(stderr)?;
    if module == host_namespace {
        Some((ErrorKind::IncompatibleInternals, stderr.to_string()))
    } else {
        Some((ErrorKind::MissingDependency, module))
    }
}

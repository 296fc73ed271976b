//! Parameter Marshalling
//!
//! Converts request parameters into a process argument vector. Every
//! parameter becomes one discrete `--name=value` element; nothing is ever
//! joined into a shell command line.

use super::resolver::ScriptPath;
use super::MASK;

/// Request parameters in source order
///
/// Behaves like a map: a repeated name keeps its first value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    entries: Vec<(String, String)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter unless the name is already present
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.entries.iter().any(|(existing, _)| *existing == name) {
            self.entries.push((name, value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Real and redacted argument vectors for one invocation
///
/// `argv[0]` is the program to execute. Both vectors always have the same
/// length and differ only in masked parameter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalledArgs {
    pub argv: Vec<String>,
    pub redacted: Vec<String>,
}

impl MarshalledArgs {
    /// Program to spawn
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments passed after the program
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// Whether a parameter value must be masked in logs
pub fn is_sensitive(name: &str) -> bool {
    name.to_lowercase().contains("password")
}

/// Interpreter prefix required to run a script with the given suffix
fn interpreter_for(suffix: &str) -> &'static [&'static str] {
    match suffix {
        ".ps1" => &["powershell", "-File"],
        _ => &[],
    }
}

/// Build the argument vectors for running `script` with `params`.
pub fn marshal(script: &ScriptPath, params: &ParameterSet) -> MarshalledArgs {
    let mut argv: Vec<String> = interpreter_for(script.suffix())
        .iter()
        .map(|s| s.to_string())
        .collect();
    argv.push(script.path().to_string_lossy().into_owned());
    let mut redacted = argv.clone();

    for (name, value) in params.iter() {
        argv.push(format!("--{name}={value}"));
        if is_sensitive(name) {
            redacted.push(format!("--{name}={MASK}"));
        } else {
            redacted.push(format!("--{name}={value}"));
        }
    }

    MarshalledArgs { argv, redacted }
}

//! Run-time configuration: which link objects to skip when scanning a process, and the `tracing`
//! target this crate's diagnostics are emitted under.
//!
//! The original hard-codes its ignore list (platform loader and libc paths) directly in
//! `state.cxx`; this is the ambient ergonomics layer a real embedding of this crate would want —
//! a caller linking against an unusual libc or a statically linked musl binary needs to be able to
//! extend that list rather than patch the crate.

/// Filename fragments [`State::add_self`](crate::state::State::add_self) skips by default: the
/// dynamic linker and the vDSO, neither of which carries DWARF worth introspecting.
const DEFAULT_IGNORED_PREFIXES: &[&str] = &["/lib/ld-", "/lib64/ld-", "linux-vdso.so"];

/// The `tracing` target this crate's own spans and events are emitted under by default.
pub const DEFAULT_TRACING_TARGET: &str = "spiegel";

/// Caller-tunable behavior for [`crate::state::State`]: which link objects to skip, and what
/// `tracing` target to use for this crate's own diagnostics.
#[derive(Clone, Debug)]
pub struct Config {
    ignored_prefixes: Vec<String>,
    tracing_target: String,
}

impl Config {
    /// A fresh builder seeded with the default ignore list and tracing target.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            ignored_prefixes: DEFAULT_IGNORED_PREFIXES.iter().map(|s| s.to_string()).collect(),
            tracing_target: DEFAULT_TRACING_TARGET.to_string(),
        }
    }

    /// `true` if `path` contains any registered ignored-prefix fragment.
    pub fn is_ignored(&self, path: &std::path::Path) -> bool {
        let name = path.to_string_lossy();
        self.ignored_prefixes.iter().any(|p| name.contains(p.as_str()))
    }

    pub fn ignored_prefixes(&self) -> &[String] {
        &self.ignored_prefixes
    }

    pub fn tracing_target(&self) -> &str {
        &self.tracing_target
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Builds a [`Config`], starting from the default ignore list unless [`ConfigBuilder::clear_ignored_prefixes`]
/// is called first.
pub struct ConfigBuilder {
    ignored_prefixes: Vec<String>,
    tracing_target: String,
}

impl ConfigBuilder {
    /// Adds one more ignored-path fragment to the default list.
    pub fn ignore_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_prefixes.push(prefix.into());
        self
    }

    /// Drops the built-in defaults, starting from an empty ignore list.
    pub fn clear_ignored_prefixes(mut self) -> Self {
        self.ignored_prefixes.clear();
        self
    }

    /// Overrides the `tracing` target this crate's own diagnostics are emitted under.
    pub fn tracing_target(mut self, target: impl Into<String>) -> Self {
        self.tracing_target = target.into();
        self
    }

    pub fn build(self) -> Config {
        Config {
            ignored_prefixes: self.ignored_prefixes,
            tracing_target: self.tracing_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn default_config_ignores_the_dynamic_linker_and_vdso() {
        let config = Config::default();
        assert!(config.is_ignored(Path::new("/lib64/ld-linux-x86-64.so.2")));
        assert!(config.is_ignored(Path::new("linux-vdso.so.1")));
        assert!(!config.is_ignored(Path::new("/usr/bin/app")));
    }

    #[test]
    fn builder_can_add_an_extra_prefix() {
        let config = Config::builder().ignore_prefix("/opt/musl/").build();
        assert!(config.is_ignored(Path::new("/opt/musl/libc.so")));
        assert!(config.is_ignored(Path::new("/lib64/ld-linux-x86-64.so.2")));
    }

    #[test]
    fn clear_ignored_prefixes_drops_the_defaults() {
        let config = Config::builder().clear_ignored_prefixes().build();
        assert!(!config.is_ignored(Path::new("/lib64/ld-linux-x86-64.so.2")));
    }

    #[test]
    fn tracing_target_defaults_and_can_be_overridden() {
        assert_eq!(Config::default().tracing_target(), DEFAULT_TRACING_TARGET);
        let config = Config::builder().tracing_target("my_harness").build();
        assert_eq!(config.tracing_target(), "my_harness");
    }
}

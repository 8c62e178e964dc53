//! Driver options, read-only within a run.

/// Back-end target; currently only influences metadata handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Michelson,
    Whyml,
    Markdown,
}

/// Everything the driver may vary between runs.
///
/// Mirrors the command-line surface one to one; no global state is read
/// anywhere in the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Address substituted for `caller` in defaults (`--set-caller-init`)
    pub caller: Option<String>,
    /// Keep only the named property and what it uses
    pub property_focused: Option<String>,
    /// Metadata URI stored under the empty key
    pub metadata_uri: Option<String>,
    /// Metadata JSON embedded in storage under the `here` pointer
    pub metadata_storage: Option<String>,
    /// Force a parameter-driven metadata slot
    pub with_metadata: bool,
    /// Enable `_now` / `_set_now` instrumentation
    pub test_mode: bool,
    /// Address used by event emission rewrites
    pub event_well_address: Option<String>,
    pub target: Target,
}

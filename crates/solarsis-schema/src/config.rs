/// Controls schema loading behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, command definitions reject keys the loader does not know.
    pub strict_mode: bool,
    /// Maximum size in bytes of a schema document read from disk.
    pub max_document_size: usize,
    /// Maximum number of commands across all families.
    pub max_commands: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_document_size: 1024 * 1024,
            max_commands: 1024,
        }
    }
}

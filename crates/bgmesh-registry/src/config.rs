/// Controls registry decoding and descriptor loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, bytes after the last described field are a layout mismatch.
    /// When false they are ignored, which tolerates firmware that appends fields.
    pub strict_length: bool,
    /// Maximum number of descriptor files loaded from a directory.
    pub max_descriptor_files: usize,
    /// Maximum bytes allowed per descriptor file.
    pub max_descriptor_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_length: true,
            max_descriptor_files: 256,
            max_descriptor_file_size: 256 * 1024,
        }
    }
}

impl RegistryConfig {
    pub fn with_strict_length(mut self, strict: bool) -> Self {
        self.strict_length = strict;
        self
    }
}

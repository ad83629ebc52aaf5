//! Local episode <-> device path mapping

/// Maps `(show folder, file name)` to `<prefix>/<folder>/<file>` and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePathMapping {
    prefix: String,
}

impl RemotePathMapping {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Device path of an episode
    pub fn remote_path(&self, folder: &str, filename: &str) -> String {
        format!("{}/{}/{}", self.prefix, folder, filename)
    }

    /// Split a device path back into `(folder, filename)`
    ///
    /// Paths outside the prefix, or nested deeper than one folder, do not
    /// belong to any episode and resolve to `None`.
    pub fn resolve<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (folder, filename) = rest.split_once('/')?;
        if folder.is_empty() || filename.is_empty() || filename.contains('/') {
            return None;
        }
        Some((folder, filename))
    }
}

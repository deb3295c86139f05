use std::path::PathBuf;

use directories::ProjectDirs;

/// Platform directories for the application, with a relative fallback when
/// no home directory can be determined.
pub struct ProjectPaths {
    name: String,
    dirs: Option<ProjectDirs>,
}

impl ProjectPaths {
    pub fn new(name: &str) -> Self {
        ProjectPaths {
            name: name.to_string(),
            dirs: ProjectDirs::from("", "", name),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dirs
            .as_ref()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(format!(".{}", self.name)))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dirs
            .as_ref()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(format!(".{}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_contains_name() {
        let paths = ProjectPaths::new("tactician");
        assert!(paths.config_dir().to_string_lossy().contains("tactician"));
    }

    #[test]
    fn test_data_dir_contains_name() {
        let paths = ProjectPaths::new("tactician");
        assert!(paths.data_dir().to_string_lossy().contains("tactician"));
    }
}

//! Utility functions and helpers
//!
//! Common utilities used throughout BeemFlow.

use crate::config::{Config, StorageConfig};
use tempfile::TempDir;

/// Test environment with isolated temporary directories (test builds only)
///
/// This struct provides a complete, isolated test environment that mirrors production:
/// - Temporary `.beemflow` directory (auto-cleaned on drop)
/// - SQLite database in the temp directory
/// - Config pointing to temp directories
/// - Complete Dependencies object ready to use
///
/// # Example
///
/// ```no_run
/// use beemflow::utils::TestEnvironment;
/// use beemflow::core::OperationRegistry;
///
/// #[tokio::test]
/// async fn my_test() {
///     let env = TestEnvironment::new().await;
///     let registry = OperationRegistry::new(env.deps);
///     // Cleanup happens automatically when env drops
/// }
/// ```
pub struct TestEnvironment {
    /// Temporary directory - kept alive for test duration
    /// When dropped, all temp files are automatically cleaned up
    _temp_dir: TempDir,

    /// Complete dependencies object ready to use in tests
    pub deps: crate::core::Dependencies,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    ///
    /// Sets up:
    /// - Temporary root directory (auto-deleted on drop)
    /// - `.beemflow/` subdirectory
    /// - `.beemflow/flows/` subdirectory
    /// - `.beemflow/beemflow.db` SQLite database
    /// - Config pointing to these locations
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use beemflow::utils::TestEnvironment;
    /// # use beemflow::core::OperationRegistry;
    /// # async fn example() {
    /// let env = TestEnvironment::new().await;
    /// let registry = OperationRegistry::new(env.deps);
    /// // All dependencies available via env.deps.*
    /// # }
    /// ```
    pub async fn new() -> Self {
        Self::with_db_name("beemflow.db").await
    }

    /// Create a test environment with a custom database name
    ///
    /// Useful when you need multiple isolated environments in the same test
    pub async fn with_db_name(db_name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let beemflow_dir = temp_dir.path().join(".beemflow");

        // Directories will be auto-created by SqliteStorage and save_flow

        let config = Config {
            storage: StorageConfig {
                driver: "sqlite".to_string(),
                dsn: beemflow_dir.join(db_name).to_str().unwrap().to_string(),
            },
            flows_dir: Some(beemflow_dir.join("flows").to_str().unwrap().to_string()),
            ..Default::default()
        };

        let deps = crate::core::create_dependencies(&config)
            .await
            .expect("Failed to create test dependencies");

        TestEnvironment {
            _temp_dir: temp_dir,
            deps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_environment_creates_structure() {
        let env = TestEnvironment::new().await;

        // Verify storage is functional
        env.deps
            .storage
            .deploy_flow_version("test_flow", "1.0.0", "content")
            .await
            .expect("Should be able to write to database");

        let content = env
            .deps
            .storage
            .get_flow_version_content("test_flow", "1.0.0")
            .await
            .expect("Should be able to read from database");

        assert_eq!(content, Some("content".to_string()));
    }
}

//! Environment variable based secrets provider
//!
//! This is the default and simplest secrets provider. It reads secrets directly
//! from environment variables, with .env file support via dotenvy.

use super::*;

/// Default secrets provider that reads from environment variables
///
/// This is the ONLY place in the entire codebase where:
/// - `dotenvy::dotenv()` is called
/// - `std::env::var()` and `std::env::vars()` are called
///
/// All other code must use the SecretsProvider trait.
///
/// ## Design
///
/// - **Zero-sized type**: No runtime overhead
/// - **Simple 1:1 mapping**: Environment variables directly become secrets
/// - **No filtering**: All environment variables are accessible
/// - **.env support**: Automatically loads .env file on creation
///
/// ## Usage
///
/// ```no_run
/// use beemflow::secrets::{SecretsProvider, EnvSecretsProvider};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = EnvSecretsProvider::new();
/// let api_key = provider.get_secret("OPENAI_API_KEY").await?;
/// # Ok(())
/// # }
/// ```
pub struct EnvSecretsProvider {
    /// Optional prefix tried before the bare key (e.g. `BEEMFLOW_SECRET_`)
    prefix: Option<String>,
}

impl EnvSecretsProvider {
    /// Create a new environment-based secrets provider
    ///
    /// This loads the .env file if present. This is the ONLY place where
    /// `dotenvy::dotenv()` is called.
    ///
    /// ## .env File Loading
    ///
    /// The .env file is loaded from the current directory or any parent directory.
    /// If no .env file is found, this is not an error - the provider will still
    /// work with system environment variables.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use beemflow::secrets::EnvSecretsProvider;
    ///
    /// // Loads .env file and makes all environment variables available as secrets
    /// let provider = EnvSecretsProvider::new();
    /// ```
    pub fn new() -> Self {
        // Load .env file - this is the ONLY place in the codebase where this is called
        // Failure is not an error - .env files are optional
        let _ = dotenvy::dotenv();

        Self { prefix: None }
    }

    /// Create a provider that tries `<prefix><key>` before falling back to `<key>`
    pub fn with_prefix(prefix: Option<String>) -> Self {
        let _ = dotenvy::dotenv();
        Self { prefix }
    }
}

impl Default for EnvSecretsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SecretsProvider for EnvSecretsProvider {
    async fn get_secret(&self, key: &str) -> Result<Option<String>> {
        // This is the ONLY place where std::env::var() should be called
        if let Some(ref prefix) = self.prefix
            && let Ok(v) = std::env::var(format!("{prefix}{key}"))
        {
            return Ok(Some(v));
        }
        Ok(std::env::var(key).ok())
    }

    async fn get_all_secrets(&self) -> Result<HashMap<String, String>> {
        // Return ALL environment variables
        // This is the ONLY place where std::env::vars() should be called
        Ok(std::env::vars().collect())
    }
}

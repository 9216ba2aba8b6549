//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Remote transfer configuration: how wide and how persistent we are against the remote API
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Maximum number of concurrent remote calls
    pub num_connections: usize,
    /// Attempts per remote call before it is a terminal failure
    pub max_attempts: u32,
    /// Base of the randomized delay between attempts
    pub retry_delay: std::time::Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            num_connections: 10,
            max_attempts: 1000,
            retry_delay: std::time::Duration::from_secs(1),
        }
    }
}

impl TransferConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.num_connections == 0 {
            return Err("num_connections must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn mirror_settings(&self) -> crate::mirror::Settings {
        crate::mirror::Settings {
            num_connections: self.num_connections,
            retry: crate::retry::Settings {
                max_attempts: self.max_attempts,
                base_delay: self.retry_delay,
            },
        }
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
    /// Print the summary as JSON instead of text
    pub summary_json: bool,
}

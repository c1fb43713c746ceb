use serde::{Deserialize, Serialize};

/// Main configuration structure for forgeloop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Sandbox configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// External code generator configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Knowledge store configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Reflection daemon configuration
    #[serde(default)]
    pub reflection: ReflectionConfig,

    /// Artifact output configuration
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".forgeloop/forgeloop.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            enable_stdout: true,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once (1-64)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Attempt budget for tasks that don't declare one
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_max_attempts: default_max_attempts(),
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Root of the per-task working directories
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Program that runs the task script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_script_extension")]
    pub script_extension: String,

    /// Installer command; the target `deps/` directory and the packages are
    /// appended. Empty disables installation.
    #[serde(default = "default_installer")]
    pub installer: Vec<String>,

    /// Wall-clock limit per attempt
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Cap applied to stdout and stderr separately
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Environment variable pointing the interpreter at `deps/`
    #[serde(default = "default_dependency_env_var")]
    pub dependency_env_var: String,
}

fn default_workspace_dir() -> String {
    ".forgeloop/workspace".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_extension() -> String {
    "py".to_string()
}

fn default_installer() -> Vec<String> {
    ["python3", "-m", "pip", "install", "--quiet", "--target"]
        .into_iter()
        .map(String::from)
        .collect()
}

const fn default_sandbox_timeout() -> u64 {
    30
}

const fn default_max_output_bytes() -> usize {
    65536
}

fn default_dependency_env_var() -> String {
    "PYTHONPATH".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            interpreter: default_interpreter(),
            script_extension: default_script_extension(),
            installer: default_installer(),
            timeout_secs: default_sandbox_timeout(),
            max_output_bytes: default_max_output_bytes(),
            dependency_env_var: default_dependency_env_var(),
        }
    }
}

/// External code generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Program that receives a JSON request on stdin and prints code.
    /// Without one, only tasks that carry their own code can run.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

const fn default_generator_timeout() -> u64 {
    120
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_generator_timeout(),
        }
    }
}

/// Knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KnowledgeConfig {
    /// Per-layer timeout for every backend call
    #[serde(default = "default_layer_timeout_ms")]
    pub layer_timeout_ms: u64,

    /// Entries kept by the in-memory layer before LRU eviction
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// JSON snapshot loaded on initialize and written on flush
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: Option<String>,

    /// Minimum Jaccard score for a similar-signature match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

const fn default_layer_timeout_ms() -> u64 {
    2000
}

const fn default_memory_capacity() -> usize {
    1024
}

#[allow(clippy::unnecessary_wraps)]
fn default_snapshot_path() -> Option<String> {
    Some(".forgeloop/knowledge.json".to_string())
}

const fn default_similarity_threshold() -> f64 {
    0.6
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            layer_timeout_ms: default_layer_timeout_ms(),
            memory_capacity: default_memory_capacity(),
            snapshot_path: default_snapshot_path(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Reflection daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReflectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reflection_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub run_on_startup: bool,

    /// Consecutive failed passes before the daemon stops
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Number of recent outcomes examined per pass
    #[serde(default = "default_reflection_window")]
    pub window: usize,
}

const fn default_reflection_interval() -> u64 {
    300
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

const fn default_reflection_window() -> usize {
    200
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reflection_interval(),
            run_on_startup: false,
            max_consecutive_failures: default_max_consecutive_failures(),
            window: default_reflection_window(),
        }
    }
}

/// Artifact output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
}

fn default_artifacts_dir() -> String {
    ".forgeloop/artifacts".to_string()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

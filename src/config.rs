use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "dojo", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of grading workers
    #[arg(long = "workers", short = 'w', default_value_t = 2)]
    pub workers: u8,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub problems: Vec<Problem>,
    #[serde(default = "RunnerSpec::builtin")]
    pub runners: Vec<RunnerSpec>,
}

pub type Catalog = Vec<Problem>;
pub type RunnerConfig = Vec<RunnerSpec>;

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

/// Resource bounds applied to every graded test case, plus the admission
/// capacity of the grading queue.
#[derive(Deserialize, Debug, Clone)]
pub struct LimitsConfig {
    /// Wall-clock budget per test case, in milliseconds
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    /// Address-space cap for the candidate process; unlimited when absent
    #[serde(default)]
    pub memory_limit_kb: Option<u64>,
    /// Cap on captured output and on files written by the candidate
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: u64,
    /// Submissions admitted to the queue before the server answers busy
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            time_limit_ms: default_time_limit_ms(),
            memory_limit_kb: None,
            output_limit_bytes: default_output_limit_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_time_limit_ms() -> u64 {
    5000
}

fn default_output_limit_bytes() -> u64 {
    1024 * 1024
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Deserialize, Debug, Clone)]
pub struct Problem {
    pub id: u32,
    pub name: String,
    pub title: String,
    pub difficulty: Difficulty,
    /// Entry point the candidate must define
    pub function_name: String,
    pub tests: Vec<TestCase>,
}

/// Ordered easiest-first so problem listings can sort on it directly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestCase {
    pub input: Value,
    pub expected: Value,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunnerSpec {
    /// Label matched (case-insensitively) against the request's language
    pub name: String,
    pub driver: DriverKind,
    /// Argv template; `%DRIVER%` expands to the staged driver file
    pub command: Vec<String>,
}

impl RunnerSpec {
    /// Runner set used when the configuration file does not list any.
    pub fn builtin() -> Vec<RunnerSpec> {
        vec![
            RunnerSpec {
                name: "JavaScript".to_string(),
                driver: DriverKind::Node,
                command: vec!["node".to_string(), "%DRIVER%".to_string()],
            },
            RunnerSpec {
                name: "Python".to_string(),
                driver: DriverKind::Python,
                command: vec![
                    "python3".to_string(),
                    "-B".to_string(),
                    "%DRIVER%".to_string(),
                ],
            },
        ]
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Python,
    Node,
}

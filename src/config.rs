use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const CONFIG_DIR_NAME: &str = "ticketpr";
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "go", "js", "ts", "tsx", "java", "yaml", "json", "yml", "md", "txt", "sh", "jsx", "vue",
    "php", "rb", "cpp", "c", "h", "rs",
];

pub fn config_directory() -> AppResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .ok_or_else(|| {
            AppError::Configuration("unable to locate the user configuration directory".to_string())
        })
}

pub fn config_file_path() -> AppResult<PathBuf> {
    Ok(config_directory()?.join(CONFIG_FILE_NAME))
}

/// Values persisted by `ticketpr config init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredConfig {
    pub jira_base_url: Option<String>,
    pub jira_email: Option<String>,
    pub jira_token: Option<String>,
    pub repository_field: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: Option<String>,
    pub llm_provider: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub base_branch: Option<String>,
    pub workspace_root: Option<String>,
}

impl StoredConfig {
    pub fn load() -> AppResult<Self> {
        Self::load_from(&config_file_path()?)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<StoredConfig>(&contents)
                .map_err(|err| AppError::Configuration(format!("invalid config file: {err}"))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn save(&self) -> AppResult<()> {
        self.save_to(&config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|err| AppError::Configuration(format!("failed to write config: {err}")))?;
        fs::write(path, data)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum LlmProvider {
    Gemini,
    Custom(String),
}

#[derive(Debug, Clone, Default)]
pub struct JiraSettings {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: Option<String>,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
}

/// Budgets, toggles and timeouts handed to each pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_branch: String,
    pub branch_prefix: String,
    pub repository_budget: usize,
    pub external_budget: usize,
    pub instruction_budget: usize,
    pub summarize_external: bool,
    pub recognized_extensions: Vec<String>,
    pub repository_field: String,
    pub remote_timeout: Duration,
    pub external_fetch_timeout: Duration,
    pub retry_backoff: Duration,
    pub pr_files_limit: usize,
    pub max_output_tokens: u32,
    pub prompt_preview_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "ai/".to_string(),
            repository_budget: 6000,
            external_budget: 6000,
            instruction_budget: 4000,
            summarize_external: true,
            recognized_extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            repository_field: "customfield_11712".to_string(),
            remote_timeout: Duration::from_secs(60),
            external_fetch_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(2),
            pr_files_limit: 50,
            max_output_tokens: 8192,
            prompt_preview_chars: 800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jira: JiraSettings,
    pub github: GitHubSettings,
    pub gemini: GeminiSettings,
    pub llm_provider: LlmProvider,
    pub pipeline: PipelineConfig,
    pub workspace_root: PathBuf,
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let stored = StoredConfig::load()?;
        Self::from_sources(stored, |name| env::var(name).ok())
    }

    /// Resolves the stored file against environment overrides.
    pub fn from_sources<F>(stored: StoredConfig, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = PipelineConfig::default();

        let llm_provider = var("TICKETPR_LLM_PROVIDER")
            .or(stored.llm_provider)
            .map(|provider| match provider.to_lowercase().as_str() {
                "gemini" => LlmProvider::Gemini,
                other => LlmProvider::Custom(other.to_string()),
            })
            .unwrap_or(LlmProvider::Gemini);

        let recognized_extensions = match var("TICKETPR_EXTENSIONS") {
            Some(list) => parse_extensions(&list)?,
            None => defaults.recognized_extensions,
        };

        let pipeline = PipelineConfig {
            base_branch: var("DEFAULT_BASE_BRANCH")
                .or(stored.base_branch)
                .unwrap_or(defaults.base_branch),
            branch_prefix: defaults.branch_prefix,
            repository_budget: parse_number(
                "MAX_PROMPT_TOKENS",
                var("MAX_PROMPT_TOKENS"),
                defaults.repository_budget,
            )?,
            external_budget: parse_number(
                "MAX_EXTERNAL_CONTEXT_CHARS",
                var("MAX_EXTERNAL_CONTEXT_CHARS"),
                defaults.external_budget,
            )?,
            instruction_budget: parse_number(
                "MAX_INSTRUCTION_CHARS",
                var("MAX_INSTRUCTION_CHARS"),
                defaults.instruction_budget,
            )?,
            summarize_external: parse_flag(
                "SUMMARIZE_EXTERNAL_CONTEXT",
                var("SUMMARIZE_EXTERNAL_CONTEXT"),
                defaults.summarize_external,
            )?,
            recognized_extensions,
            repository_field: var("TICKETPR_REPOSITORY_FIELD")
                .or(stored.repository_field)
                .unwrap_or(defaults.repository_field),
            remote_timeout: Duration::from_millis(parse_number(
                "REMOTE_TIMEOUT_MS",
                var("REMOTE_TIMEOUT_MS"),
                defaults.remote_timeout.as_millis() as u64,
            )?),
            external_fetch_timeout: Duration::from_millis(parse_number(
                "EXTERNAL_FETCH_TIMEOUT_MS",
                var("EXTERNAL_FETCH_TIMEOUT_MS"),
                defaults.external_fetch_timeout.as_millis() as u64,
            )?),
            retry_backoff: defaults.retry_backoff,
            pr_files_limit: parse_number(
                "GITHUB_PR_FILES_LIMIT",
                var("GITHUB_PR_FILES_LIMIT"),
                defaults.pr_files_limit,
            )?,
            max_output_tokens: defaults.max_output_tokens,
            prompt_preview_chars: parse_number(
                "LOG_PROMPT_PREVIEW_CHARS",
                var("LOG_PROMPT_PREVIEW_CHARS"),
                defaults.prompt_preview_chars,
            )?,
        };

        let workspace_root = var("TICKETPR_WORKSPACE")
            .or(stored.workspace_root)
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("ticketpr"));

        Ok(Self {
            jira: JiraSettings {
                base_url: var("JIRA_URL").or(stored.jira_base_url),
                email: var("JIRA_EMAIL").or(stored.jira_email),
                token: var("JIRA_TOKEN").or(stored.jira_token),
            },
            github: GitHubSettings {
                token: var("GITHUB_TOKEN").or(stored.github_token),
                api_url: var("GITHUB_API_URL")
                    .or(stored.github_api_url)
                    .unwrap_or_else(|| "https://api.github.com".to_string()),
            },
            gemini: GeminiSettings {
                api_key: var("GEMINI_API_KEY").or(stored.gemini_api_key),
                model: var("GEMINI_MODEL")
                    .or(stored.gemini_model)
                    .unwrap_or_else(|| "gemini-1.5-pro".to_string()),
            },
            llm_provider,
            pipeline,
            workspace_root,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> AppResult<T> {
    match raw {
        Some(value) => value.trim().parse::<T>().map_err(|_| {
            AppError::Configuration(format!("{name} must be a non-negative integer, got `{value}`"))
        }),
        None => Ok(default),
    }
}

fn parse_flag(name: &str, raw: Option<String>, default: bool) -> AppResult<bool> {
    match raw.map(|value| value.trim().to_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Configuration(format!(
                "{name} must be a boolean, got `{value}`"
            ))),
        },
    }
}

fn parse_extensions(list: &str) -> AppResult<Vec<String>> {
    let extensions = list
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect::<Vec<_>>();
    if extensions.is_empty() {
        return Err(AppError::Configuration(
            "TICKETPR_EXTENSIONS must list at least one extension".to_string(),
        ));
    }
    Ok(extensions)
}

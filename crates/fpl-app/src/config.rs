// Configuration loading and parsing (optimizer.toml, credentials.toml).

use std::path::{Path, PathBuf};

use fpl_core::lineup::FormationRule;
use fpl_core::squad::SquadRules;
use fpl_data::history::{DEFAULT_WINDOW, MAX_WINDOW};
use fpl_data::ScoreSource;
use fpl_llm::LlmConfig;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub squad: SquadRules,
    pub formation: FormationRule,
    pub solver: SolverConfig,
    pub data: DataConfig,
    pub db_path: String,
    pub llm: LlmSection,
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Client settings for the explanation step.
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.credentials.anthropic_api_key.clone(),
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// optimizer.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire optimizer.toml file.
#[derive(Debug, Clone, Deserialize)]
struct OptimizerFile {
    squad: SquadRules,
    #[serde(default)]
    lineup: LineupSection,
    solver: SolverConfig,
    data: DataConfig,
    database: DatabaseSection,
    llm: LlmSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LineupSection {
    #[serde(default)]
    formation: FormationRule,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    /// Upper bound on one squad solve, in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub source: ScoreSource,
    #[serde(default)]
    pub predictions_csv: String,
    #[serde(default)]
    pub history_csv: String,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_history_window() -> usize {
    DEFAULT_WINDOW
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub model: String,
    pub max_tokens: u32,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/optimizer.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- optimizer.toml (required) ---
    let optimizer_path = config_dir.join("optimizer.toml");
    let optimizer_text = read_file(&optimizer_path)?;
    let file: OptimizerFile =
        toml::from_str(&optimizer_text).map_err(|e| ConfigError::ParseError {
            path: optimizer_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        squad: file.squad,
        formation: file.lineup.formation,
        solver: file.solver,
        data: file.data,
        db_path: file.database.path,
        llm: file.llm,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying any
/// missing default files first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.squad.budget_tenths == 0 {
        return Err(invalid("squad.budget_tenths", "must be greater than 0"));
    }
    if config.squad.club_cap == 0 {
        return Err(invalid("squad.club_cap", "must be greater than 0"));
    }
    if config.solver.timeout_secs == 0 {
        return Err(invalid("solver.timeout_secs", "must be greater than 0"));
    }

    let data = &config.data;
    if !(1..=MAX_WINDOW).contains(&data.history_window) {
        return Err(invalid(
            "data.history_window",
            format!(
                "must be between 1 and {MAX_WINDOW} inclusive, got {}",
                data.history_window
            ),
        ));
    }
    match data.source {
        ScoreSource::Predictions if data.predictions_csv.trim().is_empty() => {
            return Err(invalid(
                "data.predictions_csv",
                "required when data.source = \"predictions\"",
            ));
        }
        ScoreSource::History if data.history_csv.trim().is_empty() => {
            return Err(invalid(
                "data.history_csv",
                "required when data.source = \"history\"",
            ));
        }
        _ => {}
    }

    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }
    if config.llm.model.trim().is_empty() {
        return Err(invalid("llm.model", "must not be empty"));
    }
    if config.llm.max_tokens == 0 {
        return Err(invalid("llm.max_tokens", "must be greater than 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// The repository root holding `defaults/`, found from this crate's
    /// manifest directory.
    fn project_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .find(|p| p.join("defaults/optimizer.toml").exists())
            .map(Path::to_path_buf)
            .expect("defaults/ directory should exist above the crate")
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fpl_config_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("config")).unwrap();
        dir
    }

    fn write_optimizer(dir: &Path, text: &str) {
        fs::write(dir.join("config/optimizer.toml"), text).unwrap();
    }

    const VALID: &str = r#"
[squad]
budget_tenths = 1000
club_cap = 3

[lineup]
formation = "two-forwards"

[solver]
timeout_secs = 30

[data]
source = "history"
history_csv = "data/history.csv"
history_window = 5

[database]
path = "fpl.db"

[llm]
model = "claude-sonnet-4-5"
max_tokens = 800
"#;

    #[test]
    fn load_shipped_defaults() {
        let root = project_root();
        let tmp = scratch_dir("defaults");
        fs::copy(
            root.join("defaults/optimizer.toml"),
            tmp.join("config/optimizer.toml"),
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("shipped defaults should be valid");
        assert_eq!(config.squad, SquadRules::default());
        assert_eq!(config.formation, FormationRule::OneForward);
        assert_eq!(config.data.source, ScoreSource::Predictions);
        assert_eq!(config.data.history_window, DEFAULT_WINDOW);
        assert!(config.solver.timeout_secs > 0);
        assert!(config.credentials.anthropic_api_key.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn load_explicit_values_and_credentials() {
        let tmp = scratch_dir("explicit");
        write_optimizer(&tmp, VALID);
        fs::write(
            tmp.join("config/credentials.toml"),
            "anthropic_api_key = \"sk-test\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.formation, FormationRule::TwoForwards);
        assert_eq!(config.data.source, ScoreSource::History);
        assert_eq!(config.data.history_window, 5);
        assert_eq!(config.db_path, "fpl.db");

        let llm = config.llm_config();
        assert_eq!(llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(llm.max_tokens, 800);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_optimizer_toml_is_not_found() {
        let tmp = scratch_dir("missing");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let tmp = scratch_dir("malformed");
        write_optimizer(&tmp, "[squad\nbudget_tenths = ");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_formation_is_parse_error() {
        let tmp = scratch_dir("formation");
        write_optimizer(&tmp, &VALID.replace("two-forwards", "three-at-the-back"));
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validation_names_the_field() {
        let cases = [
            ("budget_tenths = 1000", "budget_tenths = 0", "squad.budget_tenths"),
            ("club_cap = 3", "club_cap = 0", "squad.club_cap"),
            ("timeout_secs = 30", "timeout_secs = 0", "solver.timeout_secs"),
            ("history_window = 5", "history_window = 11", "data.history_window"),
            ("history_csv = \"data/history.csv\"", "history_csv = \"\"", "data.history_csv"),
            ("max_tokens = 800", "max_tokens = 0", "llm.max_tokens"),
        ];
        for (i, (from, to, field)) in cases.into_iter().enumerate() {
            let tmp = scratch_dir(&format!("validate{i}"));
            write_optimizer(&tmp, &VALID.replace(from, to));
            match load_config_from(&tmp) {
                Err(ConfigError::ValidationError { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error for {field}, got {other:?}"),
            }
            let _ = fs::remove_dir_all(&tmp);
        }
    }

    #[test]
    fn ensure_config_files_copies_and_skips_examples() {
        let tmp = std::env::temp_dir().join(format!("fpl_config_copy_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/optimizer.toml"), VALID).unwrap();
        fs::write(tmp.join("defaults/credentials.toml.example"), "anthropic_api_key = \"\"\n").unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied, vec![tmp.join("config/optimizer.toml")]);
        assert!(!tmp.join("config/credentials.toml.example").exists());

        // Existing files are never overwritten.
        fs::write(tmp.join("config/optimizer.toml"), "# edited").unwrap();
        let copied = ensure_config_files(&tmp).unwrap();
        assert!(copied.is_empty());
        assert_eq!(
            fs::read_to_string(tmp.join("config/optimizer.toml")).unwrap(),
            "# edited"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_any_dirs_fails() {
        let tmp = std::env::temp_dir().join(format!("fpl_config_empty_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }
}

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use holocron_core::{ByType, NominationType, PolicyTable, TypePolicy, UserName};

use crate::notifications::{DispatchDelay, RetryPolicy};

/// Chat channel ids the engine posts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    /// Failures and aggregated job reports.
    pub operators: String,
    /// Archival and review outcomes.
    pub announcements: String,
    /// New nominations and nearing-overdue pings, per type.
    pub nominations: ByType<String>,
    /// Overdue pings go to the type's review board.
    pub boards: ByType<String>,
}

pub const DEFAULT_MENTION: &str = "@Holocron";

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,

    pub wiki_api_url: String,
    /// Prefix for links to articles in chat and social posts.
    pub wiki_article_url: String,
    pub wiki_username: String,
    pub wiki_password: String,
    pub discord_token: String,
    pub bluesky_handle: String,
    pub bluesky_app_password: String,
    pub channels: Channels,
    /// Commands are lines starting with this mention.
    pub mention: String,

    /// Bearer token for `POST /commands`. The endpoint answers 403 when unset.
    pub command_auth_token: Option<String>,
    /// Bearer token for `/status`. The endpoint answers 403 when unset.
    pub status_auth_token: Option<String>,

    pub project_data_page: String,
    pub rankings_page: String,
    /// Listed struck through on the rankings page.
    pub ranking_excluded: Vec<UserName>,
    /// Users who asked not to receive talk page acknowledgments.
    pub talk_opt_out: Vec<UserName>,
    pub ranking_threshold: u64,

    pub detector_interval: Duration,
    /// Pages older than this at startup are tracked without announcements.
    pub startup_grace: chrono::Duration,
    pub objection_interval: Duration,
    /// Local hour of the mid-cycle objection pass.
    pub objection_pass_hour: u32,
    pub utc_offset_hours: i32,

    pub dispatch_poll: Duration,
    /// Queue entries overdue by more than this at startup get a single attempt.
    pub queue_grace: chrono::Duration,
    pub queue_retention: chrono::Duration,
    pub chat_batch_size: usize,
    pub retry: RetryPolicy,
    pub social_delay: DispatchDelay,
    /// Deadline for every call to the wiki, chat or social platform.
    pub call_timeout: Duration,

    pub policy: PolicyTable,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).with_context(|| format!("{} environment variable is required", key))
        };

        let port = parse_or(&var, "HOLOCRON_PORT", 3000u16)?;
        let state_dir = var("HOLOCRON_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let wiki_api_url = var("HOLOCRON_WIKI_API_URL")
            .unwrap_or_else(|| "https://starwars.fandom.com/api.php".to_string());
        let wiki_article_url = var("HOLOCRON_WIKI_ARTICLE_URL")
            .unwrap_or_else(|| "https://starwars.fandom.com/wiki/".to_string());

        let operators = required("HOLOCRON_CHANNEL_OPERATORS")?;
        let announcements = var("HOLOCRON_CHANNEL_ANNOUNCEMENTS").unwrap_or_else(|| operators.clone());
        let nominations = by_type(|kind| {
            var(&format!("HOLOCRON_CHANNEL_{}_NOMINATIONS", kind.abbreviation()))
                .unwrap_or_else(|| announcements.clone())
        });
        let boards = by_type(|kind| {
            var(&format!("HOLOCRON_CHANNEL_{}_BOARD", kind.abbreviation()))
                .unwrap_or_else(|| nominations.get(kind).clone())
        });

        let retry = RetryPolicy {
            max_attempts: parse_or(&var, "HOLOCRON_RETRY_MAX_ATTEMPTS", 5u32)?,
            base_delay: chrono::Duration::seconds(parse_or(&var, "HOLOCRON_RETRY_BASE_SECS", 60i64)?),
            max_delay: chrono::Duration::seconds(parse_or(&var, "HOLOCRON_RETRY_MAX_SECS", 3600i64)?),
        };

        let social_min = parse_or(&var, "HOLOCRON_SOCIAL_DELAY_MIN_MINUTES", 30i64)?;
        let social_max = parse_or(&var, "HOLOCRON_SOCIAL_DELAY_MAX_MINUTES", 40i64)?;
        if social_min < 0 || social_max < social_min {
            bail!("HOLOCRON_SOCIAL_DELAY_MIN_MINUTES must be between 0 and HOLOCRON_SOCIAL_DELAY_MAX_MINUTES");
        }

        let objection_pass_hour = parse_or(&var, "HOLOCRON_OBJECTION_PASS_HOUR", 12u32)?;
        if objection_pass_hour > 23 {
            bail!("HOLOCRON_OBJECTION_PASS_HOUR must be between 0 and 23");
        }
        let utc_offset_hours = parse_or(&var, "HOLOCRON_UTC_OFFSET_HOURS", 0i32)?;
        if !(-12..=14).contains(&utc_offset_hours) {
            bail!("HOLOCRON_UTC_OFFSET_HOURS must be between -12 and 14");
        }

        let policy = match var("HOLOCRON_POLICY_FILE") {
            Some(path) => load_policy_file(Path::new(&path))?,
            None => PolicyTable::default(),
        };

        Ok(Config {
            port,
            state_dir,
            wiki_api_url,
            wiki_article_url,
            wiki_username: required("HOLOCRON_WIKI_USERNAME")?,
            wiki_password: required("HOLOCRON_WIKI_PASSWORD")?,
            discord_token: required("HOLOCRON_DISCORD_TOKEN")?,
            bluesky_handle: required("HOLOCRON_BLUESKY_HANDLE")?,
            bluesky_app_password: required("HOLOCRON_BLUESKY_APP_PASSWORD")?,
            channels: Channels {
                operators,
                announcements,
                nominations,
                boards,
            },
            mention: var("HOLOCRON_MENTION").unwrap_or_else(|| DEFAULT_MENTION.to_string()),
            command_auth_token: parse_auth_token(lookup("HOLOCRON_COMMAND_AUTH_TOKEN")),
            status_auth_token: parse_auth_token(lookup("HOLOCRON_STATUS_AUTH_TOKEN")),
            project_data_page: var("HOLOCRON_PROJECT_DATA_PAGE")
                .unwrap_or_else(|| "User:Holocron/Project data".to_string()),
            rankings_page: var("HOLOCRON_RANKINGS_PAGE")
                .unwrap_or_else(|| "Wookieepedia:Status article rankings".to_string()),
            ranking_excluded: parse_user_list(var("HOLOCRON_RANKING_EXCLUDED")),
            talk_opt_out: parse_user_list(var("HOLOCRON_TALK_OPT_OUT")),
            ranking_threshold: parse_or(&var, "HOLOCRON_RANKING_THRESHOLD", 10u64)?.max(1),
            detector_interval: Duration::from_secs(parse_or(&var, "HOLOCRON_DETECTOR_INTERVAL_SECS", 300u64)?),
            startup_grace: chrono::Duration::minutes(parse_or(&var, "HOLOCRON_STARTUP_GRACE_MINUTES", 20i64)?),
            objection_interval: Duration::from_secs(
                parse_or(&var, "HOLOCRON_OBJECTION_INTERVAL_HOURS", 24u64)? * 3600,
            ),
            objection_pass_hour,
            utc_offset_hours,
            dispatch_poll: Duration::from_secs(parse_or(&var, "HOLOCRON_DISPATCH_POLL_SECS", 30u64)?),
            queue_grace: chrono::Duration::minutes(parse_or(&var, "HOLOCRON_QUEUE_GRACE_MINUTES", 60i64)?),
            queue_retention: chrono::Duration::days(parse_or(&var, "HOLOCRON_QUEUE_RETENTION_DAYS", 7i64)?),
            chat_batch_size: parse_or(&var, "HOLOCRON_CHAT_BATCH_SIZE", 5usize)?,
            retry,
            social_delay: DispatchDelay::Window {
                min: chrono::Duration::minutes(social_min),
                max: chrono::Duration::minutes(social_max),
            },
            call_timeout: Duration::from_secs(parse_or(&var, "HOLOCRON_CALL_TIMEOUT_SECS", 30u64)?),
            policy,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("holocron.db")
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .ok()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn by_type<T>(mut f: impl FnMut(NominationType) -> T) -> ByType<T> {
    ByType::new(
        f(NominationType::Featured),
        f(NominationType::Good),
        f(NominationType::Comprehensive),
    )
}

/// Parse an auth token from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token can never allow unauthenticated access.
pub fn parse_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Comma-separated user names.
pub fn parse_user_list(value: Option<String>) -> Vec<UserName> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(UserName::from)
        .collect()
}

/// Types omitted from the file keep their built-in policy.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default, alias = "FA")]
    featured: Option<TypePolicy>,
    #[serde(default, alias = "GA")]
    good: Option<TypePolicy>,
    #[serde(default, alias = "CA")]
    comprehensive: Option<TypePolicy>,
}

pub fn parse_policy(json: &str) -> Result<PolicyTable> {
    let file: PolicyFile = serde_json::from_str(json).context("policy file is not valid JSON")?;
    let defaults = PolicyTable::default();
    let table = ByType::new(
        file.featured.unwrap_or(defaults.featured),
        file.good.unwrap_or(defaults.good),
        file.comprehensive.unwrap_or(defaults.comprehensive),
    );
    for (kind, policy) in table.iter() {
        if policy.notification_days > policy.overdue_days {
            bail!(
                "{} policy: notification_days ({}) is after overdue_days ({})",
                kind,
                policy.notification_days,
                policy.overdue_days
            );
        }
    }
    Ok(table)
}

fn load_policy_file(path: &Path) -> Result<PolicyTable> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    parse_policy(&json).with_context(|| format!("Invalid policy file {}", path.display()))
}

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub frontend_url: String,
    /// Origin the scan sandbox posts messages from.
    pub trusted_origin: String,
    pub site_id: i64,
    pub scan_timeout: Duration,
    pub store_timeout: Duration,
    pub scheduler_poll_interval: Duration,
    pub scheduler_settle_delay: Duration,
    pub scheduler_batch: i64,
    pub orphan_batch_size: usize,
    pub orphan_batch_delay: Duration,
    pub excluded_rules: Vec<String>,
    pub rules_path: Option<String>,
    /// `(old, new)` rule id pairs applied to stored findings at startup.
    pub rule_id_migrations: Vec<(String, String)>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Self::from_lookup(|key| env::var(key))
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, env::VarError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let frontend_url =
            lookup("FRONTEND_URL").unwrap_or_else(|_| "https://localhost:5173".to_string());

        Ok(Self {
            database_url: lookup("DATABASE_URL")?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
            host: lookup("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "BACKEND_PORT", 3000),
            jwt_secret: lookup("JWT_SECRET")?,
            trusted_origin: lookup("TRUSTED_ORIGIN").unwrap_or_else(|_| frontend_url.clone()),
            frontend_url,
            site_id: parse_or(&lookup, "SITE_ID", 1),
            scan_timeout: Duration::from_secs(parse_or(&lookup, "SCAN_TIMEOUT_SECS", 30)),
            store_timeout: Duration::from_secs(parse_or(&lookup, "STORE_TIMEOUT_SECS", 10)),
            scheduler_poll_interval: Duration::from_secs(
                parse_or(&lookup, "SCHEDULER_POLL_SECS", 30).max(1),
            ),
            scheduler_settle_delay: Duration::from_millis(parse_or(
                &lookup,
                "SCHEDULER_SETTLE_MS",
                2000,
            )),
            scheduler_batch: parse_or(&lookup, "SCHEDULER_BATCH", 5),
            orphan_batch_size: parse_or(&lookup, "ORPHAN_BATCH_SIZE", 100),
            orphan_batch_delay: Duration::from_millis(parse_or(
                &lookup,
                "ORPHAN_BATCH_DELAY_MS",
                250,
            )),
            excluded_rules: lookup("EXCLUDED_RULES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            rules_path: lookup("RULES_PATH").ok().filter(|p| !p.trim().is_empty()),
            rule_id_migrations: lookup("RULE_ID_MIGRATIONS")
                .map(|v| parse_migrations(&v))
                .unwrap_or_default(),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: std::str::FromStr,
{
    lookup(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `old=new,old2=new2`. Malformed pairs are skipped.
fn parse_migrations(value: &str) -> Vec<(String, String)> {
    split_list(value)
        .into_iter()
        .filter_map(|pair| {
            let (old, new) = pair.split_once('=')?;
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() || old == new {
                return None;
            }
            Some((old.to_string(), new.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/accesslens"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.site_id, 1);
        assert_eq!(config.orphan_batch_size, 100);
        assert_eq!(config.scan_timeout, Duration::from_secs(30));
        assert_eq!(config.trusted_origin, "https://localhost:5173");
        assert!(config.excluded_rules.is_empty());
        assert!(config.rules_path.is_none());
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let result = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "secret")]));
        assert!(result.is_err());
    }

    #[test]
    fn lists_and_migrations_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/accesslens"),
            ("JWT_SECRET", "secret"),
            ("EXCLUDED_RULES", "link_blank, , missing_title"),
            ("RULE_ID_MIGRATIONS", "img_alt=img_alt_missing,broken,same=same"),
            ("TRUSTED_ORIGIN", "https://cms.example"),
            ("BACKEND_PORT", "not-a-port"),
        ]))
        .unwrap();

        assert_eq!(config.excluded_rules, vec!["link_blank", "missing_title"]);
        assert_eq!(
            config.rule_id_migrations,
            vec![("img_alt".to_string(), "img_alt_missing".to_string())]
        );
        assert_eq!(config.trusted_origin, "https://cms.example");
        assert_eq!(config.port, 3000);
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use engine_logging::engine_warn;
use harvester_core::{ObjectCategory, RepullPolicy, RepullScope, ReprocessTypes};
use harvester_engine::{
    ClientSettings, CommandTranslator, Credentials, FetchSettings, FragmentFormat, ValidatedUrl,
    DEFAULT_MAX_FRAGMENT_BYTES,
};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "harvester.ron";

/// Contents of the RON configuration file. Every field but the endpoint has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvesterConfig {
    pub api_endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub rewrite_mismatched_urls: bool,
    pub request_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub full_detail_per_page: usize,
    pub ref_detail_per_page: usize,
    pub process_all_pages: bool,
    pub categories: Vec<ObjectCategory>,
    pub max_fetch_workers: usize,
    /// Program and arguments run once per item: raw XML in, N-Triples out.
    pub translate_command: Vec<String>,
    pub translation_workers: usize,
    pub raw_cache_dir: PathBuf,
    pub translated_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub fragment_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub max_fragment_bytes: u64,
    pub fragment_format: FragmentFormat,
    pub subtract_first: bool,
    pub relationship_repull: RepullScope,
    pub relationship_types_to_reprocess: ReprocessTypes,
    /// When set, each run also writes its fragments as one SPARQL update against this graph.
    pub update_graph: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            username: None,
            password: None,
            rewrite_mismatched_urls: false,
            request_interval_ms: 250,
            max_retries: 5,
            retry_delay_ms: 500,
            connect_timeout_secs: 30,
            request_timeout_secs: 300,
            full_detail_per_page: 25,
            ref_detail_per_page: 100,
            process_all_pages: true,
            categories: vec![ObjectCategory::User],
            max_fetch_workers: 4,
            translate_command: Vec::new(),
            translation_workers: 4,
            raw_cache_dir: PathBuf::from("data/raw-records"),
            translated_dir: PathBuf::from("data/translated-records"),
            snapshot_dir: PathBuf::from("data/tdb-output"),
            fragment_dir: PathBuf::from("data/fragments"),
            ledger_file: PathBuf::from("state.txt"),
            max_fragment_bytes: DEFAULT_MAX_FRAGMENT_BYTES,
            fragment_format: FragmentFormat::NTriples,
            subtract_first: true,
            relationship_repull: RepullScope::default(),
            relationship_types_to_reprocess: ReprocessTypes::default(),
            update_graph: None,
            log_file: None,
        }
    }
}

impl HarvesterConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = ron::from_str(text)?;
        config.validated()
    }

    fn validated(self) -> anyhow::Result<Self> {
        if self.api_endpoint.trim().is_empty() {
            bail!("api_endpoint is required");
        }
        let endpoint = self.endpoint()?;
        if endpoint.is_secure() && (self.username.is_none() || self.password.is_none()) {
            bail!("an https endpoint requires both username and password");
        }
        if self.max_fetch_workers == 0 {
            bail!("max_fetch_workers must be at least 1");
        }
        if self.translation_workers == 0 {
            bail!("translation_workers must be at least 1");
        }
        if self.translate_command.is_empty() {
            bail!("translate_command is required");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.categories.is_empty() {
            bail!("at least one object category must be harvested");
        }
        Ok(self)
    }

    /// The API endpoint as a base URL, always ending with `/`.
    pub fn endpoint(&self) -> anyhow::Result<ValidatedUrl> {
        let mut raw = self.api_endpoint.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(ValidatedUrl::parse(&raw)?)
    }

    /// Logs settings that are present but will not be used.
    pub fn log_ignored_settings(&self) {
        let has_credentials = self.username.is_some() || self.password.is_some();
        match self.endpoint() {
            Ok(endpoint) if has_credentials && !endpoint.is_secure() => {
                engine_warn!("ignoring credentials for insecure endpoint {endpoint}");
            }
            _ => {}
        }
    }

    /// Credentials are only carried for an https endpoint.
    pub fn client_settings(&self) -> anyhow::Result<ClientSettings> {
        let endpoint = self.endpoint()?;
        let secure = endpoint.is_secure();
        let mut settings = ClientSettings::new(endpoint);
        settings.credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) if secure => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        settings.rewrite_mismatched_urls = self.rewrite_mismatched_urls;
        settings.max_retries = self.max_retries;
        settings.retry_delay = Duration::from_millis(self.retry_delay_ms);
        Ok(settings)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn repull_policy(&self) -> RepullPolicy {
        RepullPolicy::new(
            self.relationship_repull,
            self.relationship_types_to_reprocess.clone(),
        )
    }

    /// The configured translation command, or `None` when there is none.
    pub fn translator(&self) -> Option<CommandTranslator> {
        let (program, args) = self.translate_command.split_first()?;
        Some(CommandTranslator::new(program, args.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_file_takes_defaults() {
        let config = HarvesterConfig::parse(
            r#"(api_endpoint: "http://localhost:8091/api", translate_command: ["translate"])"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.categories, vec![ObjectCategory::User]);
        assert_eq!(config.fragment_format, FragmentFormat::NTriples);
        assert_eq!(config.repull_policy(), RepullPolicy::default());
        assert_eq!(config.translator().unwrap().program(), Path::new("translate"));
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "http://localhost:8091/api/"
        );
    }

    #[test]
    fn full_file_overrides_defaults() {
        let config = HarvesterConfig::parse(
            r#"(
                api_endpoint: "https://elements.example.org/secure-api/v5.5/",
                username: Some("harvester"),
                password: Some("secret"),
                categories: ["user", "publication", "org-structure"],
                max_fetch_workers: 8,
                translate_command: ["xsltproc", "elements-to-vivo.xsl", "-"],
                fragment_format: N3,
                relationship_repull: AllModifiedObjects,
                relationship_types_to_reprocess: Named(["publication-user-authorship"]),
                update_graph: Some("http://vitro.mannlib.cornell.edu/default/vitro-kb-2"),
                log_file: Some("logs/harvest.log"),
            )"#,
        )
        .unwrap();
        assert_eq!(
            config.categories,
            vec![
                ObjectCategory::User,
                ObjectCategory::Publication,
                ObjectCategory::OrgStructure
            ]
        );
        assert_eq!(config.fragment_format, FragmentFormat::N3);
        assert_eq!(
            config.repull_policy(),
            RepullPolicy::new(
                RepullScope::AllModifiedObjects,
                ReprocessTypes::Named(["publication-user-authorship".to_string()].into()),
            )
        );
        assert_eq!(config.translator().unwrap().program(), Path::new("xsltproc"));
        let settings = config.client_settings().unwrap();
        assert_eq!(settings.credentials.unwrap().username, "harvester");
    }

    #[test]
    fn https_without_credentials_is_rejected() {
        let err = HarvesterConfig::parse(
            r#"(api_endpoint: "https://elements.example.org/api/", translate_command: ["t"])"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("username and password"), "{err}");
    }

    #[test]
    fn credentials_for_http_are_dropped() {
        let config = HarvesterConfig::parse(
            r#"(api_endpoint: "http://elements.example.org/api/", username: Some("u"), password: Some("p"), translate_command: ["t"])"#,
        )
        .unwrap();
        assert_eq!(config.username.as_deref(), Some("u"));
        assert!(config.client_settings().unwrap().credentials.is_none());
    }

    #[test]
    fn bad_endpoint_and_unknown_fields_are_rejected() {
        assert!(HarvesterConfig::parse(
            r#"(api_endpoint: "ftp://example.org/", translate_command: ["t"])"#
        )
        .is_err());
        assert!(HarvesterConfig::parse("()").is_err());
        assert!(HarvesterConfig::parse(
            r#"(api_endpoint: "http://example.org/", translate_command: ["t"], threads: 3)"#
        )
        .is_err());
    }

    #[test]
    fn translation_command_is_required() {
        let err = HarvesterConfig::parse(r#"(api_endpoint: "http://example.org/")"#).unwrap_err();
        assert!(err.to_string().contains("translate_command"), "{err}");
        assert!(HarvesterConfig::default().translator().is_none());
    }
}

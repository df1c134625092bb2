use ingest::config::Config as IngestConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "formrelay".into()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    #[serde(flatten)]
    pub ingest: IngestConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data: Config = serde_yaml::from_reader(file)?;
        data.ingest.validate()?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ingest::config::ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::config::DeploymentMode;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            listener:
                host: 0.0.0.0
                port: 8080
            relay:
                host: 127.0.0.1
                port: 5001
            storage:
                path: /var/lib/formrelay/data.json
            mode: direct
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "formrelay");
        assert_eq!(config.ingest.listener.port, 8080);
        assert_eq!(config.ingest.relay.port, 5001);
        assert_eq!(config.ingest.mode, DeploymentMode::Direct);
    }

    #[test]
    fn empty_sections_use_defaults() {
        let tmp = write_tmp_file("relay: {port: 5001}\n");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.metrics.is_none());
        assert_eq!(config.ingest.relay.port, 5001);
        assert_eq!(config.ingest.listener.port, 3000);
        assert_eq!(config.ingest.mode, DeploymentMode::Relay);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let tmp = write_tmp_file("listener: {host: 0.0.0.0, port: 0}\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ValidationError(_))
        ));

        let tmp = write_tmp_file("mode: [nope\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/formrelay.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}

use crate::config::ChallengeConfig;
use std::time::Duration;

/// Configuration for the embedded browser driving challenges
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size
    pub window_size: (u32, u32),

    /// User agent presented to sites
    pub user_agent: String,

    /// Navigation timeout in seconds
    pub timeout_seconds: u64,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1280, 800),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 30,
            chrome_flags: vec![],
        }
    }
}

impl From<&ChallengeConfig> for BrowserConfig {
    fn from(cfg: &ChallengeConfig) -> Self {
        let mut config = if cfg.stealth {
            Self::stealth_mode()
        } else {
            Self::default()
        };
        config.headless = cfg.headless;
        config.window_size = (cfg.window_width, cfg.window_height);
        config.user_agent = cfg.user_agent.clone();
        config
    }
}

impl BrowserConfig {
    /// Create a configuration that hides the usual automation markers
    pub fn stealth_mode() -> Self {
        let mut config = Self::default();
        config.chrome_flags = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
        ];
        config
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Every launch argument, owned
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.chrome_flags.clone();
        args.push(format!("--user-agent={}", self.user_agent));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.window_size, (1280, 800));
        assert!(config.chrome_flags.is_empty());
    }

    #[test]
    fn test_from_challenge_config() {
        let cfg = ChallengeConfig {
            headless: false,
            user_agent: "TestAgent".into(),
            ..ChallengeConfig::default()
        };
        let config = BrowserConfig::from(&cfg);
        assert!(!config.headless);
        assert!(config
            .chrome_flags
            .iter()
            .any(|f| f.contains("AutomationControlled")));
        assert!(config.launch_args().contains(&"--user-agent=TestAgent".to_string()));
    }
}

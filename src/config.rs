use std::env;
use std::path::PathBuf;

/// Application configuration, sourced entirely from the environment.
///
/// Mirrors the teacher's dev/prod distinction: under `DEV_MODE=true`, every
/// variable falls back to a sane local default; otherwise the variables that
/// have no safe default are required and startup fails fast if they're missing.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub base_url: String,
    pub api_password: Option<String>,
    pub global_proxies: Vec<String>,
    pub vavoo_proxies: Vec<String>,
    pub dlhd_proxies: Vec<String>,
    pub dlhd_cache_path: PathBuf,
    pub is_dev: bool,
}

fn parse_proxy_list(var: &str) -> Vec<String> {
    env::var(var)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let port: u16 = env::var("PORT").unwrap_or_else(|_| "7860".to_string()).parse()?;

        let bind = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        let base_url = if is_dev {
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"))
        } else {
            env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?
        };

        let api_password = env::var("API_PASSWORD").ok().filter(|s| !s.is_empty());

        // GLOBAL_PROXY applies to every extractor family unless a more specific
        // pool is configured for that family.
        let global_proxies = parse_proxy_list("GLOBAL_PROXY");
        let vavoo_proxies = parse_proxy_list("VAVOO_PROXY");
        let dlhd_proxies = parse_proxy_list("DLHD_PROXY");

        let dlhd_cache_path = env::var("DLHD_CACHE_PATH")
            .unwrap_or_else(|_| ".dlhd_cache".to_string())
            .into();

        Ok(Config {
            port,
            bind,
            base_url,
            api_password,
            global_proxies,
            vavoo_proxies,
            dlhd_proxies,
            dlhd_cache_path,
            is_dev,
        })
    }

    /// Proxy pool for a given extractor family, falling back to the global pool.
    pub fn proxies_for(&self, family: &str) -> &[String] {
        let specific = match family {
            "vavoo" => &self.vavoo_proxies,
            "dlhd" => &self.dlhd_proxies,
            _ => return &self.global_proxies,
        };
        if specific.is_empty() {
            &self.global_proxies
        } else {
            specific
        }
    }
}

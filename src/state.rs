//! Shared, read-mostly state handed to every accepted connection.

use std::sync::Arc;

use crate::admission::Admission;
use crate::assets::Assets;
use crate::config::Config;
use crate::net::mint_random_path;
use crate::template::Template;

pub struct AppState {
    pub config: Arc<Config>,
    pub admission: Arc<Admission>,
    pub assets: Assets,
    pub title_template: Template,
    /// Random path segment prefixing every route, when `enable_random_url`
    /// is set; empty string otherwise.
    pub url_prefix: String,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let title_template =
            Template::compile(&config.title_format).expect("title_format validated at boot");
        let assets = Assets::new(&config);
        let admission = Admission::new(config.max_connection, config.once, config.idle_timeout());
        let url_prefix = if config.enable_random_url {
            mint_random_path(config.random_url_length)
        } else {
            String::new()
        };
        Self {
            config: Arc::new(config),
            admission,
            assets,
            title_template,
            url_prefix,
        }
    }

    /// Strip the random URL prefix from a request path, if configured.
    /// Returns `None` if the prefix is configured but absent from the path.
    pub fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.url_prefix.is_empty() {
            return Some(path);
        }
        let trimmed = path.strip_prefix('/')?;
        match trimmed.strip_prefix(&self.url_prefix) {
            Some("") => Some("/"),
            Some(rest) => Some(rest),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix_passthrough_when_unconfigured() {
        let config = Config::default();
        let state = AppState::new(config);
        assert_eq!(state.strip_prefix("/ws"), Some("/ws"));
    }

    #[test]
    fn strip_prefix_matches_configured_segment() {
        let mut config = Config::default();
        config.enable_random_url = true;
        config.random_url_length = 8;
        let mut state = AppState::new(config);
        state.url_prefix = "abc12345".to_string();
        assert_eq!(state.strip_prefix("/abc12345/ws"), Some("/ws"));
        assert_eq!(state.strip_prefix("/abc12345"), Some("/"));
        assert_eq!(state.strip_prefix("/wrong/ws"), None);
    }
}

//! Static asset serving: the embedded front-end bundle, with an optional
//! on-disk `index_file` override.

use std::borrow::Cow;
use std::path::PathBuf;

use rust_embed::RustEmbed;
use tracing::warn;

use crate::config::Config;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Bundle;

/// Capability wrapping either the embedded asset bundle or a filesystem
/// override for `index.html`, so the rest of the server stays agnostic of
/// `rust-embed` vs. plain file reads.
pub struct Assets {
    index_override: Option<PathBuf>,
}

impl Assets {
    pub fn new(config: &Config) -> Self {
        Self {
            index_override: config.index_file.clone(),
        }
    }

    /// Open a static asset by path (e.g. `"index.html"`, `"js/gotty.js"`).
    /// Returns `None` if the path is not embedded and has no override.
    pub fn open(&self, path: &str) -> Option<Cow<'static, [u8]>> {
        if path == "index.html" {
            if let Some(override_path) = &self.index_override {
                return match std::fs::read(override_path) {
                    Ok(bytes) => Some(Cow::Owned(bytes)),
                    Err(e) => {
                        warn!(path = %override_path.display(), error = %e, "index_file override unreadable");
                        None
                    }
                };
            }
        }
        Bundle::get(path).map(|file| file.data)
    }

    /// Generate the `auth_token.js` payload the front-end loads to learn the
    /// shared credential it must echo back in the WebSocket `InitMessage`.
    pub fn auth_token_js(&self, config: &Config) -> String {
        let token = config.credential.clone().unwrap_or_default();
        format!("var gotty_auth_token = '{}';", escape_js(&token))
    }
}

fn escape_js(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

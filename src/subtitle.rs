use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One timed utterance of a subtitle track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleLine {
    #[serde(default)]
    pub from: f64,
    #[serde(default)]
    pub to: f64,
    pub content: String,
}

/// Subtitle document as served by the platform
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubtitleDocument {
    #[serde(default)]
    pub body: Vec<SubtitleLine>,
}

impl SubtitleDocument {
    /// Line-per-utterance plain text
    pub fn to_plain_text(&self) -> String {
        let mut text = String::new();
        for line in &self.body {
            text.push_str(line.content.trim_end_matches(['\r', '\n']));
            text.push('\n');
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Replace filesystem-illegal characters with `_` so the value can be used
/// as part of a file name
pub fn sanitize_filename(name: &str) -> String {
    static ILLEGAL: OnceLock<Regex> = OnceLock::new();
    let re = ILLEGAL.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("valid regex"));
    re.replace_all(name, "_").into_owned()
}

//! Configuration for local page transforms and the page classifier.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::classify::PageType;

/// Placeholder replaced by the input file path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// An external command applied to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Binary to run.
    pub program: PathBuf,
    /// Arguments, with `{input}` and `{output}` placeholders.
    pub args: Vec<String>,
    /// Extension of the produced file (without dot). Keeps the input
    /// extension when unset.
    #[serde(default)]
    pub output_extension: Option<String>,
}

impl CommandSpec {
    /// Creates a spec.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output_extension: None,
        }
    }

    /// Sets the output extension.
    pub fn with_output_extension(mut self, ext: impl Into<String>) -> Self {
        self.output_extension = Some(ext.into());
        self
    }

    /// Arguments with placeholders substituted.
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    /// Whether both placeholders appear somewhere in the arguments.
    pub fn has_placeholders(&self) -> bool {
        let joined = self.args.join(" ");
        joined.contains(INPUT_PLACEHOLDER) && joined.contains(OUTPUT_PLACEHOLDER)
    }
}

/// Commands for the local per-page stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformsConfig {
    /// JPEG 2000 to PNG conversion.
    #[serde(default = "default_convert")]
    pub convert: CommandSpec,

    /// Deskew (and optional crop).
    #[serde(default = "default_deskew")]
    pub deskew: CommandSpec,

    /// Threshold to a bilevel image.
    #[serde(default = "default_threshold")]
    pub threshold: CommandSpec,

    /// Extensions picked up by the convert stage.
    #[serde(default = "default_convert_extensions")]
    pub convert_extensions: Vec<String>,

    /// Timeout for one command run in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_convert() -> CommandSpec {
    CommandSpec::new("magick", [INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER]).with_output_extension("png")
}

fn default_deskew() -> CommandSpec {
    CommandSpec::new(
        "magick",
        [INPUT_PLACEHOLDER, "-deskew", "40%", "+repage", OUTPUT_PLACEHOLDER],
    )
}

fn default_threshold() -> CommandSpec {
    // 190 of 255
    CommandSpec::new(
        "magick",
        [INPUT_PLACEHOLDER, "-threshold", "74.5%", "-monochrome", OUTPUT_PLACEHOLDER],
    )
}

fn default_convert_extensions() -> Vec<String> {
    vec!["jp2".to_string()]
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            convert: default_convert(),
            deskew: default_deskew(),
            threshold: default_threshold(),
            convert_extensions: default_convert_extensions(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Configuration for the HTTP page classifier used by the sort stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Endpoint receiving raw image bytes and answering `{"label": ...}`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Labels the sort stage accepts.
    #[serde(default = "default_labels")]
    pub labels: Vec<PageType>,

    /// Request timeout in seconds.
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,

    /// Parallel classification requests.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8090/classify".to_string()
}

fn default_labels() -> Vec<PageType> {
    vec![PageType::BlankPage, PageType::ContentPage]
}

fn default_classifier_timeout() -> u64 {
    60
}

fn default_max_workers() -> usize {
    4
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            labels: default_labels(),
            timeout_secs: default_classifier_timeout(),
            max_workers: default_max_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args() {
        let spec = CommandSpec::new("magick", ["{input}", "-deskew", "40%", "{output}"]);
        let args = spec.render_args(Path::new("/in/a.png"), Path::new("/out/a.png"));
        assert_eq!(args, vec!["/in/a.png", "-deskew", "40%", "/out/a.png"]);
    }

    #[test]
    fn test_embedded_placeholders() {
        let spec = CommandSpec::new("tool", ["--src={input}", "--dst={output}"]);
        assert!(spec.has_placeholders());
        let args = spec.render_args(Path::new("a"), Path::new("b"));
        assert_eq!(args, vec!["--src=a", "--dst=b"]);
    }

    #[test]
    fn test_missing_placeholder() {
        let spec = CommandSpec::new("tool", ["{input}"]);
        assert!(!spec.has_placeholders());
    }

    #[test]
    fn test_defaults_have_placeholders() {
        let config = TransformsConfig::default();
        assert!(config.convert.has_placeholders());
        assert!(config.deskew.has_placeholders());
        assert!(config.threshold.has_placeholders());
        assert_eq!(config.convert.output_extension.as_deref(), Some("png"));
    }

    #[test]
    fn test_classifier_labels_from_toml() {
        let config: ClassifierConfig =
            toml::from_str(r#"labels = ["blank_page", "content_page", "title_page"]"#).unwrap();
        assert_eq!(config.labels.len(), 3);
        assert_eq!(config.labels[2], PageType::TitlePage);
    }
}

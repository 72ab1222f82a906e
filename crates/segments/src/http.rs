//! Remote segment downloads over blocking HTTP.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::errors::SegmentError;
use crate::source::SegmentSource;

/// Fetches segment files from a model hub.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url_template: String,
}

impl HttpSource {
    pub const HUGGING_FACE: &'static str = "https://huggingface.co/{model}/resolve/main/{file}";

    pub fn new() -> Result<Self, SegmentError> {
        Self::with_template(Self::HUGGING_FACE, Duration::from_secs(600))
    }

    /// `template` must contain `{model}` and `{file}` placeholders.
    pub fn with_template(template: impl Into<String>, timeout: Duration) -> Result<Self, SegmentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SegmentError::Fetch {
                model_id: String::new(),
                file: String::new(),
                message: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self {
            client,
            url_template: template.into(),
        })
    }

    pub fn url_for(&self, model_id: &str, file: &str) -> String {
        self.url_template
            .replace("{model}", model_id)
            .replace("{file}", file)
    }
}

impl SegmentSource for HttpSource {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError> {
        let url = self.url_for(model_id, file);
        let fetch_err = |message: String| SegmentError::Fetch {
            model_id: model_id.to_string(),
            file: file.to_string(),
            message,
        };

        log::info!("downloading {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| fetch_err(format!("HTTP request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {} from {url}", response.status())));
        }

        let declared = response.content_length();
        let bytes = response
            .bytes()
            .map_err(|err| fetch_err(format!("failed to read body: {err}")))?;
        if let Some(expected) = declared {
            let actual = bytes.len() as u64;
            if actual < expected {
                return Err(SegmentError::Truncated {
                    file: file.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(bytes.to_vec())
    }
}

//! Chat prompt rendering.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_IMAGE_PROMPT: &str = "Describe this image.";

const VISION_MARKERS: &str = "<|vision_start|><|vision_end|>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// System and user turns followed by an open assistant turn.
    #[default]
    Chat,
    /// The prompt text is tokenized as given.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub format: PromptFormat,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Substituted when the caller's prompt is empty.
    #[serde(default = "default_image_prompt")]
    pub default_prompt: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            format: PromptFormat::Chat,
            system_prompt: default_system_prompt(),
            default_prompt: default_image_prompt(),
        }
    }
}

impl PromptTemplate {
    pub fn raw() -> Self {
        Self {
            format: PromptFormat::Raw,
            ..Self::default()
        }
    }

    pub fn render(&self, prompt: &str, with_image: bool) -> String {
        let prompt = if prompt.trim().is_empty() {
            self.default_prompt.as_str()
        } else {
            prompt
        };
        match self.format {
            PromptFormat::Raw => prompt.to_string(),
            PromptFormat::Chat => {
                let markers = if with_image { VISION_MARKERS } else { "" };
                format!(
                    "\n<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{markers}{prompt}<|im_end|>\n<|im_start|>assistant\n",
                    self.system_prompt
                )
            }
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_image_prompt() -> String {
    DEFAULT_IMAGE_PROMPT.to_string()
}

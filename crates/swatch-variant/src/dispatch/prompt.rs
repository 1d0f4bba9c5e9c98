//! Per-slot prompt construction.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Result;
use crate::types::VariantInput;

/// Builds the prompts of one job, one per slot.
///
/// Returning a number of prompts different from `width` counts as a
/// construction failure.
pub trait PromptSource: Send + Sync {
    /// Returns exactly `width` prompts for the given input.
    fn prompts(&self, input: &VariantInput, width: usize) -> Result<Vec<String>>;
}

impl<F> PromptSource for F
where
    F: Fn(&VariantInput, usize) -> Result<Vec<String>> + Send + Sync,
{
    fn prompts(&self, input: &VariantInput, width: usize) -> Result<Vec<String>> {
        self(input, width)
    }
}

/// Length and depth of the generated fabric description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[cfg_attr(feature = "config", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisMode {
    /// A 15 to 20 word summary.
    #[default]
    Short,
    /// A description of up to 65 words.
    Long,
}

impl AnalysisMode {
    fn length(self) -> &'static str {
        match self {
            Self::Short => "in exactly 15–20 words",
            Self::Long => "in no more than 65 words",
        }
    }

    fn details(self) -> &'static str {
        match self {
            Self::Short => "Material, Color, Pattern, and Texture",
            Self::Long => {
                "Material & Composition, Color Details, Pattern Type, Background Texture, \
                 Surface Finish"
            }
        }
    }

    fn closing(self) -> &'static str {
        match self {
            Self::Short => "Be concise and precise.",
            Self::Long => "Use precise textile terms.",
        }
    }

    /// Returns the instruction shared by every slot.
    pub fn instruction(self) -> String {
        format!(
            "You are a textile expert. Analyze this fabric image and describe {}: {}. {}",
            self.length(),
            self.details(),
            self.closing()
        )
    }
}

impl PromptSource for AnalysisMode {
    fn prompts(&self, _input: &VariantInput, width: usize) -> Result<Vec<String>> {
        let instruction = self.instruction();
        Ok((1..=width)
            .map(|variation| {
                format!(
                    "{instruction}\nNote: This is variation {variation}. \
                     Provide a slightly different perspective."
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_one_distinct_prompt_per_slot() -> anyhow::Result<()> {
        let input = VariantInput::png(&b"img"[..]);
        let prompts = AnalysisMode::Short.prompts(&input, 6)?;

        assert_eq!(prompts.len(), 6);
        assert!(prompts[0].contains("variation 1."));
        assert!(prompts[5].contains("variation 6."));
        assert!(prompts.iter().all(|p| p.contains("15–20 words")));
        Ok(())
    }

    #[test]
    fn test_long_mode_asks_for_surface_finish() -> anyhow::Result<()> {
        let input = VariantInput::png(&b"img"[..]);
        let prompts = AnalysisMode::Long.prompts(&input, 1)?;
        assert!(prompts[0].contains("Surface Finish"));
        assert!(prompts[0].contains("65 words"));
        Ok(())
    }

    #[test]
    fn test_mode_parses_lowercase() -> anyhow::Result<()> {
        assert_eq!("long".parse::<AnalysisMode>()?, AnalysisMode::Long);
        assert_eq!(AnalysisMode::Short.to_string(), "short");
        Ok(())
    }

    #[test]
    fn test_closure_prompt_source() {
        let failing = |_: &VariantInput, _: usize| -> Result<Vec<String>> {
            Err(Error::prompt("template missing"))
        };
        let input = VariantInput::png(&b"img"[..]);
        assert!(failing.prompts(&input, 6).is_err());
    }
}

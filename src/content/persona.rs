use serde::{Deserialize, Serialize};

const DEFAULT_LANGUAGE: &str = "English";

const NEUTRAL_SYSTEM_PROMPT: &str = "You are an experienced blog writer. \
Write clear, factual, well structured content in English.";

/// Author persona used as the system prompt of every generation call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    /// Store id
    pub id: Option<i64>,
    /// Unique name
    pub name: String,
    pub description: String,
    /// e.g. "friendly", "expert", "casual"
    pub tone: String,
    pub language: String,
    /// Free-form extra instructions appended to the prompt
    pub instructions: String,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Writing language, English when unset
    pub fn language(&self) -> &str {
        let language = self.language.trim();
        if language.is_empty() {
            DEFAULT_LANGUAGE
        } else {
            language
        }
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}", self.name.trim());
        if !self.description.trim().is_empty() {
            prompt.push_str(", ");
            prompt.push_str(self.description.trim());
        }
        prompt.push_str(".\n");

        if !self.tone.trim().is_empty() {
            prompt.push_str(&format!("Write in a {} tone.\n", self.tone.trim()));
        }
        prompt.push_str(&format!("Always write in {}.\n", self.language()));

        if !self.instructions.trim().is_empty() {
            prompt.push_str(self.instructions.trim());
            prompt.push('\n');
        }
        prompt
    }
}

/// System prompt for an optional persona
pub fn system_prompt_for(persona: Option<&Persona>) -> String {
    match persona {
        Some(p) => p.system_prompt(),
        None => NEUTRAL_SYSTEM_PROMPT.to_string(),
    }
}

/// Writing language for an optional persona
pub fn language_for(persona: Option<&Persona>) -> &str {
    persona.map(Persona::language).unwrap_or(DEFAULT_LANGUAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_includes_all_fields() {
        let persona = Persona::new("Anna")
            .with_description("a travel blogger from Kraków")
            .with_tone("friendly")
            .with_language("Polish")
            .with_instructions("Avoid superlatives.");
        let prompt = persona.system_prompt();

        assert!(prompt.starts_with("You are Anna, a travel blogger from Kraków."));
        assert!(prompt.contains("friendly tone"));
        assert!(prompt.contains("Always write in Polish."));
        assert!(prompt.ends_with("Avoid superlatives.\n"));
    }

    #[test]
    fn test_defaults() {
        let persona = Persona::new("Bob");
        assert_eq!(persona.language(), "English");
        assert!(!persona.system_prompt().contains("tone"));
        assert!(system_prompt_for(None).contains("blog writer"));
        assert_eq!(language_for(None), "English");
    }
}

//! System-instruction assembly from settings.
//!
//! The final instruction is the prompt template plus generated audience and
//! complexity sections, so the storyteller always knows who it is talking to
//! and how simple to keep the language.

use crate::settings::{AppSettings, ListenerProfile};

/// Complexity band description for a 1–10 story level.
pub fn level_description(level: u8) -> &'static str {
    match level {
        0..=2 => {
            "The story should be extremely simple, using single-clause sentences \
             and vocabulary a 2-3 year old can understand."
        }
        3..=4 => {
            "The story should be simple, with basic sentence structures and \
             vocabulary suitable for a 3-5 year old."
        }
        5..=6 => {
            "The story can have slightly more complex sentences and a broader \
             vocabulary, suitable for a 5-7 year old."
        }
        7..=8 => {
            "The story should be more descriptive, with compound sentences and \
             richer vocabulary for a 7-9 year old."
        }
        _ => {
            "The story can be complex and nuanced, with sophisticated vocabulary \
             and themes suitable for a child aged 10+."
        }
    }
}

/// Render an age without a trailing `.0` for whole years.
fn format_age(age_years: f32) -> String {
    if (age_years - age_years.round()).abs() < 0.05 {
        format!("{}", age_years.round() as u32)
    } else {
        format!("{age_years:.1}")
    }
}

/// Who is listening, phrased for the storyteller.
pub fn audience_description(listeners: &[ListenerProfile]) -> String {
    match listeners {
        [] => "The audience is a young child.".to_string(),
        [only] => format!(
            "The audience is {}, a {}-year-old child. Tailor the story for their \
             age and address them by name.",
            only.name,
            format_age(only.age_years)
        ),
        many => {
            let roster = many
                .iter()
                .map(|l| format!("{} ({} years old)", l.name, format_age(l.age_years)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "The audience is {} children: {}. Please address each of them in \
                 the story.",
                many.len(),
                roster
            )
        }
    }
}

/// Main-character notes for the illustration prompt step.
pub fn character_notes(listeners: &[ListenerProfile]) -> String {
    match listeners {
        [] => String::new(),
        [only] => format!(
            "The main character is a young child named {}.",
            only.name
        ),
        many => {
            let names = many
                .iter()
                .map(|l| l.name.as_str())
                .collect::<Vec<_>>()
                .join(" and ");
            format!("The main characters are young children named {names}.")
        }
    }
}

/// The complete system instruction sent at connect time.
pub fn build_system_instruction(settings: &AppSettings) -> String {
    format!(
        "{}\n\n{}\n\nStorytelling Level: {}/10. {}",
        settings.system_prompt.trim(),
        audience_description(&settings.listeners),
        settings.story_level,
        level_description(settings.story_level)
    )
}

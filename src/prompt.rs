use crate::error::RetrievalError;

pub const NO_MATCHES_MESSAGE: &str = "No similar items found in the nutrition database.";
pub const UNAVAILABLE_MESSAGE: &str = "Nutrition retrieval is unavailable right now.";

/// Joins retrieved lines into the context block of a prompt.
pub fn grounding_context(lines: &[String]) -> String {
    lines.join("\n")
}

/// Builds the meal-analysis prompt sent to the completion service.
pub fn meal_prompt(description: &str, context_lines: &[String]) -> String {
    let mut prompt = format!(
        "Analyze this meal. Describe what you see and estimate ingredient breakdown. \
         User description: {}",
        description.trim()
    );
    if !context_lines.is_empty() {
        prompt.push_str(
            "\nHere are some context with the top entries in the nutrition database \
             for reference for caloric calculations:\n",
        );
        prompt.push_str(&grounding_context(context_lines));
    }
    prompt
}

/// End-user text for a retrieval outcome. An empty result and a broken
/// index or store read differently.
pub fn user_message(outcome: &Result<Vec<String>, RetrievalError>) -> String {
    match outcome {
        Ok(lines) if lines.is_empty() => NO_MATCHES_MESSAGE.to_string(),
        Ok(lines) => grounding_context(lines),
        Err(e) if e.is_unavailable() => format!("{} ({})", UNAVAILABLE_MESSAGE, e),
        Err(e) => format!("Retrieval failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_meal_prompt_includes_context_block() {
        let lines = vec!["Banana, Fruits".to_string(), "Apple, Fruits".to_string()];
        let prompt = meal_prompt("  Toast with eggs and avocado. ", &lines);
        assert!(prompt.contains("User description: Toast with eggs and avocado."));
        assert!(prompt.ends_with("caloric calculations:\nBanana, Fruits\nApple, Fruits"));
    }

    #[test]
    fn test_meal_prompt_without_context() {
        let prompt = meal_prompt("soup", &[]);
        assert!(prompt.ends_with("User description: soup"));
        assert!(!prompt.contains("nutrition database"));
    }

    #[test]
    fn test_user_message_distinguishes_empty_from_unavailable() {
        assert_eq!(user_message(&Ok(Vec::new())), NO_MATCHES_MESSAGE);

        let missing = Err(RetrievalError::NotFound(PathBuf::from("food_index.fidx")));
        assert!(user_message(&missing).starts_with(UNAVAILABLE_MESSAGE));

        let bad_k = Err(RetrievalError::InvalidArgument("k must be at least 1".into()));
        assert!(user_message(&bad_k).starts_with("Retrieval failed"));

        assert_eq!(user_message(&Ok(vec!["a".into(), "b".into()])), "a\nb");
    }
}

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::{ModelMode, PromptMessage, PromptTemplate};

pub const QUESTION_3D_SYSTEM_PROMPT: &str = r#"### Job description
You are a translation and content extraction assistant.
### Task
If the input is not in English, translate it into English first. Then extract what the user wants generated as a 3D file. Your final output is an English text describing a 3D object.
### Format
The input may be text in any language.
### Constraints
Only English characters are allowed. Do not output anything that does not describe the object.
### Memory
Here is the chat history between the human and the assistant, inside <histories></histories> XML tags.
<histories>
{histories}
</histories>
"#;

pub const QUESTION_3D_USER_PROMPT_1: &str = "生成一个2*3的乐高积木块";

pub const QUESTION_3D_ASSISTANT_PROMPT_1: &str = "Generate a 2 * 3 LEGO block";

pub const QUESTION_3D_COMPLETION_PROMPT: &str = r#"### Job description
You are a translation and content extraction assistant.
### Task
If the input is not in English, translate it into English first. Then extract what the user wants generated as a 3D file. Your final output is an English text describing a 3D object.
### Format
The input may be text in any language.
### Constraints
Only English characters are allowed. Do not output anything that does not describe the object.
### Example
Here is an example exchange between the human and the assistant, inside <example></example> XML tags.
<example>
User: "生成一个2*3的乐高积木块"
Assistant: "Generate a 2 * 3 LEGO block"
</example>
### Memory
Here is the chat history between the human and the assistant, inside <histories></histories> XML tags.
<histories>
{histories}
</histories>
### User input
{input_text}
### Assistant output
"#;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(histories|input_text)\}").unwrap());

/// Substitutes `{histories}` and `{input_text}` in a single pass, so placeholder-like text inside
/// the substituted values is left alone.
fn fill(template: &str, histories: &str, input_text: &str) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "histories" => histories.to_string(),
            _ => input_text.to_string(),
        })
        .into_owned()
}

/// Renders the prompt template for `mode`.
///
/// Chat mode always yields three messages (system, user example, assistant example) and does
/// not carry the query; it is appended when the prompt messages are assembled. Completion mode
/// embeds both the history and the query.
pub fn render_template(mode: ModelMode, histories: &str, input_text: &str) -> PromptTemplate {
    match mode {
        ModelMode::Chat => PromptTemplate::Chat(vec![
            PromptMessage::system(fill(QUESTION_3D_SYSTEM_PROMPT, histories, input_text)),
            PromptMessage::user(QUESTION_3D_USER_PROMPT_1),
            PromptMessage::assistant(QUESTION_3D_ASSISTANT_PROMPT_1),
        ]),
        ModelMode::Completion => {
            PromptTemplate::Completion(fill(QUESTION_3D_COMPLETION_PROMPT, histories, input_text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptMessageRole;

    #[test]
    fn test_chat_template_has_three_messages_in_order() {
        for query in ["", "a red cube", "{input_text}", "一个红色的立方体"] {
            let PromptTemplate::Chat(messages) = render_template(ModelMode::Chat, "", query) else {
                panic!("expected a chat template");
            };
            let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
            assert_eq!(
                roles,
                vec![
                    PromptMessageRole::System,
                    PromptMessageRole::User,
                    PromptMessageRole::Assistant
                ]
            );
        }
    }

    #[test]
    fn test_chat_system_prompt_embeds_history() {
        let PromptTemplate::Chat(messages) =
            render_template(ModelMode::Chat, "Human: hi\nAssistant: hello", "ignored")
        else {
            panic!("expected a chat template");
        };
        assert!(messages[0].text.contains("<histories>\nHuman: hi\nAssistant: hello\n</histories>"));
        assert!(!messages[0].text.contains("{histories}"));
        assert!(!messages.iter().any(|m| m.text.contains("ignored")));
    }

    #[test]
    fn test_completion_template_embeds_history_and_input() {
        let PromptTemplate::Completion(text) =
            render_template(ModelMode::Completion, "Human: earlier turn", "一个红色的立方体")
        else {
            panic!("expected a completion template");
        };
        assert!(text.contains("<histories>\nHuman: earlier turn\n</histories>"));
        assert!(text.contains("### User input\n一个红色的立方体\n### Assistant output"));
        assert!(!text.contains("{input_text}"));
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let PromptTemplate::Completion(text) =
            render_template(ModelMode::Completion, "{input_text}", "{histories}")
        else {
            panic!("expected a completion template");
        };
        assert!(text.contains("<histories>\n{input_text}\n</histories>"));
        assert!(text.contains("### User input\n{histories}\n"));
    }
}

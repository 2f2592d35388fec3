use anyhow::Result;
use futures::StreamExt;

use crate::models::chat::{ChatMessage, ModelId};
use crate::services::llm::LlmProvider;

/// Drive the generation collaborator in streaming mode. Every token is handed
/// to `on_token` in emission order before the next one is pulled; the
/// returned text is the exact concatenation of everything the sink saw.
///
/// Delivery is the caller's concern: the sink typically publishes to the
/// session's broadcast group.
pub async fn generate_streamed<F>(
    llm: &dyn LlmProvider,
    model: ModelId,
    prompt: Vec<ChatMessage>,
    mut on_token: F,
) -> Result<String>
where
    F: FnMut(&str) + Send,
{
    let mut stream = llm.generate_stream(model, prompt).await?;
    let mut full_response = String::new();

    while let Some(token) = stream.next().await {
        let token = token?;
        on_token(&token);
        full_response.push_str(&token);
    }

    Ok(full_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::MockLlmProvider;

    fn token_stream(tokens: Vec<Result<String>>) -> crate::services::llm::TokenStream {
        Box::pin(futures::stream::iter(tokens))
    }

    #[tokio::test]
    async fn full_text_equals_concatenation_of_sink_tokens() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_stream().returning(|_, _| {
            Ok(token_stream(
                ["Refunds", " are", " processed", " within", " 14", " days"]
                    .into_iter()
                    .map(|t| Ok(t.to_string()))
                    .collect(),
            ))
        });

        let mut seen = Vec::new();
        let full = generate_streamed(&llm, ModelId::Gemma3_1b, vec![], |t| {
            seen.push(t.to_string());
        })
        .await
        .unwrap();

        assert_eq!(full, "Refunds are processed within 14 days");
        assert_eq!(full, seen.concat());
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test]
    async fn tokens_reach_sink_in_emission_order() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_stream().returning(|_, _| {
            Ok(token_stream(
                ["a", "b", "c"].into_iter().map(|t| Ok(t.to_string())).collect(),
            ))
        });

        let mut seen = Vec::new();
        generate_streamed(&llm, ModelId::Gemma3_1b, vec![], |t| {
            seen.push(t.to_string());
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn mid_stream_error_propagates_after_partial_delivery() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_stream().returning(|_, _| {
            Ok(token_stream(vec![
                Ok("Sor".to_string()),
                Err(anyhow::anyhow!("connection reset")),
            ]))
        });

        let mut seen = Vec::new();
        let result = generate_streamed(&llm, ModelId::Gemma3_1b, vec![], |t| {
            seen.push(t.to_string());
        })
        .await;

        // The partial token was delivered live, but the turn as a whole fails.
        assert_eq!(seen, vec!["Sor"]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_text() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_stream()
            .returning(|_, _| Ok(token_stream(vec![])));

        let mut calls = 0usize;
        let full = generate_streamed(&llm, ModelId::Gemma3_1b, vec![], |_| calls += 1)
            .await
            .unwrap();

        assert_eq!(full, "");
        assert_eq!(calls, 0);
    }
}

use async_trait::async_trait;

use courier_core::{CourierError, Result, Role, ToolCall};

use crate::provider::*;

/// OpenAI-compatible chat-completions backend (works with OpenAI, Azure,
/// Together, vLLM, …).
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    provider_name: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            provider_name: "openai-compat".into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    fn build_messages(request: &ProviderRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }

        for turn in &request.turns {
            match turn.role {
                Role::System => {
                    messages.push(serde_json::json!({
                        "role": "system",
                        "content": turn.content,
                    }));
                }
                Role::User => {
                    messages.push(serde_json::json!({
                        "role": "user",
                        "content": turn.content,
                    }));
                }
                Role::Assistant => {
                    if turn.tool_calls.is_empty() {
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": turn.content,
                        }));
                    } else {
                        // Assistant turns with tool calls must carry the
                        // tool_calls array, content may be null.
                        let tc: Vec<serde_json::Value> = turn
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.tool_name,
                                        "arguments": serde_json::to_string(&tc.arguments)
                                            .unwrap_or_default(),
                                    }
                                })
                            })
                            .collect();
                        let content = if turn.content.is_empty() {
                            serde_json::Value::Null
                        } else {
                            serde_json::json!(turn.content)
                        };
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": content,
                            "tool_calls": tc,
                        }));
                    }
                }
                Role::Tool => {
                    for result in &turn.tool_results {
                        messages.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": result.tool_call_id,
                            "content": result.content,
                        }));
                    }
                }
            }
        }

        messages
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(
        &self,
        request: &ProviderRequest,
        credentials: &Credentials,
    ) -> Result<ProviderResponse> {
        let messages = Self::build_messages(request);

        let mut body = serde_json::json!({
            "model": &request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", credentials.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CourierError::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            if status.as_u16() == 429 {
                let retry_after_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                return Err(CourierError::RateLimited { retry_after_secs });
            }
            let text = resp.text().await.unwrap_or_default();
            return Err(CourierError::Provider(format!("HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CourierError::Provider(e.to_string()))?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let calls: Vec<ToolCall> = choice["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            id: c["id"].as_str()?.to_string(),
                            tool_name: c["function"]["name"].as_str()?.to_string(),
                            arguments: serde_json::from_str(
                                c["function"]["arguments"].as_str().unwrap_or("{}"),
                            )
                            .unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = Usage {
            input_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        let outcome = if calls.is_empty() {
            CompletionOutcome::Final(content)
        } else {
            CompletionOutcome::ToolCalls {
                content: if content.is_empty() { None } else { Some(content) },
                calls,
            }
        };

        Ok(ProviderResponse { outcome, usage })
    }
}

//! Plan → retrieve → enrich → cache → complete.
//!
//! Cache-first, build-on-miss: a version-keyed cache lookup happens before
//! any retrieval or completion work, and only a miss pays for the rest of
//! the pipeline.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::extractor::extract_first_json_object;
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::repo::{CacheStore, DocumentStore};
use crate::graph_service::GraphService;
use crate::repo::GraphStore;
use crate::retry;
use crate::types::{
    ChatMessage, ChatOptions, NormalizedPlan, Plan, RagInfo, RequestContext, Response, Role,
};

const PLAN_SYSTEM_PROMPT: &str = r#"You analyze a conversation and decide whether retrieval is needed to answer \
it. Respond with a single JSON object matching this schema and nothing else: {"should_search": boolean, \
"search_query": string, "identified_entities": [string], "top_k": number?}."#;

const COMPLETION_SYSTEM_PREAMBLE: &str =
    "You are a helpful assistant. Use the following retrieved context, if any, to answer the user.\n\n";

pub struct ChatbotOrchestrator<D, C, G, E, L>
where
    D: DocumentStore,
    C: CacheStore,
    G: GraphStore,
    E: EmbeddingProvider,
    L: LlmProvider,
{
    documents: Arc<D>,
    cache: Arc<C>,
    graph_service: Arc<GraphService<G, E, L>>,
    embeddings: Arc<E>,
    llm: Arc<L>,
    top_k_range: (u32, u32),
    default_top_k: u32,
    cache_version: &'static str,
}

impl<D, C, G, E, L> ChatbotOrchestrator<D, C, G, E, L>
where
    D: DocumentStore,
    C: CacheStore,
    G: GraphStore,
    E: EmbeddingProvider,
    L: LlmProvider,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<D>,
        cache: Arc<C>,
        graph_service: Arc<GraphService<G, E, L>>,
        embeddings: Arc<E>,
        llm: Arc<L>,
        top_k_range: (u32, u32),
        default_top_k: u32,
        cache_version: &'static str,
    ) -> Self {
        ChatbotOrchestrator { documents, cache, graph_service, embeddings, llm, top_k_range, default_top_k, cache_version }
    }

    pub async fn process_rag_request(&self, messages: &[ChatMessage], context: RequestContext) -> Result<Response> {
        let user_message = last_user_message(messages);

        let plan = self.plan(messages, &user_message).await;
        let normalized = self.normalize_plan(plan, &user_message);

        let hash = self.cache_key(messages, &context, &normalized);

        if let Some(entry) = self.cache.find_by_hash(&hash).await? {
            tracing::info!(hash, "cache hit");
            self.cache.increment_hit_count(&hash).await?;
            return Ok(Response {
                id: "cached".to_string(),
                content: entry.response,
                usage: None,
                rag: RagInfo { results: Vec::new(), plan: normalized },
            });
        }
        tracing::info!(hash, "cache miss");

        let screen = context.get("screen").and_then(|v| v.as_str());

        let mut rag_context = String::new();
        let mut results = Vec::new();
        if normalized.should_search {
            let embedding =
                retry::with_retry("query_embedding", || self.embeddings.create_embedding(&normalized.search_query))
                    .await?;
            results =
                self.documents.hybrid_search(&normalized.search_query, &embedding, normalized.top_k, screen).await?;
            rag_context =
                results.iter().map(|hit| hit.document.content.as_str()).collect::<Vec<_>>().join("\n\n");
        }

        if !normalized.identified_entities.is_empty() {
            if let Some(graph_context) =
                self.graph_service.get_context_for_entities(&normalized.identified_entities).await?
            {
                rag_context = if rag_context.is_empty() {
                    graph_context
                } else {
                    format!("{rag_context}\n\n{graph_context}")
                };
            }
        }

        let system_content = format!("{COMPLETION_SYSTEM_PREAMBLE}{rag_context}");
        let mut completion_messages = Vec::with_capacity(messages.len() + 1);
        completion_messages.push(ChatMessage { role: Role::System, content: system_content });
        completion_messages.extend_from_slice(messages);

        let completion_options = ChatOptions { temperature: None, max_tokens: None };
        let llm = &self.llm;
        let final_response = retry::with_retry("completion", || {
            llm.chat_completion(&completion_messages, Some(completion_options.clone()))
        })
        .await?;

        self.cache.save(&hash, &user_message, &context, &final_response.content).await?;

        Ok(Response {
            id: final_response.id,
            content: final_response.content,
            usage: final_response.usage,
            rag: RagInfo { results, plan: normalized },
        })
    }

    async fn plan(&self, messages: &[ChatMessage], user_message: &str) -> Plan {
        let mut planner_messages = Vec::with_capacity(messages.len() + 1);
        planner_messages.push(ChatMessage { role: Role::System, content: PLAN_SYSTEM_PROMPT.to_string() });
        planner_messages.extend_from_slice(messages);
        let options = ChatOptions { temperature: Some(0.0), max_tokens: None };

        let llm = &self.llm;
        let response =
            retry::with_retry("plan", || llm.chat_completion(&planner_messages, Some(options.clone()))).await;

        let fallback = || Plan {
            should_search: true,
            search_query: Some(user_message.to_string()),
            identified_entities: Vec::new(),
            top_k: None,
        };

        match response {
            Ok(response) => match parse_plan(&response.content) {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(error = %err, "plan did not parse, falling back to default search plan");
                    fallback()
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "planner call failed, falling back to default search plan");
                fallback()
            }
        }
    }

    fn normalize_plan(&self, plan: Plan, user_message: &str) -> NormalizedPlan {
        let (min, max) = self.top_k_range;
        let top_k = match plan.top_k {
            Some(value) if value.is_finite() => (value.floor() as i64).clamp(i64::from(min), i64::from(max)) as u32,
            _ => self.default_top_k,
        };
        NormalizedPlan {
            should_search: plan.should_search,
            search_query: plan.search_query.unwrap_or_else(|| user_message.to_string()),
            identified_entities: plan.identified_entities,
            top_k,
        }
    }

    fn cache_key(&self, messages: &[ChatMessage], context: &RequestContext, plan: &NormalizedPlan) -> String {
        let payload = serde_json::json!({
            "cacheVersion": self.cache_version,
            "messages": messages,
            "context": context,
            "plan": plan,
        });
        let stable = crate::json_stable::to_stable_string(&payload);
        let digest = Sha256::digest(stable.as_bytes());
        hex::encode(digest)
    }
}

fn parse_plan(raw: &str) -> Result<Plan> {
    let json = extract_first_json_object(raw)
        .ok_or_else(|| crate::error::RagError::PlanParseError("no JSON object found in response".into()))?;
    serde_json::from_str(json).map_err(|e| crate::error::RagError::PlanParseError(e.to_string()))
}

fn last_user_message(messages: &[ChatMessage]) -> String {
    messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.clone()).unwrap_or_default()
}

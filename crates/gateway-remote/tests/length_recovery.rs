use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use gateway_core::cancel::CancelToken;
use gateway_core::dispatch::{FinishReason, GenerationDispatcher, StreamChunk};
use gateway_core::model::{LLMModel, RemoteChatModel, UserGptContext, UserGptProfile};
use gateway_core::store::{ConversationStore, Role};
use gateway_core::tokenizer::Tokenizer;
use gateway_remote::{RemoteDispatcher, TiktokenTokenizer};
use gateway_store::InMemoryConversationStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Responds to the first chat-completion POST with a length-truncated
/// stream, and to every subsequent request with a normal completion,
/// so the dispatcher's continuation loop can be observed end to end.
struct TruncateThenFinish {
    calls: AtomicUsize,
}

impl Respond for TruncateThenFinish {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let body = if call == 0 {
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello, \"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n\
             data: [DONE]\n\n"
        } else {
            "data: {\"choices\":[{\"delta\":{\"content\":\"world!\"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
             data: [DONE]\n\n"
        };
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }
}

fn test_context(api_url: String) -> UserGptContext {
    let mut profile = UserGptProfile::default();
    profile.user_id = "u1".to_string();
    profile.room_id = "r1".to_string();
    let model = LLMModel::Remote(RemoteChatModel {
        name: "gpt-test".to_string(),
        api_url,
        api_key_env: "TEST_API_KEY".to_string(),
        max_total_tokens: 4096,
        max_tokens_per_request: 256,
        token_margin: 64,
    });
    UserGptContext::new(profile, model)
}

#[tokio::test]
async fn length_truncation_is_recovered_into_a_single_continuous_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(TruncateThenFinish { calls: AtomicUsize::new(0) })
        .mount(&server)
        .await;

    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let tokenizer: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::cl100k_base());
    let dispatcher = RemoteDispatcher::new(store.clone(), tokenizer, "test-key".to_string());

    let ctx = test_context(format!("{}/v1/chat/completions", server.uri()));
    store.create(&ctx).await.unwrap();
    store
        .append(
            &ctx.user_profile.user_id,
            &ctx.user_profile.room_id,
            Role::User,
            gateway_core::model::MessageHistory::new("user", "say hello", 2, true),
        )
        .await
        .unwrap();
    let ctx = store.read(&ctx.user_profile.user_id, &ctx.user_profile.room_id).await.unwrap().unwrap();

    let mut stream = dispatcher.generate(&ctx, CancelToken::new()).await.unwrap();

    let mut full_text = String::new();
    let mut finish_reason = None;
    while let Some(item) = stream.next().await {
        match item.unwrap() {
            StreamChunk::Delta(text) => full_text.push_str(&text),
            StreamChunk::Done { finish_reason: reason } => {
                finish_reason = Some(reason);
                break;
            }
        }
    }

    assert_eq!(full_text, "Hello, world!");
    assert_eq!(finish_reason, Some(FinishReason::Stop));

    let stored = store.read(&"u1".to_string(), &"r1".to_string()).await.unwrap().unwrap();
    assert_eq!(stored.gpt_message_histories.len(), 1);
    assert_eq!(stored.gpt_message_histories[0].content, "Hello, world!");
}

#[tokio::test]
async fn content_filter_pops_the_pending_user_message_and_surfaces_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"choices\":[{\"delta\":{\"content\":\"uh\"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"content_filter\"}]}\n\n\
             data: [DONE]\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let tokenizer: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::cl100k_base());
    let dispatcher = RemoteDispatcher::new(store.clone(), tokenizer, "test-key".to_string());

    let ctx = test_context(format!("{}/v1/chat/completions", server.uri()));
    store.create(&ctx).await.unwrap();
    store
        .append(
            &ctx.user_profile.user_id,
            &ctx.user_profile.room_id,
            Role::User,
            gateway_core::model::MessageHistory::new("user", "a risky question", 4, true),
        )
        .await
        .unwrap();
    let ctx = store.read(&ctx.user_profile.user_id, &ctx.user_profile.room_id).await.unwrap().unwrap();

    let mut stream = dispatcher.generate(&ctx, CancelToken::new()).await.unwrap();
    let mut finish_reason = None;
    while let Some(item) = stream.next().await {
        if let StreamChunk::Done { finish_reason: reason } = item.unwrap() {
            finish_reason = Some(reason);
            break;
        }
    }

    assert_eq!(finish_reason, Some(FinishReason::ContentFilter));

    let stored = store.read(&"u1".to_string(), &"r1".to_string()).await.unwrap().unwrap();
    assert!(stored.user_message_histories.is_empty());
}

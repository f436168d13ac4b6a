//! Integration tests for the REST API and the client library.
//!
//! Each test spins up an Axum server on a random port and drives it through
//! `ApiClient` and the client-side controllers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;

use taskflow::api::{AppState, build_router};
use taskflow::auth::model::SignupRequest;
use taskflow::auth::{RateLimiter, TokenIssuer};
use taskflow::chat::ChatService;
use taskflow::client::kanban::{Board, handle_drop};
use taskflow::client::{
    ApiClient, AuthSession, ChatApi, ChatController, ChatStore, ConversationId, DropTarget,
    LogoutReason, TaskApi, TaskCache, TaskForm, ToastQueue,
};
use taskflow::config::{ChatConfig, ClientConfig};
use taskflow::error::{ClientError, LlmError};
use taskflow::llm::{
    FinishReason, LlmProvider, Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};
use taskflow::store::{Database, LibSqlBackend};
use taskflow::tasks::{NewTask, Priority, TaskFilters, TaskPatch, TaskStatus};
use taskflow::tools::ToolRegistry;
use taskflow::tools::builtin::register_task_tools;

/// Stub model: "add <title>" becomes an `add_task` call, anything else is
/// answered directly. After a tool result it confirms.
struct StubLlm;

fn reply(content: Option<String>, tool_calls: Vec<ToolCall>) -> ToolCompletionResponse {
    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolUse
    };
    ToolCompletionResponse {
        content,
        tool_calls,
        input_tokens: 0,
        output_tokens: 0,
        finish_reason,
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let last = request
            .messages
            .last()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "stub".into(),
                reason: "empty conversation".into(),
            })?;
        if last.role == Role::Tool {
            return Ok(reply(Some("All set!".into()), vec![]));
        }
        match last.content.strip_prefix("add ") {
            Some(title) => Ok(reply(
                None,
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "add_task".into(),
                    arguments: json!({"title": title, "priority": 1}),
                }],
            )),
            None => Ok(reply(Some(format!("You said: {}", last.content)), vec![])),
        }
    }
}

/// Start a server on a random port and return its base URL.
async fn start_server(auth_rate_limit: usize) -> String {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let tools = Arc::new(ToolRegistry::new());
    register_task_tools(&tools, Arc::clone(&db));
    let chat = ChatService::new(
        Arc::clone(&db),
        Arc::new(StubLlm),
        tools,
        ChatConfig::default(),
    );
    let state = AppState {
        db,
        tokens: TokenIssuer::new(
            SecretString::from("integration-secret"),
            Duration::from_secs(600),
        ),
        rate_limiter: Arc::new(RateLimiter::new(auth_rate_limit, Duration::from_secs(60))),
        chat: Arc::new(chat),
    };
    let app = build_router(state, &["http://localhost:3000".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(
        &ClientConfig {
            base_url: base_url.to_string(),
            token_file: None,
        },
        AuthSession::in_memory(),
    )
}

async fn signed_up(base_url: &str, email: &str) -> ApiClient {
    let client = client(base_url);
    client
        .signup(&SignupRequest {
            email: email.to_string(),
            password: "correct-horse".to_string(),
            full_name: Some("Test User".to_string()),
        })
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn signup_login_and_me() {
    let base = start_server(100).await;
    let alice = signed_up(&base, "Alice@Example.com").await;

    let me = alice.me().await.unwrap();
    assert_eq!(me.email, "alice@example.com");
    assert_eq!(me.full_name.as_deref(), Some("Test User"));

    let again = client(&base);
    let err = again
        .signup(&SignupRequest {
            email: "alice@example.com".into(),
            password: "another-password".into(),
            full_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 409, .. }));

    let err = again.login("alice@example.com", "wrong-password").await.unwrap_err();
    assert!(
        matches!(err, ClientError::Api { status: 401, ref detail } if detail == "Incorrect email or password")
    );

    // A mistyped login while signed in must not sign the user out.
    assert!(alice.login("alice@example.com", "wrong-password").await.is_err());
    assert!(alice.session().is_authenticated().await);
    assert_eq!(alice.me().await.unwrap().id, me.id);

    again.login("alice@example.com", "correct-horse").await.unwrap();
    assert_eq!(again.me().await.unwrap().id, me.id);

    let bye = again.logout().await.unwrap();
    assert_eq!(bye.message, "Successfully logged out");
    assert!(!again.session().is_authenticated().await);
}

#[tokio::test]
async fn weak_password_and_bad_email_are_rejected() {
    let base = start_server(100).await;
    let c = client(&base);
    let err = c
        .signup(&SignupRequest {
            email: "bob@example.com".into(),
            password: "short".into(),
            full_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, .. }));

    let err = c
        .signup(&SignupRequest {
            email: "not-an-email".into(),
            password: "long-enough".into(),
            full_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, .. }));
}

#[tokio::test]
async fn auth_endpoints_are_rate_limited() {
    let base = start_server(2).await;
    let c = client(&base);
    for _ in 0..2 {
        let err = c.login("nobody@example.com", "whatever-pass").await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 401, .. }));
    }
    let err = c.login("nobody@example.com", "whatever-pass").await.unwrap_err();
    match err {
        ClientError::Api { status, detail } => {
            assert_eq!(status, 429);
            assert_eq!(detail, "Rate limit exceeded. Try again in 60 seconds.");
        }
        other => panic!("expected 429, got {other:?}"),
    }
}

#[tokio::test]
async fn task_board_flow() {
    let base = start_server(100).await;
    let api = Arc::new(signed_up(&base, "board@example.com").await);
    let toasts = ToastQueue::new();
    let cache = TaskCache::new(Arc::clone(&api) as Arc<dyn TaskApi>, Arc::clone(&toasts));
    let all = TaskFilters::default();
    assert!(cache.tasks(&all).await.unwrap().is_empty());

    let err = cache.create(NewTask::new("")).await.unwrap_err();
    assert_eq!(err.to_string(), "Title is required");

    let milk = cache
        .create(NewTask::new("Buy milk").with_priority(Priority::High))
        .await
        .unwrap();
    assert_eq!(milk.status, TaskStatus::Pending);
    cache.create(NewTask::new("Write report")).await.unwrap();

    let tasks = cache.cached(&all).await.unwrap();
    let board = Board::partition(&tasks);
    assert_eq!(board.column(TaskStatus::Pending).len(), 2);
    assert_eq!(
        board.column(TaskStatus::Pending)
            .iter()
            .find(|t| t.id == milk.id)
            .and_then(|t| t.priority)
            .map(|p| p.label()),
        Some("High")
    );

    let moved = handle_drop(&cache, &tasks, milk.id, Some(DropTarget::Column(TaskStatus::Completed)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.status, TaskStatus::Completed);
    assert_eq!(moved.title, "Buy milk");

    let done = TaskFilters {
        status: Some(TaskStatus::Completed),
        ..Default::default()
    };
    assert_eq!(cache.tasks(&done).await.unwrap().len(), 1);

    let searched = api
        .list_tasks(&TaskFilters {
            search: Some("REPORT".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(searched.len(), 1);

    cache.delete(milk.id).await.unwrap();
    assert_eq!(cache.cached(&all).await.unwrap().len(), 1);
    assert!(toasts.pending().await.is_empty());
}

#[tokio::test]
async fn edit_form_can_clear_optional_fields() {
    let base = start_server(100).await;
    let api = signed_up(&base, "editor@example.com").await;
    let task = api
        .create_task(
            &NewTask::new("Plan trip")
                .with_description("Book flights")
                .with_priority(Priority::Low),
        )
        .await
        .unwrap();

    let mut form = TaskForm::from_task(&task);
    form.description.clear();
    form.priority.clear();
    let updated = api.update_task(task.id, &form.to_patch().unwrap()).await.unwrap();
    assert_eq!(updated.description, None);
    assert_eq!(updated.priority, None);

    let stored = api.list_tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(stored[0].description, None);
    assert_eq!(stored[0].priority, None);

    // A patch without those fields leaves them untouched.
    let renamed = api
        .update_task(
            task.id,
            &TaskPatch {
                description: Some(Some("Window seat".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let renamed = api
        .update_task(
            renamed.id,
            &TaskPatch {
                title: Some("Plan holiday".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.description.as_deref(), Some("Window seat"));
}

#[tokio::test]
async fn failed_mutation_rolls_back() {
    let base = start_server(100).await;
    let api = Arc::new(signed_up(&base, "rollback@example.com").await);
    let toasts = ToastQueue::new();
    let cache = TaskCache::new(Arc::clone(&api) as Arc<dyn TaskApi>, Arc::clone(&toasts));
    let all = TaskFilters::default();
    let task = cache.create(NewTask::new("Keep me")).await.unwrap();
    let before = cache.cached(&all).await.unwrap();

    // Deleting a task that does not exist fails with 404.
    assert!(cache.delete(task.id + 1000).await.is_err());
    assert_eq!(cache.cached(&all).await.unwrap(), before);
    assert_eq!(toasts.pending().await.len(), 1);
}

#[tokio::test]
async fn users_are_isolated() {
    let base = start_server(100).await;
    let alice = signed_up(&base, "alice@example.com").await;
    let bob = signed_up(&base, "bob@example.com").await;

    let task = alice.create_task(&NewTask::new("Private")).await.unwrap();

    assert!(bob.list_tasks(&TaskFilters::default()).await.unwrap().is_empty());
    let err = bob.update_status(task.id, TaskStatus::Completed).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
    let err = bob.delete_task(task.id).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));

    let still = alice.list_tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(still[0].status, TaskStatus::Pending);
}

#[tokio::test]
async fn rejected_token_triggers_logout() {
    let base = start_server(100).await;
    let session = AuthSession::in_memory();
    session.set_token("not-a-real-token".into()).await.unwrap();
    let c = ApiClient::new(
        &ClientConfig {
            base_url: base,
            token_file: None,
        },
        Arc::clone(&session),
    );
    let mut logout = session.subscribe();

    let err = c.list_tasks(&TaskFilters::default()).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(logout.recv().await.unwrap(), LogoutReason::Expired);
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn chat_assistant_creates_tasks() {
    let base = start_server(100).await;
    let api = Arc::new(signed_up(&base, "chat@example.com").await);
    let me = api.me().await.unwrap();

    let controller = ChatController::new(
        Arc::clone(&api) as Arc<dyn ChatApi>,
        Arc::clone(api.session()),
        Arc::new(ChatStore::new()),
        me.id,
    );
    let mut refresh = controller.subscribe_task_refresh();

    let temp = controller.new_conversation();
    let response = controller
        .send_message("add Buy milk")
        .await
        .unwrap()
        .unwrap();
    assert!(response.success);
    assert!(response.metadata.has_tool_calls);
    assert_eq!(response.message.content, "All set!");
    refresh.try_recv().unwrap();

    let state = controller.store().state();
    let server_id = ConversationId::Server(response.conversation_id);
    assert_eq!(state.active.as_ref(), Some(&server_id));
    assert!(state.conversation(&temp).is_none());

    let tasks = api.list_tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Buy milk");
    assert_eq!(tasks[0].priority, Some(Priority::High));

    // Second turn lands in the same conversation.
    let second = controller.send_message("thanks").await.unwrap().unwrap();
    assert_eq!(second.conversation_id, response.conversation_id);
    assert_eq!(second.message.content, "You said: thanks");

    controller.fetch_conversations().await.unwrap();
    controller.load_conversation(server_id.clone()).await.unwrap();
    let state = controller.store().state();
    assert_eq!(state.conversations.len(), 1);
    assert_eq!(state.conversations[0].title, "add Buy milk");
    assert_eq!(state.messages.len(), 4);

    controller.delete_conversation(server_id).await.unwrap();
    assert!(api.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn chat_rejects_mismatched_user_ids() {
    let base = start_server(100).await;
    let alice = signed_up(&base, "alice@example.com").await;
    let me = alice.me().await.unwrap();
    let header = alice.session().authorization().await.unwrap();
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{base}/api/{}/chat", me.id))
        .header("Authorization", &header)
        .json(&json!({"user_id": me.id + 1, "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http
        .post(format!("{base}/api/{}/chat", me.id + 1))
        .header("Authorization", &header)
        .json(&json!({"user_id": me.id + 1, "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].is_string());
}

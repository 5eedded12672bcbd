use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Cursor;

use cadai_config::{AutomationBackend, AutomationConfig};
use cadai_engine::command::CommandBus;
use cadai_frontend::cli::{Assistant, LoopControl};
use cadai_frontend::interrupt::Interrupt;
use cadai_frontend::loader::connect_client;
use cadai_llm::backend::ChatBackend;
use cadai_llm::catalog::{TOOL_NAMES, tool_catalog};
use cadai_llm::dispatcher::PromptDispatcher;
use cadai_llm::errors::LlmError;
use cadai_llm::types::{ChatReply, ChatRequest, ToolCall};
use serde_json::{Value, json};

/// 按顺序回放预设回复的聊天后端。
struct ReplayBackend {
    replies: RefCell<VecDeque<Result<Vec<ToolCall>, LlmError>>>,
}

impl ReplayBackend {
    fn new(replies: Vec<Result<Vec<ToolCall>, LlmError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
        }
    }
}

impl ChatBackend for ReplayBackend {
    fn describe(&self) -> String {
        "replay".to_string()
    }

    fn chat(&self, _request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let next = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        next.map(|tool_calls| ChatReply {
            content: String::new(),
            tool_calls,
        })
    }
}

fn call(name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        arguments,
    }
}

fn assistant(
    backend: AutomationBackend,
    replies: Vec<Result<Vec<ToolCall>, LlmError>>,
    cache_path: &std::path::Path,
) -> Assistant {
    let client = connect_client(&AutomationConfig {
        backend,
        ..AutomationConfig::default()
    });
    let dispatcher = PromptDispatcher::new(Box::new(ReplayBackend::new(replies)), "llama3");
    Assistant::new(client, dispatcher, cache_path)
}

fn entity_count(assistant: &Assistant) -> usize {
    assistant
        .client()
        .model_space()
        .map(|items| items.len())
        .unwrap_or(0)
}

#[test]
fn catalog_matches_command_bus() {
    let bus = CommandBus::new();
    for tool in tool_catalog() {
        assert!(
            bus.supports(tool.function.name),
            "{} is declared to the model but cannot be dispatched",
            tool.function.name
        );
    }
    assert_eq!(bus.available_commands().count(), TOOL_NAMES.len());
}

#[test]
fn compound_request_draws_each_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut assistant = assistant(
        AutomationBackend::Offline,
        vec![Ok(vec![
            call("draw_line", json!({"start": [0, 0, 0], "end": [10, 10, 0]})),
            call("draw_circle", json!({"center": [5, 5, 0], "radius": 2})),
        ])],
        &dir.path().join("cache.json"),
    );

    let mut out = Vec::new();
    let control = assistant
        .handle_line("Draw a line from 0,0 to 10,10 and a circle at 5,5 with radius 2", &mut out)
        .unwrap();
    assert_eq!(control, LoopControl::Continue);
    assert_eq!(entity_count(&assistant), 2);

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("执行: draw_line"));
    assert!(text.contains("执行: draw_circle"));
}

#[test]
fn unsupported_call_is_reported_and_others_still_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut assistant = assistant(
        AutomationBackend::Offline,
        Vec::new(),
        &dir.path().join("cache.json"),
    );

    let outcomes = assistant.execute_calls(&[
        call("draw_polygon", json!({"sides": 6, "radius": 3})),
        call("draw_point", json!({"point": [1, 1, 0]})),
        call("draw_point", json!([1, 2, 0])),
        call("draw_line", json!({"start": [0, 0], "end": [5, 0]})),
    ]);
    assert_eq!(outcomes.len(), 4);
    assert!(!outcomes[0].response.supported);
    assert!(!outcomes[0].response.success);
    assert!(outcomes[1].response.success);
    assert!(outcomes[2].response.supported);
    assert!(!outcomes[2].response.success);
    assert!(outcomes[3].response.success);
    assert_eq!(entity_count(&assistant), 2);
}

#[test]
fn loop_survives_backend_errors_and_exits_on_quit() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    let mut assistant = assistant(
        AutomationBackend::Offline,
        vec![
            Err(LlmError::Status {
                status: 500,
                body: "model crashed".to_string(),
            }),
            Ok(Vec::new()),
            Ok(vec![call("draw_point", json!({"point": [2, 3]}))]),
        ],
        &cache_path,
    );

    let input = Cursor::new(
        "draw a line\n\nhello\nput a point at 2,3\n/cache\nquit\ndraw after quit\n",
    );
    let mut out = Vec::new();
    assistant.run_loop(input, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("错误: chat backend returned http 500"));
    assert!(text.contains("模型未识别出任何 CAD 命令"));
    assert!(text.contains("实体总数: 1"));
    assert_eq!(entity_count(&assistant), 1);

    let cached = assistant.load_cache().unwrap();
    assert_eq!(cached.entities.len(), 1);
    assert_eq!(cached.entities[0].object_name, "AcDbPoint");
}

#[test]
fn disconnected_assistant_reports_noop_drawing() {
    let dir = tempfile::tempdir().unwrap();
    let mut assistant = assistant(
        AutomationBackend::Disabled,
        vec![Ok(vec![call("draw_point", json!({"point": [0, 0, 0]}))])],
        &dir.path().join("cache.json"),
    );

    let mut out = Vec::new();
    assistant.run_loop(Cursor::new("draw a point\n"), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("无法连接 AutoCAD"));
    assert!(text.contains("✗"));

    let trimmed = assistant.handle_line("/trim", &mut Vec::new()).unwrap();
    assert_eq!(trimmed, LoopControl::Continue);
}

#[test]
fn summary_before_any_snapshot_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut assistant = assistant(
        AutomationBackend::Offline,
        Vec::new(),
        &dir.path().join("never-written.json"),
    );
    let mut out = Vec::new();
    assistant.handle_line("/summary", &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("缓存尚未生成"));
    assert!(text.contains("实体总数: 0"));
}

#[test]
fn invalid_utf8_line_does_not_end_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut assistant = assistant(
        AutomationBackend::Offline,
        vec![
            Ok(Vec::new()),
            Ok(vec![call("draw_point", json!({"point": [4, 4, 0]}))]),
        ],
        &dir.path().join("cache.json"),
    );

    let mut input = vec![0xff, 0xfe, b'\n'];
    input.extend_from_slice(b"hello\nquit\n");
    let mut out = Vec::new();
    assistant
        .run_loop(Cursor::new(input), &mut out)
        .expect("undecodable input must not end the loop");

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("模型未识别出任何 CAD 命令"));
    assert_eq!(entity_count(&assistant), 1);
}

#[test]
fn interrupted_loop_stops_before_reading_more_input() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = Interrupt::default();
    let mut assistant = assistant(
        AutomationBackend::Offline,
        vec![Ok(vec![call("draw_point", json!({"point": [0, 0]}))])],
        &dir.path().join("cache.json"),
    )
    .with_interrupt(interrupt.clone());

    assert!(!interrupt.request());
    let mut out = Vec::new();
    assistant
        .run_loop(Cursor::new("draw a point\n"), &mut out)
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("已中断"));
    assert_eq!(entity_count(&assistant), 0);
}

use std::collections::HashMap;

use cadai_core::entity::EntityHandle;
use cadai_core::geometry::Point3;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::AutomationClient;

pub const DRAW_LINE: &str = "draw_line";
pub const DRAW_CIRCLE: &str = "draw_circle";
pub const DRAW_POINT: &str = "draw_point";
pub const DRAW_ARC: &str = "draw_arc";
pub const DRAW_SPLINE: &str = "draw_spline";

/// 一次命令请求。`args` 为模型给出的原始参数，通常是 JSON 对象。
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Value,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub supported: bool,
    pub handle: Option<EntityHandle>,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            supported: true,
            handle: None,
            message: Some(message.into()),
        }
    }

    pub fn created(handle: EntityHandle, message: impl Into<String>) -> Self {
        Self {
            handle: Some(handle),
            ..Self::ok(message)
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            supported: true,
            handle: None,
            message: Some(message.into()),
        }
    }

    pub fn unsupported(name: &str) -> Self {
        Self {
            success: false,
            supported: false,
            handle: None,
            message: Some(format!("不支持的命令: {name}")),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub client: &'a mut AutomationClient,
}

/// 按工具名分发命令。未知名称返回“不支持”，参数错误返回失败，均不会部分执行。
pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(DrawLineCommand);
        bus.register(DrawCircleCommand);
        bus.register(DrawPointCommand);
        bus.register(DrawArcCommand);
        bus.register(DrawSplineCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::unsupported(&request.name)
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }

    pub fn supports(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 坐标参数：三个分量，或两个分量（z 补 0）。
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "Vec<f64>")]
struct PointArg(Point3);

impl TryFrom<Vec<f64>> for PointArg {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Point3::from_slice(&values)
            .map(PointArg)
            .ok_or_else(|| format!("坐标需要 2 或 3 个分量，实际为 {}", values.len()))
    }
}

fn parse_args<T: DeserializeOwned>(request: &CommandRequest) -> Result<T, CommandResponse> {
    serde_json::from_value(request.args.clone())
        .map_err(|err| CommandResponse::err(format!("{} 参数无效: {err}", request.name)))
}

fn outcome(handle: Option<EntityHandle>, what: &str) -> CommandResponse {
    match handle {
        Some(handle) => CommandResponse::created(handle.clone(), format!("已创建{what} {handle}")),
        None => CommandResponse::err(format!("{what}未创建（未连接或自动化调用失败）")),
    }
}

#[derive(Deserialize)]
struct DrawLineArgs {
    start: PointArg,
    end: PointArg,
}

struct DrawLineCommand;

impl CommandHandler for DrawLineCommand {
    fn name(&self) -> &'static str {
        DRAW_LINE
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let args: DrawLineArgs = match parse_args(request) {
            Ok(args) => args,
            Err(response) => return response,
        };
        outcome(context.client.add_line(args.start.0, args.end.0), "直线")
    }
}

#[derive(Deserialize)]
struct DrawCircleArgs {
    center: PointArg,
    radius: f64,
}

struct DrawCircleCommand;

impl CommandHandler for DrawCircleCommand {
    fn name(&self) -> &'static str {
        DRAW_CIRCLE
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let args: DrawCircleArgs = match parse_args(request) {
            Ok(args) => args,
            Err(response) => return response,
        };
        outcome(context.client.add_circle(args.center.0, args.radius), "圆")
    }
}

#[derive(Deserialize)]
struct DrawPointArgs {
    point: PointArg,
}

struct DrawPointCommand;

impl CommandHandler for DrawPointCommand {
    fn name(&self) -> &'static str {
        DRAW_POINT
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let args: DrawPointArgs = match parse_args(request) {
            Ok(args) => args,
            Err(response) => return response,
        };
        outcome(context.client.add_point(args.point.0), "点")
    }
}

/// 圆弧角度以度为单位传入，转换为弧度后交给会话。
#[derive(Deserialize)]
struct DrawArcArgs {
    center: PointArg,
    radius: f64,
    start_angle: f64,
    end_angle: f64,
}

struct DrawArcCommand;

impl CommandHandler for DrawArcCommand {
    fn name(&self) -> &'static str {
        DRAW_ARC
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let args: DrawArcArgs = match parse_args(request) {
            Ok(args) => args,
            Err(response) => return response,
        };
        let handle = context.client.add_arc(
            args.center.0,
            args.radius,
            args.start_angle.to_radians(),
            args.end_angle.to_radians(),
        );
        outcome(handle, "圆弧")
    }
}

#[derive(Deserialize)]
struct DrawSplineArgs {
    points: Vec<PointArg>,
}

struct DrawSplineCommand;

impl CommandHandler for DrawSplineCommand {
    fn name(&self) -> &'static str {
        DRAW_SPLINE
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let args: DrawSplineArgs = match parse_args(request) {
            Ok(args) => args,
            Err(response) => return response,
        };
        if args.points.len() < 2 {
            return CommandResponse::err("样条至少需要两个拟合点");
        }
        let points: Vec<Point3> = args.points.iter().map(|p| p.0).collect();
        outcome(context.client.add_spline(&points), "样条")
    }
}

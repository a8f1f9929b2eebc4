use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fleet_domain::Value;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// A handler's result: `Ok` becomes `[true, cid, ...result]`; `Err` becomes
/// `[false, cid, message]`.
pub type HandlerResult = Result<Vec<Value>, String>;

/// A handler invoked inline by the receive loop; subsequent frames on this
/// connection wait behind it.
#[derive(Clone)]
pub struct ImmediateHandler(Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>);

/// A handler spawned as an independent task; the receive loop continues
/// accepting further frames while it runs.
#[derive(Clone)]
pub struct BackgroundHandler(Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>);

impl ImmediateHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |args| Box::pin(f(args))))
    }

    pub async fn call(&self, args: Vec<Value>) -> HandlerResult {
        (self.0)(args).await
    }
}

impl BackgroundHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |args| Box::pin(f(args))))
    }

    pub async fn call(&self, args: Vec<Value>) -> HandlerResult {
        (self.0)(args).await
    }
}

/// A session's route table: command name -> handler, split by dispatch
/// mode. A name may only be registered once, in one of the two tables.
#[derive(Clone, Default)]
pub struct Routes {
    immediate: HashMap<String, ImmediateHandler>,
    background: HashMap<String, BackgroundHandler>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_immediate(mut self, name: &str, handler: ImmediateHandler) -> Self {
        self.immediate.insert(name.to_string(), handler);
        self
    }

    pub fn on_background(mut self, name: &str, handler: BackgroundHandler) -> Self {
        self.background.insert(name.to_string(), handler);
        self
    }

    pub fn immediate(&self, name: &str) -> Option<&ImmediateHandler> {
        self.immediate.get(name)
    }

    pub fn background(&self, name: &str) -> Option<&BackgroundHandler> {
        self.background.get(name)
    }
}

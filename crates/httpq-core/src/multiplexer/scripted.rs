//! In-memory multiplexer for unit tests. Tests keep a clone to script
//! completions and inspect what the registry attached.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::MultiplexerError;
use crate::transfer::{AddressFamily, TransferOptions, TransferProgress};

use super::{
    HookSender, Interest, Message, Multiplexer, NativeHandle, PerformStatus, Readiness, Socket,
    TransferStatus,
};

pub(crate) struct ScriptedHandle {
    family: AddressFamily,
    user_agent: Option<String>,
    body: Vec<u8>,
    progress: Arc<TransferProgress>,
}

impl ScriptedHandle {
    pub fn new(progress: Arc<TransferProgress>) -> Self {
        Self {
            family: AddressFamily::V4,
            user_agent: None,
            body: Vec::new(),
            progress,
        }
    }
}

impl NativeHandle for ScriptedHandle {
    fn apply_config(&mut self, config: &HttpConfig) -> Result<(), MultiplexerError> {
        if config.user_agent.contains('\0') {
            return Err(MultiplexerError::new("useragent", "embedded NUL"));
        }
        self.user_agent = Some(config.user_agent.clone());
        Ok(())
    }

    fn set_address_family(&mut self, family: AddressFamily) -> Result<(), MultiplexerError> {
        self.family = family;
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.body.clear();
        self.progress.reset();
    }

    fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}

pub(crate) struct ScriptedAttached {
    token: usize,
    handle: ScriptedHandle,
}

#[derive(Default)]
struct Script {
    hooks: Option<HookSender>,
    attached: Vec<usize>,
    done: HashSet<usize>,
    adds: Vec<(usize, AddressFamily)>,
    removes: Vec<usize>,
    messages: VecDeque<Message>,
    bodies: HashMap<usize, Vec<u8>>,
    progress: HashMap<usize, Arc<TransferProgress>>,
    user_agents: HashMap<usize, Option<String>>,
    performed: Vec<Option<Socket>>,
    add_timeout: Option<Duration>,
    timeout_hint: Option<Duration>,
    call_again_rounds: usize,
    fail_next_perform: bool,
    fail_next_add: bool,
}

#[derive(Clone)]
pub(crate) struct ScriptedMultiplexer {
    script: Rc<RefCell<Script>>,
}

impl ScriptedMultiplexer {
    pub fn new() -> Self {
        let script = Script {
            add_timeout: Some(Duration::ZERO),
            ..Script::default()
        };
        Self {
            script: Rc::new(RefCell::new(script)),
        }
    }

    /// Behave like an engine that never reports deadlines on its own.
    pub fn without_add_timeout(self) -> Self {
        self.script.borrow_mut().add_timeout = None;
        self
    }

    pub fn finish(&self, token: u64, status: TransferStatus) {
        let token = token as usize;
        let mut s = self.script.borrow_mut();
        s.done.insert(token);
        s.messages.push_back(Message::Done { token, status });
    }

    pub fn finish_with_body(&self, token: u64, body: &[u8]) {
        self.script
            .borrow_mut()
            .bodies
            .insert(token as usize, body.to_vec());
        self.finish(token, TransferStatus::Ok);
    }

    pub fn push_message(&self, message: Message) {
        self.script.borrow_mut().messages.push_back(message);
    }

    pub fn report_progress(&self, token: u64, done: u64, total: u64) {
        if let Some(p) = self.script.borrow().progress.get(&(token as usize)) {
            p.record(done, total);
        }
    }

    pub fn emit_watch(&self, socket: Socket, interest: Interest) {
        if let Some(h) = &self.script.borrow().hooks {
            h.watch(socket, interest);
        }
    }

    pub fn emit_unwatch(&self, socket: Socket) {
        if let Some(h) = &self.script.borrow().hooks {
            h.unwatch(socket);
        }
    }

    pub fn emit_timeout(&self, after: Option<Duration>) {
        if let Some(h) = &self.script.borrow().hooks {
            h.timeout(after);
        }
    }

    pub fn set_timeout_hint(&self, hint: Option<Duration>) {
        self.script.borrow_mut().timeout_hint = hint;
    }

    pub fn set_call_again(&self, rounds: usize) {
        self.script.borrow_mut().call_again_rounds = rounds;
    }

    pub fn fail_next_perform(&self) {
        self.script.borrow_mut().fail_next_perform = true;
    }

    pub fn fail_next_add(&self) {
        self.script.borrow_mut().fail_next_add = true;
    }

    pub fn attached(&self) -> Vec<u64> {
        self.script
            .borrow()
            .attached
            .iter()
            .map(|t| *t as u64)
            .collect()
    }

    pub fn families_for(&self, token: u64) -> Vec<AddressFamily> {
        self.script
            .borrow()
            .adds
            .iter()
            .filter(|(t, _)| *t == token as usize)
            .map(|(_, f)| *f)
            .collect()
    }

    /// User-agent the handle carried when last attached, if config was applied.
    pub fn user_agent_for(&self, token: u64) -> Option<String> {
        self.script
            .borrow()
            .user_agents
            .get(&(token as usize))
            .cloned()
            .flatten()
    }

    pub fn add_count(&self, token: u64) -> usize {
        self.families_for(token).len()
    }

    pub fn removed(&self) -> Vec<u64> {
        self.script
            .borrow()
            .removes
            .iter()
            .map(|t| *t as u64)
            .collect()
    }

    pub fn performed(&self) -> Vec<Option<Socket>> {
        self.script.borrow().performed.clone()
    }
}

impl Multiplexer for ScriptedMultiplexer {
    type Handle = ScriptedHandle;
    type Attached = ScriptedAttached;

    fn install_hooks(&mut self, hooks: HookSender) -> Result<(), MultiplexerError> {
        self.script.borrow_mut().hooks = Some(hooks);
        Ok(())
    }

    fn create_handle(
        &self,
        url: &str,
        _options: &TransferOptions,
        progress: Arc<TransferProgress>,
    ) -> Result<ScriptedHandle, MultiplexerError> {
        if url.contains("reject") {
            return Err(MultiplexerError::new("url", "rejected by transport"));
        }
        Ok(ScriptedHandle::new(progress))
    }

    fn add(
        &mut self,
        handle: ScriptedHandle,
        token: usize,
    ) -> Result<ScriptedAttached, MultiplexerError> {
        let mut s = self.script.borrow_mut();
        if std::mem::take(&mut s.fail_next_add) {
            return Err(MultiplexerError::new("add", "scripted failure"));
        }
        s.attached.push(token);
        s.done.remove(&token);
        s.adds.push((token, handle.family));
        s.progress.insert(token, Arc::clone(&handle.progress));
        s.user_agents.insert(token, handle.user_agent.clone());
        if let (Some(h), Some(after)) = (&s.hooks, s.add_timeout) {
            h.timeout(Some(after));
        }
        Ok(ScriptedAttached { token, handle })
    }

    fn remove(&mut self, attached: ScriptedAttached) -> Result<ScriptedHandle, MultiplexerError> {
        let ScriptedAttached { token, mut handle } = attached;
        let mut s = self.script.borrow_mut();
        s.attached.retain(|t| *t != token);
        s.done.remove(&token);
        s.removes.push(token);
        if let Some(body) = s.bodies.remove(&token) {
            handle.body = body;
        }
        Ok(handle)
    }

    fn perform(
        &mut self,
        socket: Option<Socket>,
        _readiness: Readiness,
    ) -> Result<PerformStatus, MultiplexerError> {
        let mut s = self.script.borrow_mut();
        s.performed.push(socket);
        if std::mem::take(&mut s.fail_next_perform) {
            return Err(MultiplexerError::new("socket_action", "scripted failure"));
        }
        let running = s.attached.iter().filter(|t| !s.done.contains(t)).count();
        let call_again = s.call_again_rounds > 0;
        if call_again {
            s.call_again_rounds -= 1;
        }
        Ok(PerformStatus {
            running: Some(running),
            call_again,
        })
    }

    fn next_message(&mut self) -> Option<Message> {
        self.script.borrow_mut().messages.pop_front()
    }

    fn recommended_timeout(&mut self) -> Result<Option<Duration>, MultiplexerError> {
        Ok(self.script.borrow().timeout_hint)
    }
}
